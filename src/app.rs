use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Local;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use postwithus::client::editor::{char_count, export_filename, word_count};
use postwithus::client::{
    Calendar, ContentApi, DraftCache, FileKv, KeyValueStore, NoticeKind, Notification,
    Preferences, ProxyClient, ResultsEditor, Screen, Section, Workflow,
};
use postwithus::config::{user_data_file, Config, EnsureOutcome};
use postwithus::logger::init_logger;
use postwithus::models::{
    DocumentAttachment, MediaAttachment, PipelineResult, QuickPostRequest, ScheduleRequest,
};
use postwithus::server;

use crate::{Cli, ClientCommand, Command, DraftAction, PostsAction};

const CLIENT_STATE_FILE: &str = "client_state.json";

pub async fn run(cli: Cli) -> Result<()> {
    // 0) Initialize logger
    init_logger(cli.verbose)?;
    debug!("Logger initialized");

    // 1) Ensure config exists
    let config_outcome: EnsureOutcome = Config::ensure_user_config()?;
    if config_outcome.created {
        println!(
            "Config file created at {}. Please edit it and restart the app.",
            config_outcome.path.display()
        );
        return Ok(());
    }

    let cfg = Config::get_user_config()?;
    debug!("User config loaded");

    match cli.command {
        Command::Serve => server::serve(&cfg).await,
        Command::Client(command) => run_client(&cfg, command).await,
    }
}

/// Client commands talk to the proxy at `server_url` and keep their state in a local file.
async fn run_client(cfg: &Config, command: ClientCommand) -> Result<()> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKv::open(&user_data_file(CLIENT_STATE_FILE)?));
    let api: Arc<dyn ContentApi> = Arc::new(ProxyClient::new(cfg.server_url()?));

    match command {
        ClientCommand::News { topic } => news(api, &topic).await,
        ClientCommand::Generate {
            topic,
            tone,
            audience,
            schedule,
            with_news,
            image,
            save_draft,
            export,
        } => {
            let mut prefs = Preferences::load(kv.as_ref())?;
            if let Some(tone) = tone {
                prefs.default_tone = tone;
            }
            if let Some(audience) = audience {
                prefs.default_audience = audience;
            }
            let results = generate(api, prefs, &topic, schedule, with_news, image).await?;
            if save_draft {
                DraftCache::new(kv.clone()).save(&topic, &results)?;
                println!("Draft saved locally for '{}'.", topic);
            }
            if export {
                let name = export_filename(&topic);
                fs::write(&name, ResultsEditor::new(results).export_json()?)
                    .with_context(|| format!("Failed to write {}", name))?;
                println!("Pipeline exported to {}", name);
            }
            Ok(())
        }
        ClientCommand::QuickPost {
            platform,
            text,
            media,
            documents,
        } => {
            let req = QuickPostRequest {
                content: text.unwrap_or_default(),
                platform,
                media: media
                    .iter()
                    .map(|p| read_media(p))
                    .collect::<Result<Vec<_>>>()?,
                documents: documents
                    .iter()
                    .map(|p| read_document(p))
                    .collect::<Result<Vec<_>>>()?,
            };
            println!("{}", api.quick_post(&req).await?);
            Ok(())
        }
        ClientCommand::Edit {
            file,
            section,
            value,
            hashtags,
        } => edit_section(&file, section, value, hashtags),
        ClientCommand::Posts { action } => posts(api, action).await,
        ClientCommand::Schedule {
            time,
            title,
            platform,
        } => {
            let outcome = api
                .schedule(&ScheduleRequest {
                    schedule_time: Some(time),
                    title,
                    platform,
                    status: None,
                    content_snippet: None,
                })
                .await?;
            if !outcome.is_success() {
                bail!(outcome.message);
            }
            println!(
                "{} (id {})",
                outcome.message,
                outcome.id.unwrap_or_default()
            );
            Ok(())
        }
        ClientCommand::Prefs {
            tone,
            audience,
            name,
        } => {
            let mut prefs = Preferences::load(kv.as_ref())?;
            let changed = tone.is_some() || audience.is_some() || name.is_some();
            if let Some(tone) = tone {
                prefs.default_tone = tone;
            }
            if let Some(audience) = audience {
                prefs.default_audience = audience;
            }
            if let Some(name) = name {
                prefs.user_name = Some(name).filter(|n| !n.trim().is_empty());
            }
            if changed {
                prefs.save(kv.as_ref())?;
                info!("Preferences saved");
            }
            println!("default_tone: {}", prefs.default_tone);
            println!("default_audience: {}", prefs.default_audience);
            println!("user_name: {}", prefs.user_name.as_deref().unwrap_or("-"));
            Ok(())
        }
        ClientCommand::Draft { action } => drafts(DraftCache::new(kv), action),
    }
}

fn print_notifications(mut rx: mpsc::UnboundedReceiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            let tag = match notice.kind {
                NoticeKind::Success => "ok",
                NoticeKind::Error => "error",
                NoticeKind::Info => "info",
            };
            eprintln!("[{}] {}", tag, notice.message);
        }
    })
}

async fn news(api: Arc<dyn ContentApi>, topic: &str) -> Result<()> {
    let articles = api.search_news(topic).await?;
    if articles.is_empty() {
        println!("No relevant news found.");
    }
    for (i, article) in articles.iter().enumerate() {
        println!("{}. {}\n   {}\n   {}", i + 1, article.title, article.snippet, article.uri);
    }
    Ok(())
}

async fn generate(
    api: Arc<dyn ContentApi>,
    prefs: Preferences,
    topic: &str,
    schedule: Option<String>,
    with_news: bool,
    image: bool,
) -> Result<PipelineResult> {
    let (mut workflow, rx) = Workflow::new(api, prefs);
    let printer = print_notifications(rx);

    let mut progress = workflow.subscribe_progress();
    let ticker = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            if let Some(step) = *progress.borrow_and_update() {
                eprintln!("... {}", step);
            }
        }
    });

    workflow.topic = topic.to_string();
    workflow.schedule_time = schedule;
    workflow.auto_image = image;

    if with_news {
        workflow.search_news().await;
    }
    workflow.generate().await;
    if image {
        workflow.wait_for_image().await;
    }

    let finished = workflow.screen() == Screen::Results;
    let results = workflow.results().await;
    drop(workflow);
    let _ = printer.await;
    let _ = ticker.await;

    let results = match (finished, results) {
        (true, Some(results)) => results,
        _ => bail!("Content generation failed"),
    };
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(results)
}

fn mime_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        other => Err(anyhow!("Unsupported image type '{}' for {}", other, path.display())),
    }
}

fn read_media(path: &Path) -> Result<MediaAttachment> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(MediaAttachment {
        data: STANDARD.encode(bytes),
        mime_type: mime_for(path)?.to_string(),
    })
}

fn read_document(path: &Path) -> Result<DocumentAttachment> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(DocumentAttachment { name, content })
}

fn load_export(file: &Path) -> Result<PipelineResult> {
    let raw = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a pipeline export", file.display()))
}

fn write_export(file: &Path, editor: &ResultsEditor) -> Result<()> {
    fs::write(file, editor.export_json()?)
        .with_context(|| format!("Failed to write {}", file.display()))
}

fn edit_section(
    file: &Path,
    section: Section,
    value: Option<String>,
    hashtags: Option<String>,
) -> Result<()> {
    let mut editor = ResultsEditor::new(load_export(file)?);
    editor.begin_edit(section);
    if let Some(value) = value {
        editor.set_text(section, value);
    }
    if let Some(hashtags) = hashtags {
        if section != Section::Instagram {
            bail!("--hashtags only applies to the instagram section");
        }
        editor.set_hashtags_raw(hashtags);
    }
    if !editor.is_dirty() && editor.hashtags_raw().is_none() {
        editor.cancel(section);
        println!("Nothing changed.");
        return Ok(());
    }
    let saved = editor.save(section);
    write_export(file, &editor)?;

    let text = match section {
        Section::Hooks => saved.hooks.join("\n"),
        Section::Outline => saved.outline.clone(),
        Section::LinkedIn => saved.linkedin.clone(),
        Section::Instagram => saved.instagram.caption.clone(),
        Section::Blog => saved.blog.clone(),
        Section::SeoKeywords => saved.seo_keywords.join(", "),
    };
    println!(
        "Saved {} ({} words, {} characters)",
        section,
        word_count(&text),
        char_count(&text)
    );
    Ok(())
}

async fn posts(api: Arc<dyn ContentApi>, action: PostsAction) -> Result<()> {
    let mut calendar = Calendar::new(api);
    calendar.refresh().await?;

    match action {
        PostsAction::List => {
            if calendar.entries().is_empty() {
                println!("No scheduled posts.");
            }
            for entry in calendar.entries() {
                let post = &entry.post;
                println!(
                    "{}  {:<9} {:<9} {}  ({})",
                    post.date.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    post.platform.to_string(),
                    post.status.to_string(),
                    post.title,
                    post.id
                );
            }
        }
        PostsAction::Move { id, day } => {
            calendar.move_post(&id, day).await?;
            println!("Moved {} to {}", id, day);
        }
        PostsAction::Add {
            day,
            title,
            platform,
        } => {
            let mut entry = calendar.quick_add(day)?;
            if let Some(title) = title {
                entry.post.title = title;
            }
            if let Some(platform) = platform {
                entry.post.platform = platform;
            }
            let saved = calendar.save(entry).await?;
            println!("Created {} ({})", saved.title, saved.id);
        }
        PostsAction::Rename { id, title } => {
            let mut entry = calendar
                .entry(&id)
                .cloned()
                .ok_or_else(|| anyhow!("No post with id {}", id))?;
            entry.post.title = title;
            let saved = calendar.save(entry).await?;
            println!("Renamed {} to {}", saved.id, saved.title);
        }
        PostsAction::Delete { id } => {
            calendar.delete(&id).await?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

fn drafts(cache: DraftCache, action: DraftAction) -> Result<()> {
    match action {
        DraftAction::Show { topic } => match cache.load(&topic)? {
            Some(draft) => {
                let saved_at = chrono::DateTime::from_timestamp_millis(draft.timestamp)
                    .map(|t| t.with_timezone(&Local).format("%b %d %H:%M").to_string())
                    .unwrap_or_else(|| "unknown time".to_string());
                println!("Draft saved {}", saved_at);
                println!("{}", serde_json::to_string_pretty(&draft.results)?);
            }
            None => println!("No draft for '{}'.", topic),
        },
        DraftAction::Restore { topic, file } => {
            let draft = cache
                .load(&topic)?
                .ok_or_else(|| anyhow!("No draft for '{}'", topic))?;
            let mut editor = ResultsEditor::new(load_export(&file)?);
            editor.restore(draft.results);
            editor.save_all();
            write_export(&file, &editor)?;
            println!("Draft restored into {}", file.display());
        }
        DraftAction::Discard { topic } => {
            cache.discard(&topic)?;
            println!("Draft discarded.");
        }
    }
    Ok(())
}
