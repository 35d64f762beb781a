mod app;

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use postwithus::client::Section;
use postwithus::models::{Audience, Platform, Tone};

#[derive(Parser)]
#[command(name = "postwithus")]
#[command(about = "Generate, edit and schedule social media content with an LLM")]
pub struct Cli {
    /// Show debug logs on the console
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the content proxy HTTP server
    Serve,

    #[command(flatten)]
    Client(ClientCommand),
}

/// Commands that talk to a running proxy.
#[derive(Subcommand)]
pub enum ClientCommand {
    /// Ask the proxy for recent news on a topic
    News { topic: String },

    /// Generate a full content pipeline for a topic
    Generate {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        tone: Option<Tone>,
        #[arg(long)]
        audience: Option<Audience>,
        /// Let the model schedule the post at this time (ISO 8601)
        #[arg(long)]
        schedule: Option<String>,
        /// Fetch news first and feed it into the prompt
        #[arg(long)]
        with_news: bool,
        /// Also generate an image from the image prompt
        #[arg(long)]
        image: bool,
        /// Keep the result as a local draft for this topic
        #[arg(long)]
        save_draft: bool,
        /// Write the result to content-pipeline-<topic>.json
        #[arg(long)]
        export: bool,
    },

    /// Write one punchy post from text, images and documents
    QuickPost {
        #[arg(long)]
        platform: Option<Platform>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long = "media")]
        media: Vec<PathBuf>,
        #[arg(long = "document")]
        documents: Vec<PathBuf>,
    },

    /// Edit one section of an exported pipeline file
    Edit {
        file: PathBuf,
        #[arg(long)]
        section: Section,
        /// New text for the section (hooks: one per line, SEO keywords: comma-separated)
        #[arg(long)]
        value: Option<String>,
        /// Comma-separated hashtags for the instagram section
        #[arg(long)]
        hashtags: Option<String>,
    },

    /// Calendar of scheduled posts
    Posts {
        #[command(subcommand)]
        action: PostsAction,
    },

    /// Schedule a post directly
    Schedule {
        #[arg(long)]
        time: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        platform: Option<Platform>,
    },

    /// Show or change the generation defaults
    Prefs {
        #[arg(long)]
        tone: Option<Tone>,
        #[arg(long)]
        audience: Option<Audience>,
        #[arg(long)]
        name: Option<String>,
    },

    /// Local drafts
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },
}

#[derive(Subcommand)]
pub enum PostsAction {
    List,
    /// Move a post to another day (lands at 10:00 local time)
    Move { id: String, day: NaiveDate },
    /// Quick-add a draft on a day (09:00 local time) and save it
    Add {
        day: NaiveDate,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        platform: Option<Platform>,
    },
    /// Rename a stored post
    Rename {
        id: String,
        #[arg(long)]
        title: String,
    },
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum DraftAction {
    Show {
        #[arg(long)]
        topic: String,
    },
    /// Apply the draft to an exported pipeline file and save it
    Restore {
        #[arg(long)]
        topic: String,
        file: PathBuf,
    },
    Discard {
        #[arg(long)]
        topic: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    app::run(cli).await
}
