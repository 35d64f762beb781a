use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use super::api::ContentApi;
use super::preferences::Preferences;
use crate::models::{
    Audience, GenerationRequest, NewsArticle, PipelineResult, Platform, PostStatus,
    ScheduleOutcome, ScheduleRequest, Tone,
};

pub const NEWS_STEPS: [&str; 1] = ["Fetching Real-time News"];
pub const CONTENT_STEPS: [&str; 6] = [
    "Generating Outline",
    "Crafting LinkedIn Post",
    "Creating Instagram Caption",
    "Writing Blog Article",
    "Optimizing SEO",
    "Formulating Image Prompt",
];
const STEP_INTERVAL: Duration = Duration::from_millis(500);
const SNIPPET_CHARS: usize = 140;
const HISTORY_LIMIT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    News,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Home,
    Loading(Phase),
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Clone)]
struct Notifier(mpsc::UnboundedSender<Notification>);

impl Notifier {
    fn send(&self, kind: NoticeKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            NoticeKind::Error => warn!("{}", message),
            _ => info!("{}", message),
        }
        // Nobody listening is fine.
        let _ = self.0.send(Notification { kind, message });
    }
}

/// Advances the loading label on a timer. Purely cosmetic: the real request never waits on it.
struct LoadingTicker {
    handle: JoinHandle<()>,
}

impl LoadingTicker {
    fn start(steps: &'static [&'static str], progress: watch::Sender<Option<&'static str>>) -> Self {
        let handle = tokio::spawn(async move {
            for (i, step) in steps.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(STEP_INTERVAL).await;
                }
                progress.send_replace(Some(*step));
            }
        });
        LoadingTicker { handle }
    }

    fn stop(self, progress: &watch::Sender<Option<&'static str>>) {
        self.handle.abort();
        progress.send_replace(None);
    }
}

/// Screen state machine for one user session: home → loading → results and back.
///
/// Failures never escape as errors; they become notifications and the machine returns to
/// `Home`.
pub struct Workflow {
    api: Arc<dyn ContentApi>,
    prefs: Preferences,
    notifier: Notifier,
    screen: Screen,
    history: Vec<Screen>,
    progress: watch::Sender<Option<&'static str>>,

    pub topic: String,
    pub schedule_time: Option<String>,
    pub tone: Tone,
    pub audience: Audience,
    pub auto_image: bool,
    news: Vec<NewsArticle>,
    results: Arc<RwLock<Option<PipelineResult>>>,
    image_loading: Arc<AtomicBool>,
    image_task: Option<JoinHandle<()>>,
}

impl Workflow {
    pub fn new(
        api: Arc<dyn ContentApi>,
        prefs: Preferences,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (progress, _) = watch::channel(None);
        let workflow = Workflow {
            api,
            tone: prefs.default_tone,
            audience: prefs.default_audience,
            prefs,
            notifier: Notifier(tx),
            screen: Screen::Home,
            history: Vec::new(),
            progress,
            topic: String::new(),
            schedule_time: None,
            auto_image: false,
            news: Vec::new(),
            results: Arc::new(RwLock::new(None)),
            image_loading: Arc::new(AtomicBool::new(false)),
            image_task: None,
        };
        (workflow, rx)
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// The most recent screens entered, oldest first, capped at 32.
    pub fn history(&self) -> &[Screen] {
        &self.history
    }

    pub fn news(&self) -> &[NewsArticle] {
        &self.news
    }

    pub async fn results(&self) -> Option<PipelineResult> {
        self.results.read().await.clone()
    }

    pub fn is_image_loading(&self) -> bool {
        self.image_loading.load(Ordering::SeqCst)
    }

    /// Current loading label, `None` when nothing is loading.
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<&'static str>> {
        self.progress.subscribe()
    }

    pub fn set_preferences(&mut self, prefs: Preferences) {
        self.prefs = prefs;
    }

    fn enter(&mut self, screen: Screen) {
        debug!("Screen {:?} -> {:?}", self.screen, screen);
        self.screen = screen;
        if self.history.len() == HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push(screen);
    }

    fn topic_is_valid(&self) -> bool {
        if self.topic.trim().is_empty() {
            self.notifier.send(NoticeKind::Error, "Please enter a topic first.");
            return false;
        }
        true
    }

    pub async fn search_news(&mut self) {
        if !self.topic_is_valid() {
            return;
        }
        self.news.clear();
        self.enter(Screen::Loading(Phase::News));
        let ticker = LoadingTicker::start(&NEWS_STEPS, self.progress.clone());

        let outcome = self.api.search_news(&self.topic).await;
        ticker.stop(&self.progress);
        self.enter(Screen::Home);

        match outcome {
            Ok(news) if news.is_empty() => {
                self.notifier.send(NoticeKind::Info, "No relevant news found.");
            }
            Ok(news) => {
                self.news = news;
                self.notifier.send(NoticeKind::Success, "Real-time news fetched!");
            }
            Err(e) => {
                self.notifier
                    .send(NoticeKind::Error, format!("Failed to fetch news: {:#}", e));
            }
        }
    }

    pub async fn generate(&mut self) {
        if !self.topic_is_valid() {
            return;
        }
        *self.results.write().await = None;
        self.enter(Screen::Loading(Phase::Content));
        let ticker = LoadingTicker::start(&CONTENT_STEPS, self.progress.clone());

        let req = GenerationRequest {
            topic: self.topic.trim().to_string(),
            schedule_time: self.schedule_time.clone().filter(|t| !t.trim().is_empty()),
            tone: self.tone,
            audience: self.audience,
            news_context: self.news.clone(),
        };
        let outcome = self.api.generate(&req).await;
        ticker.stop(&self.progress);

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.enter(Screen::Home);
                self.notifier
                    .send(NoticeKind::Error, format!("Failed to generate content: {:#}", e));
                return;
            }
        };

        match (&result.scheduling_message, result.scheduled) {
            (Some(message), true) => self.notifier.send(NoticeKind::Success, message.clone()),
            (Some(message), false) => self.notifier.send(NoticeKind::Error, message.clone()),
            (None, _) => self
                .notifier
                .send(NoticeKind::Success, "Content pipeline generated successfully!"),
        }

        let image_prompt = result.image_prompt.trim().to_string();
        *self.results.write().await = Some(result);
        self.enter(Screen::Results);

        if self.auto_image && !image_prompt.is_empty() {
            self.image_task = Some(self.spawn_image(image_prompt));
        }
    }

    /// Fire-and-forget image fill. The result lands in whatever result is current when the
    /// image arrives.
    fn spawn_image(&self, image_prompt: String) -> JoinHandle<()> {
        let api = self.api.clone();
        let results = self.results.clone();
        let loading = self.image_loading.clone();
        let notifier = self.notifier.clone();

        loading.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            match api.generate_image(&image_prompt).await {
                Ok(url) => {
                    if let Some(current) = results.write().await.as_mut() {
                        current.image_url = Some(url);
                    }
                    notifier.send(NoticeKind::Success, "Image generated successfully.");
                }
                Err(e) => {
                    notifier.send(NoticeKind::Error, format!("Image generation failed: {:#}", e));
                }
            }
            loading.store(false, Ordering::SeqCst);
        })
    }

    /// Waits for a pending image fill, if any.
    pub async fn wait_for_image(&mut self) {
        if let Some(task) = self.image_task.take() {
            if let Err(e) = task.await {
                warn!("Image task ended abnormally: {}", e);
            }
        }
    }

    /// Adopts edits saved in the results editor as the canonical result.
    pub async fn commit_results(&mut self, edited: PipelineResult) {
        *self.results.write().await = Some(edited);
    }

    /// Schedules the current result for `schedule_time` on LinkedIn.
    pub async fn schedule_results(&mut self, schedule_time: &str) -> Option<ScheduleOutcome> {
        let snippet = {
            let guard = self.results.read().await;
            let Some(result) = guard.as_ref() else {
                self.notifier.send(NoticeKind::Error, "Nothing to schedule yet.");
                return None;
            };
            result.linkedin.chars().take(SNIPPET_CHARS).collect::<String>()
        };

        let req = ScheduleRequest {
            schedule_time: Some(schedule_time.to_string()),
            title: Some(self.topic.trim().to_string()),
            platform: Some(Platform::LinkedIn),
            status: Some(PostStatus::Scheduled),
            content_snippet: Some(snippet),
        };
        match self.api.schedule(&req).await {
            Ok(outcome) => {
                if outcome.is_success() {
                    if let Some(current) = self.results.write().await.as_mut() {
                        current.scheduled = true;
                        current.scheduling_message = Some(outcome.message.clone());
                    }
                    self.notifier.send(NoticeKind::Success, outcome.message.clone());
                } else {
                    self.notifier.send(NoticeKind::Error, outcome.message.clone());
                }
                Some(outcome)
            }
            Err(e) => {
                self.notifier
                    .send(NoticeKind::Error, format!("Failed to schedule post: {:#}", e));
                None
            }
        }
    }

    /// Back to a blank home screen with the user's preferred defaults.
    pub async fn reset(&mut self) {
        self.topic.clear();
        self.schedule_time = None;
        self.tone = self.prefs.default_tone;
        self.audience = self.prefs.default_audience;
        self.news.clear();
        *self.results.write().await = None;
        self.enter(Screen::Home);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::api::testing::FakeApi;
    use anyhow::anyhow;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn bundle() -> PipelineResult {
        PipelineResult {
            hooks: vec!["h".into()],
            linkedin: "A LinkedIn post".into(),
            image_prompt: "a crab".into(),
            ..Default::default()
        }
    }

    fn article() -> NewsArticle {
        NewsArticle {
            title: "t".into(),
            uri: "u".into(),
            snippet: "s".into(),
        }
    }

    #[tokio::test]
    async fn test_generate_success_path() {
        let api = Arc::new(FakeApi::new().with_generated(Ok(bundle())));
        let (mut wf, mut rx) = Workflow::new(api.clone(), Preferences::default());
        wf.topic = "Rust".into();

        wf.generate().await;

        assert_eq!(wf.screen(), Screen::Results);
        assert_eq!(
            wf.history(),
            &[Screen::Loading(Phase::Content), Screen::Results]
        );
        assert_eq!(wf.results().await, Some(bundle()));
        assert_eq!(
            drain(&mut rx),
            vec![Notification {
                kind: NoticeKind::Success,
                message: "Content pipeline generated successfully!".into()
            }]
        );
        assert_eq!(*wf.subscribe_progress().borrow(), None);
    }

    #[tokio::test]
    async fn test_generate_failure_returns_home() {
        let api = Arc::new(FakeApi::new().with_generated(Err(anyhow!("boom"))));
        let (mut wf, mut rx) = Workflow::new(api, Preferences::default());
        wf.topic = "Rust".into();

        wf.generate().await;

        assert_eq!(wf.screen(), Screen::Home);
        assert_eq!(wf.history(), &[Screen::Loading(Phase::Content), Screen::Home]);
        assert_eq!(wf.results().await, None);
        let notes = drain(&mut rx);
        assert_eq!(notes[0].kind, NoticeKind::Error);
        assert!(notes[0].message.contains("boom"));
    }

    #[tokio::test]
    async fn test_empty_topic_makes_no_call() {
        let api = Arc::new(FakeApi::new());
        let (mut wf, mut rx) = Workflow::new(api.clone(), Preferences::default());
        wf.topic = "   ".into();

        wf.generate().await;
        wf.search_news().await;

        assert!(wf.history().is_empty());
        assert!(api.generate_requests.lock().unwrap().is_empty());
        assert!(drain(&mut rx).iter().all(|n| n.kind == NoticeKind::Error));
    }

    #[tokio::test]
    async fn test_news_then_generate_passes_context() {
        let api = Arc::new(
            FakeApi::new()
                .with_news(Ok(vec![article()]))
                .with_generated(Ok(bundle())),
        );
        let (mut wf, mut rx) = Workflow::new(api.clone(), Preferences::default());
        wf.topic = "Rust".into();
        wf.schedule_time = Some("".into());

        wf.search_news().await;
        assert_eq!(wf.screen(), Screen::Home);
        assert_eq!(wf.news(), &[article()]);
        assert_eq!(drain(&mut rx)[0].message, "Real-time news fetched!");

        wf.generate().await;
        let sent = api.generate_requests.lock().unwrap()[0].clone();
        assert_eq!(sent.news_context, vec![article()]);
        assert_eq!(sent.schedule_time, None);
    }

    #[tokio::test]
    async fn test_empty_news_and_news_failure() {
        let api = Arc::new(
            FakeApi::new()
                .with_news(Ok(vec![]))
                .with_news(Err(anyhow!("offline"))),
        );
        let (mut wf, mut rx) = Workflow::new(api, Preferences::default());
        wf.topic = "Rust".into();

        wf.search_news().await;
        assert_eq!(drain(&mut rx)[0].message, "No relevant news found.");

        wf.search_news().await;
        assert_eq!(wf.screen(), Screen::Home);
        assert_eq!(drain(&mut rx)[0].kind, NoticeKind::Error);
    }

    #[tokio::test]
    async fn test_scheduling_message_drives_notification() {
        let mut failed = bundle();
        failed.scheduling_message = Some("Scheduling failed: '2020-01-01 00:00' is in the past.".into());
        let api = Arc::new(FakeApi::new().with_generated(Ok(failed)));
        let (mut wf, mut rx) = Workflow::new(api, Preferences::default());
        wf.topic = "Rust".into();

        wf.generate().await;
        let notes = drain(&mut rx);
        assert_eq!(notes[0].kind, NoticeKind::Error);
        assert!(notes[0].message.contains("in the past"));
    }

    #[tokio::test]
    async fn test_auto_image_fills_result_in_background() {
        let api = Arc::new(
            FakeApi::new()
                .with_generated(Ok(bundle()))
                .with_image(Ok("https://img.example/1.png".into())),
        );
        let (mut wf, _rx) = Workflow::new(api, Preferences::default());
        wf.topic = "Rust".into();
        wf.auto_image = true;

        wf.generate().await;
        assert_eq!(wf.screen(), Screen::Results);
        wf.wait_for_image().await;

        assert!(!wf.is_image_loading());
        assert_eq!(
            wf.results().await.unwrap().image_url.as_deref(),
            Some("https://img.example/1.png")
        );
    }

    #[tokio::test]
    async fn test_history_keeps_only_recent_screens() {
        let api = Arc::new(FakeApi::new());
        let (mut wf, _rx) = Workflow::new(api, Preferences::default());
        for _ in 0..HISTORY_LIMIT {
            wf.reset().await;
        }
        wf.topic = "Rust".into();
        wf.generate().await;

        assert_eq!(wf.history().len(), HISTORY_LIMIT);
        assert_eq!(
            &wf.history()[HISTORY_LIMIT - 2..],
            &[Screen::Loading(Phase::Content), Screen::Home]
        );
    }

    #[tokio::test]
    async fn test_schedule_results_and_reset() {
        let api = Arc::new(FakeApi::new().with_generated(Ok(bundle())));
        let prefs = Preferences {
            default_tone: Tone::Casual,
            default_audience: Audience::Students,
            user_name: None,
        };
        let (mut wf, _rx) = Workflow::new(api.clone(), prefs);
        wf.topic = "Rust".into();
        wf.tone = Tone::Formal;
        wf.generate().await;

        let outcome = wf.schedule_results("2099-01-01T10:00:00Z").await.unwrap();
        assert!(outcome.is_success());
        assert!(wf.results().await.unwrap().scheduled);
        let stored = crate::storage::PostStore::list(&api.store).await.unwrap();
        assert_eq!(stored[0].title, "Rust");
        assert_eq!(stored[0].content_snippet.as_deref(), Some("A LinkedIn post"));

        let rejected = wf.schedule_results("2020-01-01T00:00:00Z").await.unwrap();
        assert!(!rejected.is_success());

        wf.reset().await;
        assert_eq!(wf.screen(), Screen::Home);
        assert!(wf.topic.is_empty());
        assert_eq!(wf.tone, Tone::Casual);
        assert_eq!(wf.audience, Audience::Students);
        assert_eq!(wf.results().await, None);
    }
}
