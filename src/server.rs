use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};

use crate::config::Config;
use crate::generator::generate_content;
use crate::imagery::generate_image;
use crate::llm::{LanguageModel, OpenAiModel};
use crate::models::{
    GenerationRequest, NewsArticle, OutcomeStatus, PostPatch, QuickPostRequest, ScheduleOutcome,
    ScheduleRequest, ScheduledPost,
};
use crate::news::search_news;
use crate::quick_post::{self, quick_post};
use crate::scheduler::{schedule_post, PostDetails};
use crate::storage::{open_store, PostStore};

const BODY_LIMIT: usize = 50 * 1024 * 1024;
const CONTENT_SECURITY_POLICY: &str =
    "default-src * 'unsafe-inline' 'unsafe-eval' data: blob:; img-src * data: blob:";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Storage(format!("{:#}", e))
    }
}

/// Model names and limits the handlers need from the config.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub image_model: String,
    pub max_document_tokens: usize,
}

impl GenerationSettings {
    pub fn from_config(cfg: &Config) -> Self {
        GenerationSettings {
            model: cfg.model.clone(),
            image_model: cfg.image_model.clone(),
            max_document_tokens: cfg.max_document_tokens,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn LanguageModel>,
    pub store: Arc<dyn PostStore>,
    pub settings: Arc<GenerationSettings>,
}

impl AppState {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn PostStore>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            model,
            store,
            settings: Arc::new(settings),
        }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
struct TopicBody {
    #[serde(default)]
    topic: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewsResponse {
    pub news: Vec<NewsArticle>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuickPostResponse {
    pub post: String,
}

#[derive(Debug, Deserialize)]
struct ImagePromptBody {
    #[serde(default)]
    image_prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub image_url: String,
    pub message: String,
}

async fn status_page() -> Html<&'static str> {
    Html("<h1>Post-With-Us API</h1><p>The content proxy is running. See <code>/health</code>.</p>")
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn search_news_handler(
    State(state): State<AppState>,
    payload: Result<Json<TopicBody>, JsonRejection>,
) -> Result<Json<NewsResponse>, ApiError> {
    let body = json_body(payload)?;
    if body.topic.trim().is_empty() {
        return Err(ApiError::BadRequest("Topic is required.".to_string()));
    }

    let news = search_news(state.model.as_ref(), &state.settings.model, &body.topic)
        .await
        .map_err(|e| {
            error!("Error searching news: {:#}", e);
            ApiError::Upstream(format!("Internal server error: {}", e))
        })?;
    Ok(Json(NewsResponse { news }))
}

async fn generate_handler(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<crate::models::PipelineResult>, ApiError> {
    let req = json_body(payload)?;
    if req.topic.trim().is_empty() {
        return Err(ApiError::BadRequest("Topic is required.".to_string()));
    }

    let result = generate_content(
        state.model.as_ref(),
        &state.settings.model,
        state.store.as_ref(),
        &req,
        Utc::now(),
    )
    .await
    .map_err(|e| {
        error!("Error in /api/generate: {:#}", e);
        ApiError::Upstream(format!("Generation failed: {:#}", e))
    })?;
    Ok(Json(result))
}

async fn quick_post_handler(
    State(state): State<AppState>,
    payload: Result<Json<QuickPostRequest>, JsonRejection>,
) -> Result<Json<QuickPostResponse>, ApiError> {
    let req = json_body(payload)?;
    quick_post::validate(&req).map_err(ApiError::BadRequest)?;

    let post = quick_post(
        state.model.as_ref(),
        &state.settings.model,
        &req,
        state.settings.max_document_tokens,
    )
    .await
    .map_err(|e| {
        error!("Error generating quick post: {:#}", e);
        ApiError::Upstream("Failed to generate quick post.".to_string())
    })?;
    Ok(Json(QuickPostResponse { post }))
}

async fn image_handler(
    State(state): State<AppState>,
    payload: Result<Json<ImagePromptBody>, JsonRejection>,
) -> Result<Json<ImageResponse>, ApiError> {
    let body = json_body(payload)?;
    if body.image_prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Image prompt is required.".to_string()));
    }

    let image_url = generate_image(
        state.model.as_ref(),
        &state.settings.image_model,
        &body.image_prompt,
    )
    .await
    .map_err(|e| {
        error!("Error generating image: {:#}", e);
        ApiError::Upstream(format!("Image generation failed: {}", e))
    })?;
    Ok(Json(ImageResponse {
        image_url,
        message: "Image generated successfully.".to_string(),
    }))
}

async fn schedule_handler(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScheduleOutcome>), ApiError> {
    let req = json_body(payload)?;
    let Some(raw_time) = req.schedule_time.as_deref().filter(|t| !t.trim().is_empty()) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ScheduleOutcome {
                status: OutcomeStatus::Error,
                message: "Time required.".to_string(),
                id: None,
            }),
        ));
    };

    let outcome = schedule_post(
        state.store.as_ref(),
        raw_time,
        PostDetails::from(&req),
        Utc::now(),
    )
    .await
    .map_err(|e| {
        error!("Failed to save scheduled post: {:#}", e);
        ApiError::Storage("Save failed".to_string())
    })?;

    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(outcome)))
}

async fn list_posts(State(state): State<AppState>) -> Result<Json<Vec<ScheduledPost>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<PostPatch>, JsonRejection>,
) -> Result<Json<ScheduledPost>, ApiError> {
    let patch = json_body(payload)?;
    match state.store.update(&id, patch).await? {
        Some(post) => Ok(Json(post)),
        None => Err(ApiError::NotFound("Post not found".to_string())),
    }
}

async fn delete_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.delete(&id).await? {
        debug!("Delete of unknown post {}", id);
    }
    Ok(Json(json!({ "message": "Deleted" })))
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/search-news", post(search_news_handler))
        .route("/generate", post(generate_handler))
        .route("/quick-post", post(quick_post_handler))
        .route("/generate-image-from-prompt", post(image_handler))
        .route("/schedule", post(schedule_handler))
        .route("/posts", get(list_posts))
        .route("/posts/:id", put(update_post).delete(delete_post));

    Router::new()
        .route("/", get(status_page))
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(CorsLayer::permissive())
}

pub async fn serve(cfg: &Config) -> Result<()> {
    let store = open_store(cfg)?;
    let model = Arc::new(OpenAiModel::new(cfg)?);
    let state = AppState::new(model, store, GenerationSettings::from_config(cfg));
    let app = build_router(state);

    info!("Starting HTTP server on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", cfg.bind_addr))?;

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::storage::MemoryPostStore;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn setup_app(model: ScriptedModel) -> (Router, Arc<MemoryPostStore>) {
        let store = Arc::new(MemoryPostStore::new());
        let state = AppState::new(
            Arc::new(model),
            store.clone(),
            GenerationSettings {
                model: "text-model".into(),
                image_model: "image-model".into(),
                max_document_tokens: 1000,
            },
        );
        (build_router(state), store)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn extract_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_status_page() {
        let (app, _) = setup_app(ScriptedModel::new());

        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::CONTENT_SECURITY_POLICY));
        let body = extract_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());

        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_schedule_in_the_past_leaves_posts_unchanged() {
        let (app, _) = setup_app(ScriptedModel::new());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/schedule",
                json!({ "scheduleTime": "2020-01-01T00:00:00Z", "title": "Old news" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = extract_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("in the past"));

        let response = app.oneshot(get_request("/api/posts")).await.unwrap();
        assert_eq!(extract_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_schedule_requires_time() {
        let (app, _) = setup_app(ScriptedModel::new());
        let response = app
            .oneshot(json_request("POST", "/api/schedule", json!({ "title": "x" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(extract_json(response).await["message"], "Time required.");
    }

    #[tokio::test]
    async fn test_schedule_update_and_delete_flow() {
        let (app, store) = setup_app(ScriptedModel::new());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/schedule",
                json!({
                    "scheduleTime": "2099-01-05T10:00:00Z",
                    "title": "Launch",
                    "platform": "Twitter",
                    "contentSnippet": "We launch today"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = extract_json(response).await;
        assert_eq!(body["status"], "success");
        let id = body["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/api/posts/{}", id),
                json!({ "date": "2099-01-12T10:00:00Z" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated = extract_json(response).await;
        assert_eq!(updated["title"], "Launch");
        assert_eq!(updated["platform"], "Twitter");
        assert_eq!(updated["date"], "2099-01-12T10:00:00Z");

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/posts/nope", json!({ "title": "x" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(extract_json(response).await["error"], "Post not found");

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/posts/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(extract_json(response).await["message"], "Deleted");
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_without_schedule_time_is_not_scheduled() {
        let model = ScriptedModel::new().reply_text(
            r#"{"hooks":["a"],"outline":"o","linkedin":"l","instagram":{"caption":"c","hashtags":[]},
               "blog":"b","seo_keywords":[],"image_prompt":"p","scheduled":true,"schedulingMessage":"done"}"#,
        );
        let (app, _) = setup_app(model);
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/generate",
                json!({ "topic": "Rust", "tone": "Casual", "audience": "Students" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = extract_json(response).await;
        assert_eq!(body["scheduled"], false);
        assert!(body.get("schedulingMessage").is_none());
        assert_eq!(body["linkedin"], "l");
    }

    #[tokio::test]
    async fn test_generate_with_empty_schedule_time_is_not_scheduled() {
        let model = Arc::new(ScriptedModel::new().reply_text(
            r#"{"hooks":["a"],"outline":"o","linkedin":"l","instagram":{"caption":"c","hashtags":[]},
               "blog":"b","seo_keywords":[],"image_prompt":"p","scheduled":true,"schedulingMessage":"done"}"#,
        ));
        let state = AppState::new(
            model.clone(),
            Arc::new(MemoryPostStore::new()),
            GenerationSettings {
                model: "text-model".into(),
                image_model: "image-model".into(),
                max_document_tokens: 1000,
            },
        );
        let response = build_router(state)
            .oneshot(json_request(
                "POST",
                "/api/generate",
                json!({ "topic": "Future of AI", "scheduleTime": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = extract_json(response).await;
        assert_eq!(body["scheduled"], false);
        assert!(body.get("schedulingMessage").is_none());
        assert!(model.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn test_generate_failures_map_to_status_codes() {
        let (app, _) = setup_app(ScriptedModel::new().reply_text("not json at all"));
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/generate", json!({ "topic": "Rust" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = extract_json(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("Generation failed"));

        let response = app
            .oneshot(json_request("POST", "/api/generate", json!({ "topic": "  " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_news_endpoint() {
        let model = ScriptedModel::new().reply_text("no idea, sorry");
        let (app, _) = setup_app(model);
        let response = app
            .oneshot(json_request("POST", "/api/search-news", json!({ "topic": "Rust" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = extract_json(response).await;
        assert_eq!(body["news"][0]["title"], "Could not fetch real-time news");
    }

    #[tokio::test]
    async fn test_quick_post_endpoint() {
        let (app, _) = setup_app(ScriptedModel::new().reply_text("Big news!"));
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/quick-post",
                json!({ "content": "we launched", "platform": "LinkedIn" }),
            ))
            .await
            .unwrap();
        assert_eq!(extract_json(response).await["post"], "Big news!");

        let response = app
            .oneshot(json_request("POST", "/api/quick-post", json!({ "content": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_image_endpoint() {
        let model = ScriptedModel::new().reply_text("![img](https://img.example/a.png)");
        let (app, _) = setup_app(model);
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/generate-image-from-prompt",
                json!({ "image_prompt": "a crab" }),
            ))
            .await
            .unwrap();
        let body = extract_json(response).await;
        assert_eq!(body["imageUrl"], "https://img.example/a.png");
        assert_eq!(body["message"], "Image generated successfully.");
    }
}
