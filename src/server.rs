use crate::config::AppConfig;
use crate::models::{ChapterEntry, GenerationRequest, QuestionBank, RequestError};
use crate::services::extractor::PageExtractor;
use crate::services::generator::{ChapterIssue, GenerationSession, QuestionBankGenerator};
use crate::services::pipeline::{self, IngestSummary};
use crate::services::store::{ChapterStore, StoreError};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
};
use http::header;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<ChapterStore>,
    pub extractor: Arc<PageExtractor>,
    /// `None` when no LLM credential is configured.
    pub generator: Option<Arc<QuestionBankGenerator>>,
    pub results: Arc<Mutex<ResultCache>>,
}

impl AppState {
    pub fn new(config: AppConfig, generator: Option<QuestionBankGenerator>) -> Self {
        Self {
            store: Arc::new(ChapterStore::new(&config.storage.chapters_dir)),
            extractor: Arc::new(PageExtractor::new(&config.ocr)),
            generator: generator.map(Arc::new),
            results: Arc::new(Mutex::new(ResultCache::new(
                config.server.retained_results,
            ))),
            config: Arc::new(config),
        }
    }
}

/// Generated banks kept for download. Holds at most `capacity` results and
/// drops the oldest first.
pub struct ResultCache {
    capacity: usize,
    order: VecDeque<Uuid>,
    banks: HashMap<Uuid, Vec<QuestionBank>>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            banks: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: Uuid, banks: Vec<QuestionBank>) {
        while self.order.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.banks.remove(&oldest);
            tracing::debug!(%oldest, "evicted generation result");
        }
        self.order.push_back(id);
        self.banks.insert(id, banks);
    }

    pub fn get(&self, id: &Uuid) -> Option<&[QuestionBank]> {
        self.banks.get(id).map(Vec::as_slice)
    }
}

/// Error surfaced to the caller as `{"error": "..."}`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(error: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{error:#}"), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{error:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/upload", post(upload_pdf))
        .route("/chapters", get(list_chapters))
        .route("/generate", post(generate))
        .route("/download/:id/:number", get(download))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::AllowMethods::any())
                .allow_headers(tower_http::cors::AllowHeaders::any()),
        )
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&state.config.server.bind).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Question Bank Generator</title>
    <meta charset="utf-8">
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        .endpoint { background-color: #f5f5f5; padding: 10px; margin: 10px 0; border-radius: 4px; font-family: monospace; }
    </style>
</head>
<body>
    <h1>Question Bank Generator</h1>
    <p>Upload a scanned textbook, pick chapters, and generate question banks.</p>
    <div class="endpoint">GET /health</div>
    <div class="endpoint">POST /upload (multipart field 'pdf_file')</div>
    <div class="endpoint">GET /chapters</div>
    <div class="endpoint">POST /generate</div>
    <div class="endpoint">GET /download/{id}/{n}</div>
</body>
</html>
"#,
    )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn upload_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestSummary>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("pdf_file") {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
        if !data.starts_with(b"%PDF") {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "uploaded file is not a PDF",
            ));
        }

        let uploads_dir = state.config.storage.uploads_dir.clone();
        let pdf_path = uploads_dir.join(format!("{}.pdf", Uuid::new_v4()));
        tokio::fs::create_dir_all(&uploads_dir)
            .await
            .map_err(|e| ApiError::internal(e.into()))?;
        tokio::fs::write(&pdf_path, &data)
            .await
            .map_err(|e| ApiError::internal(e.into()))?;
        tracing::info!(path = %pdf_path.display(), bytes = data.len(), "PDF uploaded");

        let summary = tokio::task::spawn_blocking(move || {
            pipeline::ingest_pdf(
                &state.extractor,
                &state.store,
                &state.config.storage.pagewise_dir,
                &pdf_path,
            )
        })
        .await
        .map_err(|e| ApiError::internal(e.into()))?
        .map_err(ApiError::internal)?;

        return Ok(Json(summary));
    }

    Err(ApiError::new(
        StatusCode::BAD_REQUEST,
        "missing multipart field 'pdf_file'",
    ))
}

async fn list_chapters(State(state): State<AppState>) -> Result<Json<Vec<ChapterEntry>>, ApiError> {
    state.store.entries().map(Json).map_err(ApiError::internal)
}

#[derive(Serialize)]
struct GeneratedBank {
    number: usize,
    difficulty: String,
    file_name: String,
    download_url: String,
    text: String,
}

#[derive(Serialize)]
struct GenerateResponse {
    id: Uuid,
    banks: Vec<GeneratedBank>,
    issues: Vec<ChapterIssue>,
    warnings: Vec<String>,
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let generator = state.generator.clone().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "question generation is unavailable: no LLM API key configured",
        )
    })?;
    request
        .validate(state.config.generation.max_banks)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let session = GenerationSession::open(&state.store, request, state.config.generation.max_banks)
        .map_err(session_error)?;
    let result = generator.generate(session).await;

    let id = Uuid::new_v4();
    let banks = result
        .banks
        .iter()
        .map(|bank| GeneratedBank {
            number: bank.number,
            difficulty: bank.difficulty.to_string(),
            file_name: bank.file_name(),
            download_url: format!("/download/{id}/{}", bank.number),
            text: bank.text.clone(),
        })
        .collect();
    let warnings = result.issues.iter().map(ToString::to_string).collect();
    state.results.lock().await.insert(id, result.banks);

    Ok(Json(GenerateResponse {
        id,
        banks,
        issues: result.issues,
        warnings,
    }))
}

/// Unknown chapter keys are 404, malformed requests 400, anything else
/// (unreadable or corrupt records) 500.
fn session_error(error: anyhow::Error) -> ApiError {
    let status = match error.downcast_ref::<StoreError>() {
        Some(StoreError::MissingChapter(_)) => StatusCode::NOT_FOUND,
        Some(StoreError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
        None if error.is::<RequestError>() => StatusCode::BAD_REQUEST,
        None => return ApiError::internal(error),
    };
    ApiError::new(status, format!("{error:#}"))
}

async fn download(
    State(state): State<AppState>,
    Path((id, number)): Path<(Uuid, usize)>,
) -> Result<Response, ApiError> {
    let results = state.results.lock().await;
    let bank = results
        .get(&id)
        .and_then(|banks| banks.iter().find(|bank| bank.number == number))
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "question bank not found"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", bank.file_name()),
            ),
        ],
        bank.text.clone(),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::models::{Chapter, Page};
    use crate::services::llm::{CompletionClient, LlmError};
    use crate::services::rate_limit::Unlimited;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    struct EchoClient;

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok("MCQ:\nQ1. Echo?".to_string())
        }
    }

    fn state(dir: &std::path::Path, with_generator: bool) -> AppState {
        state_with(dir, with_generator, |_| {})
    }

    fn state_with(
        dir: &std::path::Path,
        with_generator: bool,
        configure: impl FnOnce(&mut AppConfig),
    ) -> AppState {
        let mut config = AppConfig::default();
        config.storage.chapters_dir = dir.join("chapters");
        config.storage.uploads_dir = dir.join("uploads");
        config.storage.pagewise_dir = dir.join("pagewise");
        configure(&mut config);
        let generator = with_generator.then(|| {
            QuestionBankGenerator::new(
                Arc::new(EchoClient),
                Arc::new(Unlimited),
                &GenerationConfig::default(),
            )
        });
        let state = AppState::new(config, generator);
        state
            .store
            .replace_all(&[Chapter {
                chapter_name: "1: Intro".to_string(),
                pages: vec![Page {
                    page_number: Some(1),
                    content: "Cells.".to_string(),
                }],
            }])
            .unwrap();
        state
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn generate_request(body: serde_json::Value) -> Request<Body> {
        Request::post("/generate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const BOUNDARY: &str = "qbank-test-boundary";

    fn upload_request(field: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"book.pdf\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::post("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn chapter_names(app: Router) -> Vec<String> {
        let response = app
            .oneshot(Request::get("/chapters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        json_body(response)
            .await
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path(), false))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn lists_stored_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path(), false))
            .oneshot(Request::get("/chapters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!([{"key": "chapter_1", "name": "1: Intro"}])
        );
    }

    #[tokio::test]
    async fn generate_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path(), true));

        let response = app
            .clone()
            .oneshot(generate_request(serde_json::json!({
                "chapters": [{"key": "chapter_1", "questions": {"mcq": 1}}],
                "banks": [{"difficulty": "Easy"}, {"difficulty": "Hard", "domains": ["Analysis"]}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["banks"].as_array().unwrap().len(), 2);
        assert_eq!(body["banks"][1]["file_name"], "question_bank_2.txt");
        let url = body["banks"][1]["download_url"].as_str().unwrap().to_string();

        let response = app
            .oneshot(Request::get(url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"question_bank_2.txt\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"## 1: Intro\n\nMCQ:\nQ1. Echo?\n\n");
    }

    #[tokio::test]
    async fn generate_without_credential_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path(), false))
            .oneshot(generate_request(serde_json::json!({
                "chapters": [{"key": "chapter_1", "questions": {"mcq": 1}}],
                "banks": [{"difficulty": "Easy"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn generate_rejects_all_zero_counts() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path(), true))
            .oneshot(generate_request(serde_json::json!({
                "chapters": [{"key": "chapter_1", "questions": {}}],
                "banks": [{"difficulty": "Easy"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "request at least one question"
        );
    }

    #[tokio::test]
    async fn unknown_download_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("/download/{}/1", Uuid::new_v4());
        let response = router(state(dir.path(), false))
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_rejects_non_pdf_body() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path(), false))
            .oneshot(upload_request("pdf_file", b"plain text, not a pdf"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "uploaded file is not a PDF");
    }

    #[tokio::test]
    async fn upload_requires_pdf_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path(), false))
            .oneshot(upload_request("document", b"%PDF-1.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "missing multipart field 'pdf_file'"
        );
    }

    #[tokio::test]
    async fn failed_ingest_is_internal_error_and_keeps_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-pdftoppm");
        let app = router(state_with(dir.path(), false, |config| {
            config.ocr.pdftoppm = missing;
        }));

        let response = app
            .clone()
            .oneshot(upload_request("pdf_file", b"%PDF-1.4 scanned"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(chapter_names(app).await, vec!["1: Intro"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn upload_replaces_stored_chapters() {
        use crate::services::extractor::fake_tools;

        let dir = tempfile::tempdir().unwrap();
        let pdftoppm = fake_tools::pdftoppm(dir.path());
        let tesseract = fake_tools::script(
            dir.path(),
            "fake-tesseract",
            r#"case "$1" in
  *-1.png) printf '1 - Cells\nbody\n1\n' ;;
  *) printf '2 - Tissues\nbody\n1\n' ;;
esac"#,
        );
        let app = router(state_with(dir.path(), false, |config| {
            config.ocr.pdftoppm = pdftoppm;
            config.ocr.tesseract = tesseract;
        }));

        let response = app
            .clone()
            .oneshot(upload_request("pdf_file", b"%PDF-1.4 scanned"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["page_count"], 2);
        assert_eq!(body["chapters"][1]["key"], "chapter_2");
        assert_eq!(chapter_names(app).await, vec!["1: Cells", "2: Tissues"]);
    }

    #[tokio::test]
    async fn generate_unknown_chapter_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path(), true))
            .oneshot(generate_request(serde_json::json!({
                "chapters": [{"key": "chapter_7", "questions": {"mcq": 1}}],
                "banks": [{"difficulty": "Easy"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn generate_with_corrupt_record_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let app_state = state(dir.path(), true);
        std::fs::write(dir.path().join("chapters").join("chapter_1.json"), "not json").unwrap();

        let response = router(app_state)
            .oneshot(generate_request(serde_json::json!({
                "chapters": [{"key": "chapter_1", "questions": {"mcq": 1}}],
                "banks": [{"difficulty": "Easy"}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn result_cache_drops_oldest_when_full() {
        let bank = |number| QuestionBank {
            number,
            difficulty: crate::models::Difficulty::Easy,
            text: String::new(),
        };
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut cache = ResultCache::new(2);
        for (index, id) in ids.iter().enumerate() {
            cache.insert(*id, vec![bank(index + 1)]);
        }

        assert!(cache.get(&ids[0]).is_none());
        assert_eq!(cache.get(&ids[1]).unwrap()[0].number, 2);
        assert_eq!(cache.get(&ids[2]).unwrap()[0].number, 3);
    }
}
