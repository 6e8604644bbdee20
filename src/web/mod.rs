//! The studio web front-end: upload photos, draw the card, download it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::RwLock;
use tower_sessions::{Expiry, MemoryStore, Session, SessionManagerLayer};
use tracing::{debug, error, info};

use crate::config::StudioConfig;
use crate::constants::{
    MAX_UPLOAD_BYTES, STUDIO_ID_LENGTH, STUDIO_IDLE_SECS, STUDIO_SESSION_KEY,
    STUDIO_SWEEP_INTERVAL_SECS,
};
use crate::error::SnowcardError;
use crate::pipeline::Pipeline;
use crate::studio::Studio;

mod actions;
mod flash;
mod prelude;
mod views;

use actions::{delete_photo_handler, generate_handler, reset_handler, upload_photos_handler};
use views::{card_handler, root_handler, styles_handler};

struct StudioEntry {
    studio: Studio,
    last_seen: Instant,
}

impl Default for StudioEntry {
    fn default() -> Self {
        Self {
            studio: Studio::new(),
            last_seen: Instant::now(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    studios: Arc<RwLock<HashMap<String, StudioEntry>>>,
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub(crate) fn new(pipeline: Pipeline) -> Self {
        Self {
            studios: Arc::new(RwLock::new(HashMap::new())),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Runs `f` on the session's studio under the write lock, creating the studio if needed.
    pub(crate) async fn with_studio<T>(&self, id: &str, f: impl FnOnce(&mut Studio) -> T) -> T {
        let mut studios = self.studios.write().await;
        let entry = studios.entry(id.to_string()).or_default();
        entry.last_seen = Instant::now();
        f(&mut entry.studio)
    }

    /// Copy of an existing studio. Never creates one.
    pub(crate) async fn studio(&self, id: &str) -> Option<Studio> {
        let mut studios = self.studios.write().await;
        studios.get_mut(id).map(|entry| {
            entry.last_seen = Instant::now();
            entry.studio.clone()
        })
    }

    /// Drops studios untouched for `max_idle`. A busy studio is kept until its run lands.
    pub(crate) async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut studios = self.studios.write().await;
        let before = studios.len();
        studios.retain(|_, entry| entry.studio.is_busy() || entry.last_seen.elapsed() < max_idle);
        before - studios.len()
    }

    async fn studio_count(&self) -> usize {
        self.studios.read().await.len()
    }
}

async fn sweep_studios(state: AppState) {
    let max_idle = Duration::from_secs(STUDIO_IDLE_SECS);
    let mut interval = tokio::time::interval(Duration::from_secs(STUDIO_SWEEP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let removed = state.sweep_idle(max_idle).await;
        if removed > 0 {
            debug!(
                "Forgot {removed} idle studios, {} left",
                state.studio_count().await
            );
        }
    }
}

fn generate_studio_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(STUDIO_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// The studio id stored in this session, if one was ever minted.
pub(crate) async fn existing_studio_id(session: &Session) -> Result<Option<String>, SnowcardError> {
    session
        .get::<String>(STUDIO_SESSION_KEY)
        .await
        .map_err(|err| SnowcardError::InternalServerError(err.to_string()))
}

/// The studio belonging to this browser session, minted on the first change.
pub(crate) async fn studio_id(session: &Session) -> Result<String, SnowcardError> {
    if let Some(id) = existing_studio_id(session).await? {
        return Ok(id);
    }
    let id = generate_studio_id();
    session
        .insert(STUDIO_SESSION_KEY, id.clone())
        .await
        .map_err(|err| SnowcardError::InternalServerError(err.to_string()))?;
    Ok(id)
}

fn create_router(state: AppState) -> Router {
    let idle = time::Duration::seconds(i64::try_from(STUDIO_IDLE_SECS).unwrap_or(i64::MAX));
    let sessions = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(idle));
    Router::new()
        .route("/", get(root_handler))
        .route("/photos", post(upload_photos_handler))
        .route("/photos/{index}/delete", post(delete_photo_handler))
        .route("/generate", post(generate_handler))
        .route("/reset", post(reset_handler))
        .route("/card.png", get(card_handler))
        .route("/static/styles.css", get(styles_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(sessions)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", err);
    }
    info!("Shutting down");
}

/// Starts the studio and serves until ctrl-c.
pub async fn setup_server(config: &StudioConfig) -> Result<(), anyhow::Error> {
    let state = AppState::new(config.pipeline());
    tokio::spawn(sweep_studios(state.clone()));
    let app = create_router(state);

    let addr = config.listen_addr();
    info!("Starting {} studio on http://{}", config.style, addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder, RgbaImage};
    use tower::ServiceExt;
    use usvg::fontdb;

    use crate::compositor::Compositor;
    use crate::generation::{GenerateFuture, GenerationRequest, ImageGenerator};
    use crate::style::Style;

    const BOUNDARY: &str = "snowcardboundary";

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        /// Waits for a permit on the gate before answering.
        Gated,
        /// Never answers.
        Hang,
    }

    struct StubGenerator {
        behaviour: Behaviour,
        gate: tokio::sync::Semaphore,
        calls: AtomicUsize,
    }

    impl ImageGenerator for StubGenerator {
        fn generate<'a>(&'a self, _request: &'a GenerationRequest) -> GenerateFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = match self.behaviour {
                Behaviour::Fail => Err(SnowcardError::Transport("503: model overloaded".to_string())),
                _ => crate::encoding::encode(&png_bytes(60, 80), "image/png"),
            };
            let behaviour = self.behaviour;
            Box::pin(async move {
                match behaviour {
                    Behaviour::Gated => {
                        let _permit = self.gate.acquire().await.expect("gate open");
                    }
                    Behaviour::Hang => std::future::pending::<()>().await,
                    Behaviour::Succeed | Behaviour::Fail => {}
                }
                result
            })
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 255]));
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
            .expect("png");
        out
    }

    fn app_with_state(behaviour: Behaviour) -> (Router, AppState, Arc<StubGenerator>) {
        let generator = Arc::new(StubGenerator {
            behaviour,
            gate: tokio::sync::Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let compositor = Arc::new(Compositor::new(Arc::new(fontdb::Database::new())));
        let pipeline = Pipeline::new(generator.clone(), compositor, Style::Classic);
        let state = AppState::new(pipeline);
        (create_router(state.clone()), state, generator)
    }

    fn app(behaviour: Behaviour) -> (Router, Arc<StubGenerator>) {
        let (router, _, generator) = app_with_state(behaviour);
        (router, generator)
    }

    async fn read_body(response: axum::response::Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8_lossy(&bytes).to_string()
    }

    fn cookie_from(response: &axum::response::Response) -> String {
        response
            .headers()
            .get(SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .expect("cookie text")
            .split(';')
            .next()
            .expect("cookie pair")
            .to_string()
    }

    fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (content_type, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photos\"; filename=\"photo\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    /// Opens a session and returns its cookie. Only a change to the studio mints one.
    async fn open_session(app: &Router) -> String {
        let request = Request::builder()
            .method("POST")
            .uri("/reset")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        cookie_from(&response)
    }

    async fn wait_for_card(app: &Router, cookie: &str) -> String {
        for _ in 0..200 {
            let body = get_page(app, cookie).await;
            if body.contains("/card.png?t=") {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("the card never arrived");
    }

    /// Sends a generate request and gives up on it before the model answers.
    async fn abandon_generate(app: &Router, cookie: &str) {
        let abandoned =
            tokio::time::timeout(Duration::from_millis(200), post(app, cookie, "/generate")).await;
        assert!(abandoned.is_err(), "the model should still be working");
    }

    async fn get_page(app: &Router, cookie: &str) -> String {
        let request = Request::builder()
            .uri("/")
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        read_body(response).await
    }

    async fn post(app: &Router, cookie: &str, uri: &str) -> axum::response::Response {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn upload(
        app: &Router,
        cookie: &str,
        files: &[(&str, &[u8])],
    ) -> axum::response::Response {
        let request = Request::builder()
            .method("POST")
            .uri("/photos")
            .header(COOKIE, cookie)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(files)))
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn empty_studio_asks_for_photos() {
        let (app, _) = app(Behaviour::Succeed);
        let request = Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_none());
        let body = read_body(response).await;
        assert!(body.contains("Загрузите фотографии для начала"));
        assert!(body.contains("Ваша ретро-открытка"));
    }

    #[tokio::test]
    async fn uploads_show_count_and_group_wording() {
        let (app, _) = app(Behaviour::Succeed);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);

        let response = upload(
            &app,
            &cookie,
            &[("image/png", photo.as_slice()), ("image/png", photo.as_slice())],
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/");

        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Выбрано фото: 2 из 3"));
        assert!(body.contains("Общая ретро-открытка"));
        assert!(body.contains("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn fourth_photo_is_dropped_with_a_warning() {
        let (app, _) = app(Behaviour::Succeed);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);
        let files: Vec<(&str, &[u8])> = (0..4).map(|_| ("image/png", photo.as_slice())).collect();

        let response = upload(&app, &cookie, &files).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Выбрано фото: 3 из 3"));
        assert!(body.contains("не больше 3 фото"));
        assert!(!body.contains("name=\"photos\""));
    }

    #[tokio::test]
    async fn generic_content_type_is_sniffed_and_junk_rejected() {
        let (app, _) = app(Behaviour::Succeed);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);

        upload(
            &app,
            &cookie,
            &[
                ("application/octet-stream", photo.as_slice()),
                ("text/plain", b"definitely not a photo".as_slice()),
            ],
        )
        .await;

        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Выбрано фото: 1 из 3"));
        assert!(body.contains("не похож на фотографию"));
    }

    #[tokio::test]
    async fn generate_then_download() {
        let (app, generator) = app(Behaviour::Succeed);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);
        upload(&app, &cookie, &[("image/png", photo.as_slice())]).await;

        let response = post(&app, &cookie, "/generate").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let body = get_page(&app, &cookie).await;
        assert!(body.contains("/card.png?t="));
        assert!(body.contains("soviet_postcard_"));

        let request = Request::builder()
            .uri("/card.png")
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "image/png");
        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"soviet_postcard_"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let decoded = image::load_from_memory(&bytes).expect("card decodes");
        assert_eq!((decoded.width(), decoded.height()), (60, 80));
    }

    #[tokio::test]
    async fn generate_without_photos_does_not_call_the_model() {
        let (app, generator) = app(Behaviour::Succeed);
        let cookie = open_session(&app).await;

        let response = post(&app, &cookie, "/generate").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

        let body = get_page(&app, &cookie).await;
        assert!(body.contains("хотя бы одно фото"));
    }

    #[tokio::test]
    async fn failure_is_shown_instead_of_a_card() {
        let (app, _) = app(Behaviour::Fail);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);
        upload(&app, &cookie, &[("image/png", photo.as_slice())]).await;

        post(&app, &cookie, "/generate").await;
        let body = get_page(&app, &cookie).await;
        assert!(body.contains("model overloaded"));
        assert!(!body.contains("/card.png?t="));

        let request = Request::builder()
            .uri("/card.png")
            .header(COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let (app, _) = app(Behaviour::Succeed);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);
        upload(&app, &cookie, &[("image/png", photo.as_slice())]).await;
        post(&app, &cookie, "/generate").await;

        let response = post(&app, &cookie, "/reset").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Загрузите фотографии для начала"));
        assert!(!body.contains("/card.png?t="));
    }

    #[tokio::test]
    async fn removing_photos() {
        let (app, _) = app(Behaviour::Succeed);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);
        upload(
            &app,
            &cookie,
            &[("image/png", photo.as_slice()), ("image/png", photo.as_slice())],
        )
        .await;

        let response = post(&app, &cookie, "/photos/7/delete").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = post(&app, &cookie, "/photos/0/delete").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Выбрано фото: 1 из 3"));
        assert!(body.contains("Ваша ретро-открытка"));
    }

    #[tokio::test]
    async fn sessions_get_separate_studios() {
        let (app, _) = app(Behaviour::Succeed);
        let first = open_session(&app).await;
        let second = open_session(&app).await;
        assert_ne!(first, second);

        let photo = png_bytes(4, 4);
        upload(&app, &first, &[("image/png", photo.as_slice())]).await;

        assert!(get_page(&app, &first).await.contains("Выбрано фото: 1 из 3"));
        assert!(get_page(&app, &second).await.contains("Загрузите фотографии для начала"));
    }

    #[tokio::test]
    async fn stylesheet_is_served() {
        let (app, _) = app(Behaviour::Succeed);
        let request = Request::builder()
            .uri("/static/styles.css")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/css");
    }

    #[tokio::test]
    async fn abandoned_generate_still_lands() {
        let (app, generator) = app(Behaviour::Gated);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);
        upload(&app, &cookie, &[("image/png", photo.as_slice())]).await;

        abandon_generate(&app, &cookie).await;
        let response = post(&app, &cookie, "/generate").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        generator.gate.add_permits(1);
        wait_for_card(&app, &cookie).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let response = upload(&app, &cookie, &[("image/png", photo.as_slice())]).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn reset_frees_a_studio_stuck_on_the_model() {
        let (app, _) = app(Behaviour::Hang);
        let cookie = open_session(&app).await;
        let photo = png_bytes(4, 4);
        upload(&app, &cookie, &[("image/png", photo.as_slice())]).await;

        abandon_generate(&app, &cookie).await;
        let response = upload(&app, &cookie, &[("image/png", photo.as_slice())]).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = post(&app, &cookie, "/reset").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let response = upload(&app, &cookie, &[("image/png", photo.as_slice())]).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Выбрано фото: 1 из 3"));
    }

    #[tokio::test]
    async fn looking_around_does_not_open_studios() {
        let (app, state, _) = app_with_state(Behaviour::Succeed);
        for uri in ["/", "/", "/card.png", "/static/styles.css"] {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert!(response.status() == StatusCode::OK || response.status() == StatusCode::NOT_FOUND);
            assert!(response.headers().get(SET_COOKIE).is_none(), "{uri} set a cookie");
        }
        assert_eq!(state.studio_count().await, 0);

        open_session(&app).await;
        assert_eq!(state.studio_count().await, 1);
    }

    #[tokio::test]
    async fn idle_studios_are_swept_but_busy_ones_kept() {
        let (app, state, _) = app_with_state(Behaviour::Hang);
        let idle = open_session(&app).await;
        let busy = open_session(&app).await;
        let photo = png_bytes(4, 4);
        upload(&app, &busy, &[("image/png", photo.as_slice())]).await;
        abandon_generate(&app, &busy).await;

        assert_eq!(state.sweep_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(state.sweep_idle(Duration::ZERO).await, 1);
        assert_eq!(state.studio_count().await, 1);

        // the forgotten studio starts over
        assert!(get_page(&app, &idle).await.contains("Загрузите фотографии для начала"));
        assert!(get_page(&app, &busy).await.contains("Выбрано фото: 1 из 3"));
    }

    #[test]
    fn studio_ids_are_alphanumeric() {
        let id = generate_studio_id();
        assert_eq!(id.len(), STUDIO_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
