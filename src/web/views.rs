use super::flash;
use super::prelude::*;
use super::existing_studio_id;
use crate::constants::{MAX_SOURCE_IMAGES, TITLE_TEXT};
use crate::studio::Studio;
use axum::http::header::CONTENT_DISPOSITION;
use axum::response::Response;
use tracing::instrument;

#[derive(Clone, Debug)]
pub(crate) struct PhotoView {
    pub(crate) index: usize,
    pub(crate) data_uri: String,
}

#[derive(Template, WebTemplate)]
#[template(path = "studio.html")]
pub(crate) struct StudioTemplate {
    title: &'static str,
    style_name: String,
    photos: Vec<PhotoView>,
    photo_count: usize,
    max_photos: usize,
    can_upload: bool,
    is_busy: bool,
    is_multi: bool,
    has_card: bool,
    card_url: String,
    download_name: String,
    card_degraded: bool,
    has_error: bool,
    error_message: String,
    has_flash: bool,
    flash_message: String,
    flash_class: String,
}

impl StudioTemplate {
    fn new(studio: &Studio, style_name: String) -> Self {
        let photos: Vec<PhotoView> = studio
            .sources()
            .iter()
            .enumerate()
            .map(|(index, source)| PhotoView {
                index,
                data_uri: source.encode().to_string(),
            })
            .collect();
        let card = studio.card();
        let error_message = studio.error().map(str::to_string);
        Self {
            title: TITLE_TEXT,
            style_name,
            photo_count: photos.len(),
            max_photos: MAX_SOURCE_IMAGES,
            can_upload: photos.len() < MAX_SOURCE_IMAGES && !studio.is_busy(),
            is_busy: studio.is_busy(),
            is_multi: photos.len() > 1,
            photos,
            has_card: card.is_some(),
            card_url: card
                .map(|card| format!("/card.png?t={}", card.created_at().timestamp_millis()))
                .unwrap_or_default(),
            download_name: card.map(|card| card.download_filename()).unwrap_or_default(),
            card_degraded: card.is_some_and(|card| card.is_degraded()),
            has_error: error_message.is_some(),
            error_message: error_message.unwrap_or_default(),
            has_flash: false,
            flash_message: String::new(),
            flash_class: String::new(),
        }
    }

    fn with_flash(mut self, message: Option<flash::FlashMessage>) -> Self {
        if let Some(message) = message {
            self.has_flash = true;
            self.flash_message = message.text.to_string();
            self.flash_class = message.class.to_string();
        }
        self
    }
}

/// handles the / GET
pub(crate) async fn root_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<StudioTemplate, SnowcardError> {
    // looking at the page does not open a studio
    let studio = match existing_studio_id(&session).await? {
        Some(id) => state.studio(&id).await.unwrap_or_default(),
        None => Studio::new(),
    };
    let flash = flash::take_flash_message(&session).await?;
    Ok(StudioTemplate::new(&studio, state.pipeline.style().to_string()).with_flash(flash))
}

/// Serves the current card as a download.
#[instrument(skip_all)]
pub(crate) async fn card_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Response, SnowcardError> {
    let id = existing_studio_id(&session).await?;
    let studio = match id {
        Some(id) => state.studio(&id).await,
        None => None,
    };
    let card = studio
        .as_ref()
        .and_then(Studio::card)
        .cloned()
        .ok_or_else(|| SnowcardError::NotFound("/card.png".to_string()))?;
    let media_type = card.image().media_type()?;
    let bytes = card.image().payload_bytes()?;
    debug!("Serving {} bytes as {}", bytes.len(), card.download_filename());
    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, media_type),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", card.download_filename()),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub(crate) async fn styles_handler() -> impl IntoResponse {
    const STYLES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/static/styles.css"));
    ([(CONTENT_TYPE, "text/css")], STYLES)
}
