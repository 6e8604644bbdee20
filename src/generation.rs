//! Generation client: sends photos and a prompt to the multimodal model and pulls the first
//! inline image out of the reply.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use crate::constants::{
    API_KEY_HEADER, FALLBACK_MEDIA_TYPE, MAX_SOURCE_IMAGES, PLACEHOLDER_API_KEYS,
};
use crate::encoding::{EncodedImage, decode};
use crate::error::SnowcardError;

/// Aspect ratios the image model accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 1:1
    #[serde(rename = "1:1")]
    Square,
    /// 3:4
    #[serde(rename = "3:4")]
    Portrait3x4,
    /// 9:16
    #[serde(rename = "9:16")]
    Portrait9x16,
    /// 4:3
    #[serde(rename = "4:3")]
    Landscape4x3,
    /// 16:9
    #[serde(rename = "16:9")]
    Landscape16x9,
}

impl AspectRatio {
    /// Wire value, eg `"9:16"`.
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Landscape16x9 => "16:9",
        }
    }
}

/// One generation attempt: photos in upload order, then the prompt.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    images: Vec<EncodedImage>,
    prompt: String,
    aspect_ratio: AspectRatio,
}

impl GenerationRequest {
    /// Builds a request, rejecting zero or more than three photos.
    pub fn new(
        images: Vec<EncodedImage>,
        prompt: String,
        aspect_ratio: AspectRatio,
    ) -> Result<Self, SnowcardError> {
        check_image_count(images.len())?;
        Ok(Self {
            images,
            prompt,
            aspect_ratio,
        })
    }

    /// Photos, in upload order.
    pub fn images(&self) -> &[EncodedImage] {
        &self.images
    }

    /// Instruction text.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Requested aspect ratio.
    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }
}

fn check_image_count(count: usize) -> Result<(), SnowcardError> {
    if count == 0 {
        return Err(SnowcardError::InvalidRequest(
            "at least one photo is required".to_string(),
        ));
    }
    if count > MAX_SOURCE_IMAGES {
        return Err(SnowcardError::InvalidRequest(format!(
            "at most {MAX_SOURCE_IMAGES} photos are allowed, got {count}"
        )));
    }
    Ok(())
}

/// Boxed future type returned by [`ImageGenerator::generate`].
pub type GenerateFuture<'a> =
    Pin<Box<dyn Future<Output = Result<EncodedImage, SnowcardError>> + Send + 'a>>;

/// Something that turns a [`GenerationRequest`] into one image.
pub trait ImageGenerator: Send + Sync {
    /// Runs one generation. No retries.
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> GenerateFuture<'a>;
}

/// Where the API credential comes from. Resolved on every call so a rotated key is picked up
/// by the next attempt.
#[derive(Clone, Debug)]
pub enum CredentialSource {
    /// Read from this environment variable at call time.
    Env(String),
    /// A key handed over directly.
    Fixed(String),
}

impl CredentialSource {
    /// Returns the usable key, or `Authentication` when it is missing or a placeholder.
    pub fn resolve(&self) -> Result<String, SnowcardError> {
        let (key, origin) = match self {
            CredentialSource::Env(name) => (std::env::var(name).unwrap_or_default(), name.as_str()),
            CredentialSource::Fixed(key) => (key.clone(), "the supplied key"),
        };
        let key = key.trim();
        if PLACEHOLDER_API_KEYS.contains(&key) {
            return Err(SnowcardError::Authentication(format!(
                "no API key configured in {origin}"
            )));
        }
        Ok(key.to_string())
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RequestPart<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineDataOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineDataOut {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    image_config: ImageConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: AspectRatio,
}

/// Builds the wire body. Image parts come first, then the single text part: the model reads
/// the prompt as referring to the images before it.
fn request_body(request: &GenerationRequest) -> Result<GenerateContentRequest<'_>, SnowcardError> {
    let mut parts = Vec::with_capacity(request.images.len() + 1);
    for image in &request.images {
        let (mime_type, data) = decode(image)?;
        parts.push(RequestPart {
            inline_data: Some(InlineDataOut { mime_type, data }),
            text: None,
        });
    }
    parts.push(RequestPart {
        inline_data: None,
        text: Some(&request.prompt),
    });
    Ok(GenerateContentRequest {
        contents: vec![RequestContent {
            role: "user",
            parts,
        }],
        generation_config: GenerationConfig {
            image_config: ImageConfig {
                aspect_ratio: request.aspect_ratio,
            },
        },
    })
}

/// `generateContent` response body.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    /// Alternative answers; only the first is looked at.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Set when the prompt itself was blocked.
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

/// One complete alternative answer.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Ordered content parts.
    #[serde(default)]
    pub content: Option<CandidateContent>,
    /// eg `STOP`, `IMAGE_SAFETY`
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Content of a candidate.
#[derive(Deserialize, Debug, Default)]
pub struct CandidateContent {
    /// Ordered parts.
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

/// A text or inline-data part.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    /// Text the model wrote.
    #[serde(default)]
    pub text: Option<String>,
    /// Inline binary payload.
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

/// Base64 payload embedded in a response part.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// eg `image/png`
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Base64 bytes
    #[serde(default)]
    pub data: String,
}

/// Prompt-level feedback.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    /// eg `SAFETY`
    #[serde(default)]
    pub block_reason: Option<String>,
    /// Human readable explanation
    #[serde(default)]
    pub block_reason_message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<Value>,
}

impl ApiError {
    fn is_auth_failure(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED")
        ) || self.details.iter().any(|detail| {
            detail.get("reason").and_then(Value::as_str) == Some("API_KEY_INVALID")
        })
    }
}

/// Takes the first inline image of the first candidate.
///
/// Anything else (no candidates, no parts, only text) is `NoImageReturned`, carrying whatever
/// explanation the model gave.
pub fn extract_inline_image(
    response: GenerateContentResponse,
) -> Result<EncodedImage, SnowcardError> {
    let block_reason = response.prompt_feedback.and_then(|feedback| {
        match (feedback.block_reason, feedback.block_reason_message) {
            (Some(reason), Some(message)) => Some(format!("prompt blocked ({reason}): {message}")),
            (Some(reason), None) => Some(format!("prompt blocked ({reason})")),
            (None, Some(message)) => Some(message),
            (None, None) => None,
        }
    });

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(SnowcardError::NoImageReturned(
            block_reason.unwrap_or_else(|| "response contained no candidates".to_string()),
        ));
    };

    let parts = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default();
    let mut texts = Vec::new();
    for part in parts {
        if let Some(inline) = part.inline_data.filter(|inline| !inline.data.is_empty()) {
            let media_type = inline
                .mime_type
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| FALLBACK_MEDIA_TYPE.to_string());
            return Ok(EncodedImage::from_base64(&media_type, &inline.data));
        }
        if let Some(text) = part.text {
            texts.push(text);
        }
    }

    let mut reasons = Vec::new();
    reasons.extend(block_reason);
    if let Some(finish) = candidate.finish_reason.filter(|reason| reason != "STOP") {
        reasons.push(format!("finish reason {finish}"));
    }
    let said = texts.join(" ");
    if !said.trim().is_empty() {
        reasons.push(said.trim().to_string());
    }
    if reasons.is_empty() {
        reasons.push("response contained no inline image".to_string());
    }
    Err(SnowcardError::NoImageReturned(reasons.join("; ")))
}

/// [`ImageGenerator`] backed by the Gemini `generateContent` REST API.
#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    credential: CredentialSource,
    debug_dir: Option<PathBuf>,
}

impl GeminiClient {
    /// New client for `model` under `endpoint`, eg `https://generativelanguage.googleapis.com/v1beta`.
    pub fn new(endpoint: Url, model: &str, credential: CredentialSource) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            model: model.to_string(),
            credential,
            debug_dir: None,
        }
    }

    /// Saves every raw response body under `dir` before it is parsed.
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    /// `{endpoint}/models/{model}:generateContent`
    pub fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.as_str().trim_end_matches('/'),
            self.model
        )
    }

    async fn write_api_response(&self, bytes: &[u8]) -> Result<Option<PathBuf>, SnowcardError> {
        static API_RESPONSE_SEQ: AtomicUsize = AtomicUsize::new(0);
        let Some(dir) = self.debug_dir.as_ref() else {
            return Ok(None);
        };
        let seq = API_RESPONSE_SEQ.fetch_add(1, Ordering::Relaxed);
        let ts = chrono::Utc::now().timestamp_millis();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("gemini_{ts}_{seq}.json"));
        tokio::fs::write(&path, bytes).await?;
        debug!("Saved API response to {}", path.display());
        Ok(Some(path))
    }

    #[instrument(skip_all, fields(model = %self.model, images = request.images.len(), aspect_ratio = request.aspect_ratio.as_str()))]
    async fn generate_content(
        &self,
        request: &GenerationRequest,
    ) -> Result<EncodedImage, SnowcardError> {
        check_image_count(request.images.len())?;
        let api_key = self.credential.resolve()?;
        let body = request_body(request)?;

        info!("Requesting postcard image");
        let resp = self
            .http
            .post(self.generate_url())
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| SnowcardError::Transport(format!("request failed: {err}")))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| SnowcardError::Transport(format!("failed reading body: {err}")))?;
        self.write_api_response(&bytes).await?;

        if !status.is_success() {
            let remote = serde_json::from_slice::<ApiErrorEnvelope>(&bytes)
                .ok()
                .map(|envelope| envelope.error);
            let message = remote
                .as_ref()
                .map(|err| err.message.clone())
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            let auth_failure = status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
                || remote.as_ref().is_some_and(ApiError::is_auth_failure);
            return Err(if auth_failure {
                SnowcardError::Authentication(format!("{status}: {message}"))
            } else {
                SnowcardError::Transport(format!("{status}: {message}"))
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_slice(&bytes)
            .map_err(|err| SnowcardError::Transport(format!("unreadable response: {err}")))?;
        extract_inline_image(parsed)
    }
}

impl ImageGenerator for GeminiClient {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> GenerateFuture<'a> {
        Box::pin(self.generate_content(request))
    }
}
