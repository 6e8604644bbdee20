//! Error handling

use axum::response::IntoResponse;
use tracing::{info, warn};

/// Errors raised by the postcard pipeline and the studio web front-end.
#[derive(Debug)]
pub enum SnowcardError {
    /// Missing, placeholder or rejected API credential
    Authentication(String),
    /// Network or HTTP-level failure talking to the generation endpoint
    Transport(String),
    /// Well-formed response that carried no usable image, eg safety-filtered
    NoImageReturned(String),
    /// An encoded image string or payload could not be parsed
    MalformedEncoding(String),
    /// A precondition on the caller's input was violated
    InvalidRequest(String),
    /// A generation is already in flight for this session
    Busy,
    /// When you didn't do the right thing
    BadRequest,
    /// When a requested resource is not found
    NotFound(String),
    /// When an internal server error occurs
    InternalServerError(String),
}

impl SnowcardError {
    /// The single human-readable message shown to the person making the card.
    pub fn user_message(&self) -> String {
        match self {
            Self::Authentication(msg) => format!("The image service rejected the API key: {msg}"),
            Self::Transport(msg) => format!("Could not reach the image service: {msg}"),
            Self::NoImageReturned(msg) => format!("The model did not return an image: {msg}"),
            Self::MalformedEncoding(msg) => format!("The image could not be read: {msg}"),
            Self::InvalidRequest(msg) => msg.clone(),
            Self::Busy => "A postcard is already being drawn, please wait.".to_string(),
            Self::BadRequest => "Bad request".to_string(),
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::InternalServerError(_) => "Failed to generate the card.".to_string(),
        }
    }

    /// Whether re-invoking the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::NoImageReturned(_) | Self::Busy)
    }
}

impl std::fmt::Display for SnowcardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication(msg) => write!(f, "Authentication error: {msg}"),
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::NoImageReturned(msg) => write!(f, "No image returned: {msg}"),
            Self::MalformedEncoding(msg) => write!(f, "Malformed encoding: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
            Self::Busy => write!(f, "A generation is already in flight"),
            Self::BadRequest => write!(f, "Bad request"),
            Self::NotFound(what) => write!(f, "Not found: {what}"),
            Self::InternalServerError(msg) => write!(f, "Internal server error: {msg}"),
        }
    }
}

impl std::error::Error for SnowcardError {}

impl From<std::io::Error> for SnowcardError {
    fn from(err: std::io::Error) -> Self {
        SnowcardError::InternalServerError(err.to_string())
    }
}

impl From<axum::http::Error> for SnowcardError {
    fn from(err: axum::http::Error) -> Self {
        SnowcardError::InternalServerError(err.to_string())
    }
}

impl From<reqwest::Error> for SnowcardError {
    fn from(err: reqwest::Error) -> Self {
        SnowcardError::Transport(err.to_string())
    }
}

impl From<base64::DecodeError> for SnowcardError {
    fn from(err: base64::DecodeError) -> Self {
        SnowcardError::MalformedEncoding(err.to_string())
    }
}

impl From<image::ImageError> for SnowcardError {
    fn from(err: image::ImageError) -> Self {
        SnowcardError::MalformedEncoding(err.to_string())
    }
}

impl IntoResponse for SnowcardError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            SnowcardError::Authentication(msg) => {
                warn!("Authentication failure: {}", msg);
                axum::http::StatusCode::UNAUTHORIZED
            }
            SnowcardError::Transport(msg) => {
                warn!("Transport failure: {}", msg);
                axum::http::StatusCode::BAD_GATEWAY
            }
            SnowcardError::NoImageReturned(msg) => {
                info!("No image returned: {}", msg);
                axum::http::StatusCode::UNPROCESSABLE_ENTITY
            }
            SnowcardError::InvalidRequest(msg) => {
                info!("Invalid request: {}", msg);
                axum::http::StatusCode::BAD_REQUEST
            }
            SnowcardError::BadRequest => {
                info!("Bad request received");
                axum::http::StatusCode::BAD_REQUEST
            }
            SnowcardError::Busy => {
                info!("Rejected re-entrant generation");
                axum::http::StatusCode::CONFLICT
            }
            SnowcardError::NotFound(url) => {
                tracing::error!("404 {url}");
                axum::http::StatusCode::NOT_FOUND
            }
            SnowcardError::MalformedEncoding(msg) => {
                tracing::error!("Malformed encoding: {}", msg);
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
            SnowcardError::InternalServerError(message) => {
                tracing::error!("Internal server error: {}", message);
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let mut response =
            axum::response::Response::new(axum::body::Body::from(self.user_message()));
        *response.status_mut() = status;
        response
    }
}
