pub(crate) use crate::error::SnowcardError;
pub(crate) use crate::web::AppState;
pub(crate) use askama::Template;
pub(crate) use askama_web::WebTemplate;
pub(crate) use axum::extract::{Path, State};
pub(crate) use axum::http::{StatusCode, header::CONTENT_TYPE};
pub(crate) use axum::response::{IntoResponse, Redirect};
pub(crate) use tower_sessions::Session;
pub(crate) use tracing::{debug, info};
