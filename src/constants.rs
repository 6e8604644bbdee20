//! Shared constants/setters for things
//!

/// The greeting drawn across the top of every card.
pub const TITLE_TEXT: &str = "С Новым годом!";

/// Decorative script face for the title; `cursive` is the generic fallback.
pub const TITLE_FONT_FAMILY: &str = "Marck Script";

/// Default multimodal image model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

/// Default base URL of the generation API.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default environment variable holding the API credential.
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Header carrying the API credential on outbound calls.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Credential values that count as "not configured".
pub const PLACEHOLDER_API_KEYS: &[&str] = &["", "undefined", "null", "PLACEHOLDER_API_KEY"];

/// Maximum number of source photos per card.
pub const MAX_SOURCE_IMAGES: usize = 3;

/// Media type assumed when an encoded image does not declare one.
pub const FALLBACK_MEDIA_TYPE: &str = "image/png";

/// Upper bound on a single upload request body.
pub const MAX_UPLOAD_BYTES: usize = 3 * 16 * 1024 * 1024;

/// Prefix of the downloaded card's file name.
pub const DOWNLOAD_PREFIX: &str = "soviet_postcard";

/// Session key holding the studio id.
pub const STUDIO_SESSION_KEY: &str = "studio_id";

/// Length of generated studio ids
pub const STUDIO_ID_LENGTH: usize = 32;

/// A studio (and its session) untouched for this long is forgotten.
pub const STUDIO_IDLE_SECS: u64 = 2 * 60 * 60;

/// How often idle studios are swept.
pub const STUDIO_SWEEP_INTERVAL_SECS: u64 = 5 * 60;
