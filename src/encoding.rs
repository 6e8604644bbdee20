//! Self-describing `data:` encodings of image bytes.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose;
use regex::Regex;
use tracing::debug;

use crate::constants::FALLBACK_MEDIA_TYPE;
use crate::error::SnowcardError;

static MEDIA_TYPE_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r":(.*?);"));

/// A photo as captured from the uploader. Immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceImage {
    bytes: Vec<u8>,
    media_type: String,
}

impl SourceImage {
    /// Captures a photo, rejecting an empty media type.
    pub fn new(bytes: Vec<u8>, media_type: &str) -> Result<Self, SnowcardError> {
        let media_type = media_type.trim();
        if media_type.is_empty() {
            return Err(SnowcardError::InvalidRequest(
                "media type must not be empty".to_string(),
            ));
        }
        Ok(Self {
            bytes,
            media_type: media_type.to_string(),
        })
    }

    /// Captures a photo whose declared type may be missing or generic, sniffing the bytes.
    pub fn from_upload(bytes: Vec<u8>, declared: Option<&str>) -> Result<Self, SnowcardError> {
        let declared = declared
            .map(str::trim)
            .filter(|value| value.starts_with("image/"));
        let media_type = match declared {
            Some(value) => value.to_string(),
            None => sniff_media_type(&bytes)
                .ok_or_else(|| {
                    SnowcardError::InvalidRequest("upload is not a recognised image".to_string())
                })?
                .to_string(),
        };
        Self::new(bytes, &media_type)
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// MIME type, eg `image/jpeg`.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The `data:` form of this photo.
    pub fn encode(&self) -> EncodedImage {
        EncodedImage(format!(
            "data:{};base64,{}",
            self.media_type,
            general_purpose::STANDARD.encode(&self.bytes)
        ))
    }
}

/// `data:<mediaType>;base64,<payload>`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedImage(String);

impl EncodedImage {
    /// Wraps an already base64-encoded payload.
    pub fn from_base64(media_type: &str, payload: &str) -> Self {
        Self(format!("data:{media_type};base64,{payload}"))
    }

    /// The full `data:` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Media type recovered from the prefix.
    pub fn media_type(&self) -> Result<String, SnowcardError> {
        decode(self).map(|(media_type, _)| media_type)
    }

    /// Base64-decoded payload bytes.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, SnowcardError> {
        let (_, payload) = decode(self)?;
        Ok(general_purpose::STANDARD.decode(payload)?)
    }
}

impl std::fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<EncodedImage> for String {
    fn from(value: EncodedImage) -> Self {
        value.0
    }
}

/// Encodes raw bytes under the given media type.
pub fn encode(bytes: &[u8], media_type: &str) -> Result<EncodedImage, SnowcardError> {
    let media_type = media_type.trim();
    if media_type.is_empty() {
        return Err(SnowcardError::InvalidRequest(
            "media type must not be empty".to_string(),
        ));
    }
    Ok(EncodedImage(format!(
        "data:{media_type};base64,{}",
        general_purpose::STANDARD.encode(bytes)
    )))
}

/// Splits an encoded image into `(media type, base64 payload)`.
///
/// A missing `,` separator is an error. A header without a `:…;` type segment falls back to
/// `image/png`: generator output is always PNG, so an unlabelled payload is read as one.
pub fn decode(image: &EncodedImage) -> Result<(String, String), SnowcardError> {
    let Some((header, payload)) = image.0.split_once(',') else {
        return Err(SnowcardError::MalformedEncoding(
            "encoded image has no ',' separator".to_string(),
        ));
    };
    let pattern = MEDIA_TYPE_PATTERN
        .as_ref()
        .map_err(|err| SnowcardError::InternalServerError(err.to_string()))?;
    let media_type = match pattern
        .captures(header)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .filter(|value| !value.is_empty())
    {
        Some(value) => value.to_string(),
        None => {
            debug!("No media type in '{header}', assuming {FALLBACK_MEDIA_TYPE}");
            FALLBACK_MEDIA_TYPE.to_string()
        }
    };
    Ok((media_type, payload.to_string()))
}

/// Guesses the MIME type of image bytes from their magic number.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    let media_type = format.to_mime_type();
    media_type.starts_with("image/").then_some(media_type)
}
