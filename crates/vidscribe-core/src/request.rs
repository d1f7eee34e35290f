use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::sampler::{EncodedFrame, FRAME_MIME};

/// Per-image quality/cost tier understood by the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    #[default]
    Low,
    High,
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailLevel::Low => write!(f, "low"),
            DetailLevel::High => write!(f, "high"),
        }
    }
}

impl FromStr for DetailLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(DetailLevel::Low),
            "high" => Ok(DetailLevel::High),
            other => Err(format!("unknown detail level {other:?}, expected \"low\" or \"high\"")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: DetailLevel,
}

/// One element of the user message content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: Vec<ContentPart>,
}

/// A single chat-completion request: the instruction followed by every
/// sampled frame, in frame order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl InferenceRequest {
    pub fn build(instruction: &str, frames: &[EncodedFrame], detail: DetailLevel) -> Self {
        let mut content = Vec::with_capacity(frames.len() + 1);
        content.push(ContentPart::Text {
            text: instruction.to_owned(),
        });
        content.extend(frames.iter().map(|frame| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: frame.data_uri(),
                detail,
            },
        }));

        let request = Self {
            messages: vec![Message {
                role: "user",
                content,
            }],
            temperature: None,
            max_tokens: None,
        };

        info!(
            image_count = request.image_count(),
            payload_bytes = request.payload_bytes(),
            %detail,
            "inference request built"
        );
        request
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn parts(&self) -> impl Iterator<Item = &ContentPart> {
        self.messages.iter().flat_map(|m| m.content.iter())
    }

    pub fn image_count(&self) -> usize {
        self.parts()
            .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
            .count()
    }

    /// Bytes of text and data URIs carried by the request.
    pub fn payload_bytes(&self) -> usize {
        self.parts()
            .map(|p| match p {
                ContentPart::Text { text } => text.len(),
                ContentPart::ImageUrl { image_url } => image_url.url.len(),
            })
            .sum()
    }
}

/// Recover the JPEG bytes from a `data:image/jpeg;base64,...` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| Error::InvalidDataUri("missing data: scheme".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::InvalidDataUri("missing payload separator".into()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| Error::InvalidDataUri("payload is not base64".into()))?;
    if mime != FRAME_MIME {
        return Err(Error::InvalidDataUri(format!("unexpected MIME type {mime:?}")));
    }

    STANDARD
        .decode(payload)
        .map_err(|e| Error::InvalidDataUri(e.to_string()))
}
