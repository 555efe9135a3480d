// Message content model shared by the classifier, the consensus engine and
// the dispatcher.
//
// Inbound transports hand us already-decoded content tagged by kind. The
// rest of the pipeline never branches on the raw shape - it works on the
// renderable-text projection produced here.

use serde::{Deserialize, Serialize};

/// A piece of inbound content, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageContent {
    Text { text: String },
    Photo { caption: Option<String> },
    Video { caption: Option<String> },
    Document { file_name: Option<String>, caption: Option<String> },
    Sticker { emoji: Option<String> },
    Voice { duration_secs: u32 },
    Animation { caption: Option<String> },
    Location { latitude: f64, longitude: f64 },
    Poll { question: String, options: Vec<String> },
    Unsupported,
}

impl MessageContent {
    /// Convenience constructor for the common case.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Short label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Photo { .. } => "photo",
            Self::Video { .. } => "video",
            Self::Document { .. } => "document",
            Self::Sticker { .. } => "sticker",
            Self::Voice { .. } => "voice",
            Self::Animation { .. } => "animation",
            Self::Location { .. } => "location",
            Self::Poll { .. } => "poll",
            Self::Unsupported => "unsupported",
        }
    }

    /// The renderable-text projection.
    ///
    /// This is the string the classifier scans and the dispatcher forwards.
    /// Media kinds render a bracketed placeholder plus whatever caption they
    /// carry. `Unsupported` has no projection and is dropped upstream.
    pub fn render_text(&self) -> Option<String> {
        fn with_caption(label: &str, caption: &Option<String>) -> String {
            match caption {
                Some(caption) if !caption.trim().is_empty() => {
                    format!("[{}] {}", label, caption.trim())
                }
                _ => format!("[{}]", label),
            }
        }

        match self {
            Self::Text { text } => Some(text.clone()),
            Self::Photo { caption } => Some(with_caption("photo", caption)),
            Self::Video { caption } => Some(with_caption("video", caption)),
            Self::Document { file_name, caption } => {
                let label = match file_name {
                    Some(name) => format!("document {}", name),
                    None => "document".to_string(),
                };
                Some(with_caption(&label, caption))
            }
            Self::Sticker { emoji } => Some(with_caption("sticker", emoji)),
            Self::Voice { duration_secs } => Some(format!("[voice {}s]", duration_secs)),
            Self::Animation { caption } => Some(with_caption("animation", caption)),
            Self::Location {
                latitude,
                longitude,
            } => Some(format!("[location {:.5}, {:.5}]", latitude, longitude)),
            Self::Poll { question, options } => {
                Some(format!("[poll] {} ({})", question, options.join(" / ")))
            }
            Self::Unsupported => None,
        }
    }
}
