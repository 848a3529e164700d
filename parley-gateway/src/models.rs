//! Catalog of known models, ordered from fastest to most capable.
//!
//! The catalog is informational: turns may name any model id and the
//! upstream decides whether it exists.

use serde::Serialize;

/// A model the gateway knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub description: &'static str,
}

pub const CLAUDE_3_HAIKU: ModelInfo = ModelInfo {
    id: "claude-3-haiku-20240307",
    description: "Fastest and most affordable model, ideal for simple tasks",
};

pub const CLAUDE_SONNET_4: ModelInfo = ModelInfo {
    id: "claude-sonnet-4-20250514",
    description: "Most advanced Claude model with superior capabilities (recommended default)",
};

/// Known models.
pub const MODELS: &[ModelInfo] = &[CLAUDE_3_HAIKU, CLAUDE_SONNET_4];

/// Look up a catalog entry by model id.
pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|model| model.id == id)
}
