//! Centralized model catalog
//!
//! Every model a session may be configured with is listed here. Session
//! creation rejects ids outside this list.

use serde::Serialize;

/// Model definition with metadata
#[derive(Debug, Clone, Serialize)]
pub struct ModelDef {
    /// Model ID sent to the generation service (e.g., "gemini-3-flash-preview")
    pub id: &'static str,
    /// Short display name
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gemini-3-flash-preview",
            name: "Gemini 3 Flash",
            description: "速度快，响应敏捷（推荐）",
        },
        ModelDef {
            id: "gemini-3-pro-preview",
            name: "Gemini 3 Pro",
            description: "推理能力强，适合复杂问题",
        },
    ]
}

/// Get the default model definition
pub fn default_model() -> &'static ModelDef {
    &all_models()[0]
}

/// Look up a model by id
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    all_models().iter().find(|m| m.id == id)
}
