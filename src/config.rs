//! Process configuration from environment variables

use crate::llm::{default_model, DEFAULT_BASE_URL};

const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub port: u16,
    /// Create a default session on first send when none exists
    pub lazy_bootstrap: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("API_KEY")),
            base_url: non_empty("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: non_empty("DOUZHIDAO_MODEL").unwrap_or_else(|| default_model().id.to_string()),
            port: non_empty("DOUZHIDAO_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            lazy_bootstrap: non_empty("DOUZHIDAO_LAZY_BOOTSTRAP")
                .is_none_or(|v| !matches!(v.trim(), "0" | "false" | "no" | "off")),
        }
    }
}
