//! Capability registry: the models the assistant needs from the runtime.
//!
//! Pure data. The bootstrap manager walks [`ModelRegistry::models`] in order
//! and pulls whatever the runtime does not already have.

use std::collections::BTreeSet;

/// Generation model used for answers.
pub const DEFAULT_GENERATION_MODEL: &str = "deepseek-r1:1.5b";

/// Embedding model; produces 768-dimensional vectors.
pub const DEFAULT_EMBEDDING_MODEL: &str = "EntropyYue/jina-embeddings-v2-base-zh";

/// Models required out of the box, in pull order.
pub const REQUIRED_MODELS: &[&str] = &[DEFAULT_GENERATION_MODEL, DEFAULT_EMBEDDING_MODEL];

/// Ordered, duplicate-free list of required model identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    models: Vec<String>,
}

impl ModelRegistry {
    /// Build a registry, dropping duplicates while keeping first-seen order.
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let models = models
            .into_iter()
            .map(Into::into)
            .filter(|m: &String| !m.trim().is_empty() && seen.insert(m.clone()))
            .collect();
        Self { models }
    }

    pub fn builtin() -> Self {
        Self::new(REQUIRED_MODELS.iter().copied())
    }

    /// Append `model` unless already present.
    pub fn require(&mut self, model: &str) {
        if !self.models.iter().any(|m| m == model) {
            self.models.push(model.to_string());
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Required models not satisfied by `installed`, in registry order.
    pub fn missing<'a>(&'a self, installed: &BTreeSet<String>) -> Vec<&'a str> {
        self.models
            .iter()
            .filter(|m| !is_present(m, installed))
            .map(String::as_str)
            .collect()
    }

    pub fn all_present(&self, installed: &BTreeSet<String>) -> bool {
        self.missing(installed).is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Whether `model` is satisfied by the runtime's installed list.
///
/// The runtime reports untagged models with an implicit `:latest` tag.
pub fn is_present(model: &str, installed: &BTreeSet<String>) -> bool {
    if installed.contains(model) {
        return true;
    }
    !model.contains(':') && installed.contains(&format!("{}:latest", model))
}
