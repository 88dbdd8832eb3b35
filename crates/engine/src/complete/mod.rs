//! Code completion for Aurion source files.
//!
//! Completions come from a [`CompletionProvider`]. The engine ships two: the
//! [`RemoteCompletion`] provider that asks an AI backend over an injected
//! [`CompletionTransport`], and the deterministic [`LocalCompletion`] provider
//! that ranks built-in templates by the context around the cursor. Which one
//! is used is decided by [`CompletionConfig::provider`].
//!
//! Completion never fails. A provider that cannot produce anything returns an
//! empty list, so an unreachable backend degrades the feature rather than the
//! request.

pub mod http;
pub mod local;
pub mod remote;

use std::{fmt::Debug, sync::Arc, time::Duration};

use aurion_errors::location::{LineIndex, Location};
use serde::{Deserialize, Serialize};

pub use crate::complete::{
    http::HttpTransport,
    local::LocalCompletion,
    remote::{CompletionTransport, RemoteCompletion},
};
use crate::constant::{DEFAULT_COMPLETION_TIMEOUT_MS, ENV_AI_ENDPOINT, ENV_AI_KEY, ENV_AI_TIMEOUT_MS};

/// The file being edited and where the cursor is in it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FileContext {
    pub path:    String,
    pub content: String,

    /// The cursor, or [`None`] to complete at the end of the file.
    pub cursor: Option<Location>,
}

impl FileContext {
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path:    path.into(),
            content: content.into(),
            cursor:  None,
        }
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: Location) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// The text before the cursor.
    #[must_use]
    pub fn before_cursor(&self) -> &str {
        let Some(cursor) = self.cursor else {
            return &self.content;
        };
        let offset = LineIndex::new(&self.content).offset(cursor);
        let end = self
            .content
            .char_indices()
            .nth(offset)
            .map_or(self.content.len(), |(byte, _)| byte);
        &self.content[..end]
    }
}

/// A single completion.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Suggestion {
    pub title:   String,
    pub snippet: String,

    /// How relevant the suggestion is, between 0 and 1.
    pub score: f64,
}

impl Suggestion {
    /// Creates a suggestion, clamping `score` into `[0, 1]`. A score that is
    /// not a number is treated as zero.
    #[must_use]
    pub fn new(title: impl Into<String>, snippet: impl Into<String>, score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            title: title.into(),
            snippet: snippet.into(),
            score,
        }
    }
}

/// Something that can offer completions for a file.
pub trait CompletionProvider: Debug + Send + Sync {
    /// Offers completions at the cursor of `context`, most relevant first.
    fn complete(&self, context: &FileContext) -> Vec<Suggestion>;
}

/// How completions are obtained.
///
/// The credential is never written out when the configuration is serialized.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// The AI backend to ask, or [`None`] to complete locally.
    pub endpoint: Option<String>,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// How long to wait for the backend, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint:   None,
            api_key:    None,
            timeout_ms: DEFAULT_COMPLETION_TIMEOUT_MS,
        }
    }
}

impl CompletionConfig {
    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration using `lookup` to get the value of each
    /// environment variable.
    ///
    /// Empty values count as unset, and a timeout that is not a number falls
    /// back to the default.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name| lookup(name).filter(|value: &String| !value.trim().is_empty());
        let timeout_ms = match get(ENV_AI_TIMEOUT_MS) {
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(%value, "ignoring invalid {ENV_AI_TIMEOUT_MS}");
                DEFAULT_COMPLETION_TIMEOUT_MS
            }),
            None => DEFAULT_COMPLETION_TIMEOUT_MS,
        };
        Self {
            endpoint: get(ENV_AI_ENDPOINT),
            api_key: get(ENV_AI_KEY),
            timeout_ms,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds the provider this configuration selects: a remote provider over
    /// HTTP if an endpoint is configured, and the local provider otherwise.
    #[must_use]
    pub fn provider(&self) -> Arc<dyn CompletionProvider> {
        match &self.endpoint {
            Some(endpoint) => {
                let transport = HttpTransport::new(endpoint.clone(), self.api_key.clone());
                Arc::new(RemoteCompletion::new(Arc::new(transport), self.timeout()))
            }
            None => Arc::new(LocalCompletion::new()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use aurion_errors::location::Location;

    use crate::{
        complete::{CompletionConfig, FileContext, Suggestion},
        constant::DEFAULT_COMPLETION_TIMEOUT_MS,
    };

    #[test]
    fn scores_are_clamped() {
        assert_eq!(Suggestion::new("a", "", 1.7).score, 1.0);
        assert_eq!(Suggestion::new("a", "", -3.0).score, 0.0);
        assert_eq!(Suggestion::new("a", "", f64::NAN).score, 0.0);
        assert_eq!(Suggestion::new("a", "", 0.25).score, 0.25);
    }

    #[test]
    fn reads_configuration_from_the_environment() {
        let vars = HashMap::from([
            ("AURION_AI_ENDPOINT", "http://localhost:9/complete"),
            ("AURION_AI_KEY", " "),
            ("AURION_AI_TIMEOUT_MS", "soon"),
        ]);
        let config = CompletionConfig::from_lookup(|name| vars.get(name).map(ToString::to_string));

        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9/complete"));
        assert_eq!(config.api_key, None);
        assert_eq!(config.timeout_ms, DEFAULT_COMPLETION_TIMEOUT_MS);
    }

    #[test]
    fn text_before_the_cursor() {
        let context = FileContext::new("a.aur", "contract A {\n  x: u64\n}").with_cursor(Location::new(2, 3));
        assert_eq!(context.before_cursor(), "contract A {\n  ");
    }
}
