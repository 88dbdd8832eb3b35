//! Configuration for the engine as a whole.
//!
//! Every field has a default, so a configuration file only needs to mention
//! what it changes. The completion backend is normally configured from the
//! environment instead, see [`CompletionConfig::from_env`].

use serde::{Deserialize, Serialize};

use crate::{
    complete::CompletionConfig,
    constant::{DEFAULT_SIMULATION_LOOP_BOUND, ENV_AI_TIMEOUT_MS},
    optimize::OptimizerLimits,
    scan::ScannerLimits,
    verify::VerifierLimits,
};

/// The limits for simulation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SimulationLimits {
    /// How many times each loop is assumed to run when estimating gas.
    pub loop_bound: u64,
}

impl Default for SimulationLimits {
    fn default() -> Self {
        Self {
            loop_bound: DEFAULT_SIMULATION_LOOP_BOUND,
        }
    }
}

/// The configuration of an [`crate::Engine`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scanner:    ScannerLimits,
    pub verifier:   VerifierLimits,
    pub optimizer:  OptimizerLimits,
    pub simulation: SimulationLimits,
    pub completion: CompletionConfig,
}

impl EngineConfig {
    /// Reads a configuration from JSON.
    ///
    /// # Errors
    ///
    /// - [`serde_json::Error`] if `json` is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Overrides the completion configuration with whatever the process
    /// environment sets.
    #[must_use]
    pub fn with_completion_from_env(mut self) -> Self {
        let from_env = CompletionConfig::from_env();
        if from_env.endpoint.is_some() {
            self.completion.endpoint = from_env.endpoint;
        }
        if from_env.api_key.is_some() {
            self.completion.api_key = from_env.api_key;
        }
        if std::env::var(ENV_AI_TIMEOUT_MS).is_ok() {
            self.completion.timeout_ms = from_env.timeout_ms;
        }
        self
    }
}

#[cfg(test)]
mod test {
    use crate::{
        config::EngineConfig,
        constant::{DEFAULT_MAX_PATHS, DEFAULT_OPTIMIZER_ROUNDS},
    };

    #[test]
    fn partial_files_keep_defaults() -> anyhow::Result<()> {
        let config = EngineConfig::from_json(
            r#"{
                "verifier": {"max_paths": 8},
                "completion": {"endpoint": "http://localhost:7000", "api_key": "secret"}
            }"#,
        )?;

        assert_eq!(config.verifier.max_paths, 8);
        assert_ne!(config.verifier.max_paths, DEFAULT_MAX_PATHS);
        assert_eq!(config.optimizer.max_rounds, DEFAULT_OPTIMIZER_ROUNDS);
        assert_eq!(config.completion.api_key.as_deref(), Some("secret"));

        let written = serde_json::to_string(&config)?;
        assert!(!written.contains("secret"));

        Ok(())
    }

    #[test]
    fn rejects_malformed_files() {
        assert!(EngineConfig::from_json(r#"{"verifier": {"max_paths": "many"}}"#).is_err());
    }
}
