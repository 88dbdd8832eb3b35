//! Chain profiles describe what a target chain can represent and what running
//! code on it costs.
//!
//! The simulator never talks to a chain. It asks a [`ProfileSource`] for the
//! profile of each [`ChainDescriptor`] it is given, and the built-in source is
//! the [`DeclarativeProfiles`] registry, which can be extended from JSON.

use std::{collections::BTreeMap, fmt::Debug};

use aurion_errors::profile::{Error, Result};
use serde::{Deserialize, Serialize};

/// The identity of a chain to simulate against.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ChainDescriptor {
    pub name: String,

    /// Where the chain could be reached. It identifies the chain but is never
    /// connected to.
    #[serde(default)]
    pub rpc_endpoint: String,
}

impl ChainDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, rpc_endpoint: impl Into<String>) -> Self {
        Self {
            name:         name.into(),
            rpc_endpoint: rpc_endpoint.into(),
        }
    }
}

/// The gas charged for each kind of operation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct GasSchedule {
    /// Charged once per transaction.
    pub base:          u64,
    pub operation:     u64,
    pub storage_read:  u64,
    pub storage_write: u64,
    pub event:         u64,
    pub event_arg:     u64,
    pub internal_call: u64,
    pub external_call: u64,
    pub branch:        u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            base:          21_000,
            operation:     3,
            storage_read:  2_100,
            storage_write: 20_000,
            event:         375,
            event_arg:     375,
            internal_call: 40,
            external_call: 9_000,
            branch:        10,
        }
    }
}

/// What a chain supports.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChainProfile {
    pub name: String,

    /// The width of an address on the chain, in bits.
    pub address_width: u32,

    /// The widest native unsigned integer, in bits.
    pub max_integer_width: u32,
    pub supports_events:   bool,

    /// Whether the chain has a native currency that calls can carry.
    pub native_value_transfer: bool,

    /// The most gas a single transaction may use.
    pub gas_limit: u64,

    #[serde(default)]
    pub gas: GasSchedule,
}

impl ChainProfile {
    /// Checks that the profile describes a chain that could exist.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::Invalid {
            name:   self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            Err(invalid("the name is empty"))?;
        }
        if self.address_width == 0 {
            Err(invalid("addresses have no width"))?;
        }
        if !(8..=256).contains(&self.max_integer_width) {
            Err(invalid("the integer width must be between 8 and 256 bits"))?;
        }
        if self.gas_limit == 0 {
            Err(invalid("the gas limit is zero"))?;
        }
        Ok(())
    }
}

/// Something that knows the profiles of chains.
pub trait ProfileSource: Debug + Send + Sync {
    /// Gets the profile of `chain`, or [`None`] if the chain is unknown.
    fn profile(&self, chain: &ChainDescriptor) -> Option<ChainProfile>;
}

/// A registry of chain profiles, looked up by name.
///
/// Names match ignoring case and any characters other than letters and
/// digits, so `Aurlink VM` and `aurlink-vm` are the same chain.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeclarativeProfiles {
    profiles: BTreeMap<String, ChainProfile>,
}

impl DeclarativeProfiles {
    /// Creates a registry with no profiles.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry with the profiles of the chains that the engine
    /// knows about.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for profile in builtin_profiles() {
            registry.insert(profile);
        }
        registry
    }

    /// Adds `profile`, replacing any profile for the same chain.
    pub fn insert(&mut self, profile: ChainProfile) {
        self.profiles.insert(key(&profile.name), profile);
    }

    /// Adds every profile in `json`, which holds a list of profiles.
    ///
    /// Nothing is added unless every profile is valid.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if `json` is not a list of profiles.
    /// - [`Error::Invalid`] if any profile is invalid.
    pub fn extend_from_json(&mut self, json: &str) -> Result<()> {
        let profiles: Vec<ChainProfile> =
            serde_json::from_str(json).map_err(|e| Error::Malformed(e.to_string()))?;
        for profile in &profiles {
            profile.validate()?;
        }
        for profile in profiles {
            tracing::debug!(chain = %profile.name, "registered chain profile");
            self.insert(profile);
        }
        Ok(())
    }

    /// The names of the registered chains.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.values().map(|p| p.name.as_str())
    }
}

impl ProfileSource for DeclarativeProfiles {
    fn profile(&self, chain: &ChainDescriptor) -> Option<ChainProfile> {
        self.profiles.get(&key(&chain.name)).cloned()
    }
}

fn key(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn builtin_profiles() -> Vec<ChainProfile> {
    vec![
        ChainProfile {
            name:                  "Aurlink VM".to_string(),
            address_width:         256,
            max_integer_width:     128,
            supports_events:       true,
            native_value_transfer: true,
            gas_limit:             30_000_000,
            gas:                   GasSchedule {
                base:          10_000,
                operation:     2,
                storage_read:  800,
                storage_write: 5_000,
                event:         250,
                event_arg:     50,
                internal_call: 20,
                external_call: 2_500,
                branch:        5,
            },
        },
        ChainProfile {
            name:                  "Ethereum".to_string(),
            address_width:         160,
            max_integer_width:     256,
            supports_events:       true,
            native_value_transfer: true,
            gas_limit:             30_000_000,
            gas:                   GasSchedule::default(),
        },
        ChainProfile {
            name:                  "Solana".to_string(),
            address_width:         256,
            max_integer_width:     128,
            supports_events:       true,
            native_value_transfer: true,
            gas_limit:             200_000,
            gas:                   GasSchedule {
                base:          5_000,
                operation:     1,
                storage_read:  100,
                storage_write: 250,
                event:         100,
                event_arg:     10,
                internal_call: 10,
                external_call: 1_000,
                branch:        1,
            },
        },
        ChainProfile {
            name:                  "Starknet".to_string(),
            address_width:         251,
            max_integer_width:     256,
            supports_events:       true,
            native_value_transfer: false,
            gas_limit:             10_000_000,
            gas:                   GasSchedule {
                base:          5_000,
                operation:     10,
                storage_read:  1_000,
                storage_write: 10_000,
                event:         500,
                event_arg:     100,
                internal_call: 50,
                external_call: 3_000,
                branch:        10,
            },
        },
    ]
}

#[cfg(test)]
mod test {
    use aurion_errors::profile::Error;

    use crate::simulate::profile::{ChainDescriptor, DeclarativeProfiles, ProfileSource};

    #[test]
    fn builtin_profiles_are_valid_and_found_by_loose_names() -> anyhow::Result<()> {
        let registry = DeclarativeProfiles::builtin();
        assert_eq!(registry.names().count(), 4);

        let profile = registry
            .profile(&ChainDescriptor::new("aurlink-vm", "http://localhost:8545"))
            .ok_or_else(|| anyhow::anyhow!("no profile"))?;
        assert_eq!(profile.name, "Aurlink VM");
        profile.validate()?;

        assert!(registry.profile(&ChainDescriptor::new("Dogechain", "")).is_none());

        Ok(())
    }

    #[test]
    fn extends_from_json() -> anyhow::Result<()> {
        let mut registry = DeclarativeProfiles::empty();
        registry.extend_from_json(
            r#"[{
                "name": "Testnet",
                "address_width": 160,
                "max_integer_width": 64,
                "supports_events": false,
                "native_value_transfer": true,
                "gas_limit": 1000000,
                "gas": {"storage_write": 1}
            }]"#,
        )?;

        let profile = registry
            .profile(&ChainDescriptor::new("TESTNET", ""))
            .ok_or_else(|| anyhow::anyhow!("no profile"))?;
        assert_eq!(profile.gas.storage_write, 1);
        assert_eq!(profile.gas.base, 21_000);

        Ok(())
    }

    #[test]
    fn rejects_invalid_profiles_atomically() {
        let mut registry = DeclarativeProfiles::empty();
        let json = r#"[
            {"name": "Good", "address_width": 160, "max_integer_width": 64,
             "supports_events": true, "native_value_transfer": true, "gas_limit": 1},
            {"name": "Bad", "address_width": 0, "max_integer_width": 64,
             "supports_events": true, "native_value_transfer": true, "gas_limit": 1}
        ]"#;

        assert!(matches!(
            registry.extend_from_json(json),
            Err(Error::Invalid { name, .. }) if name == "Bad"
        ));
        assert_eq!(registry.names().count(), 0);
        assert!(matches!(registry.extend_from_json("{"), Err(Error::Malformed(_))));
    }
}
