//! Guardian set of a wallet.
//!
//! Guardians are independent of liveness state; the registry only enforces
//! that ids and keys are unique and that keys parse.

use secp256k1::XOnlyPublicKey;
use std::collections::BTreeMap;

use crate::error::PolError;
use crate::signature::parse_public_key;
use crate::types::GuardianConfig;

#[derive(Debug, Clone, Default)]
pub struct GuardianRegistry {
    guardians: BTreeMap<String, GuardianConfig>,
}

impl GuardianRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted configs
    pub fn from_configs(configs: Vec<GuardianConfig>) -> Result<Self, PolError> {
        let mut registry = Self::new();
        for config in configs {
            registry.add(config)?;
        }
        Ok(registry)
    }

    pub fn add(&mut self, config: GuardianConfig) -> Result<(), PolError> {
        if config.guardian_id.trim().is_empty() {
            return Err(PolError::Validation("Guardian id must not be empty".into()));
        }
        if self.guardians.contains_key(&config.guardian_id) {
            return Err(PolError::Validation(format!(
                "Guardian {} already exists",
                config.guardian_id
            )));
        }
        let key = parse_public_key(&config.public_key)?;
        if let Some(existing) = self.guardians.values().find(|g| {
            parse_public_key(&g.public_key).map(|k| k == key).unwrap_or(false)
        }) {
            return Err(PolError::Validation(format!(
                "Guardian {} already uses this key",
                existing.guardian_id
            )));
        }

        self.guardians.insert(config.guardian_id.clone(), config);
        Ok(())
    }

    pub fn remove(&mut self, guardian_id: &str) -> Result<GuardianConfig, PolError> {
        self.guardians
            .remove(guardian_id)
            .ok_or_else(|| PolError::Validation(format!("Unknown guardian {}", guardian_id)))
    }

    pub fn get(&self, guardian_id: &str) -> Option<&GuardianConfig> {
        self.guardians.get(guardian_id)
    }

    /// Guardians ordered by id
    pub fn list(&self) -> Vec<GuardianConfig> {
        self.guardians.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guardians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guardians.is_empty()
    }

    /// Guardian keys for the recovery script
    pub fn public_keys(&self) -> Result<Vec<XOnlyPublicKey>, PolError> {
        self.guardians
            .values()
            .map(|g| parse_public_key(&g.public_key))
            .collect()
    }

    /// Ids of guardians that asked to hear about escalations
    pub fn escalation_recipients(&self) -> Vec<String> {
        self.guardians
            .values()
            .filter(|g| g.notification_preferences.on_escalated)
            .map(|g| g.guardian_id.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.guardians.clear();
    }
}
