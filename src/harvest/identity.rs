//! Network identity tracking and rotation.
//!
//! An identity is one egress configuration: direct, or via a configured
//! proxy. When remote failures match blocking signatures the run loop asks
//! for a rotation; the rotator advances cyclically through the identity
//! list, records the event in the run's persisted state, and waits a
//! settling delay before the caller re-establishes its session.

use chrono::Utc;
use tracing::{info, warn};

use super::error::HarvestError;
use super::pacing::Pacer;
use crate::models::RotationEvent;
use crate::state::StateStore;

/// One network egress configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub label: String,
    /// Proxy URL, or `None` for a direct connection.
    pub proxy_url: Option<String>,
}

impl Identity {
    fn from_entry(entry: &str) -> Option<Self> {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.eq_ignore_ascii_case("direct") || trimmed.eq_ignore_ascii_case("local") {
            return Some(Self {
                label: "direct".to_string(),
                proxy_url: None,
            });
        }
        Some(Self {
            label: trimmed.to_string(),
            proxy_url: Some(trimmed.to_string()),
        })
    }
}

/// Tracks the current identity and performs rotations.
pub struct IdentityRotator {
    identities: Vec<Identity>,
    current_index: usize,
    rotation_count: u32,
    max_rotations: u32,
}

impl IdentityRotator {
    /// Build the identity list from configured proxy entries, starting at
    /// the index persisted in the run state so a resumed run keeps its last
    /// known egress.
    pub fn new(proxies: &[String], start_index: usize, max_rotations: u32) -> Self {
        let mut identities: Vec<Identity> =
            proxies.iter().filter_map(|p| Identity::from_entry(p)).collect();
        if identities.is_empty() {
            identities.push(Identity {
                label: "direct".to_string(),
                proxy_url: None,
            });
        }
        let current_index = start_index % identities.len();
        Self {
            identities,
            current_index,
            rotation_count: 0,
            max_rotations,
        }
    }

    pub fn current(&self) -> &Identity {
        &self.identities[self.current_index]
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn rotation_count(&self) -> u32 {
        self.rotation_count
    }

    /// Whether rotating identity is a sensible response to this failure.
    pub fn should_rotate_for_error(error: &HarvestError) -> bool {
        error.is_blocking()
    }

    /// Advance to the next identity, persist the rotation, and wait for
    /// the settle delay. Exceeding the rotation ceiling is fatal for the
    /// run.
    pub async fn rotate(
        &mut self,
        store: &mut StateStore,
        pacer: &Pacer,
        reason: &str,
        context: &str,
    ) -> Result<&Identity, HarvestError> {
        self.rotation_count += 1;
        if self.max_rotations > 0 && self.rotation_count > self.max_rotations {
            warn!(
                "identity rotation ceiling hit after {} rotations",
                self.rotation_count
            );
            return Err(HarvestError::RotationBudget {
                rotations: self.rotation_count,
            });
        }

        self.current_index = (self.current_index + 1) % self.identities.len();
        let identity = &self.identities[self.current_index];
        info!(
            "rotating identity to {} ({}/{}): {}",
            identity.label, self.rotation_count, self.max_rotations, reason
        );

        store.set_identity_index(
            self.current_index,
            RotationEvent {
                timestamp: Utc::now(),
                index: self.current_index,
                label: identity.label.clone(),
                reason: reason.to_string(),
                context: context.to_string(),
            },
        );
        store.save()?;

        pacer.rotation_settle().await;
        Ok(&self.identities[self.current_index])
    }
}
