//! The sync router: where should an entity's changes go?
//!
//! Geometry decides, not conditionals: `inhabits` bonds name the circles,
//! the keyring names the policy, and the intersection is the target set.

use std::sync::Arc;

use crate::core::error::ChoraError;
use crate::core::store::Store;
use crate::keyring::Keyring;

pub struct SyncRouter {
    store: Arc<Store>,
    keyring: Keyring,
}

impl SyncRouter {
    pub fn new(store: Arc<Store>, keyring: Keyring) -> Self {
        SyncRouter { store, keyring }
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    /// All circles the entity inhabits, cloud or not.
    pub fn inhabited_circles(&self, entity_id: &str) -> Result<Vec<String>, ChoraError> {
        self.store.inhabited_circles(entity_id)
    }

    /// True iff at least one inhabited circle syncs to the cloud.
    pub fn should_emit(&self, entity_id: &str) -> Result<bool, ChoraError> {
        Ok(self
            .inhabited_circles(entity_id)?
            .iter()
            .any(|circle| !self.keyring.is_local_only(circle)))
    }

    /// Cloud circles that should receive this entity's changes.
    pub fn target_circles(&self, entity_id: &str) -> Result<Vec<String>, ChoraError> {
        Ok(self
            .inhabited_circles(entity_id)?
            .into_iter()
            .filter(|circle| !self.keyring.is_local_only(circle))
            .collect())
    }
}
