use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use alertsync_core::{Category, CategoryToggles, DurableStore, Role, StoredToggles};

use crate::error::EngineError;
use crate::policy::{can_see_category, default_preferences_for, gate_toggles};

/// Toggles as resolved for a role, plus whether they had to be created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadedToggles {
    pub toggles: CategoryToggles,
    pub created: bool,
}

/// A role-gated set of category toggles persisted under one key.
///
/// Used for both notification preferences and display filters. Reads
/// always go back to durable storage so writers elsewhere are observed.
pub struct ToggleStore {
    durable: Arc<dyn DurableStore>,
    key: &'static str,
    write_lock: Mutex<()>,
}

impl ToggleStore {
    pub fn new(durable: Arc<dyn DurableStore>, key: &'static str) -> Self {
        Self {
            durable,
            key,
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Resolve the stored toggles for `role`.
    ///
    /// A missing or unreadable record is replaced by the role defaults and
    /// written back.
    pub fn load(&self, role: Role) -> Result<LoadedToggles, EngineError> {
        let _guard = self.write_lock.lock();
        match self.read_stored()? {
            Some(stored) => Ok(LoadedToggles {
                toggles: gate_toggles(role, stored),
                created: false,
            }),
            None => {
                let defaults = default_preferences_for(role);
                self.write(&defaults)?;
                debug!(key = self.key, %role, "initialized default toggles");
                Ok(LoadedToggles {
                    toggles: defaults,
                    created: true,
                })
            }
        }
    }

    /// Set one category and persist the result.
    ///
    /// Enabling a category the role cannot see is refused. Disabling is
    /// always accepted.
    pub fn set(
        &self,
        role: Role,
        category: &Category,
        value: bool,
    ) -> Result<CategoryToggles, EngineError> {
        if value && !can_see_category(role, category) {
            return Err(EngineError::CategoryHidden {
                category: category.clone(),
                role,
            });
        }

        let _guard = self.write_lock.lock();
        let mut toggles = match self.read_stored()? {
            Some(stored) => gate_toggles(role, stored),
            None => default_preferences_for(role),
        };
        toggles.set(category, value);
        self.write(&toggles)?;
        debug!(key = self.key, %category, value, "toggle updated");
        Ok(toggles)
    }

    fn read_stored(&self) -> Result<Option<StoredToggles>, EngineError> {
        let Some(bytes) = self.durable.get(self.key)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<StoredToggles>(&bytes) {
            Ok(stored) => Ok(Some(stored)),
            Err(e) => {
                warn!(key = self.key, error = %e, "discarding unreadable toggle record");
                Ok(None)
            }
        }
    }

    fn write(&self, toggles: &CategoryToggles) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec(toggles)?;
        self.durable.set(self.key, &bytes)?;
        Ok(())
    }
}
