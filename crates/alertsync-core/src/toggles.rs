use serde::{Deserialize, Serialize};

use crate::message::Category;

/// Per-category on/off switches.
///
/// Used both for notification preferences (what alerts) and display
/// filters (what is shown). The persisted record uses the backend's
/// key names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryToggles {
    pub debug: bool,
    pub info: bool,
    #[serde(rename = "prioritaire", alias = "priority")]
    pub priority: bool,
}

impl CategoryToggles {
    pub const fn new(debug: bool, info: bool, priority: bool) -> Self {
        Self {
            debug,
            info,
            priority,
        }
    }

    /// Toggle state for a category. Unknown categories share the
    /// priority switch.
    pub fn get(&self, category: &Category) -> bool {
        match category {
            Category::Debug => self.debug,
            Category::Info => self.info,
            Category::Priority | Category::Unknown(_) => self.priority,
        }
    }

    pub fn set(&mut self, category: &Category, value: bool) {
        match category {
            Category::Debug => self.debug = value,
            Category::Info => self.info = value,
            Category::Priority | Category::Unknown(_) => self.priority = value,
        }
    }
}

/// Toggles as read back from storage, where any field may be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToggles {
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub info: Option<bool>,
    #[serde(default, rename = "prioritaire", alias = "priority")]
    pub priority: Option<bool>,
}

impl From<CategoryToggles> for StoredToggles {
    fn from(t: CategoryToggles) -> Self {
        Self {
            debug: Some(t.debug),
            info: Some(t.info),
            priority: Some(t.priority),
        }
    }
}
