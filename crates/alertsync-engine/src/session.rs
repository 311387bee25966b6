use parking_lot::RwLock;
use tracing::info;

use alertsync_core::{Identity, IdentityProvider};

/// In-process holder of the signed-in identity.
#[derive(Default)]
pub struct SessionIdentity {
    current: RwLock<Option<Identity>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            current: RwLock::new(Some(identity)),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(account_id = %identity.account_id, role = %identity.role, "signed in");
        *self.current.write() = Some(identity);
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.current.write().take() {
            info!(account_id = %previous.account_id, "signed out");
        }
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Identity> {
        self.current.read().clone()
    }
}
