use serde::Serialize;

use alertsync_core::Message;

/// What caused a history sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Periodic,
    Reconnect,
    RefreshHint,
    LoadMore,
}

/// Notifications broadcast by the sync engine to embedders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A live message not seen before was stored. `alert` tells the
    /// platform layer whether to raise a user-facing notification.
    MessageArrived { message: Message, alert: bool },
    ConnectivityChanged { online: bool },
    Synced { trigger: SyncTrigger, added: usize },
    /// The backend rejected the credentials.
    ReauthRequired,
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageArrived { .. } => "message_arrived",
            Self::ConnectivityChanged { .. } => "connectivity_changed",
            Self::Synced { .. } => "synced",
            Self::ReauthRequired => "reauth_required",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::msg;
    use alertsync_core::Category;

    #[test]
    fn serializes_with_type_tag() {
        let event = EngineEvent::MessageArrived {
            message: msg(1, Category::Priority, 0),
            alert: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_arrived");
        assert_eq!(json["alert"], true);
        assert_eq!(json["message"]["type"], "Prioritaire");

        let json = serde_json::to_value(EngineEvent::Synced {
            trigger: SyncTrigger::Reconnect,
            added: 3,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "synced", "trigger": "reconnect", "added": 3}));
    }

    #[test]
    fn event_type_matches_tag() {
        for event in [
            EngineEvent::ConnectivityChanged { online: false },
            EngineEvent::ReauthRequired,
        ] {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }
}
