use serde::Serialize;

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyReason {
    /// Explicit `clear_session`.
    Cleared,
    /// Removed by the inactivity sweep.
    Expired,
    /// The backend reported the handle dead.
    Dead,
    /// Process shutdown; the durable record is kept.
    Shutdown,
}

/// Lifecycle notifications, delivered over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Created {
        owner_id: String,
        session_id: String,
    },
    Destroyed {
        owner_id: String,
        session_id: String,
        reason: DestroyReason,
    },
    HandedOff {
        session_id: String,
        from: String,
        to: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Created { session_id, .. }
            | Self::Destroyed { session_id, .. }
            | Self::HandedOff { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = SessionEvent::Destroyed {
            owner_id: "u1".into(),
            session_id: "s1".into(),
            reason: DestroyReason::Expired,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "destroyed");
        assert_eq!(json["reason"], "expired");
        assert_eq!(event.session_id(), "s1");
    }
}
