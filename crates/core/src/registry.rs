use crate::session::DeviceSession;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Owns every device session, keyed by device id.
#[derive(Default)]
pub struct DeviceRegistry {
    sessions: RwLock<HashMap<String, Arc<DeviceSession>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session, returning the one it replaced
    pub fn insert(&self, session: Arc<DeviceSession>) -> Option<Arc<DeviceSession>> {
        self.sessions
            .write()
            .insert(session.id().to_string(), session)
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.read().get(device_id).cloned()
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.write().remove(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.sessions.read().contains_key(device_id)
    }

    pub fn all(&self) -> Vec<Arc<DeviceSession>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove all sessions and hand them back for disconnecting
    pub fn clear(&self) -> Vec<Arc<DeviceSession>> {
        self.sessions.write().drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceConfig;
    use crate::test_utils::{MockFactory, MockReceiver};

    fn session(id: &str) -> Arc<DeviceSession> {
        let receiver = MockReceiver::playing();
        DeviceSession::new(
            DeviceConfig::new(id, "Receiver", "192.168.1.20"),
            MockFactory::shared(&receiver),
        )
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.insert(session("B")).is_none());
        assert!(registry.insert(session("A")).is_none());
        assert!(registry.insert(session("A")).is_some());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec!["A".to_string(), "B".to_string()]);
        assert!(registry.contains("A"));
        assert_eq!(registry.get("B").map(|s| s.id().to_string()), Some("B".to_string()));

        assert!(registry.remove("A").is_some());
        assert!(registry.remove("A").is_none());

        let removed = registry.clear();
        assert_eq!(removed.len(), 1);
        assert!(registry.is_empty());
        assert!(registry.get("B").is_none());
    }
}
