//! In-memory credential store, seeded from configuration.

use async_trait::async_trait;
use std::collections::HashMap;

use taskpilot_config::CredentialConfig;
use taskpilot_core::credential::{Credential, CredentialStore};

/// Credentials keyed by (user, lower-cased service name).
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialStore {
    entries: HashMap<(String, String), Credential>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user: impl Into<String>, service: impl AsRef<str>, credential: Credential) {
        self.entries
            .insert((user.into(), service.as_ref().to_lowercase()), credential);
    }

    pub fn with(mut self, user: impl Into<String>, service: impl AsRef<str>, credential: Credential) -> Self {
        self.insert(user, service, credential);
        self
    }

    pub fn from_config(entries: &[CredentialConfig]) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.insert(
                &entry.user,
                &entry.service,
                Credential {
                    verified: entry.verified,
                    data: entry.data.clone(),
                },
            );
        }
        store
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get_credential(&self, user: &str, service: &str) -> Option<Credential> {
        self.entries
            .get(&(user.to_string(), service.to_lowercase()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_is_case_insensitive_on_service() {
        let store = StaticCredentialStore::new().with(
            "alice",
            "Slack",
            Credential::verified(HashMap::from([("token".into(), "t".into())])),
        );
        let cred = store.get_credential("alice", "slack").await.unwrap();
        assert!(cred.verified);
        assert_eq!(cred.data["token"], "t");
        assert!(store.get_credential("bob", "slack").await.is_none());
    }

    #[tokio::test]
    async fn from_config_keeps_verification_flag() {
        let store = StaticCredentialStore::from_config(&[CredentialConfig {
            user: "alice".into(),
            service: "github".into(),
            verified: false,
            data: HashMap::new(),
        }]);
        assert_eq!(store.len(), 1);
        assert!(!store.get_credential("alice", "github").await.unwrap().verified);
    }
}
