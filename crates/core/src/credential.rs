//! Read-only access to per-user service credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stored credentials for one (user, service) pair.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    /// Whether the credential has been verified against the service
    pub verified: bool,

    /// Configuration values injected into unset service slots
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl Credential {
    pub fn verified(data: HashMap<String, String>) -> Self {
        Self { verified: true, data }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.data.keys().collect();
        keys.sort();
        f.debug_struct("Credential")
            .field("verified", &self.verified)
            .field("data_keys", &keys)
            .finish()
    }
}

/// The credential collaborator. The engine only ever reads.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, user: &str, service: &str) -> Option<Credential>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_values() {
        let cred = Credential::verified(HashMap::from([("token".to_string(), "xoxb-secret".to_string())]));
        let debug = format!("{cred:?}");
        assert!(debug.contains("token"));
        assert!(!debug.contains("xoxb-secret"));
    }
}
