//! Credential service — stored secrets keyed by credential id.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use aw_domain::{Error, Result};

/// A stored credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    /// Scheme name (e.g. `"bearer"`, `"api_key"`, `"oauth2"`).
    pub auth_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[async_trait::async_trait]
pub trait CredentialService: Send + Sync {
    async fn get_credential(&self, id: &str) -> Result<Credential>;
    async fn store_credential(&self, credential: Credential) -> Result<()>;
    async fn delete_credential(&self, id: &str) -> Result<()>;
}

/// Reference implementation; real hosts back this with a secret store.
#[derive(Default)]
pub struct InMemoryCredentialService {
    credentials: RwLock<HashMap<String, Credential>>,
}

impl InMemoryCredentialService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CredentialService for InMemoryCredentialService {
    async fn get_credential(&self, id: &str) -> Result<Credential> {
        self.credentials
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("credential {id}")))
    }

    async fn store_credential(&self, credential: Credential) -> Result<()> {
        self.credentials
            .write()
            .insert(credential.id.clone(), credential);
        Ok(())
    }

    async fn delete_credential(&self, id: &str) -> Result<()> {
        self.credentials.write().remove(id);
        Ok(())
    }
}
