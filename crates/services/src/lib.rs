//! Pluggable host services: sessions, artifacts, memory, credentials.
//!
//! The core only depends on the traits; the in-memory implementations are
//! the reference backends used in tests and single-process deployments.

pub mod artifact;
pub mod credential;
pub mod memory;
pub mod session;

use std::sync::Arc;

pub use artifact::{ArtifactService, ArtifactVersion, InMemoryArtifactService};
pub use credential::{Credential, CredentialService, InMemoryCredentialService};
pub use memory::{InMemoryMemoryService, MemoryService};
pub use session::{InMemorySessionService, Session, SessionKey, SessionService};

/// The bundle of optional services an invocation borrows.
#[derive(Clone, Default)]
pub struct Services {
    pub session: Option<Arc<dyn SessionService>>,
    pub artifact: Option<Arc<dyn ArtifactService>>,
    pub memory: Option<Arc<dyn MemoryService>>,
    pub credential: Option<Arc<dyn CredentialService>>,
}

impl Services {
    /// All four in-memory reference services.
    pub fn in_memory() -> Self {
        Self {
            session: Some(Arc::new(InMemorySessionService::new())),
            artifact: Some(Arc::new(InMemoryArtifactService::new())),
            memory: Some(Arc::new(InMemoryMemoryService::new())),
            credential: Some(Arc::new(InMemoryCredentialService::new())),
        }
    }
}
