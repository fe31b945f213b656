use std::sync::{Arc, RwLock};

use crate::{error::DsmError, message::ClientPointer, types::Pod, utils::HandyRwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmPointer {
    pub addr: String,
    pub is_primary: bool,
}

/// The node-discovery collaborator: who the clients are, where the
/// primary and backup central managers live.
///
/// Registration data is static. Promotion and demotion do NOT rewrite
/// the registry — a demoted backup resumes pulsing the *registered*
/// primary address, which is what lets a restarted primary be found
/// again.
pub trait Registry: Send + Sync {
    fn primary_cm_addr(&self) -> Result<String, DsmError>;

    fn backup_cm_addr(&self) -> Result<String, DsmError>;

    fn all_clients(&self) -> Vec<ClientPointer>;

    fn all_cms(&self) -> Vec<CmPointer>;

    /// Assigned ids are monotonic, starting at 1.
    fn register_client(&self, addr: &str) -> u32;

    fn register_cm(&self, addr: &str, is_primary: bool);
}

/// In-process implementation of [`Registry`], enough for a cluster that
/// shares one process (tests) or one bootstrap handle.
pub struct MemoryRegistry {
    inner: Pod<RegistryState>,
}

struct RegistryState {
    clients: Vec<ClientPointer>,
    cms: Vec<CmPointer>,
    next_client_id: u32,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState {
                clients: Vec::new(),
                cms: Vec::new(),
                next_client_id: 1,
            })),
        }
    }
}

impl Registry for MemoryRegistry {
    fn primary_cm_addr(&self) -> Result<String, DsmError> {
        self.inner
            .rl()
            .cms
            .iter()
            .find(|cm| cm.is_primary)
            .map(|cm| cm.addr.clone())
            .ok_or(DsmError::new("no primary cm registered"))
    }

    fn backup_cm_addr(&self) -> Result<String, DsmError> {
        self.inner
            .rl()
            .cms
            .iter()
            .find(|cm| !cm.is_primary)
            .map(|cm| cm.addr.clone())
            .ok_or(DsmError::new("no backup cm registered"))
    }

    fn all_clients(&self) -> Vec<ClientPointer> {
        self.inner.rl().clients.clone()
    }

    fn all_cms(&self) -> Vec<CmPointer> {
        self.inner.rl().cms.clone()
    }

    fn register_client(&self, addr: &str) -> u32 {
        let mut state = self.inner.wl();
        let id = state.next_client_id;
        state.next_client_id += 1;
        state.clients.push(ClientPointer {
            id,
            addr: addr.to_string(),
        });
        id
    }

    fn register_cm(&self, addr: &str, is_primary: bool) {
        self.inner.wl().cms.push(CmPointer {
            addr: addr.to_string(),
            is_primary,
        });
    }
}
