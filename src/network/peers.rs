use crate::error::{BlockchainError, Result};
use std::sync::{Arc, RwLock};

/// Known peer listening addresses, shared between the server, the dialers and
/// broadcast tasks.
#[derive(Clone, Default)]
pub struct Peers {
    inner: Arc<RwLock<Vec<String>>>,
}

impl Peers {
    pub fn new() -> Peers {
        Peers::default()
    }

    /// Returns whether the address was new.
    pub fn add(&self, addr: &str) -> Result<bool> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| BlockchainError::Invariant("Peer table lock poisoned".to_string()))?;
        if inner.iter().any(|known| known == addr) {
            return Ok(false);
        }
        inner.push(addr.to_string());
        Ok(true)
    }

    pub fn remove(&self, addr: &str) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| BlockchainError::Invariant("Peer table lock poisoned".to_string()))?;
        inner.retain(|known| known != addr);
        Ok(())
    }

    pub fn contains(&self, addr: &str) -> Result<bool> {
        let inner = self
            .inner
            .read()
            .map_err(|_| BlockchainError::Invariant("Peer table lock poisoned".to_string()))?;
        Ok(inner.iter().any(|known| known == addr))
    }

    pub fn snapshot(&self) -> Result<Vec<String>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| BlockchainError::Invariant("Peer table lock poisoned".to_string()))?;
        Ok(inner.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
