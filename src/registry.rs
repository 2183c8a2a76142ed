use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ReckonError, Result};

/// Shared store of record IDs that have been minted but not yet committed.
/// Keyed by record-type ID code, with each ID owned by the client instance
/// that reserved it. In the full application this lives behind the
/// client/server channel; implementations answer synchronously and a
/// failure means the operation in progress must not proceed.
pub trait IdRegistry {
    /// All unsaved IDs for an ID code, optionally restricted to the IDs
    /// reserved by one instance.
    fn request_ids(&self, id_code: &str, instance: Option<u32>) -> Result<Vec<String>>;

    /// Reserve IDs for an instance. Empty and already-reserved IDs are
    /// skipped.
    fn add_ids(&self, id_code: &str, ids: &[(String, u32)]) -> Result<()>;

    /// Release IDs, regardless of owning instance.
    fn remove_ids(&self, id_code: &str, ids: &[String]) -> Result<()>;
}

/// In-process registry for single-instance use and tests.
#[derive(Debug, Default)]
pub struct LocalIdRegistry {
    unsaved: Mutex<HashMap<String, Vec<(String, u32)>>>,
}

impl LocalIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdRegistry for LocalIdRegistry {
    fn request_ids(&self, id_code: &str, instance: Option<u32>) -> Result<Vec<String>> {
        let unsaved = self
            .unsaved
            .lock()
            .map_err(|_| ReckonError::Registry("registry lock poisoned".to_string()))?;
        let ids = unsaved
            .get(id_code)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, owner)| instance.map_or(true, |i| *owner == i))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    fn add_ids(&self, id_code: &str, ids: &[(String, u32)]) -> Result<()> {
        let mut unsaved = self
            .unsaved
            .lock()
            .map_err(|_| ReckonError::Registry("registry lock poisoned".to_string()))?;
        let entries = unsaved.entry(id_code.to_string()).or_default();
        for (id, instance) in ids {
            if id.is_empty() || entries.iter().any(|(existing, _)| existing == id) {
                log::debug!("skipping reservation of duplicate or empty ID {id:?}");
                continue;
            }
            entries.push((id.clone(), *instance));
        }
        Ok(())
    }

    fn remove_ids(&self, id_code: &str, ids: &[String]) -> Result<()> {
        let mut unsaved = self
            .unsaved
            .lock()
            .map_err(|_| ReckonError::Registry("registry lock poisoned".to_string()))?;
        if let Some(entries) = unsaved.get_mut(id_code) {
            entries.retain(|(id, _)| !ids.contains(id));
        }
        Ok(())
    }
}
