//! Allocation store bridging the two protocol lifecycles.
//!
//! Two independent maps hold the same allocation records under different
//! keys: the claim uid (written by prepare, removed by unprepare) and the
//! workload uid (written by prepare for every workload reserving the claim,
//! removed when the sandbox stops). The two removals are driven by different
//! callers over different connections, so entries go stale independently;
//! lookups that miss mean "nothing to do" for every caller.
//!
//! Lock scope is limited to the map operation itself — no I/O or device work
//! ever runs under a store lock.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::claims::Allocation;
use crate::error::{Error, Result};

/// Concurrency-safe allocation cache.
///
/// Reads return clones; records are immutable once stored, so clones stay
/// consistent with what the writer inserted.
#[derive(Debug, Default)]
pub struct AllocationStore {
    claims: RwLock<HashMap<String, Allocation>>,
    workloads: RwLock<HashMap<String, Allocation>>,
}

impl AllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an allocation under its claim uid, replacing any previous
    /// record for the same claim.
    pub fn put_claim(&self, uid: &str, allocation: Allocation) -> Result<()> {
        let mut claims = self
            .claims
            .write()
            .map_err(|_| Error::Internal("claim store lock poisoned".to_string()))?;
        claims.insert(uid.to_string(), allocation);
        Ok(())
    }

    /// Looks up an allocation by claim uid.
    pub fn get_claim(&self, uid: &str) -> Result<Option<Allocation>> {
        let claims = self
            .claims
            .read()
            .map_err(|_| Error::Internal("claim store lock poisoned".to_string()))?;
        Ok(claims.get(uid).cloned())
    }

    /// Removes the claim-keyed record. Removing an absent key is a no-op.
    pub fn remove_claim(&self, uid: &str) -> Result<()> {
        let mut claims = self
            .claims
            .write()
            .map_err(|_| Error::Internal("claim store lock poisoned".to_string()))?;
        claims.remove(uid);
        Ok(())
    }

    /// Records an allocation under a workload uid, replacing any previous
    /// record for the same workload.
    pub fn put_workload(&self, uid: &str, allocation: Allocation) -> Result<()> {
        let mut workloads = self
            .workloads
            .write()
            .map_err(|_| Error::Internal("workload store lock poisoned".to_string()))?;
        workloads.insert(uid.to_string(), allocation);
        Ok(())
    }

    /// Looks up an allocation by workload uid.
    pub fn get_workload(&self, uid: &str) -> Result<Option<Allocation>> {
        let workloads = self
            .workloads
            .read()
            .map_err(|_| Error::Internal("workload store lock poisoned".to_string()))?;
        Ok(workloads.get(uid).cloned())
    }

    /// Removes the workload-keyed record. Removing an absent key is a no-op.
    pub fn remove_workload(&self, uid: &str) -> Result<()> {
        let mut workloads = self
            .workloads
            .write()
            .map_err(|_| Error::Internal("workload store lock poisoned".to_string()))?;
        workloads.remove(uid);
        Ok(())
    }

    /// Number of claim-keyed records.
    pub fn claim_count(&self) -> Result<usize> {
        let claims = self
            .claims
            .read()
            .map_err(|_| Error::Internal("claim store lock poisoned".to_string()))?;
        Ok(claims.len())
    }

    /// Number of workload-keyed records.
    pub fn workload_count(&self) -> Result<usize> {
        let workloads = self
            .workloads
            .read()
            .map_err(|_| Error::Internal("workload store lock poisoned".to_string()))?;
        Ok(workloads.len())
    }
}
