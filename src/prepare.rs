//! Claim preparation protocol handler.
//!
//! Implements [`ResourcePlugin`] for [`NetworkDriver`]: fetching a claim's
//! authoritative state, validating it against the caller's reference,
//! recording the allocation under both store keys, and answering with the
//! subset of allocated devices this driver admits.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::claims::{ClaimRef, PreparedClaim, PreparedDevice};
use crate::driver::NetworkDriver;
use crate::error::{Error, Result};
use crate::traits::ResourcePlugin;

#[async_trait]
impl ResourcePlugin for NetworkDriver {
    async fn prepare(&self, claims: &[ClaimRef]) -> HashMap<String, Result<PreparedClaim>> {
        let mut out = HashMap::with_capacity(claims.len());
        for claim in claims {
            let result = self.prepare_claim(claim).await;
            if let Err(e) = &result {
                error!(
                    claim = %claim.uid,
                    namespace = %claim.namespace,
                    name = %claim.name,
                    error = %e,
                    "Failed to prepare claim"
                );
            }
            out.insert(claim.uid.clone(), result);
        }
        out
    }

    async fn unprepare(&self, claims: &[ClaimRef]) -> HashMap<String, Result<()>> {
        let mut out = HashMap::with_capacity(claims.len());
        for claim in claims {
            let result = self.unprepare_claim(claim);
            if let Err(e) = &result {
                error!(claim = %claim.uid, error = %e, "Failed to unprepare claim");
            }
            out.insert(claim.uid.clone(), result);
        }
        out
    }
}

impl NetworkDriver {
    /// Prepares a single claim.
    ///
    /// Validation happens before any store write, so a rejected claim
    /// leaves no record behind under either key.
    async fn prepare_claim(&self, claim_ref: &ClaimRef) -> Result<PreparedClaim> {
        let claim = self
            .claims
            .get(&claim_ref.namespace, &claim_ref.name)
            .await?;

        let allocation = claim
            .allocation
            .as_ref()
            .ok_or_else(|| Error::ClaimNotAllocated {
                namespace: claim_ref.namespace.clone(),
                name: claim_ref.name.clone(),
            })?;

        if claim.uid != claim_ref.uid {
            return Err(Error::ClaimIdentityMismatch {
                namespace: claim_ref.namespace.clone(),
                name: claim_ref.name.clone(),
                expected: claim_ref.uid.clone(),
                found: claim.uid.clone(),
            });
        }

        let driver = self.config.driver_name.as_str();
        let mut devices = Vec::with_capacity(allocation.results.len());
        for result in &allocation.results {
            if !allocation.admits(driver, &result.request) {
                debug!(
                    claim = %claim_ref.uid,
                    device = %result.device,
                    request = %result.request,
                    "Device restricted away from this driver's requests"
                );
                continue;
            }
            // Surface malformed configuration at prepare time rather than
            // when the sandbox starts.
            allocation
                .params_for(driver, &result.request)
                .map_err(|e| Error::InvalidDeviceConfig {
                    namespace: claim_ref.namespace.clone(),
                    name: claim_ref.name.clone(),
                    reason: e.to_string(),
                })?;
            devices.push(PreparedDevice {
                pool: result.pool.clone(),
                device: result.device.clone(),
                requests: vec![result.request.clone()],
            });
        }

        self.store.put_claim(&claim_ref.uid, allocation.clone())?;

        for reservation in &claim.reserved_for {
            if !reservation.is_workload() {
                info!(
                    claim = %claim_ref.uid,
                    resource = %reservation.resource,
                    api_group = %reservation.api_group,
                    consumer = %reservation.name,
                    "Claim reserved for an unsupported consumer type, skipping"
                );
                continue;
            }
            self.store
                .put_workload(&reservation.uid, allocation.clone())?;
        }

        debug!(
            claim = %claim_ref.uid,
            devices = devices.len(),
            "Prepared claim"
        );
        Ok(PreparedClaim { devices })
    }

    /// Drops the claim-keyed record for a single claim.
    ///
    /// Workload-keyed records are untouched here; they are evicted when
    /// the corresponding sandbox stops.
    fn unprepare_claim(&self, claim_ref: &ClaimRef) -> Result<()> {
        if self.store.get_claim(&claim_ref.uid)?.is_none() {
            info!(claim = %claim_ref.uid, "No allocation recorded for claim, nothing to unprepare");
            return Ok(());
        }
        self.store.remove_claim(&claim_ref.uid)?;
        debug!(claim = %claim_ref.uid, "Unprepared claim");
        Ok(())
    }
}
