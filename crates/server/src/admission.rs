//! Concurrent-upload admission control.
//!
//! Before touching any bytes, a client upload must pass three counters:
//! global, per-checksum, and per-owner. The counters are scoped guards so a
//! slot is returned on every exit path, including handler errors.

use crate::error::ApiError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use stowage_core::config::LimitsConfig;

#[derive(Default)]
struct Counters {
    global: u32,
    per_checksum: HashMap<String, u32>,
    per_owner: HashMap<i64, u32>,
}

pub struct AdmissionControl {
    limits: LimitsConfig,
    counters: Mutex<Counters>,
}

impl AdmissionControl {
    pub fn new(limits: LimitsConfig) -> Arc<Self> {
        Arc::new(Self {
            limits,
            counters: Mutex::new(Counters::default()),
        })
    }

    /// Claim an upload slot for this checksum and owner.
    pub fn admit(
        self: &Arc<Self>,
        checksum: &str,
        owner_id: i64,
    ) -> Result<AdmissionGuard, ApiError> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if counters.global >= self.limits.global_uploads {
            return Err(ApiError::TooManyUploads(format!(
                "{} uploads already in flight",
                counters.global
            )));
        }
        let by_checksum = counters.per_checksum.get(checksum).copied().unwrap_or(0);
        if by_checksum >= self.limits.per_checksum_uploads {
            return Err(ApiError::TooManyUploads(format!(
                "{by_checksum} uploads for this checksum already in flight"
            )));
        }
        let by_owner = counters.per_owner.get(&owner_id).copied().unwrap_or(0);
        if by_owner >= self.limits.per_owner_uploads {
            return Err(ApiError::TooManyUploads(format!(
                "{by_owner} uploads for this caller already in flight"
            )));
        }

        counters.global += 1;
        *counters.per_checksum.entry(checksum.to_string()).or_insert(0) += 1;
        *counters.per_owner.entry(owner_id).or_insert(0) += 1;

        Ok(AdmissionGuard {
            control: Arc::clone(self),
            checksum: checksum.to_string(),
            owner_id,
        })
    }

    pub fn active_global(&self) -> u32 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .global
    }
}

pub struct AdmissionGuard {
    control: Arc<AdmissionControl>,
    checksum: String,
    owner_id: i64,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        let mut counters = self
            .control
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        counters.global = counters.global.saturating_sub(1);
        if let Some(count) = counters.per_checksum.get_mut(&self.checksum) {
            *count -= 1;
            if *count == 0 {
                counters.per_checksum.remove(&self.checksum);
            }
        }
        if let Some(count) = counters.per_owner.get_mut(&self.owner_id) {
            *count -= 1;
            if *count == 0 {
                counters.per_owner.remove(&self.owner_id);
            }
        }
    }
}
