//! Quota evaluation for incoming uploads.
//!
//! Budgets are split along two axes: owner vs global scope, and files still
//! in local staging vs files already migrated to the remote store. An
//! incoming upload lands in the local pool. A zero limit disables that
//! check.

use stowage_core::config::QuotaConfig;
use stowage_metadata::UsageBreakdown;

/// How far over budget an upload would put the caller, in the local pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    /// Local files that must go away before the upload fits.
    pub files: u64,
    /// Local bytes that must go away before the upload fits.
    pub bytes: u64,
    pub reason: String,
}

/// Check an incoming upload of `incoming_bytes` against the quotas.
pub fn quota_shortfall(
    usage: &UsageBreakdown,
    quota: &QuotaConfig,
    incoming_bytes: u64,
) -> Option<Shortfall> {
    let mut files = 0u64;
    let mut bytes = 0u64;
    let mut reasons: Vec<String> = Vec::new();

    let mut check_files = |current: u64, limit: u64, scope: &str| {
        if limit > 0 && current + 1 > limit {
            files = files.max(current + 1 - limit);
            reasons.push(format!("{scope} file count {current} at limit {limit}"));
        }
    };
    check_files(usage.owner_local.files, quota.owner_local_files, "owner local");
    check_files(usage.global_local.files, quota.global_local_files, "global local");

    let mut check_bytes = |current: u64, limit: u64, scope: &str| {
        if limit > 0 && current + incoming_bytes > limit {
            bytes = bytes.max(current + incoming_bytes - limit);
            reasons.push(format!("{scope} byte total {current} over limit {limit}"));
        }
    };
    check_bytes(usage.owner_local.bytes, quota.owner_local_bytes, "owner local");
    check_bytes(usage.global_local.bytes, quota.global_local_bytes, "global local");

    // The remote pool cannot be relieved by local reclaim; being over it
    // rejects the upload outright.
    if quota.owner_remote_files > 0 && usage.owner_remote.files >= quota.owner_remote_files {
        reasons.push(format!(
            "owner remote file count at limit {}",
            quota.owner_remote_files
        ));
    }
    if quota.owner_remote_bytes > 0 && usage.owner_remote.bytes >= quota.owner_remote_bytes {
        reasons.push(format!(
            "owner remote byte total at limit {}",
            quota.owner_remote_bytes
        ));
    }
    if quota.global_remote_files > 0 && usage.global_remote.files >= quota.global_remote_files {
        reasons.push(format!(
            "global remote file count at limit {}",
            quota.global_remote_files
        ));
    }
    if quota.global_remote_bytes > 0 && usage.global_remote.bytes >= quota.global_remote_bytes {
        reasons.push(format!(
            "global remote byte total at limit {}",
            quota.global_remote_bytes
        ));
    }

    if reasons.is_empty() {
        None
    } else {
        Some(Shortfall {
            files,
            bytes,
            reason: reasons.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_metadata::UsageTotals;

    fn usage(local_files: u64, local_bytes: u64) -> UsageBreakdown {
        UsageBreakdown {
            owner_local: UsageTotals {
                files: local_files,
                bytes: local_bytes,
            },
            owner_remote: UsageTotals::default(),
            global_local: UsageTotals {
                files: local_files,
                bytes: local_bytes,
            },
            global_remote: UsageTotals::default(),
        }
    }

    fn quota(owner_files: u64, owner_bytes: u64) -> QuotaConfig {
        QuotaConfig {
            owner_local_files: owner_files,
            owner_local_bytes: owner_bytes,
            owner_remote_files: 0,
            owner_remote_bytes: 0,
            global_local_files: 0,
            global_local_bytes: 0,
            global_remote_files: 0,
            global_remote_bytes: 0,
        }
    }

    #[test]
    fn test_zero_limits_disable_checks() {
        assert!(quota_shortfall(&usage(1000, 1 << 40), &quota(0, 0), 1 << 30).is_none());
    }

    #[test]
    fn test_file_count_shortfall() {
        let shortfall = quota_shortfall(&usage(3, 100), &quota(3, 0), 50).unwrap();
        assert_eq!(shortfall.files, 1);
        assert_eq!(shortfall.bytes, 0);
    }

    #[test]
    fn test_byte_shortfall() {
        let shortfall = quota_shortfall(&usage(1, 900), &quota(0, 1000), 200).unwrap();
        assert_eq!(shortfall.bytes, 100);
    }

    #[test]
    fn test_within_budget() {
        assert!(quota_shortfall(&usage(2, 500), &quota(3, 1000), 400).is_none());
    }
}
