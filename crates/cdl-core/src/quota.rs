//! Quota Gate: admission control against subscription limits.
//!
//! Usage and limits come from an [`AccountLimits`] collaborator. The decision
//! itself is a pure function so it can be tested without any I/O.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::LimitsConfig;
use crate::error::RejectReason;
use crate::registry::Registry;

/// Seconds in one quota period.
pub const PERIOD_SECS: i64 = 30 * 24 * 60 * 60;

/// A user's current consumption and limits. `None` limits are unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub downloads_used: u64,
    pub download_limit: Option<u64>,
    pub storage_used: u64,
    pub storage_limit: Option<u64>,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject(RejectReason),
}

/// A download limit the registry can re-count itself when it writes the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadCap {
    pub limit: u64,
    /// Only jobs created within this many seconds count.
    pub period_secs: i64,
}

/// Account/limits service contract.
#[async_trait]
pub trait AccountLimits: Send + Sync {
    async fn usage(&self, user_id: &str) -> Result<Usage>;

    /// Set when usage is counted from the registry's own jobs, so the insert
    /// can repeat the count inside its write transaction. Other processes
    /// sharing the database are then held to the same limit.
    fn download_cap(&self) -> Option<DownloadCap> {
        None
    }
}

/// Reject if one more job would exceed the download limit, or if the estimated
/// size would exceed the storage limit.
pub fn decide(usage: &Usage, estimated_bytes: u64) -> Admission {
    if let Some(limit) = usage.download_limit {
        if usage.downloads_used.saturating_add(1) > limit {
            return Admission::Reject(RejectReason::QuotaExceeded);
        }
    }
    if let Some(limit) = usage.storage_limit {
        if usage.storage_used.saturating_add(estimated_bytes) > limit {
            return Admission::Reject(RejectReason::StorageExceeded);
        }
    }
    Admission::Accept
}

/// Fetch usage for `user_id` and decide.
pub async fn admit(limits: &dyn AccountLimits, user_id: &str, estimated_bytes: u64) -> Result<Admission> {
    let usage = limits.usage(user_id).await?;
    let decision = decide(&usage, estimated_bytes);
    tracing::debug!(user = user_id, estimated_bytes, ?usage, ?decision, "quota check");
    Ok(decision)
}

/// No limits at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl AccountLimits for Unlimited {
    async fn usage(&self, _user_id: &str) -> Result<Usage> {
        Ok(Usage::default())
    }
}

/// Same limits for every user; usage from the registry (jobs this period,
/// bytes of finished files).
#[derive(Clone)]
pub struct RegistryAccountLimits {
    registry: Registry,
    limits: LimitsConfig,
}

impl RegistryAccountLimits {
    pub fn new(registry: Registry, limits: LimitsConfig) -> Self {
        Self { registry, limits }
    }
}

#[async_trait]
impl AccountLimits for RegistryAccountLimits {
    async fn usage(&self, user_id: &str) -> Result<Usage> {
        let since = crate::registry::unix_timestamp() - PERIOD_SECS;
        Ok(Usage {
            downloads_used: self.registry.downloads_since(user_id, since).await?,
            download_limit: Some(self.limits.monthly_downloads).filter(|n| *n > 0),
            storage_used: self.registry.storage_used(user_id).await?,
            storage_limit: Some(self.limits.storage_bytes).filter(|n| *n > 0),
        })
    }

    fn download_cap(&self) -> Option<DownloadCap> {
        (self.limits.monthly_downloads > 0).then_some(DownloadCap {
            limit: self.limits.monthly_downloads,
            period_secs: PERIOD_SECS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{sample_unit, Job, Priority};

    fn usage(used: u64, limit: Option<u64>) -> Usage {
        Usage {
            downloads_used: used,
            download_limit: limit,
            ..Usage::default()
        }
    }

    #[test]
    fn at_download_limit_is_rejected() {
        assert_eq!(
            decide(&usage(5, Some(5)), 0),
            Admission::Reject(RejectReason::QuotaExceeded)
        );
    }

    #[test]
    fn below_download_limit_is_accepted() {
        assert_eq!(decide(&usage(4, Some(5)), 0), Admission::Accept);
    }

    #[test]
    fn unlimited_downloads_always_accepted() {
        assert_eq!(decide(&usage(1_000_000, None), 0), Admission::Accept);
    }

    #[test]
    fn storage_limit_uses_strict_inequality() {
        let u = Usage {
            storage_used: 900,
            storage_limit: Some(1_000),
            ..Usage::default()
        };
        assert_eq!(decide(&u, 100), Admission::Accept);
        assert_eq!(
            decide(&u, 101),
            Admission::Reject(RejectReason::StorageExceeded)
        );
    }

    #[tokio::test]
    async fn registry_limits_count_this_periods_jobs() {
        let registry = crate::registry::open_memory().await.unwrap();
        let now = crate::registry::unix_timestamp();
        for created_at in [now - PERIOD_SECS - 10, now - 5] {
            let mut job = Job::new("ana", "c", "C", Priority::Normal, vec![sample_unit(0, Some(1))], created_at);
            registry.insert_job(&mut job).await.unwrap();
        }
        let limits = RegistryAccountLimits::new(
            registry,
            LimitsConfig {
                monthly_downloads: 2,
                storage_bytes: 0,
            },
        );
        let u = limits.usage("ana").await.unwrap();
        assert_eq!(u.downloads_used, 1);
        assert_eq!(u.download_limit, Some(2));
        assert_eq!(u.storage_limit, None);
        assert_eq!(admit(&limits, "ana", 10).await.unwrap(), Admission::Accept);
        assert_eq!(
            limits.download_cap(),
            Some(DownloadCap {
                limit: 2,
                period_secs: PERIOD_SECS
            })
        );
        assert_eq!(Unlimited.download_cap(), None);
    }
}
