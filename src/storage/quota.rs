//! Quota Ledger - per-user byte accounting over the `users` table
//!
//! Write-through: `storage_used` lives in the metadata store so every
//! session and the change feed observe one durable counter. The admission
//! check is a client-side pre-check only; two in-flight uploads can both
//! pass against a stale counter, and hard enforcement belongs to a
//! server-side constraint outside this crate.

use super::StorageError;
use crate::backend::{Filter, MetadataError, MetadataStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Outcome of an admission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the candidate fits the remaining quota (ties admitted).
    pub admitted: bool,

    /// Bytes still available before the candidate is counted.
    pub remaining: u64,
}

/// A user's byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuota {
    pub used: u64,
    pub limit: u64,
}

impl UserQuota {
    /// Bytes still available.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Usage as a percentage in [0, 100].
    pub fn percent_used(&self) -> f64 {
        if self.limit == 0 {
            return 100.0;
        }
        (self.used as f64 / self.limit as f64 * 100.0).min(100.0)
    }
}

// Provisioning may leave the quota columns unset: absent `storage_used`
// reads as 0, absent `storage_limit` falls back to the configured default.
#[derive(Debug, Deserialize)]
struct AccountRow {
    #[serde(default)]
    storage_used: u64,
    #[serde(default)]
    storage_limit: Option<u64>,
}

/// Per-user quota accounting.
#[derive(Clone)]
pub struct QuotaLedger {
    meta: Arc<dyn MetadataStore>,
    users_table: String,
    default_limit: u64,
}

impl QuotaLedger {
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        users_table: impl Into<String>,
        default_limit: u64,
    ) -> Self {
        Self {
            meta,
            users_table: users_table.into(),
            default_limit,
        }
    }

    async fn account(&self, user_id: &str) -> Result<UserQuota, StorageError> {
        let rows = self
            .meta
            .query(&self.users_table, &Filter::eq("id", user_id), None)
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::UnknownAccount(user_id.to_string()))?;
        let row: AccountRow = serde_json::from_value(row)
            .map_err(|e| StorageError::Metadata(MetadataError::Malformed(e.to_string())))?;

        Ok(UserQuota {
            used: row.storage_used,
            limit: row.storage_limit.unwrap_or(self.default_limit),
        })
    }

    /// Current usage for `user_id`.
    pub async fn usage(&self, user_id: &str) -> Result<UserQuota, StorageError> {
        self.account(user_id).await
    }

    /// Would a `candidate_size`-byte upload fit? Admits exactly at the
    /// limit; rejects one byte over. Read-only.
    pub async fn check_admission(
        &self,
        user_id: &str,
        candidate_size: u64,
    ) -> Result<Admission, StorageError> {
        let quota = self.account(user_id).await?;
        let admitted = quota
            .used
            .checked_add(candidate_size)
            .map_or(false, |total| total <= quota.limit);
        Ok(Admission {
            admitted,
            remaining: quota.remaining(),
        })
    }

    /// Apply a signed byte delta to `storage_used`, clamped at zero, and
    /// persist the new value. Returns the committed counter.
    pub async fn apply_delta(&self, user_id: &str, delta: i64) -> Result<u64, StorageError> {
        let quota = self.account(user_id).await?;
        let new_used = if delta >= 0 {
            quota.used.saturating_add(delta as u64)
        } else {
            quota.used.saturating_sub(delta.unsigned_abs())
        };

        self.meta
            .update(
                &self.users_table,
                &Filter::eq("id", user_id),
                json!({ "storage_used": new_used }),
            )
            .await?;
        Ok(new_used)
    }
}

/// Render a byte count for display (1024 base, up to two decimals).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let exp = (((bytes as f64).ln() / 1024f64.ln()).floor() as usize).min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exp as i32);
    let rendered = format!("{value:.2}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", rendered, UNITS[exp])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    const DEFAULT_LIMIT: u64 = 1024 * 1024 * 1024;

    async fn ledger_with_account(used: u64, limit: Option<u64>) -> QuotaLedger {
        let backend = MemoryBackend::new("files");
        let mut row = json!({ "id": "u1", "storage_used": used });
        if let Some(limit) = limit {
            row["storage_limit"] = json!(limit);
        }
        crate::backend::MetadataStore::insert(&backend, "users", row)
            .await
            .unwrap();
        QuotaLedger::new(Arc::new(backend), "users", DEFAULT_LIMIT)
    }

    #[tokio::test]
    async fn admission_boundary_admits_ties() {
        let ledger = ledger_with_account(900, Some(1000)).await;

        let at_limit = ledger.check_admission("u1", 100).await.unwrap();
        assert!(at_limit.admitted);
        assert_eq!(at_limit.remaining, 100);

        let over = ledger.check_admission("u1", 101).await.unwrap();
        assert!(!over.admitted);
        assert_eq!(over.remaining, 100);
    }

    #[tokio::test]
    async fn apply_delta_persists_and_clamps_at_zero() {
        let ledger = ledger_with_account(100, Some(1000)).await;

        assert_eq!(ledger.apply_delta("u1", 400).await.unwrap(), 500);
        assert_eq!(ledger.usage("u1").await.unwrap().used, 500);

        // Double-delete style drift must not push the counter negative.
        assert_eq!(ledger.apply_delta("u1", -800).await.unwrap(), 0);
        assert_eq!(ledger.usage("u1").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn missing_limit_falls_back_to_default() {
        let ledger = ledger_with_account(0, None).await;
        let quota = ledger.usage("u1").await.unwrap();
        assert_eq!(quota.limit, DEFAULT_LIMIT);
    }

    #[tokio::test]
    async fn unknown_account_is_an_error() {
        let ledger = ledger_with_account(0, None).await;
        let err = ledger.check_admission("nobody", 1).await.unwrap_err();
        assert!(matches!(err, StorageError::UnknownAccount(_)));
    }

    #[test]
    fn percent_used_is_bounded() {
        let quota = UserQuota {
            used: 750,
            limit: 1000,
        };
        assert!((quota.percent_used() - 75.0).abs() < f64::EPSILON);
        assert_eq!(quota.remaining(), 250);

        let over = UserQuota {
            used: 2000,
            limit: 1000,
        };
        assert!((over.percent_used() - 100.0).abs() < f64::EPSILON);
        assert_eq!(over.remaining(), 0);
    }

    #[test]
    fn format_bytes_renders_units() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5 MB");
    }
}
