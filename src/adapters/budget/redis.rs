//! Redis-backed usage ledger and budget settings.
//!
//! Each ledger row is a hash at `<prefix>:usage:<tenant>:<kind>:<YYYY-MM-DD>`
//! with `units` and `cost` fields, incremented with HINCRBYFLOAT so every
//! instance shares one running total. Settings are stored as JSON at
//! `<prefix>:budget:<tenant>`.

use async_trait::async_trait;
use chrono::NaiveDate;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::domain::budget::{
    BillingPeriod, BudgetSetting, ServiceKind, UsageKey, UsageLedgerEntry, UsageTotals,
};
use crate::domain::foundation::TenantId;
use crate::ports::{BudgetSettingsRepository, LedgerError, UsageLedger};

/// Rows outlive their period by this much so late reads still see them.
const ROW_TTL_SECS: i64 = 60 * 60 * 24 * 400;

const SCAN_BATCH: usize = 200;

/// Redis-backed usage ledger shared by every instance.
#[derive(Clone)]
pub struct RedisUsageLedger {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisUsageLedger {
    pub fn new(conn: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn row_key(&self, tenant: &TenantId, kind: ServiceKind, day: NaiveDate) -> String {
        format!(
            "{}:usage:{}:{}:{}",
            self.prefix,
            tenant.as_str(),
            kind.as_str(),
            day.format("%Y-%m-%d")
        )
    }
}

fn map_redis_error(key: &str, e: redis::RedisError) -> LedgerError {
    if e.kind() == redis::ErrorKind::TypeError {
        LedgerError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        }
    } else {
        LedgerError::Unavailable(e.to_string())
    }
}

/// Day encoded in the last segment of a row key.
fn day_of_row_key(key: &str) -> Option<NaiveDate> {
    let (_, day) = key.rsplit_once(':')?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

#[async_trait]
impl UsageLedger for RedisUsageLedger {
    async fn increment(
        &self,
        key: &UsageKey,
        units: f64,
        cost: f64,
    ) -> Result<UsageLedgerEntry, LedgerError> {
        let row_key = self.row_key(&key.tenant_id, key.service_kind, key.day);
        let mut conn = self.conn.clone();

        let (units_after, cost_after): (f64, f64) = redis::pipe()
            .atomic()
            .cmd("HINCRBYFLOAT")
            .arg(&row_key)
            .arg("units")
            .arg(units)
            .cmd("HINCRBYFLOAT")
            .arg(&row_key)
            .arg("cost")
            .arg(cost)
            .cmd("EXPIRE")
            .arg(&row_key)
            .arg(ROW_TTL_SECS)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(&row_key, e))?;

        Ok(UsageLedgerEntry {
            key: key.clone(),
            totals: UsageTotals::new(units_after, cost_after),
        })
    }

    async fn aggregate(
        &self,
        tenant: &TenantId,
        service_kind: Option<ServiceKind>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<UsageTotals, LedgerError> {
        let kinds: Vec<ServiceKind> = match service_kind {
            Some(kind) => vec![kind],
            None => ServiceKind::ALL.to_vec(),
        };

        let mut pipe = redis::pipe();
        let mut keys = 0usize;
        for day in from.iter_days().take_while(|day| *day <= to) {
            for kind in &kinds {
                pipe.cmd("HMGET")
                    .arg(self.row_key(tenant, *kind, day))
                    .arg("units")
                    .arg("cost");
                keys += 1;
            }
        }
        if keys == 0 {
            return Ok(UsageTotals::default());
        }

        let mut conn = self.conn.clone();
        let rows: Vec<(Option<f64>, Option<f64>)> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(tenant.as_str(), e))?;

        let mut totals = UsageTotals::default();
        for (units, cost) in rows {
            totals += UsageTotals::new(units.unwrap_or(0.0), cost.unwrap_or(0.0));
        }
        Ok(totals)
    }

    async fn roll_over(&self, tenant: &TenantId, period: BillingPeriod) -> Result<(), LedgerError> {
        let pattern = format!("{}:usage:{}:*", self.prefix, tenant.as_str());
        let mut conn = self.conn.clone();
        let mut stale = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&pattern, e))?;

            stale.extend(
                batch
                    .into_iter()
                    .filter(|key| day_of_row_key(key).is_some_and(|day| day < period.start())),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if !stale.is_empty() {
            let removed: i64 = conn
                .del(&stale)
                .await
                .map_err(|e| map_redis_error(&pattern, e))?;
            tracing::info!(
                tenant_id = %tenant.as_str(),
                period = %period,
                removed,
                "usage ledger rolled over"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisUsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisUsageLedger")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Budget settings stored as JSON, one key per tenant.
#[derive(Clone)]
pub struct RedisBudgetSettings {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisBudgetSettings {
    pub fn new(conn: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, tenant: &TenantId) -> String {
        format!("{}:budget:{}", self.prefix, tenant.as_str())
    }
}

fn decode_setting(key: &str, raw: &str) -> Result<BudgetSetting, LedgerError> {
    serde_json::from_str(raw).map_err(|e| LedgerError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl BudgetSettingsRepository for RedisBudgetSettings {
    async fn find(&self, tenant: &TenantId) -> Result<Option<BudgetSetting>, LedgerError> {
        let key = self.key(tenant);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await.map_err(|e| map_redis_error(&key, e))?;
        raw.map(|raw| decode_setting(&key, &raw)).transpose()
    }

    async fn insert_if_absent(&self, setting: BudgetSetting) -> Result<BudgetSetting, LedgerError> {
        let key = self.key(&setting.tenant_id);
        let encoded = serde_json::to_string(&setting).map_err(|e| LedgerError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let mut conn = self.conn.clone();
        let inserted: bool = conn
            .set_nx(&key, encoded)
            .await
            .map_err(|e| map_redis_error(&key, e))?;
        if inserted {
            return Ok(setting);
        }

        let raw: String = conn.get(&key).await.map_err(|e| map_redis_error(&key, e))?;
        decode_setting(&key, &raw)
    }
}

impl std::fmt::Debug for RedisBudgetSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBudgetSettings")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
