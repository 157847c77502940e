//! Daily article rate limiting, the cost-control gate in front of the queue.
//!
//! Two independent counters per request: a shared global counter and one per
//! coarse client identifier (IP address). Each counter lives in a 24-hour
//! window that starts at its first increment, not at midnight. Both counters
//! are checked read-only first; a rejected request never counts against
//! either budget. Only when both checks pass are both counters incremented,
//! atomically with respect to concurrent callers.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};

const GLOBAL_KEY: &str = "global";
pub const WINDOW_SECS: i64 = 24 * 60 * 60;

/// Which budget a rejected request ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Global,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub current: i64,
    pub limit: i64,
    pub remaining: i64,
}

impl RateLimitStatus {
    fn new(current: i64, limit: i64) -> Self {
        Self {
            current,
            limit,
            remaining: (limit - current).max(0),
        }
    }

    pub fn allowed(&self) -> bool {
        self.current < self.limit
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<LimitScope>,
    pub global: RateLimitStatus,
    pub client: RateLimitStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub global_per_day: i64,
    pub client_per_day: i64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            global_per_day: 1000,
            client_per_day: 20,
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check both counters and, only if both pass, increment both.
    async fn check_and_increment(&self, client: &str) -> Result<RateLimitDecision>;

    /// Minutes until the global window expires, or None if inactive.
    async fn reset_minutes(&self) -> Result<Option<i64>>;
}

// =============================================================================
// In-memory limiter (tests and single-process development)
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: i64,
    expires_at: DateTime<Utc>,
}

impl Counter {
    fn live_count(&self, now: DateTime<Utc>) -> i64 {
        if self.expires_at <= now {
            0
        } else {
            self.count
        }
    }
}

#[derive(Default)]
struct LimiterState {
    global: Option<Counter>,
    clients: HashMap<String, Counter>,
}

/// Single-mutex limiter: the lock makes check-then-increment atomic.
pub struct InMemoryRateLimiter {
    limits: RateLimits,
    state: Mutex<LimiterState>,
}

impl InMemoryRateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(LimiterState::default()),
        }
    }
}

fn bump(slot: &mut Option<Counter>, now: DateTime<Utc>) -> i64 {
    let fresh = match slot {
        Some(counter) if counter.expires_at > now => Counter {
            count: counter.count + 1,
            expires_at: counter.expires_at,
        },
        // First increment in a window starts its expiry clock.
        _ => Counter {
            count: 1,
            expires_at: now + Duration::seconds(WINDOW_SECS),
        },
    };
    *slot = Some(fresh);
    fresh.count
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_increment(&self, client: &str) -> Result<RateLimitDecision> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();

        let global_count = state.global.map(|c| c.live_count(now)).unwrap_or(0);
        let client_count = state
            .clients
            .get(client)
            .map(|c| c.live_count(now))
            .unwrap_or(0);

        let global = RateLimitStatus::new(global_count, self.limits.global_per_day);
        let client_status = RateLimitStatus::new(client_count, self.limits.client_per_day);

        if !global.allowed() {
            return Ok(RateLimitDecision {
                allowed: false,
                reason: Some(LimitScope::Global),
                global,
                client: client_status,
            });
        }
        if !client_status.allowed() {
            return Ok(RateLimitDecision {
                allowed: false,
                reason: Some(LimitScope::Client),
                global,
                client: client_status,
            });
        }

        let new_global = bump(&mut state.global, now);
        let mut slot = state.clients.remove(client);
        let new_client = bump(&mut slot, now);
        if let Some(counter) = slot {
            state.clients.insert(client.to_string(), counter);
        }

        Ok(RateLimitDecision {
            allowed: true,
            reason: None,
            global: RateLimitStatus::new(new_global, self.limits.global_per_day),
            client: RateLimitStatus::new(new_client, self.limits.client_per_day),
        })
    }

    async fn reset_minutes(&self) -> Result<Option<i64>> {
        let now = Utc::now();
        let state = self.state.lock().unwrap();
        Ok(state.global.and_then(|counter| {
            if counter.expires_at <= now {
                None
            } else {
                let secs = (counter.expires_at - now).num_seconds();
                Some((secs + 59) / 60)
            }
        }))
    }
}

// =============================================================================
// Postgres limiter
// =============================================================================

/// Shared-store limiter for multi-process deployments.
///
/// Increments use a conditional upsert (`... WHERE count < limit RETURNING`)
/// inside one transaction covering both counters, so the check-and-increment
/// is atomic across processes and a rejection rolls back any partial bump.
pub struct PgRateLimiter {
    pool: PgPool,
    limits: RateLimits,
}

impl PgRateLimiter {
    pub fn new(pool: PgPool, limits: RateLimits) -> Self {
        Self { pool, limits }
    }

    async fn read_count(
        tx: &mut Transaction<'_, Postgres>,
        key: &str,
    ) -> Result<i64> {
        let row: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT count, expires_at FROM rate_counters WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .context("failed to read rate counter")?;

        Ok(match row {
            Some((count, expires_at)) if expires_at > Utc::now() => count,
            _ => 0,
        })
    }

    /// Conditional increment: returns the new count, or None when the
    /// counter is already at its limit (in which case nothing changed).
    async fn try_increment(
        tx: &mut Transaction<'_, Postgres>,
        key: &str,
        limit: i64,
    ) -> Result<Option<i64>> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO rate_counters (key, count, expires_at)
            VALUES ($1, 1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
            SET count = CASE
                    WHEN rate_counters.expires_at <= now() THEN 1
                    ELSE rate_counters.count + 1
                END,
                expires_at = CASE
                    WHEN rate_counters.expires_at <= now()
                        THEN now() + make_interval(secs => $2)
                    ELSE rate_counters.expires_at
                END
            WHERE rate_counters.expires_at <= now() OR rate_counters.count < $3
            RETURNING count
            "#,
        )
        .bind(key)
        .bind(WINDOW_SECS as f64)
        .bind(limit)
        .fetch_optional(&mut **tx)
        .await
        .context("failed to increment rate counter")?;
        Ok(count)
    }
}

fn client_key(client: &str) -> String {
    format!("client:{client}")
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check_and_increment(&self, client: &str) -> Result<RateLimitDecision> {
        let mut tx = self.pool.begin().await.context("failed to begin rate limit tx")?;

        let global_count = Self::read_count(&mut tx, GLOBAL_KEY).await?;
        let client_count = Self::read_count(&mut tx, &client_key(client)).await?;
        let global = RateLimitStatus::new(global_count, self.limits.global_per_day);
        let client_status = RateLimitStatus::new(client_count, self.limits.client_per_day);

        if !global.allowed() || !client_status.allowed() {
            let reason = if global.allowed() {
                LimitScope::Client
            } else {
                LimitScope::Global
            };
            return Ok(RateLimitDecision {
                allowed: false,
                reason: Some(reason),
                global,
                client: client_status,
            });
        }

        let new_global =
            Self::try_increment(&mut tx, GLOBAL_KEY, self.limits.global_per_day).await?;
        let new_client =
            Self::try_increment(&mut tx, &client_key(client), self.limits.client_per_day)
                .await?;

        match (new_global, new_client) {
            (Some(g), Some(c)) => {
                tx.commit().await.context("failed to commit rate limit tx")?;
                Ok(RateLimitDecision {
                    allowed: true,
                    reason: None,
                    global: RateLimitStatus::new(g, self.limits.global_per_day),
                    client: RateLimitStatus::new(c, self.limits.client_per_day),
                })
            }
            // Lost a race to the last slot: drop the transaction so the
            // partial increment rolls back, and reject without counting.
            (g, _) => {
                drop(tx);
                let reason = if g.is_none() {
                    LimitScope::Global
                } else {
                    LimitScope::Client
                };
                Ok(RateLimitDecision {
                    allowed: false,
                    reason: Some(reason),
                    global,
                    client: client_status,
                })
            }
        }
    }

    async fn reset_minutes(&self) -> Result<Option<i64>> {
        let minutes: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT ceil(extract(epoch FROM (expires_at - now())) / 60)::bigint
            FROM rate_counters
            WHERE key = $1 AND expires_at > now()
            "#,
        )
        .bind(GLOBAL_KEY)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read rate limit reset time")?;
        Ok(minutes)
    }
}
