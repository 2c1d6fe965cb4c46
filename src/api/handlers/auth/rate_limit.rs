//! Fixed-window rate limiting for the auth flows.
//!
//! Counters live in `rate_limit_buckets` keyed `action:client`. The
//! Postgres variant performs one atomic upsert per hit (increment, or reset
//! when the window has rolled over) so every service instance shares one
//! logical window. The in-process variant keeps the same interface but its
//! guarantee is per-instance only; it is selected explicitly via
//! configuration for single-instance deployments, never as a silent
//! fallback. Store errors and timeouts fail closed.

use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{Instrument, error};

const STORE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    IssueOtp,
    VerifyOtp,
    Register,
    Login,
    SetPassword,
}

impl RateLimitAction {
    fn key_part(self) -> &'static str {
        match self {
            Self::IssueOtp => "issue-otp",
            Self::VerifyOtp => "verify-otp",
            Self::Register => "register",
            Self::Login => "login",
            Self::SetPassword => "set-password",
        }
    }

    /// Window applied to this action.
    #[must_use]
    pub fn window(self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    /// Maximum hits allowed inside one window.
    #[must_use]
    pub fn limit(self) -> i64 {
        match self {
            Self::IssueOtp | Self::SetPassword => 5,
            Self::VerifyOtp | Self::Register | Self::Login => 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Duration,
}

impl RateLimitDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    fn limited(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Client identity for bucketing; unattributable clients share one bucket
/// so the key space stays bounded.
#[must_use]
pub fn client_or_unknown(client_ip: Option<String>) -> String {
    client_ip.unwrap_or_else(|| "unknown".to_string())
}

pub enum RateLimiter {
    Postgres(PgRateLimiter),
    InMemory(MemoryRateLimiter),
    Noop,
}

impl RateLimiter {
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(PgRateLimiter { pool })
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::InMemory(MemoryRateLimiter::new())
    }

    /// Register a hit for `action` by `client_id` and decide whether it may
    /// proceed, using the action's window and limit.
    pub async fn allow(&self, action: RateLimitAction, client_id: &str) -> RateLimitDecision {
        let key = format!("{}:{}", action.key_part(), client_id);
        self.check(&key, action.window(), action.limit()).await
    }

    /// Core fixed-window check: first hit in a window initializes the
    /// counter, later hits increment it; past the limit the decision
    /// carries the time left until the window resets.
    pub(crate) async fn check(
        &self,
        bucket: &str,
        window: Duration,
        limit: i64,
    ) -> RateLimitDecision {
        match self {
            Self::Postgres(limiter) => limiter.check(bucket, window, limit).await,
            Self::InMemory(limiter) => limiter.check(bucket, window, limit).await,
            Self::Noop => RateLimitDecision::allowed(),
        }
    }
}

pub struct PgRateLimiter {
    pool: PgPool,
}

impl PgRateLimiter {
    async fn check(&self, bucket: &str, window: Duration, limit: i64) -> RateLimitDecision {
        // Increment and window-reset in one statement so concurrent hits
        // across instances serialize on the bucket row.
        let query = r"
            INSERT INTO rate_limit_buckets (bucket, count, reset_at)
            VALUES ($1, 1, NOW() + ($2 * INTERVAL '1 millisecond'))
            ON CONFLICT (bucket) DO UPDATE
            SET count = CASE
                    WHEN rate_limit_buckets.reset_at <= NOW() THEN 1
                    ELSE rate_limit_buckets.count + 1
                END,
                reset_at = CASE
                    WHEN rate_limit_buckets.reset_at <= NOW()
                        THEN NOW() + ($2 * INTERVAL '1 millisecond')
                    ELSE rate_limit_buckets.reset_at
                END
            RETURNING count,
                GREATEST(CEIL(EXTRACT(EPOCH FROM (reset_at - NOW())) * 1000), 0)::BIGINT
                    AS retry_after_ms
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let result = tokio::time::timeout(
            STORE_TIMEOUT,
            sqlx::query(query)
                .bind(bucket)
                .bind(window_ms)
                .fetch_one(&self.pool)
                .instrument(span),
        )
        .await;

        match result {
            Ok(Ok(row)) => {
                let count: i64 = row.get("count");
                if count <= limit {
                    RateLimitDecision::allowed()
                } else {
                    let retry_after_ms: i64 = row.get("retry_after_ms");
                    let retry_after_ms = u64::try_from(retry_after_ms).unwrap_or(0);
                    RateLimitDecision::limited(Duration::from_millis(retry_after_ms))
                }
            }
            Ok(Err(err)) => {
                error!("rate limit store failed: {err}");
                RateLimitDecision::limited(window) // Fail closed
            }
            Err(_) => {
                error!("rate limit store timed out after {STORE_TIMEOUT:?}");
                RateLimitDecision::limited(window)
            }
        }
    }
}

struct MemoryBucket {
    count: i64,
    reset_at: Instant,
}

pub struct MemoryRateLimiter {
    buckets: Mutex<HashMap<String, MemoryBucket>>,
}

impl MemoryRateLimiter {
    fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn check(&self, bucket: &str, window: Duration, limit: i64) -> RateLimitDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, entry| entry.reset_at > now);

        let entry = buckets.entry(bucket.to_string()).or_insert(MemoryBucket {
            count: 0,
            reset_at: now + window,
        });
        entry.count += 1;
        if entry.count <= limit {
            RateLimitDecision::allowed()
        } else {
            RateLimitDecision::limited(entry.reset_at.saturating_duration_since(now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects_with_retry_after() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);

        for hit in 1..=5 {
            let decision = limiter.check("login:1.2.3.4", window, 5).await;
            assert!(decision.allowed, "hit {hit} should pass");
        }

        let decision = limiter.check("login:1.2.3.4", window, 5).await;
        assert!(!decision.allowed);
        assert!(decision.retry_after > Duration::ZERO);
        assert!(decision.retry_after <= window);
    }

    #[tokio::test]
    async fn window_reset_restores_the_budget() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_millis(50);

        for _ in 0..2 {
            limiter.check("issue-otp:1.2.3.4", window, 2).await;
        }
        assert!(!limiter.check("issue-otp:1.2.3.4", window, 2).await.allowed);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.check("issue-otp:1.2.3.4", window, 2).await.allowed);
    }

    #[tokio::test]
    async fn buckets_are_independent() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);

        assert!(!limiter.check("login:a", window, 0).await.allowed);
        assert!(limiter.check("login:b", window, 1).await.allowed);
        assert!(limiter.check("verify-otp:a", window, 1).await.allowed);
    }

    #[tokio::test]
    async fn noop_always_allows() {
        let limiter = RateLimiter::Noop;
        for _ in 0..100 {
            let decision = limiter
                .allow(RateLimitAction::Login, "unknown")
                .await;
            assert!(decision.allowed);
        }
    }

    #[test]
    fn unattributable_clients_share_one_bucket() {
        assert_eq!(client_or_unknown(None), "unknown");
        assert_eq!(client_or_unknown(Some("1.2.3.4".to_string())), "1.2.3.4");
    }

    #[test]
    fn action_budgets() {
        assert_eq!(RateLimitAction::IssueOtp.limit(), 5);
        assert_eq!(RateLimitAction::Login.limit(), 10);
        assert_eq!(
            RateLimitAction::VerifyOtp.window(),
            Duration::from_secs(600)
        );
    }
}
