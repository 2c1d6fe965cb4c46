//! Database helpers for identities and verification codes.
//!
//! Every mutation that decides a race is a single conditional statement:
//! code consumption flips `used_at` only when it is still NULL, attempt
//! counts are incremented in place, and identity creation relies on the
//! unique constraint on `phone`. The database clock (`NOW()`) is the only
//! clock consulted for stored-state expiry so concurrent instances agree.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::types::OtpPurpose;

/// Outcome when attempting to create a new identity.
#[derive(Debug)]
pub(super) enum RegistrationOutcome {
    Created(UserRecord),
    Conflict,
}

/// Identity fields the auth flows need.
#[derive(Clone, Debug)]
pub(super) struct UserRecord {
    pub(super) id: Uuid,
    pub(super) phone: String,
    pub(super) name: String,
    pub(super) password_hash: Option<String>,
    pub(super) role: String,
    pub(super) is_verified: bool,
}

/// Most recent unused code for a (phone, purpose). `expired` is decided by
/// the database clock at fetch time so the caller can report expiry before
/// comparing code values.
#[derive(Clone, Debug)]
pub(super) struct OtpCodeRecord {
    pub(super) id: Uuid,
    pub(super) code: String,
    pub(super) attempts: i32,
    pub(super) expired: bool,
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        phone: row.get("phone"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        is_verified: row.get("is_verified"),
    }
}

pub(super) async fn lookup_user_by_phone(
    pool: &PgPool,
    phone: &str,
) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT id, phone, name, password_hash, role, is_verified
        FROM users
        WHERE phone = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(phone)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by phone")?;
    Ok(row.map(|row| user_from_row(&row)))
}

/// Seconds left before a new code may be issued, when a code was created
/// inside the cooldown window. `None` means issuance may proceed.
pub(super) async fn resend_wait_seconds(
    pool: &PgPool,
    phone: &str,
    purpose: OtpPurpose,
    cooldown_seconds: i64,
) -> Result<Option<i64>> {
    let query = r"
        SELECT GREATEST(
            CEIL(EXTRACT(EPOCH FROM (
                created_at + ($3 * INTERVAL '1 second') - NOW()
            ))), 0)::BIGINT AS wait_seconds
        FROM otp_codes
        WHERE phone = $1
          AND purpose = $2
          AND created_at > NOW() - ($3 * INTERVAL '1 second')
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(phone)
        .bind(purpose.as_str())
        .bind(cooldown_seconds)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check resend cooldown")?;
    Ok(row.map(|row| row.get("wait_seconds")))
}

pub(super) async fn insert_otp_code(
    pool: &PgPool,
    phone: &str,
    purpose: OtpPurpose,
    code: &str,
    ttl_seconds: i64,
) -> Result<Uuid> {
    let query = r"
        INSERT INTO otp_codes (phone, purpose, code, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(phone)
        .bind(purpose.as_str())
        .bind(code)
        .bind(ttl_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert otp code")?;
    Ok(row.get("id"))
}

/// Remove a code whose delivery failed so nobody is left holding a code
/// that never arrived.
pub(super) async fn delete_otp_code(pool: &PgPool, id: Uuid) -> Result<()> {
    let query = "DELETE FROM otp_codes WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete otp code")?;
    Ok(())
}

pub(super) async fn latest_unused_code(
    pool: &PgPool,
    phone: &str,
    purpose: OtpPurpose,
) -> Result<Option<OtpCodeRecord>> {
    let query = r"
        SELECT id, code, attempts, expires_at <= NOW() AS expired
        FROM otp_codes
        WHERE phone = $1
          AND purpose = $2
          AND used_at IS NULL
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(phone)
        .bind(purpose.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch latest otp code")?;
    Ok(row.map(|row| OtpCodeRecord {
        id: row.get("id"),
        code: row.get("code"),
        attempts: row.get("attempts"),
        expired: row.get("expired"),
    }))
}

/// Count a mismatched submission. Returns the attempt count after the
/// increment.
pub(super) async fn record_code_mismatch(pool: &PgPool, id: Uuid) -> Result<i32> {
    let query = r"
        UPDATE otp_codes
        SET attempts = attempts + 1
        WHERE id = $1
        RETURNING attempts
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to record code mismatch")?;
    Ok(row.get("attempts"))
}

/// Mark a code used, once. Returns false when another request already
/// consumed it; of two racing verifications exactly one sees true.
pub(super) async fn consume_code(pool: &PgPool, id: Uuid) -> Result<bool> {
    let query = r"
        UPDATE otp_codes
        SET used_at = NOW()
        WHERE id = $1
          AND used_at IS NULL
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume otp code")?;
    Ok(row.is_some())
}

/// Stamp a code consumed inside a caller transaction, keeping the first
/// consumption time if a verify call already set it. Acceptance decisions
/// happen in `find_valid_code`; this only records the fact.
pub(super) async fn mark_code_consumed_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
) -> Result<()> {
    let query = r"
        UPDATE otp_codes
        SET used_at = COALESCE(used_at, NOW())
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark otp code consumed")?;
    Ok(())
}

/// Find an unexpired code matching the exact submitted value. Registration
/// and set-password re-validate through this rather than trusting an
/// earlier verify call; a code the verify endpoint consumed moments ago in
/// the same flow still qualifies while unexpired (see DESIGN.md), and the
/// short code TTL bounds any replay window.
pub(super) async fn find_valid_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    phone: &str,
    code: &str,
    purpose: OtpPurpose,
) -> Result<Option<Uuid>> {
    let query = r"
        SELECT id
        FROM otp_codes
        WHERE phone = $1
          AND code = $2
          AND purpose = $3
          AND expires_at > NOW()
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(phone)
        .bind(code)
        .bind(purpose.as_str())
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to re-validate otp code")?;
    Ok(row.map(|row| row.get("id")))
}

pub(super) async fn insert_user_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    phone: &str,
    name: &str,
    password_hash: &str,
) -> Result<RegistrationOutcome> {
    // The unique constraint on phone is the authority: a concurrent
    // duplicate registration surfaces here as a conflict, and the caller's
    // rollback also releases the code it consumed in this transaction.
    let query = r"
        INSERT INTO users
            (phone, name, password_hash, is_verified, status, phone_verified_at)
        VALUES ($1, $2, $3, TRUE, 'active', NOW())
        RETURNING id, phone, name, password_hash, role, is_verified
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(phone)
        .bind(name)
        .bind(password_hash)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(RegistrationOutcome::Created(user_from_row(&row))),
        Err(err) => {
            if is_unique_violation(&err) {
                return Ok(RegistrationOutcome::Conflict);
            }
            Err(err).context("failed to insert user")
        }
    }
}

/// Best-effort outbox row for the external signup observer. Callers log
/// failures and move on; registration never fails because of this.
pub(super) async fn enqueue_signup_notification(
    pool: &PgPool,
    user_id: Uuid,
    phone: &str,
    name: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO signup_notifications (user_id, phone, name)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(phone)
        .bind(name)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to enqueue signup notification")?;
    Ok(())
}

/// Successful phone re-proof clears any accumulated login failures.
pub(super) async fn clear_failed_logins(pool: &PgPool, phone: &str) -> Result<()> {
    let query = "UPDATE users SET failed_logins = 0 WHERE phone = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(phone)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to clear failed logins")?;
    Ok(())
}

pub(super) async fn record_failed_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET failed_logins = failed_logins + 1 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record failed login")?;
    Ok(())
}

pub(super) async fn touch_last_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE users
        SET failed_logins = 0,
            last_login_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to touch last login")?;
    Ok(())
}

pub(super) async fn set_password_hash_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            failed_logins = 0
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to set password hash")?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{OtpCodeRecord, RegistrationOutcome, UserRecord, is_unique_violation};
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;
    use uuid::Uuid;

    #[test]
    fn registration_outcome_debug_names() {
        let record = UserRecord {
            id: Uuid::nil(),
            phone: "989120000000".to_string(),
            name: "Test User".to_string(),
            password_hash: None,
            role: "user".to_string(),
            is_verified: true,
        };
        assert!(format!("{:?}", RegistrationOutcome::Created(record)).starts_with("Created"));
        assert_eq!(format!("{:?}", RegistrationOutcome::Conflict), "Conflict");
    }

    #[test]
    fn otp_record_holds_values() {
        let record = OtpCodeRecord {
            id: Uuid::nil(),
            code: "012345".to_string(),
            attempts: 2,
            expired: false,
        };
        assert_eq!(record.code, "012345");
        assert_eq!(record.attempts, 2);
        assert!(!record.expired);
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
