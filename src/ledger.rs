//! The attendance ledger: lifecycle of presence records and the
//! one-open-session-per-user invariant.
//!
//! Every operation is a single store round-trip (check-in uses one
//! transaction); nothing is cached in-process and nothing is retried
//! internally. Errors map one-to-one onto HTTP responses via
//! [`ResponseError`].

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use thiserror::Error;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::auth::policy::{Action, authorize};
use crate::model::presence::{PresenceRecord, PresenceWithUser};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("an open session already exists for this user")]
    AlreadyCheckedIn,
    #[error("no open session found for this user")]
    NoOpenSession,
    #[error("presence record not found")]
    RecordNotFound,
    #[error("access denied")]
    NotOwner,
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("date_start and date_end must be provided together")]
    InvalidRangeSpecification,
    #[error("patch contains no fields to update")]
    EmptyPatch,
    #[error("attendance store is temporarily unavailable")]
    StoreUnavailable(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::AlreadyCheckedIn => "ALREADY_CHECKED_IN",
            LedgerError::NoOpenSession => "NO_OPEN_SESSION",
            LedgerError::RecordNotFound => "RECORD_NOT_FOUND",
            LedgerError::NotOwner => "NOT_OWNER",
            LedgerError::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            LedgerError::InvalidRangeSpecification => "INVALID_RANGE_SPECIFICATION",
            LedgerError::EmptyPatch => "EMPTY_PATCH",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::AlreadyCheckedIn => StatusCode::CONFLICT,
            LedgerError::NoOpenSession | LedgerError::RecordNotFound => StatusCode::NOT_FOUND,
            LedgerError::NotOwner => StatusCode::FORBIDDEN,
            LedgerError::InvalidTimestamp(_)
            | LedgerError::InvalidRangeSpecification
            | LedgerError::EmptyPatch => StatusCode::BAD_REQUEST,
            LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let LedgerError::StoreUnavailable(e) = self {
            // driver detail goes to the log, never to the caller
            tracing::error!(error = %e, "Store operation failed");
        }

        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}

/// Field-wise patch for [`amend`]. A field absent from the request body
/// (or sent as JSON `null`, which serde maps to the same `None`) is left
/// unchanged; amend can never clear a value.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AmendPatch {
    #[schema(example = "2024-03-01T08:00:00+07:00", value_type = String)]
    pub check_in: Option<String>,
    #[schema(example = "2024-03-01T17:00:00+07:00", value_type = String)]
    pub check_out: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl AmendPatch {
    pub fn is_empty(&self) -> bool {
        self.check_in.is_none()
            && self.check_out.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
    }
}

/// Report/search criteria. Date bounds follow a both-or-neither rule and
/// are widened to full calendar days in the report time zone.
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct SearchFilter {
    /// Restrict to a single user's records.
    pub user_id: Option<u64>,
    /// Case-insensitive substring match on the user's display name.
    #[schema(example = "budi")]
    pub name: Option<String>,
    #[schema(example = "2024-03-01", format = "date", value_type = String)]
    pub date_start: Option<NaiveDate>,
    #[schema(example = "2024-03-31", format = "date", value_type = String)]
    pub date_end: Option<NaiveDate>,
}

/// SQL bind values for the dynamically assembled queries below.
#[derive(Debug)]
enum Bind {
    U64(u64),
    F64(f64),
    Str(String),
    DateTime(DateTime<Utc>),
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// A check-in insert bounced off `uniq_open_session` only when MySQL
/// reports a duplicate key (errno 1062). Other SQLSTATE 23000 failures,
/// e.g. a foreign-key violation (1452) from a deleted user, are store
/// errors, not ledger conflicts.
fn is_open_session_conflict(sqlstate: Option<&str>, errno: Option<u16>) -> bool {
    sqlstate == Some("23000") && errno == Some(1062)
}

fn map_insert_error(e: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &e {
        let errno = db_err
            .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
            .map(|mysql| mysql.number());
        if is_open_session_conflict(db_err.code().as_deref(), errno) {
            return LedgerError::AlreadyCheckedIn;
        }
    }
    LedgerError::from(e)
}

/// Accepts RFC 3339 (offset included) or a bare `YYYY-MM-DD HH:MM:SS`,
/// which is taken as UTC.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, LedgerError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    Err(LedgerError::InvalidTimestamp(s.to_string()))
}

/// Widens an inclusive calendar-day range to `[start 00:00:00.000,
/// end 23:59:59.999]` in the report time zone, converted to UTC.
/// Exactly one bound present is a specification error.
pub fn widen_range(
    date_start: Option<NaiveDate>,
    date_end: Option<NaiveDate>,
    tz: FixedOffset,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, LedgerError> {
    match (date_start, date_end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let from = start
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_local_timezone(tz)
                .unwrap()
                .with_timezone(&Utc);
            let to = end
                .and_hms_milli_opt(23, 59, 59, 999)
                .unwrap()
                .and_local_timezone(tz)
                .unwrap()
                .with_timezone(&Utc);
            Ok(Some((from, to)))
        }
        _ => Err(LedgerError::InvalidRangeSpecification),
    }
}

fn build_amend_update(
    record_id: u64,
    patch: &AmendPatch,
) -> Result<(String, Vec<Bind>), LedgerError> {
    if patch.is_empty() {
        return Err(LedgerError::EmptyPatch);
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut binds: Vec<Bind> = Vec::new();

    if let Some(s) = patch.check_in.as_deref() {
        sets.push("check_in = ?");
        binds.push(Bind::DateTime(parse_timestamp(s)?));
    }
    if let Some(s) = patch.check_out.as_deref() {
        sets.push("check_out = ?");
        binds.push(Bind::DateTime(parse_timestamp(s)?));
    }
    if let Some(v) = patch.latitude {
        sets.push("latitude = ?");
        binds.push(Bind::F64(v));
    }
    if let Some(v) = patch.longitude {
        sets.push("longitude = ?");
        binds.push(Bind::F64(v));
    }

    let sql = format!(
        "UPDATE presence_records SET {} WHERE id = ?",
        sets.join(", ")
    );
    binds.push(Bind::U64(record_id));

    Ok((sql, binds))
}

fn build_search_query(
    user_id: Option<u64>,
    name_like: Option<&str>,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> (String, Vec<Bind>) {
    let mut where_sql = String::from(" WHERE 1=1");
    let mut binds: Vec<Bind> = Vec::new();

    if let Some(id) = user_id {
        where_sql.push_str(" AND p.user_id = ?");
        binds.push(Bind::U64(id));
    }
    if let Some(name) = non_empty(name_like) {
        where_sql.push_str(" AND LOWER(u.name) LIKE LOWER(?)");
        binds.push(Bind::Str(format!("%{}%", name)));
    }
    if let Some((from, to)) = range {
        where_sql.push_str(" AND p.check_in BETWEEN ? AND ?");
        binds.push(Bind::DateTime(from));
        binds.push(Bind::DateTime(to));
    }

    let sql = format!(
        "SELECT p.id, p.user_id, u.name, u.email, u.role_id, \
                p.check_in, p.check_out, p.latitude, p.longitude, p.proof_ref \
         FROM presence_records p \
         JOIN users u ON u.id = p.user_id{} \
         ORDER BY p.check_in ASC",
        where_sql
    );

    (sql, binds)
}

pub async fn fetch_record(
    pool: &MySqlPool,
    record_id: u64,
) -> Result<Option<PresenceRecord>, LedgerError> {
    let record = sqlx::query_as::<_, PresenceRecord>(
        r#"
        SELECT id, user_id, check_in, check_out, latitude, longitude, proof_ref
        FROM presence_records
        WHERE id = ?
        "#,
    )
    .bind(record_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Opens a session for `user_id`. The check-and-insert runs in one
/// transaction holding a row lock on the user, so two concurrent
/// check-ins for the same user cannot both pass the open-session check;
/// the `open_marker` unique index backs the same invariant at the schema
/// level.
pub async fn check_in(
    pool: &MySqlPool,
    user_id: u64,
    occurred_at: DateTime<Utc>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    proof_ref: Option<&str>,
) -> Result<PresenceRecord, LedgerError> {
    let proof_ref = non_empty(proof_ref);

    let mut tx = pool.begin().await?;

    sqlx::query("SELECT id FROM users WHERE id = ? FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

    let open: Option<u64> = sqlx::query_scalar(
        "SELECT id FROM presence_records WHERE user_id = ? AND check_out IS NULL LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    if open.is_some() {
        return Err(LedgerError::AlreadyCheckedIn);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO presence_records (user_id, check_in, latitude, longitude, proof_ref)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(occurred_at)
    .bind(latitude)
    .bind(longitude)
    .bind(proof_ref)
    .execute(&mut *tx)
    .await
    // duplicate key on open_marker: another open session slipped in
    .map_err(map_insert_error)?;

    let record = sqlx::query_as::<_, PresenceRecord>(
        r#"
        SELECT id, user_id, check_in, check_out, latitude, longitude, proof_ref
        FROM presence_records
        WHERE id = ?
        "#,
    )
    .bind(result.last_insert_id())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(record)
}

/// Closes the caller's open session. Location and proof only overwrite
/// when the request supplies a non-empty value; an absent value never
/// clears what check-in recorded.
pub async fn check_out(
    pool: &MySqlPool,
    user_id: u64,
    occurred_at: DateTime<Utc>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    proof_ref: Option<&str>,
) -> Result<PresenceRecord, LedgerError> {
    let proof_ref = non_empty(proof_ref);

    let open_id: Option<u64> = sqlx::query_scalar(
        "SELECT id FROM presence_records WHERE user_id = ? AND check_out IS NULL LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let record_id = open_id.ok_or(LedgerError::NoOpenSession)?;

    let result = sqlx::query(
        r#"
        UPDATE presence_records
        SET check_out = ?,
            latitude = COALESCE(?, latitude),
            longitude = COALESCE(?, longitude),
            proof_ref = COALESCE(?, proof_ref)
        WHERE id = ? AND check_out IS NULL
        "#,
    )
    .bind(occurred_at)
    .bind(latitude)
    .bind(longitude)
    .bind(proof_ref)
    .bind(record_id)
    .execute(pool)
    .await?;

    // 0 rows: a concurrent check-out already closed it
    if result.rows_affected() == 0 {
        return Err(LedgerError::NoOpenSession);
    }

    fetch_record(pool, record_id)
        .await?
        .ok_or(LedgerError::RecordNotFound)
}

/// Applies the supplied patch fields to an existing record.
pub async fn amend(
    pool: &MySqlPool,
    record_id: u64,
    patch: &AmendPatch,
) -> Result<PresenceRecord, LedgerError> {
    // Validate before touching the store.
    let (sql, binds) = build_amend_update(record_id, patch)?;

    fetch_record(pool, record_id)
        .await?
        .ok_or(LedgerError::RecordNotFound)?;

    let mut query = sqlx::query(&sql);
    for bind in binds {
        query = match bind {
            Bind::U64(v) => query.bind(v),
            Bind::F64(v) => query.bind(v),
            Bind::Str(v) => query.bind(v),
            Bind::DateTime(v) => query.bind(v),
        };
    }
    query.execute(pool).await?;

    fetch_record(pool, record_id)
        .await?
        .ok_or(LedgerError::RecordNotFound)
}

/// Permanently removes a record. Only its owner may delete it; a missing
/// record reports `RecordNotFound` before any ownership check runs.
pub async fn delete(
    pool: &MySqlPool,
    record_id: u64,
    requester: &AuthUser,
) -> Result<(), LedgerError> {
    let record = fetch_record(pool, record_id)
        .await?
        .ok_or(LedgerError::RecordNotFound)?;

    authorize(requester, Action::Delete, Some(&record))?;

    sqlx::query("DELETE FROM presence_records WHERE id = ?")
        .bind(record_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Runs the report query. Stateless: every call re-executes against the
/// store, ordered ascending by check-in.
pub async fn search(
    pool: &MySqlPool,
    filter: &SearchFilter,
    tz: FixedOffset,
) -> Result<Vec<PresenceWithUser>, LedgerError> {
    let range = widen_range(filter.date_start, filter.date_end, tz)?;
    let (sql, binds) = build_search_query(filter.user_id, filter.name.as_deref(), range);

    let mut query = sqlx::query_as::<_, PresenceWithUser>(&sql);
    for bind in binds {
        query = match bind {
            Bind::U64(v) => query.bind(v),
            Bind::F64(v) => query.bind(v),
            Bind::Str(v) => query.bind(v),
            Bind::DateTime(v) => query.bind(v),
        };
    }

    Ok(query.fetch_all(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jakarta() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(AmendPatch::default().is_empty());
        let patch = AmendPatch {
            latitude: Some(-7.8),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn amend_update_touches_only_supplied_fields() {
        let patch = AmendPatch {
            latitude: Some(-7.8),
            ..Default::default()
        };
        let (sql, binds) = build_amend_update(42, &patch).unwrap();
        assert_eq!(sql, "UPDATE presence_records SET latitude = ? WHERE id = ?");
        assert!(!sql.contains("longitude"));
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn amend_update_rejects_empty_patch() {
        let err = build_amend_update(1, &AmendPatch::default()).unwrap_err();
        assert!(matches!(err, LedgerError::EmptyPatch));
    }

    #[test]
    fn amend_update_rejects_bad_timestamp() {
        let patch = AmendPatch {
            check_in: Some("not-a-date".into()),
            ..Default::default()
        };
        let err = build_amend_update(1, &patch).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTimestamp(_)));
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_timestamp("2024-03-01T08:00:00+07:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn parses_bare_datetime_as_utc() {
        let ts = parse_timestamp("2024-03-01 08:00:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn lone_range_bound_is_an_error() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert!(matches!(
            widen_range(start, None, jakarta()),
            Err(LedgerError::InvalidRangeSpecification)
        ));
        assert!(matches!(
            widen_range(None, start, jakarta()),
            Err(LedgerError::InvalidRangeSpecification)
        ));
    }

    #[test]
    fn absent_range_is_no_filter() {
        assert!(widen_range(None, None, jakarta()).unwrap().is_none());
    }

    #[test]
    fn single_day_range_covers_the_whole_local_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1);
        let (from, to) = widen_range(day, day, jakarta()).unwrap().unwrap();

        // 2024-03-01 00:00 +07:00 == 2024-02-29 17:00 UTC
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 2, 29, 17, 0, 0).unwrap());
        assert_eq!(
            to,
            Utc.with_ymd_and_hms(2024, 3, 1, 16, 59, 59).unwrap()
                + chrono::Duration::milliseconds(999)
        );
        // a check-in at 08:00 local that day falls inside the range
        let local_morning = Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();
        assert!(from <= local_morning && local_morning <= to);
    }

    #[test]
    fn search_query_orders_by_check_in() {
        let (sql, binds) = build_search_query(Some(1), Some("budi"), None);
        assert!(sql.ends_with("ORDER BY p.check_in ASC"));
        assert!(sql.contains("LOWER(u.name) LIKE LOWER(?)"));
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn blank_name_filter_is_ignored() {
        let (sql, binds) = build_search_query(None, Some("   "), None);
        assert!(!sql.contains("LIKE"));
        assert!(binds.is_empty());
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(
            LedgerError::AlreadyCheckedIn.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            LedgerError::NoOpenSession.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LedgerError::RecordNotFound.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(LedgerError::NotOwner.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            LedgerError::EmptyPatch.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            LedgerError::InvalidRangeSpecification.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn duplicate_key_on_open_marker_is_a_conflict() {
        assert!(is_open_session_conflict(Some("23000"), Some(1062)));
    }

    #[test]
    fn foreign_key_violation_is_not_a_conflict() {
        // errno 1452 shares SQLSTATE 23000 but means the user row is gone
        assert!(!is_open_session_conflict(Some("23000"), Some(1452)));
        assert!(!is_open_session_conflict(Some("23000"), None));
        assert!(!is_open_session_conflict(None, Some(1062)));
        assert!(!is_open_session_conflict(None, None));
    }

    #[test]
    fn non_database_insert_errors_stay_store_failures() {
        let err = map_insert_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn proof_ref_blank_counts_as_absent() {
        assert_eq!(non_empty(Some("")), None);
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(Some("photo-123.jpg")), Some("photo-123.jpg"));
        assert_eq!(non_empty(None), None);
    }
}
