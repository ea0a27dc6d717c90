use crate::auth::auth::AuthUser;
use crate::auth::policy::{Action, authorize};
use crate::config::Config;
use crate::ledger::{self, AmendPatch, SearchFilter};
use crate::model::presence::{PresenceRecord, PresenceWithUser};
use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

/// Body shared by check-in and check-out. The proof reference points at
/// media the sidecar has already persisted; the ledger only stores the
/// string.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PresenceActionReq {
    #[schema(example = -7.797068)]
    pub latitude: Option<f64>,
    #[schema(example = 110.370529)]
    pub longitude: Option<f64>,
    #[schema(example = "7-1709280000000.jpg")]
    pub proof_ref: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct OwnHistoryQuery {
    #[schema(example = "2024-03-01", format = "date", value_type = String)]
    pub date_start: Option<chrono::NaiveDate>,
    #[schema(example = "2024-03-31", format = "date", value_type = String)]
    pub date_end: Option<chrono::NaiveDate>,
}

/// Presence record with timestamps rendered in the report time zone,
/// ISO-8601 with offset.
#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceDto {
    pub id: u64,
    pub user_id: u64,
    #[schema(example = "2024-03-01T08:00:00+07:00")]
    pub check_in: String,
    #[schema(example = "2024-03-01T17:00:00+07:00")]
    pub check_out: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub proof_ref: Option<String>,
}

fn fmt_ts(ts: DateTime<Utc>, tz: FixedOffset) -> String {
    ts.with_timezone(&tz).to_rfc3339()
}

impl PresenceDto {
    pub fn from_record(record: PresenceRecord, tz: FixedOffset) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            check_in: fmt_ts(record.check_in, tz),
            check_out: record.check_out.map(|ts| fmt_ts(ts, tz)),
            latitude: record.latitude,
            longitude: record.longitude,
            proof_ref: record.proof_ref,
        }
    }
}

/// Report row: record plus the owning user's identity.
#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceReportDto {
    pub id: u64,
    pub user_id: u64,
    #[schema(example = "Budi Santoso")]
    pub name: String,
    #[schema(example = "budi@example.com")]
    pub email: String,
    pub role_id: u8,
    pub check_in: String,
    pub check_out: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub proof_ref: Option<String>,
}

impl PresenceReportDto {
    pub fn from_row(row: PresenceWithUser, tz: FixedOffset) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            email: row.email,
            role_id: row.role_id,
            check_in: fmt_ts(row.check_in, tz),
            check_out: row.check_out.map(|ts| fmt_ts(ts, tz)),
            latitude: row.latitude,
            longitude: row.longitude,
            proof_ref: row.proof_ref,
        }
    }
}

/// Check-in endpoint: opens a session for the caller.
#[utoipa::path(
    post,
    path = "/api/v1/presence/check-in",
    request_body = PresenceActionReq,
    responses(
        (status = 201, description = "Session opened", body = PresenceDto),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "An open session already exists", body = Object, example = json!({
            "error": "ALREADY_CHECKED_IN",
            "message": "an open session already exists for this user"
        })),
        (status = 503, description = "Store unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Presence"
)]
pub async fn check_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<PresenceActionReq>,
) -> actix_web::Result<impl Responder> {
    authorize(&auth, Action::CheckIn, None)?;

    let record = ledger::check_in(
        pool.get_ref(),
        auth.user_id,
        Utc::now(),
        payload.latitude,
        payload.longitude,
        payload.proof_ref.as_deref(),
    )
    .await?;

    tracing::info!(user_id = auth.user_id, record_id = record.id, "Checked in");

    Ok(HttpResponse::Created().json(json!({
        "message": format!("Hello {}, check-in recorded", auth.name),
        "data": PresenceDto::from_record(record, config.report_tz),
    })))
}

/// Check-out endpoint: closes the caller's open session.
#[utoipa::path(
    post,
    path = "/api/v1/presence/check-out",
    request_body = PresenceActionReq,
    responses(
        (status = 200, description = "Session closed", body = PresenceDto),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No open session", body = Object, example = json!({
            "error": "NO_OPEN_SESSION",
            "message": "no open session found for this user"
        })),
        (status = 503, description = "Store unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Presence"
)]
pub async fn check_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<PresenceActionReq>,
) -> actix_web::Result<impl Responder> {
    authorize(&auth, Action::CheckOut, None)?;

    let record = ledger::check_out(
        pool.get_ref(),
        auth.user_id,
        Utc::now(),
        payload.latitude,
        payload.longitude,
        payload.proof_ref.as_deref(),
    )
    .await?;

    tracing::info!(user_id = auth.user_id, record_id = record.id, "Checked out");

    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Goodbye {}, check-out recorded", auth.name),
        "data": PresenceDto::from_record(record, config.report_tz),
    })))
}

/// Amend a presence record. Absent (or null) patch fields are left
/// unchanged.
#[utoipa::path(
    put,
    path = "/api/v1/presence/{id}",
    params(("id" = u64, Path, description = "Presence record id")),
    request_body = AmendPatch,
    responses(
        (status = 200, description = "Record updated", body = PresenceDto),
        (status = 400, description = "Empty patch or invalid timestamp"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Record not found"),
        (status = 503, description = "Store unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Presence"
)]
pub async fn update_presence(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<AmendPatch>,
) -> actix_web::Result<impl Responder> {
    authorize(&auth, Action::Amend, None)?;

    let record_id = path.into_inner();
    let record = ledger::amend(pool.get_ref(), record_id, &payload).await?;

    tracing::info!(user_id = auth.user_id, record_id, "Record amended");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Presence record updated",
        "data": PresenceDto::from_record(record, config.report_tz),
    })))
}

/// Delete a presence record. Owner-only; there is no admin override.
#[utoipa::path(
    delete,
    path = "/api/v1/presence/{id}",
    params(("id" = u64, Path, description = "Presence record id")),
    responses(
        (status = 204, description = "Record deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Record not found"),
        (status = 503, description = "Store unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Presence"
)]
pub async fn delete_presence(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let record_id = path.into_inner();
    ledger::delete(pool.get_ref(), record_id, &auth).await?;

    tracing::info!(user_id = auth.user_id, record_id, "Record deleted");

    Ok(HttpResponse::NoContent().finish())
}

/// The caller's own presence history, newest-day filtering via an
/// optional inclusive date range.
#[utoipa::path(
    get,
    path = "/api/v1/presence",
    params(OwnHistoryQuery),
    responses(
        (status = 200, description = "Caller's presence records"),
        (status = 400, description = "Lone date bound"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Store unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Presence"
)]
pub async fn own_history(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<OwnHistoryQuery>,
) -> actix_web::Result<impl Responder> {
    authorize(&auth, Action::SearchOwn, None)?;

    // always scoped to the caller, whatever the query says
    let filter = SearchFilter {
        user_id: Some(auth.user_id),
        name: None,
        date_start: query.date_start,
        date_end: query.date_end,
    };

    let rows = ledger::search(pool.get_ref(), &filter, config.report_tz).await?;
    let data: Vec<PresenceReportDto> = rows
        .into_iter()
        .map(|row| PresenceReportDto::from_row(row, config.report_tz))
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "total_records": data.len(),
        "data": data,
    })))
}
