use crate::api::presence::PresenceReportDto;
use crate::auth::auth::AuthUser;
use crate::auth::policy::{Action, authorize};
use crate::config::Config;
use crate::ledger::{self, SearchFilter};
use actix_web::{HttpResponse, Responder, web};
use serde_json::json;
use sqlx::MySqlPool;

/// Admin report across all users: filter by user, display-name substring
/// and inclusive date range, joined with user identity, ascending by
/// check-in.
#[utoipa::path(
    get,
    path = "/api/v1/reports",
    params(SearchFilter),
    responses(
        (status = 200, description = "Matching presence records with user identity"),
        (status = 400, description = "Lone date bound", body = Object, example = json!({
            "error": "INVALID_RANGE_SPECIFICATION",
            "message": "date_start and date_end must be provided together"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only"),
        (status = 503, description = "Store unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn presence_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<SearchFilter>,
) -> actix_web::Result<impl Responder> {
    authorize(&auth, Action::ReportAll, None)?;

    let rows = ledger::search(pool.get_ref(), &query, config.report_tz).await?;
    let data: Vec<PresenceReportDto> = rows
        .into_iter()
        .map(|row| PresenceReportDto::from_row(row, config.report_tz))
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "message": "Presence report",
        "total_records": data.len(),
        "data": data,
    })))
}
