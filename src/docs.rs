use crate::api::presence::{OwnHistoryQuery, PresenceActionReq, PresenceDto, PresenceReportDto};
use crate::ledger::{AmendPatch, SearchFilter};
use crate::model::presence::{PresenceRecord, PresenceWithUser};
use crate::models::{LoginReq, RegisterReq};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Presensi API",
        version = "1.0.0",
        description = r#"
## Attendance tracking service

Geolocation-tagged check-in/check-out with optional proof-of-presence
media references, per-record amend/delete and an admin report.

### Key rules
- At most **one open session per user**: a second check-in before
  check-out is rejected with `ALREADY_CHECKED_IN`.
- Amend patches are presence-based: fields left out of the body are
  never changed.
- Report date ranges are inclusive full calendar days in the configured
  report time zone; both bounds must be supplied together.

### Security
All `/api` endpoints require a **JWT Bearer** access token. The report
endpoint is restricted to the admin role.
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::presence::check_in,
        crate::api::presence::check_out,
        crate::api::presence::update_presence,
        crate::api::presence::delete_presence,
        crate::api::presence::own_history,

        crate::api::report::presence_report
    ),
    components(
        schemas(
            RegisterReq,
            LoginReq,
            PresenceRecord,
            PresenceWithUser,
            PresenceActionReq,
            PresenceDto,
            PresenceReportDto,
            AmendPatch,
            SearchFilter,
            OwnHistoryQuery
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Registration and token management"),
        (name = "Presence", description = "Check-in / check-out and record lifecycle"),
        (name = "Reports", description = "Admin attendance reports"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
