use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// One check-in/check-out session for a user. `check_out = NULL` means the
/// session is still open; the ledger guarantees at most one open session
/// per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct PresenceRecord {
    pub id: u64,
    pub user_id: u64,
    #[schema(example = "2024-03-01T01:00:00Z", format = "date-time", value_type = String)]
    pub check_in: DateTime<Utc>,
    #[schema(example = "2024-03-01T09:00:00Z", format = "date-time", value_type = String)]
    pub check_out: Option<DateTime<Utc>>,
    #[schema(example = -7.797068)]
    pub latitude: Option<f64>,
    #[schema(example = 110.370529)]
    pub longitude: Option<f64>,
    /// Opaque reference to externally stored proof-of-presence media.
    pub proof_ref: Option<String>,
}

/// Presence record joined with the owning user's identity, as returned by
/// the search/report queries.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct PresenceWithUser {
    pub id: u64,
    pub user_id: u64,
    #[schema(example = "Budi Santoso")]
    pub name: String,
    #[schema(example = "budi@example.com", format = "email")]
    pub email: String,
    pub role_id: u8,
    #[schema(example = "2024-03-01T01:00:00Z", format = "date-time", value_type = String)]
    pub check_in: DateTime<Utc>,
    #[schema(example = "2024-03-01T09:00:00Z", format = "date-time", value_type = String)]
    pub check_out: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub proof_ref: Option<String>,
}
