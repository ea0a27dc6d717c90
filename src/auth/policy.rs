//! Single authorization choke point: every ledger action passes through
//! [`authorize`] before it mutates or reads across users.

use crate::auth::auth::AuthUser;
use crate::ledger::LedgerError;
use crate::model::presence::PresenceRecord;
use crate::model::role::Role;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Action {
    CheckIn,
    CheckOut,
    Amend,
    Delete,
    SearchOwn,
    ReportAll,
}

/// Decides whether `identity` may perform `action`, optionally against a
/// specific `target` record.
///
/// - `ReportAll` is admin-only.
/// - `Delete` additionally requires ownership of the target.
/// - Everything else is open to any authenticated identity; handlers
///   scope those operations to the identity's own records.
pub fn authorize(
    identity: &AuthUser,
    action: Action,
    target: Option<&PresenceRecord>,
) -> Result<(), LedgerError> {
    match action {
        Action::ReportAll => {
            if identity.role == Role::Admin {
                Ok(())
            } else {
                Err(LedgerError::NotOwner)
            }
        }
        Action::Delete => match target {
            Some(record) if record.user_id == identity.user_id => Ok(()),
            Some(_) => Err(LedgerError::NotOwner),
            None => Err(LedgerError::RecordNotFound),
        },
        Action::CheckIn | Action::CheckOut | Action::Amend | Action::SearchOwn => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: u64, role: Role) -> AuthUser {
        AuthUser {
            user_id: id,
            email: format!("user{}@example.com", id),
            name: format!("User {}", id),
            role,
        }
    }

    fn record(owner: u64) -> PresenceRecord {
        PresenceRecord {
            id: 1,
            user_id: owner,
            check_in: Utc::now(),
            check_out: None,
            latitude: None,
            longitude: None,
            proof_ref: None,
        }
    }

    #[test]
    fn owner_may_delete() {
        let rec = record(5);
        assert!(authorize(&user(5, Role::User), Action::Delete, Some(&rec)).is_ok());
    }

    #[test]
    fn non_owner_delete_is_denied_even_for_admin() {
        let rec = record(5);
        let err = authorize(&user(6, Role::Admin), Action::Delete, Some(&rec)).unwrap_err();
        assert!(matches!(err, LedgerError::NotOwner));
    }

    #[test]
    fn report_is_admin_only() {
        assert!(authorize(&user(1, Role::Admin), Action::ReportAll, None).is_ok());
        assert!(matches!(
            authorize(&user(2, Role::User), Action::ReportAll, None),
            Err(LedgerError::NotOwner)
        ));
    }

    #[test]
    fn self_scoped_actions_are_open_to_any_identity() {
        let u = user(3, Role::User);
        for action in [
            Action::CheckIn,
            Action::CheckOut,
            Action::Amend,
            Action::SearchOwn,
        ] {
            assert!(authorize(&u, action, None).is_ok());
        }
    }
}
