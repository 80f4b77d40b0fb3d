//! Bearer-token sessions.
//!
//! Tokens are random and only their sha256 is stored. Roles are read from
//! the user record on every request, never taken from the caller.

use chrono::{DateTime, Duration, Utc};

use crate::audit::hash_data;
use crate::db::Database;
use crate::error::{NotesError, NotesResult};
use crate::models::Actor;

/// Create a session for `user_id` valid for `ttl`, returning the token.
/// Sessions that expired before `now` are dropped first.
pub fn issue_session(
    db: &Database,
    user_id: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> NotesResult<String> {
    if db.get_user(user_id)?.is_none() {
        return Err(NotesError::not_found("User"));
    }
    let token = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    let purged = db.purge_expired_sessions(&now)?;
    db.insert_session(&hash_data(token.as_bytes()), user_id, &(now + ttl), &now)?;
    tracing::debug!(user_id, purged, "Session issued");
    Ok(token)
}

/// Resolve a bearer token to the acting user.
pub fn authenticate(db: &Database, token: Option<&str>, now: DateTime<Utc>) -> NotesResult<Actor> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| NotesError::Unauthenticated("authentication required".into()))?;

    let (user_id, expires_at) = db
        .get_session(&hash_data(token.as_bytes()))?
        .ok_or_else(|| NotesError::Unauthenticated("Invalid token".into()))?;
    if expires_at <= now {
        return Err(NotesError::Unauthenticated("Session expired".into()));
    }

    let user = db
        .get_user(&user_id)?
        .ok_or_else(|| NotesError::Unauthenticated("Invalid token".into()))?;
    Ok(Actor::from(&user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, User};
    use chrono::TimeZone;

    #[test]
    fn test_session_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("Dr A".into(), "a@clinic.org".into(), vec![Role::Clinician]);
        db.insert_user(&user).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        let token = issue_session(&db, &user.id, now, Duration::hours(8)).unwrap();
        let actor = authenticate(&db, Some(&token), now + Duration::hours(1)).unwrap();
        assert_eq!(actor.user_id, user.id);
        assert_eq!(actor.roles, vec![Role::Clinician]);

        let err = authenticate(&db, Some(&token), now + Duration::hours(9)).unwrap_err();
        assert_eq!(err.to_string(), "Session expired");

        let err = authenticate(&db, Some("bogus"), now).unwrap_err();
        assert_eq!(err.to_string(), "Invalid token");

        let err = authenticate(&db, None, now).unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.to_string(), "authentication required");
    }

    #[test]
    fn test_unknown_user_gets_no_session() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let err = issue_session(&db, "nobody", now, Duration::hours(1)).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_issuing_drops_expired_sessions() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("Dr A".into(), "a@clinic.org".into(), vec![Role::Clinician]);
        db.insert_user(&user).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        let short = issue_session(&db, &user.id, now, Duration::hours(1)).unwrap();
        let long = issue_session(&db, &user.id, now, Duration::hours(8)).unwrap();

        issue_session(&db, &user.id, now + Duration::hours(2), Duration::hours(8)).unwrap();
        assert!(db.get_session(&hash_data(short.as_bytes())).unwrap().is_none());
        assert!(db.get_session(&hash_data(long.as_bytes())).unwrap().is_some());

        let err = authenticate(&db, Some(&short), now + Duration::hours(2)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid token");
    }
}
