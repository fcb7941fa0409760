//! Request-scoped identity of the party performing a workflow call.

use sqlx::SqlitePool;

use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{GeoPoint, Profile, Role};

#[derive(Debug, Clone, PartialEq)]
pub struct ActorContext {
    pub profile: Profile,
}

impl ActorContext {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }

    /// Load the caller's stored profile.
    pub async fn resolve(pool: &SqlitePool, uid: &str) -> Result<Self> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(AppError::Unauthenticated("missing user id".to_string()));
        }
        db::get_profile(pool, uid)
            .await?
            .map(Self::new)
            .ok_or_else(|| AppError::Unauthenticated(format!("no profile for user {uid}")))
    }

    pub fn uid(&self) -> &str {
        &self.profile.uid
    }

    pub fn location(&self) -> Option<GeoPoint> {
        self.profile.location
    }

    pub fn require_role(&self, role: Role) -> Result<()> {
        if self.profile.role == role {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "only a {role:?} account can do this, caller is {:?}",
                self.profile.role
            )))
        }
    }
}
