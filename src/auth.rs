//! Gateway-forwarded identity.
//!
//! Authentication itself happens upstream; by the time a request reaches
//! this service the gateway has validated credentials and forwards the
//! caller's identity in `x-user-id` / `x-user-role` headers. The core
//! trusts that identity and only enforces role checks and tenant
//! ownership.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Merchant,
    Admin,
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "merchant" => Ok(Role::Merchant),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn require_merchant(&self) -> Result<(), ServiceError> {
        match self.role {
            Role::Merchant | Role::Admin => Ok(()),
            Role::Customer => Err(ServiceError::Forbidden(
                "merchant role required".to_string(),
            )),
        }
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        match self.role {
            Role::Admin => Ok(()),
            _ => Err(ServiceError::Forbidden("admin role required".to_string())),
        }
    }

    /// Merchants act only for themselves; admins act for any tenant.
    pub fn acts_for_merchant(&self, merchant_id: Uuid) -> Result<(), ServiceError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Merchant if self.id == merchant_id => Ok(()),
            _ => Err(ServiceError::Forbidden(
                "not authorised for this merchant".to_string(),
            )),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("missing or invalid caller identity".to_string())
            })?;

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Role::from_str(v).ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("missing or invalid caller role".to_string())
            })?;

        Ok(AuthenticatedUser { id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(Role::from_str("Merchant"), Ok(Role::Merchant));
        assert_eq!(Role::from_str("ADMIN"), Ok(Role::Admin));
        assert!(Role::from_str("superuser").is_err());
    }

    #[test]
    fn merchant_cannot_act_for_another_merchant() {
        let me = Uuid::new_v4();
        let user = AuthenticatedUser {
            id: me,
            role: Role::Merchant,
        };
        assert!(user.acts_for_merchant(me).is_ok());
        assert_matches!(
            user.acts_for_merchant(Uuid::new_v4()),
            Err(ServiceError::Forbidden(_))
        );
    }

    #[test]
    fn admin_acts_for_any_merchant() {
        let user = AuthenticatedUser {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        assert!(user.acts_for_merchant(Uuid::new_v4()).is_ok());
        assert!(user.require_merchant().is_ok());
        assert!(user.require_admin().is_ok());
    }

    #[test]
    fn customer_is_not_a_merchant() {
        let user = AuthenticatedUser {
            id: Uuid::new_v4(),
            role: Role::Customer,
        };
        assert_matches!(user.require_merchant(), Err(ServiceError::Forbidden(_)));
    }
}
