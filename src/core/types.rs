//! # Core Types Module
//!
//! Foundational data structures for the request pipeline: the authenticated
//! principal, the closed role enumeration, route access requirements, and the
//! rate-limit route classes.
//!
//! Roles are a closed enum rather than free strings so the (policy, role)
//! decision in [`Access::permits`] is a total function the compiler checks
//! exhaustively. A token carrying a role outside this enum is rejected at
//! verification time, before any policy decision runs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::GatewayError;

/// The three marketplace roles a verified token can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular shopper: cart, orders, wishlist
    Customer,
    /// Seller: store, artwork, and payout management on top of customer access
    Artist,
    /// Platform operator: everything, including the admin surfaces
    Admin,
}

impl Role {
    /// Parse a role claim as it appears in GoCart JWTs.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "customer" => Some(Role::Customer),
            "artist" => Some(Role::Artist),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// The wire representation used in claims and injected headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Artist => "artist",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated identity derived from a verified bearer token.
///
/// Lives only for the duration of a request; the gateway persists nothing
/// about principals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Unique user identifier (the `userId` claim)
    pub id: String,
    /// Email address from the token
    pub email: String,
    /// Marketplace role, already validated against the closed enum
    pub role: Role,
}

/// Access requirement attached to a route policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Anyone; a present token is still verified opportunistically so the
    /// upstream can personalize, but failures do not reject the request
    Public,
    /// Any verified principal
    Authenticated,
    /// Admin role only
    AdminOnly,
    /// Artist or admin role
    ArtistOrAdmin,
}

impl Access {
    /// Decide whether a (possibly anonymous) principal may pass this requirement.
    ///
    /// Total over `(Access, Option<Role>)`; adding a role or access variant
    /// fails compilation here until the new combination is decided.
    pub fn permits(&self, principal: Option<&Principal>) -> Result<(), GatewayError> {
        match (self, principal) {
            (Access::Public, _) => Ok(()),
            (Access::Authenticated, Some(_)) => Ok(()),
            (Access::AdminOnly, Some(p)) => match p.role {
                Role::Admin => Ok(()),
                Role::Artist | Role::Customer => Err(GatewayError::InsufficientPermissions),
            },
            (Access::ArtistOrAdmin, Some(p)) => match p.role {
                Role::Artist | Role::Admin => Ok(()),
                Role::Customer => Err(GatewayError::InsufficientPermissions),
            },
            (Access::Authenticated, None)
            | (Access::AdminOnly, None)
            | (Access::ArtistOrAdmin, None) => Err(GatewayError::AuthRequired),
        }
    }

    /// Whether this requirement rejects anonymous requests outright.
    pub fn requires_authentication(&self) -> bool {
        !matches!(self, Access::Public)
    }
}

/// Rate-limit class of a route. Each class has its own quota and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    /// Catalog and everything without a stricter class
    General,
    /// Login, registration, password reset: tight quota against credential stuffing
    Auth,
    /// Payment and payout calls
    Payment,
    /// Media uploads
    Upload,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::General => "general",
            RouteClass::Auth => "auth",
            RouteClass::Payment => "payment",
            RouteClass::Upload => "upload",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            id: "user-1".to_string(),
            email: "user@example.com".to_string(),
            role,
        }
    }

    #[test]
    fn test_role_parse_round_trip() {
        for role in [Role::Customer, Role::Artist, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("Admin"), None); // claims are lowercase
    }

    #[test]
    fn test_public_permits_everyone() {
        assert!(Access::Public.permits(None).is_ok());
        assert!(Access::Public.permits(Some(&principal(Role::Customer))).is_ok());
    }

    #[test]
    fn test_protected_routes_reject_anonymous() {
        for access in [Access::Authenticated, Access::AdminOnly, Access::ArtistOrAdmin] {
            match access.permits(None) {
                Err(GatewayError::AuthRequired) => {}
                other => panic!("expected AuthRequired, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_admin_only_decision_table() {
        assert!(Access::AdminOnly.permits(Some(&principal(Role::Admin))).is_ok());
        for role in [Role::Customer, Role::Artist] {
            match Access::AdminOnly.permits(Some(&principal(role))) {
                Err(GatewayError::InsufficientPermissions) => {}
                other => panic!("expected InsufficientPermissions, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_artist_or_admin_decision_table() {
        for role in [Role::Artist, Role::Admin] {
            assert!(Access::ArtistOrAdmin.permits(Some(&principal(role))).is_ok());
        }
        match Access::ArtistOrAdmin.permits(Some(&principal(Role::Customer))) {
            Err(GatewayError::InsufficientPermissions) => {}
            other => panic!("expected InsufficientPermissions, got {:?}", other),
        }
    }
}
