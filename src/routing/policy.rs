//! # Route Policy Table
//!
//! Static mapping from path patterns to the access requirement, rate-limit
//! class, and upstream target of each route, backed by a radix tree
//! (`matchit`) for efficient lookups.
//!
//! Invariants:
//! - every inbound path matches at most one policy (duplicate patterns fail
//!   at build time),
//! - unmatched paths fall back to the default public policy,
//! - exact-path overrides are consulted before the tree, so a public path
//!   (the Stripe webhook) can live under an otherwise authenticated prefix.
//!
//! The table is built once at startup and never mutated.

use matchit::Router as RadixRouter;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Access, RouteClass};

/// Access-control requirement attached to a path pattern.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    /// The pattern this policy was registered under (for logging)
    pub pattern: String,
    /// Who may pass
    pub access: Access,
    /// Which quota bucket the route draws from
    pub class: RouteClass,
    /// Name of the upstream the route forwards to
    pub upstream: String,
}

/// The policy table: exact overrides, radix tree, default fallback.
pub struct PolicyTable {
    exact: HashMap<String, Arc<RoutePolicy>>,
    table: RadixRouter<Arc<RoutePolicy>>,
    default_policy: Arc<RoutePolicy>,
    // matchit cannot be iterated, so the builder records tree upstreams here
    tree_upstreams: Vec<String>,
}

impl PolicyTable {
    pub fn builder() -> PolicyTableBuilder {
        PolicyTableBuilder::new()
    }

    /// Resolve the policy for an inbound path. Total: unmatched paths get the
    /// default public policy.
    pub fn resolve(&self, path: &str) -> Arc<RoutePolicy> {
        if let Some(policy) = self.exact.get(path) {
            return Arc::clone(policy);
        }

        if let Ok(matched) = self.table.at(path) {
            return Arc::clone(matched.value);
        }

        Arc::clone(&self.default_policy)
    }

    /// All upstream names the table references, for validation against the
    /// configured upstream set at startup.
    pub fn upstream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .exact
            .values()
            .map(|p| p.upstream.clone())
            .chain(std::iter::once(self.default_policy.upstream.clone()))
            .collect();
        names.extend(self.tree_upstreams.iter().cloned());
        names.sort();
        names.dedup();
        names
    }
}

/// Fluent builder for [`PolicyTable`]. Registration order does not matter;
/// pattern conflicts surface as configuration errors at build time.
pub struct PolicyTableBuilder {
    routes: Vec<RoutePolicy>,
    exact: Vec<RoutePolicy>,
    default_policy: Option<RoutePolicy>,
}

impl PolicyTableBuilder {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            exact: Vec::new(),
            default_policy: None,
        }
    }

    /// Register a pattern (supports `:param` segments and a trailing `*rest`
    /// catch-all) with its policy.
    pub fn policy(mut self, pattern: &str, access: Access, class: RouteClass, upstream: &str) -> Self {
        self.routes.push(RoutePolicy {
            pattern: pattern.to_string(),
            access,
            class,
            upstream: upstream.to_string(),
        });
        self
    }

    /// Register an exact path, matched before the tree.
    pub fn exact(mut self, path: &str, access: Access, class: RouteClass, upstream: &str) -> Self {
        self.exact.push(RoutePolicy {
            pattern: path.to_string(),
            access,
            class,
            upstream: upstream.to_string(),
        });
        self
    }

    /// Register a prefix: the bare path plus everything below it.
    pub fn prefix(self, prefix: &str, access: Access, class: RouteClass, upstream: &str) -> Self {
        let pattern = format!("{}/*rest", prefix);
        self.exact(prefix, access, class, upstream)
            .policy(&pattern, access, class, upstream)
    }

    /// Set the fallback policy for unmatched paths.
    pub fn default_policy(mut self, access: Access, class: RouteClass, upstream: &str) -> Self {
        self.default_policy = Some(RoutePolicy {
            pattern: "/*".to_string(),
            access,
            class,
            upstream: upstream.to_string(),
        });
        self
    }

    pub fn build(self) -> GatewayResult<PolicyTable> {
        let default_policy = self
            .default_policy
            .ok_or_else(|| GatewayError::config("policy table requires a default policy"))?;

        let mut table = RadixRouter::new();
        let mut tree_upstreams = Vec::new();
        for route in self.routes {
            let pattern = route.pattern.clone();
            tree_upstreams.push(route.upstream.clone());
            table.insert(&pattern, Arc::new(route)).map_err(|e| {
                GatewayError::config(format!("conflicting route policy '{}': {}", pattern, e))
            })?;
        }
        tree_upstreams.sort();
        tree_upstreams.dedup();

        let mut exact = HashMap::new();
        for route in self.exact {
            let path = route.pattern.clone();
            if exact.insert(path.clone(), Arc::new(route)).is_some() {
                return Err(GatewayError::config(format!(
                    "duplicate exact route policy '{}'",
                    path
                )));
            }
        }

        Ok(PolicyTable {
            exact,
            table,
            default_policy: Arc::new(default_policy),
            tree_upstreams,
        })
    }
}

impl Default for PolicyTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyTable {
    /// The GoCart route table.
    ///
    /// Mirrors what the services expect from their entrypoint: public catalog
    /// reads, admin and artist management surfaces, authenticated user and
    /// payment routes, and the strict auth/upload limiter classes. Anything
    /// unlisted is public and goes to the backend catalog service.
    pub fn gocart_defaults() -> GatewayResult<PolicyTable> {
        use Access::*;
        use RouteClass::*;

        PolicyTable::builder()
            // Anything unlisted: public read against the backend
            .default_policy(Public, General, "backend")
            // Auth service; tight quota against credential stuffing
            .prefix("/auth", Public, Auth, "auth")
            // Stripe calls the webhook directly and signs its own requests,
            // so it stays public under the otherwise authenticated prefix
            .exact("/payments/webhook", Public, Payment, "payment")
            .prefix("/payments", Authenticated, Payment, "payment")
            .prefix("/payouts", ArtistOrAdmin, Payment, "payment")
            // Admin dashboard surfaces
            .prefix("/api/admin", AdminOnly, General, "backend")
            // Artist management surfaces
            .prefix("/api/store", ArtistOrAdmin, General, "backend")
            .prefix("/api/artworks", ArtistOrAdmin, General, "backend")
            // Authenticated user surfaces
            .prefix("/api/user", Authenticated, General, "backend")
            .prefix("/api/cart", Authenticated, General, "backend")
            .prefix("/api/orders", Authenticated, General, "backend")
            .prefix("/api/wishlist", Authenticated, General, "backend")
            // Uploads proxy through to the media module with their own quota
            .prefix("/api/upload", Authenticated, Upload, "backend")
            .prefix("/api/media", Authenticated, Upload, "backend")
            // Public catalog reads, listed for documentation value even though
            // they coincide with the default policy
            .policy("/api/products", Public, General, "backend")
            .policy("/api/products/:id", Public, General, "backend")
            .policy("/api/artists", Public, General, "backend")
            .policy("/api/artists/:id", Public, General, "backend")
            .policy("/api/portfolios/:username", Public, General, "backend")
            .policy("/api/shops/:username", Public, General, "backend")
            .policy("/api/reviews", Public, General, "backend")
            .policy("/api/categories", Public, General, "backend")
            .policy("/api/search", Public, General, "backend")
            .build()
    }
}
