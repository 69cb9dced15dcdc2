//! Role-based authorization

use std::collections::HashMap;

use crate::security::authn::Claims;

/// Decides whether an identity may perform `action` on `resource`
pub trait PermissionChecker: Send + Sync {
    fn has_permission(&self, identity: Option<&Claims>, resource: &str, action: &str) -> bool;
}

/// `resource:action` grants per role; `*` matches anything on either side
#[derive(Debug, Clone, Default)]
pub struct RolePermissions {
    grants: HashMap<String, Vec<String>>,
}

impl RolePermissions {
    pub fn new(grants: HashMap<String, Vec<String>>) -> Self {
        Self { grants }
    }

    /// Default grants for the marketplace roles
    pub fn marketplace_defaults() -> Self {
        let grants: HashMap<String, Vec<String>> = [
            ("admin", vec!["*:*"]),
            ("contractor", vec!["projects:*", "bids:read", "profile:*"]),
            ("vendor", vec!["products:*", "orders:read", "profile:*"]),
            ("subscriber", vec!["projects:read", "products:read", "subscriptions:*", "profile:*"]),
            ("bidder", vec!["bids:create", "bids:read", "projects:read", "profile:*"]),
        ]
        .into_iter()
        .map(|(role, grants)| {
            (
                role.to_string(),
                grants.into_iter().map(String::from).collect::<Vec<_>>(),
            )
        })
        .collect();

        Self { grants }
    }
}

fn grant_matches(grant: &str, resource: &str, action: &str) -> bool {
    let Some((granted_resource, granted_action)) = grant.split_once(':') else {
        return false;
    };
    (granted_resource == "*" || granted_resource == resource)
        && (granted_action == "*" || granted_action == action)
}

impl PermissionChecker for RolePermissions {
    fn has_permission(&self, identity: Option<&Claims>, resource: &str, action: &str) -> bool {
        let Some(identity) = identity else {
            return false;
        };
        self.grants
            .get(&identity.role)
            .map(|grants| grants.iter().any(|g| grant_matches(g, resource, action)))
            .unwrap_or(false)
    }
}
