// ── Access-resolution seam ──
//
// The core does not own user records or permissions. It asks a
// collaborator for a viewer's allowed controllers exactly once per
// subscription attempt and once per write request.

use std::collections::{HashMap, HashSet};
use std::fmt;

use futures_core::future::BoxFuture;
use url::Url;

use crate::error::CoreError;

/// Opaque viewer identity, assigned by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewerId(String);

impl ViewerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// The set of controller addresses a viewer may observe and write to.
///
/// `All` is the administrator case: unrestricted visibility without
/// enumerating the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedScope {
    All,
    Only(HashSet<Url>),
}

impl AllowedScope {
    pub fn only(addresses: impl IntoIterator<Item = Url>) -> Self {
        Self::Only(addresses.into_iter().collect())
    }

    pub fn allows(&self, address: &Url) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(address),
        }
    }
}

/// Resolves a viewer's allowed controllers.
///
/// Implemented by the access-control collaborator; [`StaticAccess`] is
/// the in-process implementation used by the demo binary and tests.
pub trait AccessResolver: Send + Sync {
    fn resolve_access<'a>(
        &'a self,
        viewer: &'a ViewerId,
    ) -> BoxFuture<'a, Result<AllowedScope, CoreError>>;
}

/// Fixed, in-memory access table. Viewers not in the table get the
/// default scope.
pub struct StaticAccess {
    default: AllowedScope,
    per_viewer: HashMap<ViewerId, AllowedScope>,
}

impl StaticAccess {
    /// Every viewer sees every controller.
    pub fn allow_all() -> Self {
        Self {
            default: AllowedScope::All,
            per_viewer: HashMap::new(),
        }
    }

    /// Unknown viewers see nothing.
    pub fn deny_by_default() -> Self {
        Self {
            default: AllowedScope::only([]),
            per_viewer: HashMap::new(),
        }
    }

    pub fn with_viewer(mut self, viewer: ViewerId, scope: AllowedScope) -> Self {
        self.per_viewer.insert(viewer, scope);
        self
    }
}

impl AccessResolver for StaticAccess {
    fn resolve_access<'a>(
        &'a self,
        viewer: &'a ViewerId,
    ) -> BoxFuture<'a, Result<AllowedScope, CoreError>> {
        let scope = self
            .per_viewer
            .get(viewer)
            .unwrap_or(&self.default)
            .clone();
        Box::pin(async move { Ok(scope) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        s.parse().expect("static url")
    }

    #[tokio::test]
    async fn static_table_falls_back_to_default() {
        let a = url("opc.tcp://a:4840/");
        let b = url("opc.tcp://b:4840/");

        let access = StaticAccess::deny_by_default()
            .with_viewer("alice".into(), AllowedScope::only([a.clone()]));

        let alice = access
            .resolve_access(&"alice".into())
            .await
            .expect("resolve");
        assert!(alice.allows(&a));
        assert!(!alice.allows(&b));

        let stranger = access
            .resolve_access(&"bob".into())
            .await
            .expect("resolve");
        assert!(!stranger.allows(&a));
    }
}
