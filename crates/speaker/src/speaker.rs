//! The speaker seam the reconciler drives.

use async_trait::async_trait;
use corebgp_core::{Route, RouteKey};

use crate::error::Result;

/// A BGP speaker that can originate and withdraw routes.
///
/// Both calls must be idempotent and safe to repeat after a timeout with
/// unknown outcome. Announcing a route replaces any path this node already
/// originates for the same prefix (BGP implicit withdraw); `replaces` names
/// the route being superseded so adapters that need an explicit cleanup can
/// do it after the new path is in place. Calls are independent: nothing is
/// batched or atomic across routes.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Originate `route`.
    async fn announce(&self, route: &Route, replaces: Option<&RouteKey>) -> Result<()>;

    /// Stop originating the route identified by `key`.
    async fn withdraw(&self, key: &RouteKey) -> Result<()>;

    /// Check the speaker is reachable.
    async fn health_check(&self) -> Result<()>;
}
