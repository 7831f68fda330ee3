//! Data source abstraction for viewport loading.
//!
//! Two implementations ship with the crate:
//! - [`LocalSource`](crate::LocalSource): the bundled dataset with simulated
//!   latency and failures
//! - [`RemoteSource`](crate::RemoteSource): the external API behind the
//!   same-origin proxy
//!
//! The controller only sees this trait, so tests can script sources freely.

use std::future::Future;
use std::pin::Pin;

use crate::error::LoadError;
use crate::protocol::{ViewportRequest, ViewportResponse};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for incinerator sources.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait IncineratorSource: Send + Sync {
    /// Short label for logs ("local", "remote").
    fn name(&self) -> &'static str;

    /// Load everything the viewport should show.
    fn fetch_viewport(
        &self,
        request: &ViewportRequest,
    ) -> BoxFuture<'_, Result<ViewportResponse, LoadError>>;

    /// Cheap reachability probe. Sources without a transport are always up.
    fn check_connection(&self) -> BoxFuture<'_, Result<(), LoadError>> {
        Box::pin(async { Ok(()) })
    }
}
