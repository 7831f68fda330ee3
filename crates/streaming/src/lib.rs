//! Viewport-driven incinerator loading.
//!
//! The [`ViewportController`] decides which [`IncineratorSource`] serves a
//! viewport, consults the [`ViewportCache`] on the local path, warms the cache
//! for the surrounding area and degrades from the remote API to local data
//! when the remote side fails for good.

pub mod cache;
pub mod controller;
pub mod error;
pub mod local;
pub mod protocol;
pub mod remote;
pub mod source;

pub use cache::*;
pub use controller::*;
pub use error::*;
pub use local::*;
pub use protocol::*;
pub use remote::*;
pub use source::*;
