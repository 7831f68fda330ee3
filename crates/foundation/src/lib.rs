pub mod bounds;
pub mod time;

// Foundation crate: small, well-tested geographic and time primitives only.
pub use bounds::*;
pub use time::*;
