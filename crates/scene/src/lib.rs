//! Map interaction layer: marker click disambiguation, the popup registry
//! shared by all map instances, and fly-to planning for the detail view.

pub mod click;
pub mod interaction;
pub mod registry;

pub use click::*;
pub use interaction::*;
pub use registry::*;
