pub mod api;
pub mod common;
pub mod overlay;
pub mod placement;
pub mod spec;

pub use self::api::*;
pub use self::common::*;
pub use self::overlay::*;
pub use self::placement::*;
pub use self::spec::*;
