//! Card-level types: the SGP.22 version and the eUICC identity wrapper

mod identity;
mod version;

pub use identity::{EuiccCard, ReadyCallback};
pub use version::SpecVersion;
