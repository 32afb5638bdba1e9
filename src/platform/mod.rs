#[cfg(feature = "synthetic")]
pub mod synthetic;
