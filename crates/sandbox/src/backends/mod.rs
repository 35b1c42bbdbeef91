//! Sandbox runtime backends.

pub mod docker;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
