pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{SHARED_VOLUME, fast_options, memory_runtime, wait_until};
