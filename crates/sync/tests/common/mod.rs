pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{SHARED_VOLUME, Testnet, garbage_bytes, router_info};
#[allow(unused_imports)]
pub use mocks::CancellingRuntime;
