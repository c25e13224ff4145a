// Library exports for the cdplay binary and integration tests

pub mod cd;
pub mod config;
pub mod playback;

pub use config::Config;

// Test support (only available with test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
