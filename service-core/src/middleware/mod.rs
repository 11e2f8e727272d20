pub mod shared_secret;
pub mod tracing;
