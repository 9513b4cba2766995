/*
[INPUT]:  Public API exports for dexplus-feed crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod runner;

// Re-export main types for convenience
pub use config::{ChannelConfig, ExchangeKind, FeedConfig, StreamConfig};
pub use runner::{FeedRunner, FeedStats};
