//! Shared foundation for the Alyn orchestrator: configuration, common
//! types, the outbound-transport seam, and the per-request channel context.

pub mod config;
pub mod context;
pub mod error;
pub mod outbound;
pub mod types;

pub use config::AlynConfig;
pub use error::{AlynError, Result};
