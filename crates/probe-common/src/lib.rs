#![doc = "Common types shared across the llatency workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod net;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use net::*;
