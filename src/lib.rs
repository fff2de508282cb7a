//! pptpd - PPTP server control plane
//!
//! Implements the RFC 2637 control connection and RFC 1661 link negotiation
//! in userspace; GRE data movement stays in the kernel PPTP driver.

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod telemetry;

pub use error::{Error, Result};
