//! Configuration validation

use super::Config;
use crate::protocol::pptp::STRING_SIZE;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_server(config, &mut result);
    validate_timeouts(config, &mut result);
    validate_lcp(config, &mut result);

    result
}

fn validate_server(config: &Config, result: &mut ValidationResult) {
    // Announced strings live in fixed 64-byte wire fields.
    if config.server.hostname.len() > STRING_SIZE {
        result.error(format!(
            "server.hostname: longer than {} bytes, will not fit the wire field",
            STRING_SIZE
        ));
    }
    if config.server.vendor.len() > STRING_SIZE {
        result.error(format!(
            "server.vendor: longer than {} bytes, will not fit the wire field",
            STRING_SIZE
        ));
    }
    if config.server.listen.port() != 1723 {
        result.warn(format!(
            "server.listen: port {} is not the well-known PPTP port 1723",
            config.server.listen.port()
        ));
    }
}

fn validate_timeouts(config: &Config, result: &mut ValidationResult) {
    if config.timeouts.idle_secs == 0 {
        result.error("timeouts.idle_secs: must be at least 1");
    }
    if config.timeouts.finish_holddown_ms == 0 {
        result.warn("timeouts.finish_holddown_ms: 0 closes before the stop reply can drain");
    }
}

fn validate_lcp(config: &Config, result: &mut ValidationResult) {
    if config.lcp.max_configure == 0 {
        result.error("lcp.max_configure: must be at least 1");
    }
    if config.lcp.max_terminate == 0 {
        result.error("lcp.max_terminate: must be at least 1");
    }
    if config.lcp.restart_period_ms < 100 {
        result.warn(format!(
            "lcp.restart_period_ms: {} ms will retransmit aggressively",
            config.lcp.restart_period_ms
        ));
    }
}
