//! Per-invocation deploy flags

use sd_core::{ConfigError, DeployError};

/// Flags for one `deploy` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Run the sentinel gate against what is live; mutate nothing
    pub dry_run: bool,
    /// Gate the sentinel and stop before production
    pub test_only: bool,
    /// Emergency bypass: promote to production without the sentinel gate
    pub skip_sentinel: bool,
    /// Fail instead of prompting
    pub non_interactive: bool,
    /// Regression categories overriding the configured ones
    pub categories: Option<Vec<String>>,
    /// Run regression categories concurrently
    pub parallel: bool,
}

impl DeployOptions {
    /// Reject flag combinations that have no meaning
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.skip_sentinel && (self.dry_run || self.test_only) {
            return Err(invalid("--skip-node2 cannot be combined with --dry-run or --test-only"));
        }
        if self.dry_run && self.test_only {
            return Err(invalid("--dry-run and --test-only are mutually exclusive"));
        }
        if matches!(&self.categories, Some(c) if c.is_empty()) {
            return Err(invalid("--tests needs at least one category"));
        }
        Ok(())
    }

    /// Whether this run stops after the sentinel gate
    pub fn stops_at_gate(&self) -> bool {
        self.dry_run || self.test_only
    }
}

fn invalid(message: &str) -> DeployError {
    DeployError::Config(ConfigError::Invalid(message.to_string()))
}
