//! Store configuration.

/// Configuration for opening or creating a [`crate::LocalStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Whether every commit is forced to disk before it returns.
    pub sync_on_commit: bool,

    /// Initial transaction policy. When true, edits are only accepted
    /// inside a transaction.
    pub require_transactions: bool,

    /// Distance, in extent units, a geometry may lie outside its table's
    /// extent and still be accepted.
    pub extent_tolerance: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            require_transactions: true,
            extent_tolerance: 0.0,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the dataset file on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the initial transaction policy.
    #[must_use]
    pub const fn require_transactions(mut self, value: bool) -> Self {
        self.require_transactions = value;
        self
    }

    /// Sets the extent tolerance.
    #[must_use]
    pub const fn extent_tolerance(mut self, value: f64) -> Self {
        self.extent_tolerance = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.sync_on_commit);
        assert!(config.require_transactions);
        assert_eq!(config.extent_tolerance, 0.0);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .sync_on_commit(false)
            .require_transactions(false)
            .extent_tolerance(0.5);

        assert!(!config.sync_on_commit);
        assert!(!config.require_transactions);
        assert_eq!(config.extent_tolerance, 0.5);
    }
}
