//! Server configuration.

/// Configuration for the reference remote.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Upper bound on changes returned by one change-feed page.
    pub max_page_size: usize,
    /// Upper bound on records touched by one modify call.
    pub max_batch_size: usize,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_page_size: 200,
            max_batch_size: 400,
        }
    }

    /// Sets the maximum change-feed page size.
    pub fn with_max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size.max(1);
        self
    }

    /// Sets the maximum modify batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_page_size, 200);
        assert_eq!(config.max_batch_size, 400);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_page_size(0)
            .with_max_batch_size(10);

        assert_eq!(config.max_page_size, 1);
        assert_eq!(config.max_batch_size, 10);
    }
}
