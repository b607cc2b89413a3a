//! Buffer pool configuration.

use keel_common::constants::{
    DEFAULT_NUM_INSTANCES, DEFAULT_PAGE_SIZE, DEFAULT_POOL_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};

/// Configuration for a buffer pool.
///
/// `pool_size` is the number of frames *per instance*; a parallel pool
/// with `num_instances` shards caches `pool_size * num_instances` pages.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of page frames in each buffer pool instance.
    pub pool_size: usize,
    /// Page size in bytes.
    pub page_size: usize,
    /// Number of buffer pool instances (shards) in a parallel pool.
    pub num_instances: usize,
}

impl BufferPoolConfig {
    /// Creates a new configuration with the specified frames per instance.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            page_size: DEFAULT_PAGE_SIZE,
            num_instances: DEFAULT_NUM_INSTANCES,
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the number of instances.
    pub fn with_num_instances(mut self, num_instances: usize) -> Self {
        self.num_instances = num_instances;
        self
    }

    /// Returns the total memory used by all frame buffers.
    pub fn memory_usage(&self) -> usize {
        self.pool_size * self.page_size * self.num_instances
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pool_size == 0 {
            return Err("pool_size must be > 0");
        }
        if !self.page_size.is_power_of_two() {
            return Err("page_size must be a power of 2");
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err("page_size below minimum");
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err("page_size above maximum");
        }
        if self.num_instances == 0 {
            return Err("num_instances must be > 0");
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = BufferPoolConfig::new(100);
        assert_eq!(config.pool_size, 100);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.num_instances, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BufferPoolConfig::new(10)
            .with_page_size(1024)
            .with_num_instances(4);

        assert_eq!(config.page_size, 1024);
        assert_eq!(config.num_instances, 4);
        assert_eq!(config.memory_usage(), 10 * 1024 * 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(BufferPoolConfig::new(0).validate().is_err());
        assert!(BufferPoolConfig::new(10)
            .with_page_size(1000)
            .validate()
            .is_err());
        assert!(BufferPoolConfig::new(10)
            .with_num_instances(0)
            .validate()
            .is_err());
    }
}
