use crate::{BatchConfig, Error, LookupConfig, PoolConfig, Result};

/// Configuration for a [`ShortLinkService`](crate::ShortLinkService).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub batch: BatchConfig,
    pub lookup: LookupConfig,
    pub write_pool: PoolConfig,
    pub read_pool: PoolConfig,
    /// Longest accepted target, in bytes, after trimming.
    pub max_target_len: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            lookup: LookupConfig::default(),
            write_pool: PoolConfig::default(),
            read_pool: PoolConfig::default(),
            max_target_len: 2048,
        }
    }
}

impl ServiceConfig {
    /// Checks every section, reporting the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        self.lookup.validate()?;
        self.write_pool.validate("write")?;
        self.read_pool.validate("read")?;
        if self.max_target_len == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_target_len must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
