use crate::error::{Error, Result};

/// Fixed sizing for a [`crate::BlockManager`]: how many physical blocks exist and how
/// many tokens each one holds. Both are chosen once at construction and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockManagerConfig {
    pub num_blocks: u32,
    pub block_size: u32,
}

impl BlockManagerConfig {
    pub fn new(num_blocks: u32, block_size: u32) -> Result<Self> {
        if num_blocks == 0 {
            return Err(Error::invariant("num_blocks must be greater than zero"));
        }
        if block_size == 0 {
            return Err(Error::invariant("block_size must be greater than zero"));
        }
        Ok(Self {
            num_blocks,
            block_size,
        })
    }

    pub(crate) fn blocks_for(&self, num_tokens: usize) -> usize {
        num_tokens.div_ceil(self.block_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_num_blocks() {
        assert_eq!(
            BlockManagerConfig::new(0, 4),
            Err(Error::invariant("num_blocks must be greater than zero"))
        );
    }

    #[test]
    fn rejects_zero_block_size() {
        assert_eq!(
            BlockManagerConfig::new(16, 0),
            Err(Error::invariant("block_size must be greater than zero"))
        );
    }

    #[test]
    fn accepts_valid_config() {
        let cfg = BlockManagerConfig::new(16, 4).unwrap();
        assert_eq!(cfg.blocks_for(0), 0);
        assert_eq!(cfg.blocks_for(1), 1);
        assert_eq!(cfg.blocks_for(4), 1);
        assert_eq!(cfg.blocks_for(5), 2);
    }
}
