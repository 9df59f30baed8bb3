use crate::core::{Block, Chain, Encodable};
use crate::error::Result;
use log::{info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One file per height, `Block<height>.dat`, holding the tagged block encoding.
#[derive(Debug, Clone)]
pub struct BlockStore {
    dir: PathBuf,
}

impl BlockStore {
    pub fn open(dir: &Path) -> Result<BlockStore> {
        fs::create_dir_all(dir)?;
        Ok(BlockStore {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, height: usize) -> PathBuf {
        self.dir.join(format!("Block{height}.dat"))
    }

    pub fn save(&self, height: usize, block: &Block) -> Result<()> {
        fs::write(self.path_for(height), block.encode_tagged())?;
        Ok(())
    }

    /// `None` when no file exists for `height`.
    pub fn load(&self, height: usize) -> Result<Option<Block>> {
        let bytes = match fs::read(self.path_for(height)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Block::decode_tagged(&bytes)?))
    }

    /// Append stored blocks to `chain` from height 1 until a file is missing,
    /// malformed or rejected. Returns how many blocks were replayed.
    pub fn replay(&self, chain: &mut Chain) -> Result<usize> {
        let mut replayed = 0;
        loop {
            let height = chain.len();
            let block = match self.load(height) {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopping replay at height {height}: {e}");
                    break;
                }
            };
            if let Err(e) = chain.append_block(block) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("Stopping replay at height {height}: {e}");
                break;
            }
            replayed += 1;
        }
        if replayed > 0 {
            info!("Replayed {replayed} stored blocks, tip at height {}", chain.height());
        }
        Ok(replayed)
    }
}
