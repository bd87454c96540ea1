use std::ops::Range;

use crate::dir::DIR_RECORD_LEN;
use crate::fs::FsError;
use crate::io::{BlockNumber, Geometry};
use crate::node::{DESCRIPTOR_RECORD_LEN, MAX_FILE_BLOCKS};

/// Immutable settings for one file system instance.
///
/// Nothing here is global, so independent file systems of different shapes can
/// live side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    pub geometry: Geometry,
    /// Size of the descriptor table, including the directory's own descriptor.
    pub descriptors: usize,
    /// Size of the open file table, including the slot held by the directory.
    pub open_files: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            descriptors: 16,
            open_files: 4,
        }
    }
}

impl FsConfig {
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_descriptors(mut self, descriptors: usize) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn with_open_files(mut self, open_files: usize) -> Self {
        self.open_files = open_files;
        self
    }

    pub fn block_len(&self) -> usize {
        self.geometry.block_len
    }

    /// Largest size any file may reach.
    pub fn max_file_len(&self) -> usize {
        MAX_FILE_BLOCKS * self.block_len()
    }

    /// Most entries the directory can hold; one descriptor belongs to the directory.
    pub fn max_entries(&self) -> usize {
        self.descriptors - 1
    }

    /// Validates the settings and places the metadata region.
    pub fn layout(&self) -> Result<Layout, FsError> {
        let block_len = self.block_len();
        let block_count = self.geometry.block_count();

        if block_len == 0 || block_len % DESCRIPTOR_RECORD_LEN != 0 {
            return Err(FsError::InvalidConfig(format!(
                "block length {} is not a multiple of {}",
                block_len, DESCRIPTOR_RECORD_LEN
            )));
        }
        if block_count > block_len * 8 {
            return Err(FsError::InvalidConfig(format!(
                "{} blocks do not fit in a one block bitmap",
                block_count
            )));
        }
        if self.descriptors < 2 {
            return Err(FsError::InvalidConfig(
                "need a descriptor for the directory and at least one file".into(),
            ));
        }
        if self.open_files < 2 {
            return Err(FsError::InvalidConfig(
                "need an open file slot for the directory and at least one file".into(),
            ));
        }
        // Every entry plus the terminating byte.
        if self.max_entries() * DIR_RECORD_LEN + 1 > self.max_file_len() {
            return Err(FsError::InvalidConfig(format!(
                "{} directory entries do not fit in {} blocks",
                self.max_entries(),
                MAX_FILE_BLOCKS
            )));
        }

        let descriptor_bytes = self.descriptors * DESCRIPTOR_RECORD_LEN;
        let descriptor_blocks = (descriptor_bytes + block_len - 1) / block_len;
        let directory_start = 1 + descriptor_blocks;
        let data_start = directory_start + MAX_FILE_BLOCKS;
        if data_start >= block_count {
            return Err(FsError::InvalidConfig(format!(
                "metadata needs {} blocks, device only has {}",
                data_start, block_count
            )));
        }

        Ok(Layout {
            block_len,
            block_count,
            descriptor_blocks: 1..directory_start,
            directory_blocks: directory_start..data_start,
            data_start,
        })
    }
}

/// Where the housekeeping structures live on the device.
///
/// ```text
/// | Bitmap | Descriptors ... | Directory x3 | Data Region ... |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub block_len: usize,
    pub block_count: usize,
    pub descriptor_blocks: Range<BlockNumber>,
    pub directory_blocks: Range<BlockNumber>,
    /// First block that is not permanently reserved.
    pub data_start: BlockNumber,
}

impl Layout {
    pub const BITMAP_BLOCK: BlockNumber = 0;

    pub fn descriptors_per_block(&self) -> usize {
        self.block_len / DESCRIPTOR_RECORD_LEN
    }

    pub fn is_data_block(&self, blocknr: BlockNumber) -> bool {
        (self.data_start..self.block_count).contains(&blocknr)
    }
}
