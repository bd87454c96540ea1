mod block;
mod ldisk;

pub use block::{BlockNumber, BlockStorage};
pub use ldisk::{DiskImage, Geometry, LDisk, LDiskBuilder, Location};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("block {blocknr} out of range, device has {count} blocks")]
    OutOfRange { blocknr: BlockNumber, count: usize },
    #[error("buffer of {actual} bytes, blocks are {expected} bytes")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("invalid disk image: {0}")]
    BadImage(String),
    #[error("disk image io")]
    Io(#[from] std::io::Error),
}
