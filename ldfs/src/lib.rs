//! A single-volume file system over a small synthetic disk.
//!
//! The disk ([`io::LDisk`]) is an in-memory array of cylinders, tracks and
//! sectors addressed by logical block number. On top of it [`FileSystem`] keeps a
//! free-block bitmap, a fixed descriptor table, one flat directory of 4-character
//! names and a small open file table where every open file buffers one block.
//! Housekeeping structures are written to reserved blocks on [`FileSystem::sync`]
//! and the whole disk can be saved to and restored from an image file.

mod alloc;
mod config;
mod dir;
mod fs;
pub mod io;
mod node;
mod oft;
pub mod status;

pub use crate::alloc::{Bitmap, BlockAllocator, State};
pub use crate::config::{FsConfig, Layout};
pub use crate::dir::{FileName, NAME_LEN};
pub use crate::fs::{DirListing, ErrorKind, FileSystem, FsError};
pub use crate::node::{FileDescriptor, MAX_FILE_BLOCKS};
pub use crate::oft::{Buffer, DIRECTORY_SLOT};
pub use crate::status::{IntoStatus, STATUS_ERROR, STATUS_SUCCESS};
