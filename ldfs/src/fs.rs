use std::collections::HashSet;
use std::convert::TryFrom;
use std::fmt;
use std::path::Path;

use crate::alloc::{Bitmap, BlockAllocator};
use crate::config::{FsConfig, Layout};
use crate::dir::{Directory, FileName};
use crate::io::{BlockError, BlockNumber, BlockStorage, DiskImage};
use crate::node::{DescriptorTable, FileDescriptor, DIRECTORY_DESCRIPTOR};
use crate::oft::{OpenFile, OpenFileTable, DIRECTORY_SLOT};

use log::{debug, info, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("file names are exactly 4 characters, got {0:?}")]
    InvalidName(String),
    #[error("byte count {0} is negative")]
    NegativeCount(i64),
    #[error("position {0} is outside the file")]
    PositionOutOfRange(i64),
    #[error("directory is full")]
    DirectoryFull,
    #[error("descriptor table is full")]
    DescriptorTableFull,
    #[error("open file table is full")]
    OpenFileTableFull,
    #[error("no free blocks left on the device")]
    NoSpace,
    #[error("found no file named {0:?}")]
    NotFound(String),
    #[error("slot {0} does not hold an open file")]
    BadSlot(usize),
    #[error("file {0} already exists")]
    Exists(String),
    #[error("the directory is permanently open")]
    DirectorySlot,
    #[error("file is empty")]
    EmptyFile,
    #[error("cursor is at end of file")]
    EndOfFile,
    #[error("block device failure")]
    Device(#[from] BlockError),
    #[error("corrupt disk image: {0}")]
    CorruptImage(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad argument: name length, negative count, position, configuration.
    Validation,
    /// A fixed-size table or the device is full.
    Capacity,
    /// Unknown file or slot.
    NotFound,
    /// The request conflicts with the current state.
    State,
    /// The medium or its image failed.
    Device,
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::InvalidName(_)
            | FsError::NegativeCount(_)
            | FsError::PositionOutOfRange(_)
            | FsError::InvalidConfig(_) => ErrorKind::Validation,
            FsError::DirectoryFull
            | FsError::DescriptorTableFull
            | FsError::OpenFileTableFull
            | FsError::NoSpace => ErrorKind::Capacity,
            FsError::NotFound(_) | FsError::BadSlot(_) => ErrorKind::NotFound,
            FsError::Exists(_)
            | FsError::DirectorySlot
            | FsError::EmptyFile
            | FsError::EndOfFile => ErrorKind::State,
            FsError::Device(_) | FsError::CorruptImage(_) => ErrorKind::Device,
        }
    }
}

/// One line of a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirListing {
    pub name: FileName,
    pub len: usize,
}

impl fmt::Display for DirListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.len)
    }
}

fn byte_count(count: i64) -> Result<usize, FsError> {
    usize::try_from(count).map_err(|_| FsError::NegativeCount(count))
}

/// Every open file and directory entry refers to a live descriptor.
fn live<'a>(descriptors: &'a DescriptorTable, index: usize) -> &'a FileDescriptor {
    descriptors
        .get(index)
        .unwrap_or_else(|| panic!("descriptor {} is referenced but empty", index))
}

fn live_mut<'a>(descriptors: &'a mut DescriptorTable, index: usize) -> &'a mut FileDescriptor {
    descriptors
        .get_mut(index)
        .unwrap_or_else(|| panic!("descriptor {} is referenced but empty", index))
}

/// A single flat directory of small files over owned block storage.
///
/// # Layout
/// ==================================================================
/// | Bitmap | Descriptors | Directory (3 blocks) | Data Region       |
/// ==================================================================
///
/// The bitmap, descriptors and directory live in memory while mounted and are
/// only written to their reserved blocks by [`FileSystem::sync`] and
/// [`FileSystem::save`].
pub struct FileSystem<D: BlockStorage> {
    dev: D,
    config: FsConfig,
    layout: Layout,
    alloc: BlockAllocator,
    descriptors: DescriptorTable,
    directory: Directory,
    oft: OpenFileTable,
}

impl<D: BlockStorage> FileSystem<D> {
    /// Mounts an empty file system onto `dev`. Nothing is written until the
    /// first sync.
    pub fn format(dev: D, config: FsConfig) -> Result<Self, FsError> {
        let layout = config.layout()?;
        if dev.block_len() != layout.block_len || dev.block_count() != layout.block_count {
            return Err(FsError::InvalidConfig(format!(
                "device has {} blocks of {} bytes, configuration expects {} of {}",
                dev.block_count(),
                dev.block_len(),
                layout.block_count,
                layout.block_len
            )));
        }

        info!(
            "formatted {} blocks of {} bytes, data starts at block {}",
            layout.block_count, layout.block_len, layout.data_start
        );
        Ok(Self {
            alloc: BlockAllocator::new(layout.block_count, layout.data_start),
            descriptors: DescriptorTable::new(config.descriptors, &layout),
            directory: Directory::new(config.max_entries()),
            oft: OpenFileTable::new(config.open_files, layout.block_len),
            dev,
            config,
            layout,
        })
    }

    /// Mounts the file system previously synced onto `dev`, rebuilding every
    /// in-memory structure from the reserved blocks alone.
    pub fn mount(dev: D, config: FsConfig) -> Result<Self, FsError> {
        let layout = config.layout()?;
        if dev.block_len() != layout.block_len || dev.block_count() != layout.block_count {
            return Err(FsError::CorruptImage(format!(
                "image has {} blocks of {} bytes, configuration expects {} of {}",
                dev.block_count(),
                dev.block_len(),
                layout.block_count,
                layout.block_len
            )));
        }
        let read = |blocknr: BlockNumber| -> Result<Vec<u8>, FsError> {
            let mut buf = vec![0; layout.block_len];
            dev.read_block(blocknr, &mut buf)?;
            Ok(buf)
        };

        let bitmap = Bitmap::parse(&read(Layout::BITMAP_BLOCK)?, layout.block_count);
        let alloc = BlockAllocator::from_bitmap(bitmap, layout.data_start)
            .ok_or_else(|| FsError::CorruptImage("metadata blocks marked free".into()))?;

        let blocks = layout
            .descriptor_blocks
            .clone()
            .map(read)
            .collect::<Result<Vec<_>, _>>()?;
        let descriptors = DescriptorTable::parse(&blocks, config.descriptors, &layout)
            .map_err(FsError::CorruptImage)?;

        let blocks = layout
            .directory_blocks
            .clone()
            .map(read)
            .collect::<Result<Vec<_>, _>>()?;
        let directory =
            Directory::parse(&blocks, config.max_entries()).map_err(FsError::CorruptImage)?;

        check_consistency(&alloc, &descriptors, &directory, &layout)
            .map_err(FsError::CorruptImage)?;

        info!(
            "mounted {} files, {} free blocks",
            directory.len(),
            alloc.free_count()
        );
        Ok(Self {
            oft: OpenFileTable::new(config.open_files, layout.block_len),
            dev,
            config,
            layout,
            alloc,
            descriptors,
            directory,
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn disk(&self) -> &D {
        &self.dev
    }

    /// Unmounts without syncing and hands back the device.
    pub fn into_disk(self) -> D {
        self.dev
    }

    fn descriptor_index(&self, name: &str) -> Result<usize, FsError> {
        FileName::new(name)
            .ok()
            .and_then(|name| self.directory.lookup(&name))
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    /// Creates a new, empty file.
    pub fn create(&mut self, name: &str) -> Result<(), FsError> {
        let file_name = FileName::new(name)?;
        if self.directory.is_full() {
            return Err(FsError::DirectoryFull);
        }
        if self.directory.contains(&file_name) {
            return Err(FsError::Exists(name.to_string()));
        }
        let index = self.descriptors.create()?;
        if let Err(e) = self.directory.add_entry(file_name, index) {
            self.descriptors.clear(index);
            return Err(e);
        }
        info!("created {} with descriptor {}", file_name, index);
        Ok(())
    }

    /// Removes a file, closing it first if it is open, and returns its blocks to
    /// the free pool zero filled.
    pub fn destroy(&mut self, name: &str) -> Result<(), FsError> {
        let index = self.descriptor_index(name)?;
        if let Some(slot) = self.oft.slot_of(index) {
            self.close(slot)?;
        }

        let zeros = vec![0; self.layout.block_len];
        for blocknr in live(&self.descriptors, index).allocated() {
            self.dev.write_block(blocknr, &zeros)?;
            self.alloc.free(blocknr);
        }
        if let Ok(file_name) = FileName::new(name) {
            self.directory.remove(&file_name);
        }
        self.descriptors.clear(index);
        info!("destroyed {}", name);
        Ok(())
    }

    /// Opens a file for reading and writing and returns its slot. Opening a file
    /// that is already open returns the slot it already has.
    pub fn open(&mut self, name: &str) -> Result<usize, FsError> {
        let index = self.descriptor_index(name)?;
        if let Some(slot) = self.oft.slot_of(index) {
            debug!("{} already open in slot {}", name, slot);
            return Ok(slot);
        }

        let slot = self.oft.insert(index)?;
        let fd = live(&self.descriptors, index);
        if fd.length > 0 && fd.block(0).is_some() {
            let loaded = match self.oft.get_mut(slot) {
                Ok(file) => file.load(&mut self.dev, fd, 0),
                Err(e) => Err(e),
            };
            if let Err(e) = loaded {
                self.oft.remove(slot);
                return Err(e);
            }
        }
        debug!("opened {} in slot {}", name, slot);
        Ok(slot)
    }

    /// Writes back the slot's buffer if modified and releases the slot.
    pub fn close(&mut self, slot: usize) -> Result<(), FsError> {
        if slot == DIRECTORY_SLOT {
            return Err(FsError::DirectorySlot);
        }
        let file = self.oft.get_mut(slot)?;
        let fd = live(&self.descriptors, file.descriptor());
        file.flush(&mut self.dev, fd)?;
        self.oft.remove(slot);
        debug!("closed slot {}", slot);
        Ok(())
    }

    /// Reads up to `count` bytes from the cursor into `dest`. Returns the number
    /// of bytes read, which is short when the file ends first.
    pub fn read(&mut self, slot: usize, dest: &mut [u8], count: i64) -> Result<usize, FsError> {
        let file = self.oft.get_mut(slot)?;
        let count = byte_count(count)?.min(dest.len());
        let fd = live(&self.descriptors, file.descriptor());
        file.read(&mut self.dev, fd, &mut dest[..count])
    }

    /// Writes up to `count` bytes of `src` at the cursor. Returns the number of
    /// bytes written, which is short when the file reaches its maximum size.
    pub fn write(&mut self, slot: usize, src: &[u8], count: i64) -> Result<usize, FsError> {
        let file = self.oft.get_mut(slot)?;
        let count = byte_count(count)?.min(src.len());
        let max_len = self.config.max_file_len();
        let fd = live_mut(&mut self.descriptors, file.descriptor());
        file.write(&mut self.dev, fd, &mut self.alloc, &src[..count], max_len)
    }

    /// Moves the cursor; any position from 0 to the file length inclusive is valid.
    pub fn lseek(&mut self, slot: usize, pos: i64) -> Result<(), FsError> {
        let file = self.oft.get_mut(slot)?;
        let pos = usize::try_from(pos).map_err(|_| FsError::PositionOutOfRange(pos))?;
        let fd = live(&self.descriptors, file.descriptor());
        file.seek(&mut self.dev, fd, pos)
    }

    /// Name and length of every file, derived on each call from the in-memory
    /// directory.
    pub fn list_directory(&self) -> impl Iterator<Item = DirListing> + '_ {
        let descriptors = &self.descriptors;
        self.directory.iter().map(move |entry| DirListing {
            name: entry.name,
            len: live(descriptors, entry.descriptor).length,
        })
    }

    pub fn position(&self, slot: usize) -> Result<usize, FsError> {
        self.oft.get(slot).map(OpenFile::position)
    }

    pub fn file_len(&self, name: &str) -> Result<usize, FsError> {
        let index = self.descriptor_index(name)?;
        Ok(live(&self.descriptors, index).length)
    }

    pub fn free_blocks(&self) -> usize {
        self.alloc.free_count()
    }

    pub fn is_allocated(&self, blocknr: BlockNumber) -> bool {
        self.alloc.is_allocated(blocknr)
    }

    /// Slots currently holding open files, directory excluded.
    pub fn open_slots(&self) -> Vec<usize> {
        self.oft.slots_in_use()
    }

    /// Flushes every open file, leaving them open, then writes the bitmap,
    /// descriptor table and directory to their reserved blocks.
    pub fn sync(&mut self) -> Result<(), FsError> {
        for slot in self.oft.slots_in_use() {
            let file = self.oft.get_mut(slot)?;
            let fd = live(&self.descriptors, file.descriptor());
            file.flush(&mut self.dev, fd)?;
        }

        live_mut(&mut self.descriptors, DIRECTORY_DESCRIPTOR).length = self.directory.byte_len();

        let bitmap = self.alloc.bitmap().serialize(self.layout.block_len);
        self.dev.write_block(Layout::BITMAP_BLOCK, &bitmap)?;

        let blocks = self.descriptors.serialize(&self.layout);
        for (blocknr, block) in self.layout.descriptor_blocks.clone().zip(blocks.iter()) {
            self.dev.write_block(blocknr, block)?;
        }

        let blocks = self.directory.serialize(&self.layout);
        for (blocknr, block) in self.layout.directory_blocks.clone().zip(blocks.iter()) {
            self.dev.write_block(blocknr, block)?;
        }
        debug!("synced metadata for {} files", self.directory.len());
        Ok(())
    }
}

impl<D: DiskImage> FileSystem<D> {
    /// Syncs and writes the whole device to the container at `path`.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<(), FsError> {
        self.sync()?;
        self.dev.save_image(path.as_ref())?;
        info!("saved file system to {}", path.as_ref().display());
        Ok(())
    }

    /// Mounts the file system stored in the container at `path`.
    pub fn open_image<P: AsRef<Path>>(path: P, config: FsConfig) -> Result<Self, FsError> {
        let dev = D::load_image(path.as_ref()).map_err(|e| match e {
            BlockError::BadImage(msg) => FsError::CorruptImage(msg),
            other => FsError::Device(other),
        })?;
        Self::mount(dev, config)
    }

    /// Replaces this file system with the one stored at `path`. On failure the
    /// current file system is left exactly as it was.
    pub fn restore<P: AsRef<Path>>(&mut self, path: P) -> Result<(), FsError> {
        match Self::open_image(path.as_ref(), self.config) {
            Ok(restored) => {
                *self = restored;
                info!("restored file system from {}", path.as_ref().display());
                Ok(())
            }
            Err(e) => {
                warn!("restore from {} rejected: {}", path.as_ref().display(), e);
                Err(e)
            }
        }
    }
}

/// Cross-checks structures read back from disk: directory entries name distinct
/// live file descriptors, every file descriptor is named, and the data bits of
/// the bitmap are exactly the blocks the files own.
fn check_consistency(
    alloc: &BlockAllocator,
    descriptors: &DescriptorTable,
    directory: &Directory,
    layout: &Layout,
) -> Result<(), String> {
    let mut named = HashSet::new();
    for entry in directory.iter() {
        if entry.descriptor == DIRECTORY_DESCRIPTOR || descriptors.get(entry.descriptor).is_none() {
            return Err(format!("{} names descriptor {}", entry.name, entry.descriptor));
        }
        if !named.insert(entry.descriptor) {
            return Err(format!("descriptor {} is named twice", entry.descriptor));
        }
    }

    let mut owned = HashSet::new();
    for (index, fd) in descriptors.iter().filter(|(i, _)| *i != DIRECTORY_DESCRIPTOR) {
        if !named.contains(&index) {
            return Err(format!("descriptor {} has no directory entry", index));
        }
        for blocknr in fd.allocated() {
            if !owned.insert(blocknr) {
                return Err(format!("block {} is owned twice", blocknr));
            }
        }
    }

    for blocknr in layout.data_start..layout.block_count {
        if alloc.is_allocated(blocknr) != owned.contains(&blocknr) {
            return Err(format!("bitmap disagrees with descriptors at block {}", blocknr));
        }
    }
    Ok(())
}
