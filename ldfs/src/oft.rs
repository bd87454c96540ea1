//! Open file table and the one-block buffer each open file carries.
//!
//! A slot's buffer is either [`Buffer::Empty`] or holds one file-relative block,
//! clean or dirty. All movement between those states goes through `load`,
//! `flush` and `start_fresh`, so the block written back on flush is always the
//! block that was cached, whatever the cursor says. At the end-of-file cursor
//! on a block boundary the cursor already names the next block while the
//! buffer still holds the previous one.

use crate::alloc::BlockAllocator;
use crate::fs::FsError;
use crate::io::{BlockNumber, BlockStorage};
use crate::node::FileDescriptor;

use log::debug;

/// Slot 0 belongs to the directory for the lifetime of the file system.
pub const DIRECTORY_SLOT: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffer {
    /// Nothing loaded yet.
    Empty,
    /// File-relative block `block` is in the buffer; `dirty` if it differs from disk.
    Cached { block: usize, dirty: bool },
}

#[derive(Debug)]
pub struct OpenFile {
    descriptor: usize,
    position: usize,
    data: Box<[u8]>,
    buffer: Buffer,
}

/// Device block backing a file block the buffer refers to. The buffer only ever
/// caches allocated blocks, so a miss is a broken invariant.
fn backing_block(fd: &FileDescriptor, block: usize) -> BlockNumber {
    fd.block(block)
        .unwrap_or_else(|| panic!("file block {} has no device block", block))
}

impl OpenFile {
    fn new(descriptor: usize, block_len: usize) -> Self {
        Self {
            descriptor,
            position: 0,
            data: vec![0; block_len].into_boxed_slice(),
            buffer: Buffer::Empty,
        }
    }

    pub fn descriptor(&self) -> usize {
        self.descriptor
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn buffer(&self) -> Buffer {
        self.buffer
    }

    pub fn cached_block(&self) -> Option<usize> {
        match self.buffer {
            Buffer::Empty => None,
            Buffer::Cached { block, .. } => Some(block),
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.buffer, Buffer::Cached { dirty: true, .. })
    }

    fn block_len(&self) -> usize {
        self.data.len()
    }

    /// Writes a dirty buffer back to the block it was loaded from.
    pub fn flush<D: BlockStorage>(&mut self, dev: &mut D, fd: &FileDescriptor) -> Result<(), FsError> {
        if let Buffer::Cached { block, dirty: true } = self.buffer {
            let blocknr = backing_block(fd, block);
            dev.write_block(blocknr, &self.data)?;
            self.buffer = Buffer::Cached { block, dirty: false };
            debug!("flushed file block {} to block {}", block, blocknr);
        }
        Ok(())
    }

    /// Replaces the buffer contents with file block `block`, flushing first.
    pub fn load<D: BlockStorage>(
        &mut self,
        dev: &mut D,
        fd: &FileDescriptor,
        block: usize,
    ) -> Result<(), FsError> {
        self.flush(dev, fd)?;
        let blocknr = backing_block(fd, block);
        dev.read_block(blocknr, &mut self.data)?;
        self.buffer = Buffer::Cached { block, dirty: false };
        debug!("loaded file block {} from block {}", block, blocknr);
        Ok(())
    }

    fn ensure_cached<D: BlockStorage>(
        &mut self,
        dev: &mut D,
        fd: &FileDescriptor,
        block: usize,
    ) -> Result<(), FsError> {
        if self.cached_block() == Some(block) {
            return Ok(());
        }
        self.load(dev, fd, block)
    }

    /// Attaches a newly allocated device block as file block `block` and makes it
    /// the cached block, zero filled and dirty. The file grows to cover the whole
    /// block.
    fn start_fresh<D: BlockStorage>(
        &mut self,
        dev: &mut D,
        fd: &mut FileDescriptor,
        block: usize,
        blocknr: BlockNumber,
    ) -> Result<(), FsError> {
        self.flush(dev, fd)?;
        fd.blocks[block] = Some(blocknr);
        fd.length = fd.length.max((block + 1) * self.block_len());
        self.data.iter_mut().for_each(|b| *b = 0);
        self.buffer = Buffer::Cached { block, dirty: true };
        debug!("file grew to {} bytes with block {}", fd.length, blocknr);
        Ok(())
    }

    /// Copies bytes from the cursor into `dest` until it is full or the file
    /// ends, returning how many were copied.
    pub fn read<D: BlockStorage>(
        &mut self,
        dev: &mut D,
        fd: &FileDescriptor,
        dest: &mut [u8],
    ) -> Result<usize, FsError> {
        if fd.length == 0 {
            return Err(FsError::EmptyFile);
        }
        if dest.is_empty() {
            return Ok(0);
        }
        if self.position >= fd.length {
            return Err(FsError::EndOfFile);
        }

        let block_len = self.block_len();
        let mut copied = 0;
        while copied < dest.len() && self.position < fd.length {
            let block = self.position / block_len;
            self.ensure_cached(dev, fd, block)?;

            let offset = self.position % block_len;
            let n = (block_len - offset)
                .min(dest.len() - copied)
                .min(fd.length - self.position);
            dest[copied..copied + n].copy_from_slice(&self.data[offset..offset + n]);
            copied += n;
            self.position += n;
        }
        Ok(copied)
    }

    /// Copies `src` into the file at the cursor, growing the file a block at a
    /// time. Stops early at `max_len`, or when the device runs out of blocks
    /// after at least one byte went in.
    pub fn write<D: BlockStorage>(
        &mut self,
        dev: &mut D,
        fd: &mut FileDescriptor,
        alloc: &mut BlockAllocator,
        src: &[u8],
        max_len: usize,
    ) -> Result<usize, FsError> {
        let block_len = self.block_len();
        let mut written = 0;
        while written < src.len() && self.position < max_len {
            let block = self.position / block_len;
            if fd.block(block).is_some() {
                self.ensure_cached(dev, fd, block)?;
            } else {
                match alloc.allocate() {
                    Ok(blocknr) => self.start_fresh(dev, fd, block, blocknr)?,
                    Err(e) if written == 0 => return Err(e),
                    Err(_) => break,
                }
            }

            let offset = self.position % block_len;
            let n = (block_len - offset).min(src.len() - written);
            self.data[offset..offset + n].copy_from_slice(&src[written..written + n]);
            self.buffer = Buffer::Cached { block, dirty: true };
            written += n;
            self.position += n;
        }
        fd.length = fd.length.max(self.position);
        Ok(written)
    }

    /// Moves the cursor to `pos`, swapping in its block if that block exists and
    /// is not the cached one.
    pub fn seek<D: BlockStorage>(
        &mut self,
        dev: &mut D,
        fd: &FileDescriptor,
        pos: usize,
    ) -> Result<(), FsError> {
        if pos > fd.length {
            return Err(FsError::PositionOutOfRange(pos as i64));
        }
        let block = pos / self.block_len();
        if fd.block(block).is_some() {
            self.ensure_cached(dev, fd, block)?;
        }
        self.position = pos;
        Ok(())
    }
}

#[derive(Debug)]
enum Slot {
    Free,
    /// Held for the directory. It has no buffer: the directory is written
    /// straight from memory on sync.
    Directory,
    File(OpenFile),
}

impl Slot {
    fn file(&self) -> Option<&OpenFile> {
        match self {
            Slot::File(f) => Some(f),
            _ => None,
        }
    }

    fn file_mut(&mut self) -> Option<&mut OpenFile> {
        match self {
            Slot::File(f) => Some(f),
            _ => None,
        }
    }
}

/// Fixed number of open file slots.
#[derive(Debug)]
pub struct OpenFileTable {
    slots: Vec<Slot>,
    block_len: usize,
}

impl OpenFileTable {
    pub fn new(capacity: usize, block_len: usize) -> Self {
        let mut slots: Vec<Slot> = (0..capacity).map(|_| Slot::Free).collect();
        slots[DIRECTORY_SLOT] = Slot::Directory;
        Self { slots, block_len }
    }

    /// The slot already holding `descriptor`, if the file is open.
    pub fn slot_of(&self, descriptor: usize) -> Option<usize> {
        self.open_slots()
            .find(|(_, f)| f.descriptor == descriptor)
            .map(|(slot, _)| slot)
    }

    /// Binds `descriptor` to the lowest free slot.
    pub fn insert(&mut self, descriptor: usize) -> Result<usize, FsError> {
        let slot = self
            .slots
            .iter()
            .position(|s| matches!(s, Slot::Free))
            .ok_or(FsError::OpenFileTableFull)?;
        self.slots[slot] = Slot::File(OpenFile::new(descriptor, self.block_len));
        Ok(slot)
    }

    /// A file slot in use. The directory slot is not reachable through here.
    pub fn get(&self, slot: usize) -> Result<&OpenFile, FsError> {
        self.slots
            .get(slot)
            .and_then(Slot::file)
            .ok_or(FsError::BadSlot(slot))
    }

    pub fn get_mut(&mut self, slot: usize) -> Result<&mut OpenFile, FsError> {
        self.slots
            .get_mut(slot)
            .and_then(Slot::file_mut)
            .ok_or(FsError::BadSlot(slot))
    }

    pub fn remove(&mut self, slot: usize) -> Option<OpenFile> {
        assert_ne!(slot, DIRECTORY_SLOT, "the directory slot is permanent");
        match std::mem::replace(self.slots.get_mut(slot)?, Slot::Free) {
            Slot::File(f) => Some(f),
            other => {
                self.slots[slot] = other;
                None
            }
        }
    }

    /// File slots in use, directory excluded.
    pub fn open_slots(&self) -> impl Iterator<Item = (usize, &OpenFile)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.file().map(|f| (i, f)))
    }

    pub fn slots_in_use(&self) -> Vec<usize> {
        self.open_slots().map(|(slot, _)| slot).collect()
    }
}
