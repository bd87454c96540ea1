use std::convert::TryFrom;

use crate::config::Layout;
use crate::fs::FsError;
use crate::io::BlockNumber;

use zerocopy::byteorder::{BigEndian, I32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Most data blocks a single file may own.
pub const MAX_FILE_BLOCKS: usize = 3;
pub const DESCRIPTOR_RECORD_LEN: usize = std::mem::size_of::<DescriptorRecord>();
/// Descriptor slot 0 always describes the directory.
pub const DIRECTORY_DESCRIPTOR: usize = 0;

/// Marks an empty descriptor slot, or an unallocated block slot, on disk.
const UNUSED: i32 = -1;

/// Per-file metadata: the length in bytes and the blocks holding the contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDescriptor {
    pub length: usize,
    /// Device blocks backing file blocks 0, 1 and 2.
    pub blocks: [Option<BlockNumber>; MAX_FILE_BLOCKS],
}

impl FileDescriptor {
    /// The device block backing file-relative block `file_block`, if any.
    pub fn block(&self, file_block: usize) -> Option<BlockNumber> {
        self.blocks.get(file_block).copied().flatten()
    }

    pub fn allocated(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.blocks.iter().filter_map(|b| *b)
    }

    pub fn block_count(&self) -> usize {
        self.allocated().count()
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes)]
/// On-disk form of one descriptor slot. This structure __must stay 16 bytes.__
pub struct DescriptorRecord {
    /// File length in bytes, or -1 for an empty slot.
    length: I32<BigEndian>,
    /// Device block numbers, -1 where unallocated.
    blocks: [I32<BigEndian>; MAX_FILE_BLOCKS],
}

impl DescriptorRecord {
    fn empty() -> Self {
        Self {
            length: I32::new(UNUSED),
            blocks: [I32::new(UNUSED); MAX_FILE_BLOCKS],
        }
    }

    fn encode(slot: Option<&FileDescriptor>) -> Self {
        match slot {
            None => Self::empty(),
            Some(fd) => {
                let mut record = Self::empty();
                record.length = I32::new(fd.length as i32);
                for (dst, src) in record.blocks.iter_mut().zip(fd.blocks.iter()) {
                    if let Some(blocknr) = src {
                        *dst = I32::new(*blocknr as i32);
                    }
                }
                record
            }
        }
    }

    /// Rebuilds the descriptor stored in slot `index`, checking it against the
    /// layout it was saved under.
    fn decode(&self, index: usize, layout: &Layout) -> Result<Option<FileDescriptor>, String> {
        let length = self.length.get();
        if length == UNUSED {
            if self.blocks.iter().any(|b| b.get() != UNUSED) {
                return Err(format!("empty descriptor {} lists blocks", index));
            }
            return Ok(None);
        }

        let length = usize::try_from(length)
            .map_err(|_| format!("descriptor {} has length {}", index, length))?;
        let mut fd = FileDescriptor {
            length,
            ..FileDescriptor::default()
        };
        for (slot, raw) in fd.blocks.iter_mut().zip(self.blocks.iter()) {
            let raw = raw.get();
            if raw == UNUSED {
                continue;
            }
            let blocknr = usize::try_from(raw)
                .map_err(|_| format!("descriptor {} points at block {}", index, raw))?;
            *slot = Some(blocknr);
        }

        if index == DIRECTORY_DESCRIPTOR {
            let expected: Vec<_> = layout.directory_blocks.clone().map(Some).collect();
            if fd.blocks[..] != expected[..] {
                return Err("directory descriptor does not own the directory blocks".into());
            }
            return Ok(Some(fd));
        }

        if let Some(bad) = fd.allocated().find(|b| !layout.is_data_block(*b)) {
            return Err(format!("descriptor {} points outside the data region at {}", index, bad));
        }
        let count = fd.block_count();
        if fd.blocks[..count].iter().any(Option::is_none) {
            return Err(format!("descriptor {} has a hole in its block list", index));
        }
        if fd.length > count * layout.block_len {
            return Err(format!(
                "descriptor {} claims {} bytes in {} blocks",
                index, fd.length, count
            ));
        }
        Ok(Some(fd))
    }
}

/// Fixed array of descriptor slots. Slot 0 is the directory and is never freed.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    slots: Vec<Option<FileDescriptor>>,
}

impl DescriptorTable {
    pub fn new(capacity: usize, layout: &Layout) -> Self {
        let mut slots = vec![None; capacity];
        let mut directory = FileDescriptor::default();
        for (slot, blocknr) in directory.blocks.iter_mut().zip(layout.directory_blocks.clone()) {
            *slot = Some(blocknr);
        }
        slots[DIRECTORY_DESCRIPTOR] = Some(directory);
        Self { slots }
    }

    /// Claims the first unused slot for a new, empty file.
    pub fn create(&mut self) -> Result<usize, FsError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::DescriptorTableFull)?;
        self.slots[index] = Some(FileDescriptor::default());
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&FileDescriptor> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut FileDescriptor> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Empties slot `index`, returning what it held.
    pub fn clear(&mut self, index: usize) -> Option<FileDescriptor> {
        assert_ne!(index, DIRECTORY_DESCRIPTOR, "the directory descriptor is permanent");
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FileDescriptor)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|fd| (i, fd)))
    }

    /// Encodes every slot, empty ones included, into the descriptor blocks.
    pub fn serialize(&self, layout: &Layout) -> Vec<Vec<u8>> {
        let per_block = layout.descriptors_per_block();
        layout
            .descriptor_blocks
            .clone()
            .enumerate()
            .map(|(i, _)| {
                let mut block = vec![0; layout.block_len];
                for j in 0..per_block {
                    let record = match self.slots.get(i * per_block + j) {
                        Some(slot) => DescriptorRecord::encode(slot.as_ref()),
                        None => DescriptorRecord::empty(),
                    };
                    let start = j * DESCRIPTOR_RECORD_LEN;
                    block[start..start + DESCRIPTOR_RECORD_LEN].copy_from_slice(record.as_bytes());
                }
                block
            })
            .collect()
    }

    /// Reads `capacity` slots back from the descriptor blocks, in order.
    pub fn parse(blocks: &[Vec<u8>], capacity: usize, layout: &Layout) -> Result<Self, String> {
        let records = blocks
            .iter()
            .flat_map(|block| block.chunks_exact(DESCRIPTOR_RECORD_LEN))
            .take(capacity);

        let mut slots = Vec::with_capacity(capacity);
        for (index, raw) in records.enumerate() {
            let record = DescriptorRecord::read_from(raw)
                .ok_or_else(|| format!("descriptor record {} is malformed", index))?;
            slots.push(record.decode(index, layout)?);
        }
        if slots.len() != capacity {
            return Err(format!("found {} descriptor records, expected {}", slots.len(), capacity));
        }
        if slots[DIRECTORY_DESCRIPTOR].is_none() {
            return Err("directory descriptor is missing".into());
        }
        Ok(Self { slots })
    }
}
