use std::convert::TryFrom;
use std::fmt;

use crate::config::Layout;
use crate::fs::FsError;

use zerocopy::byteorder::{BigEndian, I32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const NAME_LEN: usize = 4;
pub const DIR_RECORD_LEN: usize = std::mem::size_of::<DirRecord>();
/// Written where the next name would start to end the entry list.
const END_OF_ENTRIES: u8 = 0;

/// A file name: exactly four printable ASCII bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileName([u8; NAME_LEN]);

impl FileName {
    pub fn new(name: &str) -> Result<Self, FsError> {
        Self::from_bytes(name.as_bytes()).ok_or_else(|| FsError::InvalidName(name.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = <[u8; NAME_LEN]>::try_from(bytes).ok()?;
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            Some(Self(bytes))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        // Only ASCII is ever admitted.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub name: FileName,
    pub descriptor: usize,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes)]
struct DirRecord {
    name: [u8; NAME_LEN],
    descriptor: I32<BigEndian>,
}

/// The single flat directory, kept in memory and written out on save.
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<DirEntry>,
    capacity: usize,
}

impl Directory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn add_entry(&mut self, name: FileName, descriptor: usize) -> Result<(), FsError> {
        if self.is_full() {
            return Err(FsError::DirectoryFull);
        }
        self.entries.push(DirEntry { name, descriptor });
        Ok(())
    }

    /// Descriptor index registered under `name`.
    pub fn lookup(&self, name: &FileName) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.name == *name)
            .map(|e| e.descriptor)
    }

    pub fn contains(&self, name: &FileName) -> bool {
        self.lookup(name).is_some()
    }

    pub fn remove(&mut self, name: &FileName) -> Option<DirEntry> {
        let pos = self.entries.iter().position(|e| e.name == *name)?;
        Some(self.entries.remove(pos))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DirEntry> {
        self.entries.iter()
    }

    /// Bytes the entry list occupies on disk, not counting the terminator.
    pub fn byte_len(&self) -> usize {
        self.entries.len() * DIR_RECORD_LEN
    }

    /// Encodes the entries followed by the terminator into the directory blocks.
    pub fn serialize(&self, layout: &Layout) -> Vec<Vec<u8>> {
        let nblocks = layout.directory_blocks.len();
        let mut bytes = vec![0; nblocks * layout.block_len];
        for (i, entry) in self.entries.iter().enumerate() {
            let record = DirRecord {
                name: entry.name.0,
                descriptor: I32::new(entry.descriptor as i32),
            };
            let start = i * DIR_RECORD_LEN;
            bytes[start..start + DIR_RECORD_LEN].copy_from_slice(record.as_bytes());
        }
        bytes[self.byte_len()] = END_OF_ENTRIES;
        bytes.chunks(layout.block_len).map(<[u8]>::to_vec).collect()
    }

    pub fn parse(blocks: &[Vec<u8>], capacity: usize) -> Result<Self, String> {
        let bytes = blocks.concat();
        let mut dir = Self::new(capacity);

        let mut offset = 0;
        loop {
            match bytes.get(offset) {
                None => return Err("directory is missing its terminator".into()),
                Some(&END_OF_ENTRIES) => break,
                Some(_) => {}
            }
            let raw = bytes
                .get(offset..offset + DIR_RECORD_LEN)
                .ok_or("directory record cut short")?;
            let record = DirRecord::read_from(raw).ok_or("directory record is malformed")?;
            let name = FileName::from_bytes(&record.name)
                .ok_or_else(|| format!("directory record {} has a bad name", dir.len()))?;
            let descriptor = usize::try_from(record.descriptor.get())
                .map_err(|_| format!("entry {} has descriptor {}", name, record.descriptor.get()))?;
            if dir.contains(&name) {
                return Err(format!("name {} appears twice", name));
            }
            dir.add_entry(name, descriptor)
                .map_err(|_| format!("more than {} directory entries", capacity))?;
            offset += DIR_RECORD_LEN;
        }
        Ok(dir)
    }
}
