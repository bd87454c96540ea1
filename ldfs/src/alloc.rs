use crate::fs::FsError;
use crate::io::BlockNumber;

use log::debug;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// One bit per block on the device, set when the block is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    /// Bit `n % 64` of word `n / 64` tracks block `n`.
    bits: Vec<u64>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; (len + 63) / 64],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Reads the first `len` bits of an on-disk bitmap. Bit `n` lives in byte
    /// `n / 8` under mask `0x80 >> (n % 8)`.
    pub fn parse(buf: &[u8], len: usize) -> Self {
        assert!(buf.len() * 8 >= len, "Bitmap buffer too short for {} bits.", len);
        let mut bmp = Self::new(len);
        for blocknr in 0..len {
            if buf[blocknr / 8] & (0x80 >> (blocknr % 8)) != 0 {
                bmp.set_reserved(blocknr);
            }
        }
        bmp
    }

    /// Encodes the bitmap into a zero padded buffer of `block_len` bytes.
    pub fn serialize(&self, block_len: usize) -> Vec<u8> {
        let mut buf = vec![0; block_len];
        for blocknr in 0..self.len {
            if self.get(blocknr) == State::Used {
                buf[blocknr / 8] |= 0x80 >> (blocknr % 8);
            }
        }
        buf
    }

    pub fn get(&self, blocknr: BlockNumber) -> State {
        assert!(blocknr < self.len);
        // Grab the u64 containing the significant bit.
        let word = self.bits[blocknr / 64];
        let mask = 0b01_u64 << (blocknr % 64);
        if word & mask == 0 {
            State::Free
        } else {
            State::Used
        }
    }

    pub fn set_reserved(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < self.len);
        self.bits[blocknr / 64] |= 0b01_u64 << (blocknr % 64);
    }

    pub fn set_free(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < self.len);
        self.bits[blocknr / 64] &= !(0b01_u64 << (blocknr % 64));
    }

    pub fn count_used(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Walks the free blocks of the data region in ascending order.
pub struct FreeBlocks<'a> {
    /// Keeps track of the next starting place for looking for available blocks.
    marker: usize,
    bitmap: &'a Bitmap,
}

impl<'a> Iterator for FreeBlocks<'a> {
    type Item = BlockNumber;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < self.bitmap.len() {
            let blocknr = self.marker;
            self.marker += 1;
            if let State::Free = self.bitmap.get(blocknr) {
                return Some(blocknr);
            }
        }
        None
    }
}

/// First-fit allocation over the data region.
///
/// The metadata prefix `[0, data_start)` is marked used on construction and is
/// never handed out or released. Deciding when a block becomes free is up to
/// the caller; the allocator only flips bits.
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    bitmap: Bitmap,
    data_start: BlockNumber,
}

impl BlockAllocator {
    pub fn new(block_count: usize, data_start: BlockNumber) -> Self {
        let mut bitmap = Bitmap::new(block_count);
        for blocknr in 0..data_start {
            bitmap.set_reserved(blocknr);
        }
        Self { bitmap, data_start }
    }

    /// Adopts a bitmap read back from disk. Returns `None` if any block of the
    /// metadata prefix is not marked used.
    pub fn from_bitmap(bitmap: Bitmap, data_start: BlockNumber) -> Option<Self> {
        if (0..data_start).any(|n| bitmap.get(n) == State::Free) {
            return None;
        }
        Some(Self { bitmap, data_start })
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            marker: self.data_start,
            bitmap: &self.bitmap,
        }
    }

    /// Claims the lowest numbered free data block.
    pub fn allocate(&mut self) -> Result<BlockNumber, FsError> {
        let blocknr = self.free_blocks().next().ok_or(FsError::NoSpace)?;
        self.bitmap.set_reserved(blocknr);
        debug!("allocated block {}", blocknr);
        Ok(blocknr)
    }

    pub fn free(&mut self, blocknr: BlockNumber) {
        assert!(
            blocknr >= self.data_start,
            "block {} belongs to the metadata region",
            blocknr
        );
        debug_assert_eq!(self.bitmap.get(blocknr), State::Used);
        self.bitmap.set_free(blocknr);
        debug!("freed block {}", blocknr);
    }

    pub fn is_allocated(&self, blocknr: BlockNumber) -> bool {
        self.bitmap.get(blocknr) == State::Used
    }

    pub fn free_count(&self) -> usize {
        self.bitmap.len() - self.bitmap.count_used()
    }
}
