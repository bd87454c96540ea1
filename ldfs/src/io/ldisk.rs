use super::block::{BlockNumber, BlockStorage};
use super::BlockError;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, trace};
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Identifies an image container written by [`DiskImage::save_image`].
const IMAGE_MAGIC: [u8; 4] = *b"LDSK";

/// Shape of the synthetic medium. Every sector holds exactly one logical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: usize,
    pub tracks_per_cylinder: usize,
    pub sectors_per_track: usize,
    /// Bytes per sector, and so bytes per logical block.
    pub block_len: usize,
}

impl Geometry {
    pub fn blocks_per_cylinder(&self) -> usize {
        self.tracks_per_cylinder * self.sectors_per_track
    }

    pub fn block_count(&self) -> usize {
        self.cylinders * self.blocks_per_cylinder()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.block_count() * self.block_len
    }

    /// Like [`Geometry::capacity_bytes`], but `None` if the product overflows.
    pub fn checked_capacity_bytes(&self) -> Option<usize> {
        self.cylinders
            .checked_mul(self.tracks_per_cylinder)?
            .checked_mul(self.sectors_per_track)?
            .checked_mul(self.block_len)
    }
}

impl Default for Geometry {
    /// 4 cylinders of 2 tracks of 8 sectors, 64 bytes each: 64 blocks of 64 bytes.
    fn default() -> Self {
        Self {
            cylinders: 4,
            tracks_per_cylinder: 2,
            sectors_per_track: 8,
            block_len: 64,
        }
    }
}

/// Physical coordinates of one logical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub cylinder: usize,
    pub track: usize,
    pub sector: usize,
}

struct Sector {
    bytes: Box<[u8]>,
}

struct Track {
    sectors: Vec<Sector>,
}

struct Cylinder {
    tracks: Vec<Track>,
}

/// An in-memory logical disk made of cylinders, tracks and sectors.
///
/// Only meant to be used for file system development and testing; the whole
/// medium can be written to and read back from a single image file.
pub struct LDisk {
    geometry: Geometry,
    cylinders: Vec<Cylinder>,
}

impl LDisk {
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Translates a logical block number to the unique sector that stores it.
    ///
    /// The cylinder is the first one whose cumulative capacity reaches the block,
    /// the track and sector are found the same way within it.
    pub fn locate(&self, blocknr: BlockNumber) -> Result<Location, BlockError> {
        if blocknr >= self.geometry.block_count() {
            return Err(BlockError::OutOfRange {
                blocknr,
                count: self.geometry.block_count(),
            });
        }
        let per_cylinder = self.geometry.blocks_per_cylinder();
        let per_track = self.geometry.sectors_per_track;
        let location = Location {
            cylinder: blocknr / per_cylinder,
            track: (blocknr % per_cylinder) / per_track,
            sector: blocknr % per_track,
        };
        trace!("block {} -> {:?}", blocknr, location);
        Ok(location)
    }

    fn sector(&self, loc: Location) -> &Sector {
        &self.cylinders[loc.cylinder].tracks[loc.track].sectors[loc.sector]
    }

    fn sector_mut(&mut self, loc: Location) -> &mut Sector {
        &mut self.cylinders[loc.cylinder].tracks[loc.track].sectors[loc.sector]
    }

    /// Sectors in logical block order.
    fn sectors(&self) -> impl Iterator<Item = &Sector> {
        self.cylinders
            .iter()
            .flat_map(|c| c.tracks.iter())
            .flat_map(|t| t.sectors.iter())
    }
}

impl BlockStorage for LDisk {
    fn block_len(&self) -> usize {
        self.geometry.block_len
    }

    fn block_count(&self) -> usize {
        self.geometry.block_count()
    }

    fn read_block(&self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), BlockError> {
        self.check_transfer(blocknr, buf.len())?;
        let loc = self.locate(blocknr)?;
        buf.copy_from_slice(&self.sector(loc).bytes);
        Ok(())
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), BlockError> {
        self.check_transfer(blocknr, buf.len())?;
        let loc = self.locate(blocknr)?;
        self.sector_mut(loc).bytes.copy_from_slice(buf);
        Ok(())
    }
}

/// A block store that can be captured to, and rebuilt from, an external container.
pub trait DiskImage: BlockStorage + Sized {
    /// Writes every block of the medium to `path`, replacing any existing file.
    fn save_image<P: AsRef<Path>>(&self, path: P) -> Result<(), BlockError>;
    /// Rebuilds a medium from a container written by `save_image`. Fails without
    /// side effects if the container is missing, truncated or malformed.
    fn load_image<P: AsRef<Path>>(path: P) -> Result<Self, BlockError>;
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes)]
struct ImageHeader {
    magic: [u8; 4],
    cylinders: U32<BigEndian>,
    tracks: U32<BigEndian>,
    sectors: U32<BigEndian>,
    block_len: U32<BigEndian>,
}

const HEADER_LEN: usize = std::mem::size_of::<ImageHeader>();

impl ImageHeader {
    fn geometry(&self) -> Geometry {
        Geometry {
            cylinders: self.cylinders.get() as usize,
            tracks_per_cylinder: self.tracks.get() as usize,
            sectors_per_track: self.sectors.get() as usize,
            block_len: self.block_len.get() as usize,
        }
    }
}

impl DiskImage for LDisk {
    fn save_image<P: AsRef<Path>>(&self, path: P) -> Result<(), BlockError> {
        let header = ImageHeader {
            magic: IMAGE_MAGIC,
            cylinders: U32::new(self.geometry.cylinders as u32),
            tracks: U32::new(self.geometry.tracks_per_cylinder as u32),
            sectors: U32::new(self.geometry.sectors_per_track as u32),
            block_len: U32::new(self.geometry.block_len as u32),
        };
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        out.write_all(header.as_bytes())?;
        for sector in self.sectors() {
            out.write_all(&sector.bytes)?;
        }
        out.flush()?;
        debug!(
            "saved {} blocks to {}",
            self.geometry.block_count(),
            path.as_ref().display()
        );
        Ok(())
    }

    fn load_image<P: AsRef<Path>>(path: P) -> Result<Self, BlockError> {
        let bytes = fs::read(path.as_ref())?;
        if bytes.len() < HEADER_LEN {
            return Err(BlockError::BadImage("container shorter than its header".into()));
        }
        let header = ImageHeader::read_from(&bytes[..HEADER_LEN])
            .ok_or_else(|| BlockError::BadImage("unreadable header".into()))?;
        if header.magic != IMAGE_MAGIC {
            return Err(BlockError::BadImage("bad magic".into()));
        }
        // The header is untrusted: size the body before allocating anything.
        let geometry = header.geometry();
        let body = &bytes[HEADER_LEN..];
        let expected = geometry
            .checked_capacity_bytes()
            .ok_or_else(|| BlockError::BadImage(format!("geometry {:?} overflows", geometry)))?;
        if body.len() != expected {
            return Err(BlockError::BadImage(format!(
                "expected {} bytes of blocks, found {}",
                expected,
                body.len()
            )));
        }
        let mut disk = LDiskBuilder::from(geometry)
            .build()
            .map_err(|e| BlockError::BadImage(e.to_string()))?;

        for (blocknr, chunk) in body.chunks_exact(disk.geometry.block_len).enumerate() {
            disk.write_block(blocknr, chunk)?;
        }
        debug!(
            "loaded {} blocks from {}",
            disk.geometry.block_count(),
            path.as_ref().display()
        );
        Ok(disk)
    }
}

pub struct LDiskBuilder {
    geometry: Geometry,
}

impl From<Geometry> for LDiskBuilder {
    fn from(geometry: Geometry) -> Self {
        LDiskBuilder { geometry }
    }
}

impl LDiskBuilder {
    pub fn new() -> Self {
        Self::from(Geometry::default())
    }

    pub fn with_cylinders(mut self, cylinders: usize) -> Self {
        self.geometry.cylinders = cylinders;
        self
    }

    pub fn with_tracks(mut self, tracks_per_cylinder: usize) -> Self {
        self.geometry.tracks_per_cylinder = tracks_per_cylinder;
        self
    }

    pub fn with_sectors(mut self, sectors_per_track: usize) -> Self {
        self.geometry.sectors_per_track = sectors_per_track;
        self
    }

    pub fn with_block_len(mut self, block_len: usize) -> Self {
        self.geometry.block_len = block_len;
        self
    }

    /// Allocates a zeroed medium of the configured shape.
    pub fn build(self) -> Result<LDisk, BlockError> {
        let g = self.geometry;
        if g.cylinders == 0 || g.tracks_per_cylinder == 0 || g.sectors_per_track == 0 {
            return Err(BlockError::InvalidGeometry(format!(
                "every level needs at least one unit: {:?}",
                g
            )));
        }
        if g.block_len == 0 {
            return Err(BlockError::InvalidGeometry("block length must be positive".into()));
        }

        let cylinders = (0..g.cylinders)
            .map(|_| Cylinder {
                tracks: (0..g.tracks_per_cylinder)
                    .map(|_| Track {
                        sectors: (0..g.sectors_per_track)
                            .map(|_| Sector {
                                bytes: vec![0; g.block_len].into_boxed_slice(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        Ok(LDisk {
            geometry: g,
            cylinders,
        })
    }
}

impl Default for LDiskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
