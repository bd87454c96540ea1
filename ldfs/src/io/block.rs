use super::BlockError;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// A fixed-capacity array of fixed-size blocks addressed by logical block number.
///
/// Every transfer moves exactly one block. There are no partial reads or writes,
/// a buffer of any other length is rejected before the medium is touched.
pub trait BlockStorage {
    /// Length in bytes of every block on the device.
    fn block_len(&self) -> usize;
    /// Total number of addressable blocks.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer that is not
    /// exactly one block long, will return an error.
    fn read_block(&self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), BlockError>;
    /// Writes provided buffer into the specified block number, overwriting it in place.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or a buffer that is not exactly
    /// one block long, will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), BlockError>;

    /// Checks the common preconditions shared by every transfer.
    fn check_transfer(&self, blocknr: BlockNumber, len: usize) -> Result<(), BlockError> {
        if blocknr >= self.block_count() {
            return Err(BlockError::OutOfRange {
                blocknr,
                count: self.block_count(),
            });
        }
        if len != self.block_len() {
            return Err(BlockError::InvalidLength {
                expected: self.block_len(),
                actual: len,
            });
        }
        Ok(())
    }
}
