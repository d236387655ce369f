pub mod paging;
pub mod space;

pub use procimage_arch::VirtAddr;

use procimage_arch::Abi;

use crate::error::{ExecError, ExecResult};

pub const PAGE_SIZE: usize = 4096;

/// Copy-out primitives into the user half of the active address space.
///
/// Every copy may fault: the destination is derived from sizes the user
/// controls, so nothing here is assumed to succeed.
pub trait UserMemory {
    /// Write `src` at `dst`. Fails with [`ExecError::BadAddress`] unless the
    /// whole range is mapped user-writable.
    fn copy_out(&mut self, src: &[u8], dst: VirtAddr) -> ExecResult<()>;

    /// Write `src` plus a terminating NUL at `dst`, refusing to write more
    /// than `max_len` bytes. Returns the number of bytes written.
    fn copy_out_str(&mut self, src: &str, dst: VirtAddr, max_len: usize) -> ExecResult<usize> {
        let len = src.len() + 1;
        if len > max_len {
            return Err(ExecError::InvalidArgument);
        }
        let nul = dst
            .checked_add(src.len() as u64)
            .ok_or(ExecError::BadAddress)?;
        self.copy_out(src.as_bytes(), dst)?;
        self.copy_out(&[0], nul)?;
        Ok(len)
    }

    /// Write one user word at `dst` in the ABI's width and byte order.
    fn copy_out_word(&mut self, abi: &Abi, word: u64, dst: VirtAddr) -> ExecResult<()> {
        if !abi.fits_word(word) {
            return Err(ExecError::BadAddress);
        }
        self.copy_out(&abi.encode_word(word), dst)
    }
}

/// Creates, activates and lays out user address spaces.
pub trait AddressSpaceManager {
    type Space: UserMemory;

    fn create(&mut self) -> ExecResult<Self::Space>;

    /// Make `space` the one user accesses resolve against.
    fn activate(&mut self, space: &Self::Space);

    /// Reserve the user stack and return the initial stack pointer.
    fn define_stack(&mut self, space: &mut Self::Space) -> ExecResult<VirtAddr>;
}
