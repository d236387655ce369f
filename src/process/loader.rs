use crate::error::ExecResult;
use crate::memory::VirtAddr;

pub use super::elf_loader::{
    map_image,
    parse_executable,
    ElfLoader,
    ElfLoaderError,
    ParsedImage,
    Segment,
};

/// Opens executables and loads their segments into an address space `S`.
pub trait ExecutableLoader<S> {
    type Handle;

    fn open(&mut self, path: &str) -> ExecResult<Self::Handle>;

    /// Populate `space`, which is already active, and return the entry
    /// point.
    fn load(&mut self, handle: &mut Self::Handle, space: &mut S) -> ExecResult<VirtAddr>;

    fn close(&mut self, handle: Self::Handle);
}
