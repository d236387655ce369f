use super::{VirtAddr, PAGE_SIZE};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER_ACCESSIBLE = 1 << 2;
        const NO_EXECUTE = 1 << 63;
    }
}

impl PageFlags {
    /// Flags for a user mapping with the given permissions.
    pub fn user(writable: bool, executable: bool) -> Self {
        let mut flags = PageFlags::PRESENT | PageFlags::USER_ACCESSIBLE;
        if writable {
            flags |= PageFlags::WRITABLE;
        }
        if !executable {
            flags |= PageFlags::NO_EXECUTE;
        }
        flags
    }

    pub fn is_user_writable(&self) -> bool {
        self.contains(PageFlags::PRESENT | PageFlags::USER_ACCESSIBLE | PageFlags::WRITABLE)
    }

    pub fn is_executable(&self) -> bool {
        self.contains(PageFlags::PRESENT) && !self.contains(PageFlags::NO_EXECUTE)
    }
}

/// Number of pages touched by `[base, base + size)`.
pub fn pages_spanned(base: VirtAddr, size: usize) -> Option<usize> {
    if size == 0 {
        return Some(0);
    }
    let start = base.align_down(PAGE_SIZE as u64).0;
    let end = base.0.checked_add(size as u64)?.checked_add(PAGE_SIZE as u64 - 1)? & !(PAGE_SIZE as u64 - 1);
    Some(((end - start) / PAGE_SIZE as u64) as usize)
}
