use ::x86_64::registers::rflags::RFlags;

use crate::memory::VirtAddr;

/// Ring-3 code and stack selectors in the kernel GDT, RPL 3.
pub const USER_CODE_SELECTOR: u64 = 0x1B;
pub const USER_DATA_SELECTOR: u64 = 0x23;

/// Bit 1 of RFLAGS always reads as one.
const RFLAGS_RESERVED: u64 = 1 << 1;

/// Register image a thread starts user mode with.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    pub rdi: u64,
    pub rsi: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl UserContext {
    pub const fn empty() -> Self {
        UserContext {
            rdi: 0,
            rsi: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }

    pub fn new_user(entry_point: VirtAddr, stack_pointer: VirtAddr) -> Self {
        UserContext {
            rdi: 0,
            rsi: 0,
            rip: entry_point.0,
            cs: USER_CODE_SELECTOR,
            rflags: RFlags::INTERRUPT_FLAG.bits() | RFLAGS_RESERVED,
            rsp: stack_pointer.0,
            ss: USER_DATA_SELECTOR,
        }
    }

    /// argc and argv go in the first two integer argument registers.
    pub fn with_arguments(mut self, argc: u64, argv: VirtAddr) -> Self {
        self.rdi = argc;
        self.rsi = argv.0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = UserContext::empty();
        assert_eq!(ctx.rip, 0);
        assert_eq!(ctx.rsp, 0);

        let user_ctx = UserContext::new_user(VirtAddr::new(0x1000), VirtAddr::new(0x2000))
            .with_arguments(2, VirtAddr::new(0x1ff0));
        assert_eq!(user_ctx.rip, 0x1000);
        assert_eq!(user_ctx.rsp, 0x2000);
        assert_eq!(user_ctx.rdi, 2);
        assert_eq!(user_ctx.rsi, 0x1ff0);
        assert_eq!(user_ctx.cs & 3, 3);
        assert_eq!(user_ctx.ss & 3, 3);
        assert_eq!(user_ctx.rflags, 0x202);
    }
}
