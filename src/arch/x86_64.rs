use core::arch::asm;

use log::info;
use procimage_arch::{EntryFrame, UserModeEntry};

use crate::process::UserContext;

/// Enters ring 3 through an `iretq` frame built on the kernel stack.
///
/// The new image's address space must already be active in CR3.
pub struct IretqEntry;

impl IretqEntry {
    pub fn context_for(frame: &EntryFrame) -> UserContext {
        UserContext::new_user(frame.entry_point, frame.stack_pointer)
            .with_arguments(frame.argc as u64, frame.argv)
    }
}

impl UserModeEntry for IretqEntry {
    fn enter_new_process(&mut self, frame: EntryFrame) -> ! {
        info!("iretq to {}", frame);
        let context = Self::context_for(&frame);
        unsafe { enter_user_mode(&context) }
    }
}

/// # Safety
///
/// `context` must describe mapped, user-accessible code and stack in the
/// active address space, and the GDT must hold the ring-3 selectors.
pub unsafe fn enter_user_mode(context: &UserContext) -> ! {
    ::x86_64::instructions::interrupts::disable();
    asm!(
        "push {ss}",
        "push {sp}",
        "push {flags}",
        "push {cs}",
        "push {ip}",
        "iretq",
        ss = in(reg) context.ss,
        sp = in(reg) context.rsp,
        flags = in(reg) context.rflags,
        cs = in(reg) context.cs,
        ip = in(reg) context.rip,
        in("rdi") context.rdi,
        in("rsi") context.rsi,
        options(noreturn),
    )
}
