//! Initial user stack: argument strings and the argv table.
//!
//! Layout, high addresses first:
//!
//! ```text
//! stack top
//!   (padding to string_align)
//!   "arg0\0"
//!   "arg1\0"
//!   ...
//!   (padding to pointer_align, then to stack_align for the table base)
//!   NULL            <- argv[argc]
//!   &"arg(argc-1)"
//!   ...
//!   &"arg0"         <- argv, initial stack pointer
//! ```

use alloc::vec::Vec;
use core::iter;

use log::trace;
use procimage_arch::Abi;

use crate::error::{ExecError, ExecResult};
use crate::memory::{UserMemory, VirtAddr};

/// Where everything landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackLayout {
    pub argc: usize,
    /// Address of `argv[0]`.
    pub argv: VirtAddr,
    pub stack_pointer: VirtAddr,
    /// Address of each argument string, in argument order.
    pub strings: Vec<VirtAddr>,
}

/// The stack cursor plus the string addresses pushed so far.
pub struct StackBuilder {
    abi: Abi,
    cursor: VirtAddr,
    strings: Vec<VirtAddr>,
}

impl StackBuilder {
    pub fn new(abi: Abi, stack_top: VirtAddr) -> Self {
        debug_assert!(abi.is_consistent());
        Self {
            abi,
            cursor: stack_top,
            strings: Vec::new(),
        }
    }

    pub fn cursor(&self) -> VirtAddr {
        self.cursor
    }

    pub fn align_for_strings(&mut self) {
        self.cursor = self.cursor.align_down(self.abi.string_align);
    }

    /// Copy `arg` and its NUL just below the cursor.
    pub fn push_string<M>(&mut self, memory: &mut M, arg: &str) -> ExecResult<VirtAddr>
    where
        M: UserMemory + ?Sized,
    {
        let len = arg.len() + 1;
        let dst = self
            .cursor
            .checked_sub(len as u64)
            .ok_or(ExecError::BadAddress)?;
        if !self.abi.fits_word(dst.0) {
            return Err(ExecError::BadAddress);
        }

        memory.copy_out_str(arg, dst, len)?;
        trace!("argv[{}] string at {}", self.strings.len(), dst);
        self.cursor = dst;
        self.strings.push(dst);
        Ok(dst)
    }

    /// Round down to the pointer alignment, then pad above the table so its
    /// base, the initial stack pointer, lands on the stack alignment.
    pub fn align_for_table(&mut self) {
        let cursor = self.cursor.align_down(self.abi.pointer_align);
        let table = (self.strings.len() as u64 + 1) * self.abi.word_bytes();
        self.cursor = match cursor.checked_sub(table) {
            Some(base) => VirtAddr::new(base.align_down(self.abi.stack_align).0 + table),
            // push_table reports the underflow
            None => cursor,
        };
    }

    /// Write the argv table below the cursor, NULL sentinel at the top and
    /// `argv[0]` at the bottom, and finish the layout.
    pub fn push_table<M>(mut self, memory: &mut M) -> ExecResult<StackLayout>
    where
        M: UserMemory + ?Sized,
    {
        let word = self.abi.word_bytes();
        let slots = iter::once(0).chain(self.strings.iter().rev().map(|addr| addr.0));
        for value in slots {
            self.cursor = self
                .cursor
                .checked_sub(word)
                .ok_or(ExecError::BadAddress)?;
            memory.copy_out_word(&self.abi, value, self.cursor)?;
        }

        let layout = StackLayout {
            argc: self.strings.len(),
            argv: self.cursor,
            stack_pointer: self.cursor,
            strings: self.strings,
        };
        assert_eq!(layout.stack_pointer, layout.argv);
        Ok(layout)
    }
}

/// Lay `arguments` out below `stack_top` in `memory`. Stops at the first
/// failed copy.
pub fn marshal_arguments<M, A>(
    memory: &mut M,
    abi: &Abi,
    stack_top: VirtAddr,
    arguments: &[A],
) -> ExecResult<StackLayout>
where
    M: UserMemory + ?Sized,
    A: AsRef<str>,
{
    let mut builder = StackBuilder::new(*abi, stack_top);
    builder.align_for_strings();
    for arg in arguments {
        builder.push_string(memory, arg.as_ref())?;
    }
    builder.align_for_table();
    builder.push_table(memory)
}
