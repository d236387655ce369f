#![cfg_attr(not(test), no_std)]

//! Construction of a brand-new user process image: load an executable into
//! a fresh address space, lay out its argument stack and enter user mode.

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod process;
pub mod userspace;

pub use config::ExecConfig;
pub use error::{ExecError, ExecResult};
pub use procimage_arch::{Abi, EntryFrame, Endianness, TargetArch, UserModeEntry, VirtAddr};
pub use process::{run_program, ImageBuilder, Invocation, Process, ProcessId};
