pub mod context;
pub mod elf_loader;
pub mod exec;
pub mod loader;
pub mod stack;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{ExecError, ExecResult};

pub use context::UserContext;
pub use exec::{run_program, ImageBuilder};
pub use loader::ExecutableLoader;
pub use stack::{marshal_arguments, StackBuilder, StackLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessId(pub usize);

/// A process record. `address_space` is `None` until an image has been
/// built into it; whoever tears the process down takes it back.
#[derive(Debug)]
pub struct Process<S> {
    pub id: ProcessId,
    pub name: String,
    pub address_space: Option<S>,
}

impl<S> Process<S> {
    pub fn new(id: ProcessId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address_space: None,
        }
    }

    pub fn has_address_space(&self) -> bool {
        self.address_space.is_some()
    }

    /// Teardown path: hand the address space back for destruction.
    pub fn take_address_space(&mut self) -> Option<S> {
        self.address_space.take()
    }
}

/// A validated request to run `path` with `arguments`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    path: String,
    arguments: Vec<String>,
}

impl Invocation {
    /// Fails with [`ExecError::InvalidArgument`] for an empty path, or for
    /// any string with an embedded NUL, which the user stack cannot carry.
    pub fn new<A: AsRef<str>>(path: &str, arguments: &[A]) -> ExecResult<Self> {
        if path.is_empty() || path.contains('\0') {
            return Err(ExecError::InvalidArgument);
        }
        if arguments.iter().any(|arg| arg.as_ref().contains('\0')) {
            return Err(ExecError::InvalidArgument);
        }

        Ok(Self {
            path: path.into(),
            arguments: arguments.iter().map(|arg| arg.as_ref().into()).collect(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn argc(&self) -> usize {
        self.arguments.len()
    }
}
