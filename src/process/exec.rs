//! Building a brand-new process image and entering it.

use log::{debug, warn};
use procimage_arch::{Abi, EntryFrame, UserModeEntry};

use super::loader::ExecutableLoader;
use super::stack::marshal_arguments;
use super::{Invocation, Process};
use crate::error::{ExecError, ExecResult};
use crate::memory::AddressSpaceManager;

/// Wires the loader, the address-space manager and the user-mode entry
/// together for one construction.
pub struct ImageBuilder<'a, L, M, E> {
    loader: &'a mut L,
    vm: &'a mut M,
    entry: &'a mut E,
    abi: Abi,
}

impl<'a, L, M, E> ImageBuilder<'a, L, M, E>
where
    M: AddressSpaceManager,
    L: ExecutableLoader<M::Space>,
    E: UserModeEntry,
{
    pub fn new(loader: &'a mut L, vm: &'a mut M, entry: &'a mut E, abi: Abi) -> Self {
        Self {
            loader,
            vm,
            entry,
            abi,
        }
    }

    /// Everything short of the jump: open and load the program into a fresh
    /// address space bound to `process`, then lay out its argument stack.
    ///
    /// On failure after the space was created it stays on `process` for the
    /// process teardown to destroy.
    ///
    /// # Panics
    ///
    /// If `process` already has an address space. Only new processes are
    /// built here.
    pub fn prepare(
        &mut self,
        process: &mut Process<M::Space>,
        invocation: &Invocation,
    ) -> ExecResult<EntryFrame> {
        debug!(
            "building image for {} ({} args)",
            invocation.path(),
            invocation.argc()
        );

        let mut handle = self.loader.open(invocation.path()).map_err(|err| {
            warn!("{}: open failed: {}", invocation.path(), err);
            err
        })?;

        assert!(
            !process.has_address_space(),
            "process {} already has an address space",
            process.id.0
        );

        let space = match self.vm.create() {
            Ok(space) => space,
            Err(_) => {
                self.loader.close(handle);
                return Err(ExecError::OutOfMemory);
            }
        };
        let space = process.address_space.insert(space);
        self.vm.activate(space);

        let entry_point = match self.loader.load(&mut handle, space) {
            Ok(entry_point) => entry_point,
            Err(err) => {
                warn!("{}: load failed: {}", invocation.path(), err);
                self.loader.close(handle);
                return Err(err);
            }
        };
        self.loader.close(handle);

        let stack_top = self.vm.define_stack(space)?;
        let layout = marshal_arguments(space, &self.abi, stack_top, invocation.arguments())?;
        debug!(
            "copied {} argument strings, argv at {}",
            layout.argc, layout.argv
        );

        process.name = invocation.path().into();
        Ok(EntryFrame {
            argc: layout.argc,
            argv: layout.argv,
            stack_pointer: layout.stack_pointer,
            entry_point,
        })
    }

    /// Build the image and switch to it. Only returns on failure.
    pub fn construct(mut self, process: &mut Process<M::Space>, invocation: &Invocation) -> ExecError {
        match self.prepare(process, invocation) {
            Ok(frame) => {
                debug!("entering new process: {}", frame);
                self.entry.enter_new_process(frame)
            }
            Err(err) => err,
        }
    }
}

/// Load `path` into the fresh `process` and start it in user mode with
/// `arguments` as its argv. Only returns on failure.
pub fn run_program<L, M, E, A>(
    process: &mut Process<M::Space>,
    loader: &mut L,
    vm: &mut M,
    entry: &mut E,
    abi: Abi,
    path: &str,
    arguments: &[A],
) -> ExecError
where
    M: AddressSpaceManager,
    L: ExecutableLoader<M::Space>,
    E: UserModeEntry,
    A: AsRef<str>,
{
    let invocation = match Invocation::new(path, arguments) {
        Ok(invocation) => invocation,
        Err(err) => return err,
    };
    ImageBuilder::new(loader, vm, entry, abi).construct(process, &invocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;
    use crate::memory::space::{SoftAddressSpace, SoftSpaceManager};
    use crate::memory::{UserMemory, VirtAddr};
    use crate::process::ProcessId;

    struct NoEntry;

    impl UserModeEntry for NoEntry {
        fn enter_new_process(&mut self, frame: EntryFrame) -> ! {
            panic!("unexpected entry: {}", frame)
        }
    }

    /// Hands out a fixed entry point and maps nothing.
    struct StubLoader {
        opened: usize,
        closed: usize,
        open_error: Option<ExecError>,
        load_error: Option<ExecError>,
    }

    impl StubLoader {
        fn new() -> Self {
            Self {
                opened: 0,
                closed: 0,
                open_error: None,
                load_error: None,
            }
        }
    }

    impl ExecutableLoader<SoftAddressSpace> for StubLoader {
        type Handle = ();

        fn open(&mut self, _path: &str) -> ExecResult<()> {
            if let Some(err) = self.open_error {
                return Err(err);
            }
            self.opened += 1;
            Ok(())
        }

        fn load(&mut self, _handle: &mut (), _space: &mut SoftAddressSpace) -> ExecResult<VirtAddr> {
            match self.load_error {
                Some(err) => Err(err),
                None => Ok(VirtAddr::new(0x0040_0000)),
            }
        }

        fn close(&mut self, _handle: ()) {
            self.closed += 1;
        }
    }

    fn invocation(args: &[&str]) -> Invocation {
        Invocation::new("/bin/true", args).unwrap()
    }

    #[test]
    fn test_prepare_true() {
        let mut loader = StubLoader::new();
        let mut vm = SoftSpaceManager::new(ExecConfig::default());
        let mut entry = NoEntry;
        let mut process = Process::new(ProcessId(1), "kmenu");

        let frame = ImageBuilder::new(&mut loader, &mut vm, &mut entry, Abi::MIPS32)
            .prepare(&mut process, &invocation(&["true"]))
            .unwrap();

        assert_eq!(frame.argc, 1);
        assert_eq!(frame.entry_point, VirtAddr::new(0x0040_0000));
        assert_eq!(frame.argv, frame.stack_pointer);
        assert_eq!(loader.opened, 1);
        assert_eq!(loader.closed, 1);
        assert_eq!(process.name, "/bin/true");

        let space = process.address_space.as_ref().unwrap();
        assert_eq!(vm.active(), Some(space.id()));
        let ptr = space.read_word(&Abi::MIPS32, frame.argv).unwrap();
        assert_eq!(space.read_c_str(VirtAddr::new(ptr)).unwrap(), b"true");
    }

    #[test]
    fn test_open_failure_creates_nothing() {
        let mut loader = StubLoader::new();
        loader.open_error = Some(ExecError::PermissionDenied);
        let mut vm = SoftSpaceManager::new(ExecConfig::default());
        let mut entry = NoEntry;
        let mut process = Process::new(ProcessId(1), "kmenu");

        let err = run_program(&mut process, &mut loader, &mut vm, &mut entry, Abi::MIPS32, "/bin/true", &["true"]);
        assert_eq!(err, ExecError::PermissionDenied);
        assert_eq!(vm.spaces_created(), 0);
        assert!(!process.has_address_space());
    }

    #[test]
    fn test_create_failure_closes_handle() {
        let mut loader = StubLoader::new();
        let mut vm = SoftSpaceManager::new(ExecConfig::default().with_page_budget(0));
        let mut entry = NoEntry;
        let mut process = Process::new(ProcessId(1), "kmenu");

        let err = ImageBuilder::new(&mut loader, &mut vm, &mut entry, Abi::MIPS32)
            .prepare(&mut process, &invocation(&[]))
            .unwrap_err();
        assert_eq!(err, ExecError::OutOfMemory);
        assert_eq!(loader.closed, 1);
        assert!(!process.has_address_space());
    }

    #[test]
    fn test_load_failure_keeps_space_on_process() {
        let mut loader = StubLoader::new();
        loader.load_error = Some(ExecError::BadFormat);
        let mut vm = SoftSpaceManager::new(ExecConfig::default());
        let mut entry = NoEntry;
        let mut process = Process::new(ProcessId(1), "kmenu");

        let err = run_program(&mut process, &mut loader, &mut vm, &mut entry, Abi::MIPS32, "/bin/true", &["true"]);
        assert_eq!(err, ExecError::BadFormat);
        assert_eq!(loader.closed, 1);
        assert!(process.has_address_space());
        assert_eq!(process.name, "kmenu");
    }

    #[test]
    fn test_stack_failure() {
        let mut loader = StubLoader::new();
        let mut vm = SoftSpaceManager::new(ExecConfig::default().with_page_budget(2));
        let mut entry = NoEntry;
        let mut process = Process::new(ProcessId(1), "kmenu");

        let err = run_program(&mut process, &mut loader, &mut vm, &mut entry, Abi::MIPS32, "/bin/true", &["true"]);
        assert_eq!(err, ExecError::OutOfMemory);
        assert_eq!(loader.closed, 1);
        assert!(process.has_address_space());
    }

    #[test]
    fn test_empty_path_touches_nothing() {
        let mut loader = StubLoader::new();
        let mut vm = SoftSpaceManager::new(ExecConfig::default());
        let mut entry = NoEntry;
        let mut process = Process::new(ProcessId(1), "kmenu");

        let err = run_program::<_, _, _, &str>(&mut process, &mut loader, &mut vm, &mut entry, Abi::MIPS32, "", &[]);
        assert_eq!(err, ExecError::InvalidArgument);
        assert_eq!(loader.opened, 0);
        assert_eq!(vm.spaces_created(), 0);
    }

    #[test]
    #[should_panic(expected = "already has an address space")]
    fn test_existing_space_is_a_bug() {
        let mut loader = StubLoader::new();
        let mut vm = SoftSpaceManager::new(ExecConfig::default());
        let mut entry = NoEntry;
        let mut process = Process::new(ProcessId(1), "kmenu");
        process.address_space = Some(vm.create().unwrap());

        let _ = ImageBuilder::new(&mut loader, &mut vm, &mut entry, Abi::MIPS32)
            .prepare(&mut process, &invocation(&["true"]));
    }

    #[test]
    fn test_copy_fault_reported() {
        struct ReadOnlyStack(SoftSpaceManager);

        impl AddressSpaceManager for ReadOnlyStack {
            type Space = SoftAddressSpace;

            fn create(&mut self) -> ExecResult<SoftAddressSpace> {
                self.0.create()
            }

            fn activate(&mut self, space: &SoftAddressSpace) {
                self.0.activate(space)
            }

            // claims a stack without mapping one
            fn define_stack(&mut self, _space: &mut SoftAddressSpace) -> ExecResult<VirtAddr> {
                Ok(VirtAddr::new(0x8000_0000))
            }
        }

        let mut loader = StubLoader::new();
        let mut vm = ReadOnlyStack(SoftSpaceManager::new(ExecConfig::default()));
        let mut entry = NoEntry;
        let mut process = Process::new(ProcessId(1), "kmenu");

        let err = run_program(&mut process, &mut loader, &mut vm, &mut entry, Abi::MIPS32, "/bin/true", &["true"]);
        assert_eq!(err, ExecError::BadAddress);

        let space = process.address_space.as_mut().unwrap();
        assert_eq!(space.copy_out(b"x", VirtAddr::new(0x7fff_fff0)), Err(ExecError::BadAddress));
    }
}
