use procimage_arch::{Abi, TargetArch};

/// Pages reserved for a fresh user stack.
pub const DEFAULT_STACK_PAGES: usize = 18;

/// Pages one address space may map in total, page-table page included.
pub const DEFAULT_PAGE_BUDGET: usize = 1024;

/// Knobs for building process images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecConfig {
    pub abi: Abi,
    pub stack_pages: usize,
    pub page_budget: usize,
}

impl ExecConfig {
    pub const fn for_arch(arch: TargetArch) -> Self {
        Self {
            abi: Abi::for_arch(arch),
            stack_pages: DEFAULT_STACK_PAGES,
            page_budget: DEFAULT_PAGE_BUDGET,
        }
    }

    /// Pick the architecture from `PROCIMAGE_ARCH` at build time, falling
    /// back to the reference MIPS layout.
    pub fn from_env() -> Self {
        Self::from_arch_name(option_env!("PROCIMAGE_ARCH"))
    }

    fn from_arch_name(name: Option<&str>) -> Self {
        let arch = name
            .and_then(TargetArch::from_name)
            .unwrap_or(TargetArch::Mips32);
        Self::for_arch(arch)
    }

    pub fn with_stack_pages(mut self, pages: usize) -> Self {
        self.stack_pages = pages;
        self
    }

    pub fn with_page_budget(mut self, pages: usize) -> Self {
        self.page_budget = pages;
        self
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self::for_arch(TargetArch::Mips32)
    }
}
