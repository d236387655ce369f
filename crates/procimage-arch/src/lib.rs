#![cfg_attr(not(test), no_std)]

//! Architecture parameters shared by the process-image builder.
//!
//! Nothing in here touches hardware. The [`Abi`] record carries every
//! word-size, alignment and byte-order decision the initial user stack
//! depends on, so the layout code never hard-codes them.

use core::fmt;
use core::ops::Deref;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn align_up(&self, align: u64) -> VirtAddr {
        VirtAddr((self.0 + align - 1) & !(align - 1))
    }

    pub fn align_down(&self, align: u64) -> VirtAddr {
        VirtAddr(self.0 & !(align - 1))
    }

    pub fn is_aligned(&self, align: u64) -> bool {
        self.0 % align == 0
    }

    pub fn checked_add(self, bytes: u64) -> Option<VirtAddr> {
        self.0.checked_add(bytes).map(VirtAddr)
    }

    pub fn checked_sub(self, bytes: u64) -> Option<VirtAddr> {
        self.0.checked_sub(bytes).map(VirtAddr)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr(0x{:x})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    Mips32,
    X86_64,
    AArch64,
}

impl TargetArch {
    pub fn name(&self) -> &'static str {
        match self {
            TargetArch::Mips32 => "mips",
            TargetArch::X86_64 => "x86_64",
            TargetArch::AArch64 => "aarch64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mips" | "mips32" => Some(TargetArch::Mips32),
            "x86_64" => Some(TargetArch::X86_64),
            "aarch64" | "arm64" => Some(TargetArch::AArch64),
            _ => None,
        }
    }

    /// `e_machine` value an executable for this architecture carries.
    pub fn elf_machine(&self) -> u16 {
        match self {
            TargetArch::Mips32 => 8,
            TargetArch::X86_64 => 62,
            TargetArch::AArch64 => 183,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Layout rules for the initial user stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abi {
    pub arch: TargetArch,
    /// Width in bytes of a user pointer, and of each argv slot.
    pub word_size: usize,
    /// Boundary the argument string area starts on.
    pub string_align: u64,
    /// Boundary the argv table starts on.
    pub pointer_align: u64,
    /// Boundary the initial stack pointer lands on.
    pub stack_align: u64,
    pub endian: Endianness,
    /// Highest user address; the stack grows down from here.
    pub user_stack_top: VirtAddr,
}

impl Abi {
    /// 32-bit big-endian MIPS, the reference layout.
    pub const MIPS32: Abi = Abi {
        arch: TargetArch::Mips32,
        word_size: 4,
        string_align: 8,
        pointer_align: 4,
        stack_align: 4,
        endian: Endianness::Big,
        user_stack_top: VirtAddr::new(0x8000_0000),
    };

    pub const X86_64: Abi = Abi {
        arch: TargetArch::X86_64,
        word_size: 8,
        string_align: 8,
        pointer_align: 8,
        stack_align: 16,
        endian: Endianness::Little,
        user_stack_top: VirtAddr::new(0x0000_8000_0000_0000),
    };

    pub const AARCH64: Abi = Abi {
        arch: TargetArch::AArch64,
        word_size: 8,
        string_align: 8,
        pointer_align: 8,
        stack_align: 16,
        endian: Endianness::Little,
        user_stack_top: VirtAddr::new(0x0000_8000_0000_0000),
    };

    pub const fn for_arch(arch: TargetArch) -> Abi {
        match arch {
            TargetArch::Mips32 => Abi::MIPS32,
            TargetArch::X86_64 => Abi::X86_64,
            TargetArch::AArch64 => Abi::AARCH64,
        }
    }

    /// All alignments are powers of two, the stack alignment is a multiple
    /// of the pointer alignment, and a word is a whole number of
    /// pointer-alignment units.
    pub fn is_consistent(&self) -> bool {
        (self.word_size == 4 || self.word_size == 8)
            && self.string_align.is_power_of_two()
            && self.pointer_align.is_power_of_two()
            && self.stack_align.is_power_of_two()
            && self.stack_align % self.pointer_align == 0
            && (self.word_size as u64) % self.pointer_align == 0
            && self.user_stack_top.is_aligned(self.string_align)
    }

    pub fn word_bytes(&self) -> u64 {
        self.word_size as u64
    }

    /// Whether `value` can be stored in one user word.
    pub fn fits_word(&self, value: u64) -> bool {
        self.word_size == 8 || value <= u64::from(u32::MAX)
    }

    /// Encode `value` as a user word. Values wider than the word are
    /// truncated; check with [`Abi::fits_word`] first.
    pub fn encode_word(&self, value: u64) -> WordBytes {
        let mut bytes = [0u8; 8];
        match (self.word_size, self.endian) {
            (4, Endianness::Little) => bytes[..4].copy_from_slice(&(value as u32).to_le_bytes()),
            (4, Endianness::Big) => bytes[..4].copy_from_slice(&(value as u32).to_be_bytes()),
            (_, Endianness::Little) => bytes.copy_from_slice(&value.to_le_bytes()),
            (_, Endianness::Big) => bytes.copy_from_slice(&value.to_be_bytes()),
        }
        WordBytes {
            bytes,
            len: self.word_size,
        }
    }

    /// Inverse of [`Abi::encode_word`]. `bytes` must hold at least one word.
    pub fn decode_word(&self, bytes: &[u8]) -> Option<u64> {
        let raw = bytes.get(..self.word_size)?;
        let mut word = [0u8; 8];
        Some(match (self.word_size, self.endian) {
            (4, Endianness::Little) => {
                word[..4].copy_from_slice(raw);
                u64::from(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            }
            (4, Endianness::Big) => {
                word[..4].copy_from_slice(raw);
                u64::from(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
            }
            (_, Endianness::Little) => {
                word.copy_from_slice(raw);
                u64::from_le_bytes(word)
            }
            (_, Endianness::Big) => {
                word.copy_from_slice(raw);
                u64::from_be_bytes(word)
            }
        })
    }
}

impl Default for Abi {
    fn default() -> Self {
        Abi::MIPS32
    }
}

/// One encoded user word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordBytes {
    bytes: [u8; 8],
    len: usize,
}

impl Deref for WordBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Everything the first user instruction needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFrame {
    pub argc: usize,
    pub argv: VirtAddr,
    pub stack_pointer: VirtAddr,
    pub entry_point: VirtAddr,
}

impl fmt::Display for EntryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "argc={} argv=0x{:x} sp=0x{:x} entry=0x{:x}",
            self.argc, self.argv.0, self.stack_pointer.0, self.entry_point.0
        )
    }
}

/// Final privileged transfer into user mode.
pub trait UserModeEntry {
    /// Start executing `frame.entry_point` in user mode. There is no way
    /// back into the caller.
    fn enter_new_process(&mut self, frame: EntryFrame) -> !;
}
