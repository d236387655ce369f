//! Shared fixtures: tiny hand-assembled executables and an entry stub that
//! unwinds with the frame it was handed.

#![allow(dead_code)]

use std::panic::{self, AssertUnwindSafe};

use procimage::{EntryFrame, UserModeEntry};

pub const MIPS_TEXT: u32 = 0x0040_0000;
pub const MIPS_CODE: &[u8] = &[0x27, 0xbd, 0xff, 0xe8, 0x03, 0xe0, 0x00, 0x08];

pub const X86_TEXT: u64 = 0x0040_1000;
pub const X86_CODE: &[u8] = &[0x31, 0xc0, 0xc3];

/// ELF32 big-endian MIPS executable, one R+X segment at `MIPS_TEXT` with
/// `bss` zero bytes past the code.
pub fn mips_executable(entry: u32, bss: u32) -> Vec<u8> {
    let mut image = vec![0u8; 52 + 32];
    image[0..4].copy_from_slice(b"\x7FELF");
    image[4] = 1;
    image[5] = 2;
    image[6] = 1;
    put_be16(&mut image, 16, 2);
    put_be16(&mut image, 18, 8);
    put_be32(&mut image, 20, 1);
    put_be32(&mut image, 24, entry);
    put_be32(&mut image, 28, 52);
    put_be16(&mut image, 40, 52);
    put_be16(&mut image, 42, 32);
    put_be16(&mut image, 44, 1);

    let ph = 52;
    put_be32(&mut image, ph, 1);
    put_be32(&mut image, ph + 4, 84);
    put_be32(&mut image, ph + 8, MIPS_TEXT);
    put_be32(&mut image, ph + 12, MIPS_TEXT);
    put_be32(&mut image, ph + 16, MIPS_CODE.len() as u32);
    put_be32(&mut image, ph + 20, MIPS_CODE.len() as u32 + bss);
    put_be32(&mut image, ph + 24, 0x5);
    put_be32(&mut image, ph + 28, 0x1000);

    image.extend_from_slice(MIPS_CODE);
    image
}

/// ELF64 little-endian x86-64 executable, one R+X segment at `X86_TEXT`.
pub fn x86_64_executable(entry: u64) -> Vec<u8> {
    let mut image = vec![0u8; 64 + 56];
    image[0..4].copy_from_slice(b"\x7FELF");
    image[4] = 2;
    image[5] = 1;
    image[6] = 1;
    image[16..18].copy_from_slice(&2u16.to_le_bytes());
    image[18..20].copy_from_slice(&62u16.to_le_bytes());
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..32].copy_from_slice(&entry.to_le_bytes());
    image[32..40].copy_from_slice(&64u64.to_le_bytes());
    image[52..54].copy_from_slice(&64u16.to_le_bytes());
    image[54..56].copy_from_slice(&56u16.to_le_bytes());
    image[56..58].copy_from_slice(&1u16.to_le_bytes());

    let ph = 64;
    image[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes());
    image[ph + 4..ph + 8].copy_from_slice(&0x5u32.to_le_bytes());
    image[ph + 8..ph + 16].copy_from_slice(&120u64.to_le_bytes());
    image[ph + 16..ph + 24].copy_from_slice(&X86_TEXT.to_le_bytes());
    image[ph + 24..ph + 32].copy_from_slice(&X86_TEXT.to_le_bytes());
    image[ph + 32..ph + 40].copy_from_slice(&(X86_CODE.len() as u64).to_le_bytes());
    image[ph + 40..ph + 48].copy_from_slice(&(X86_CODE.len() as u64).to_le_bytes());
    image[ph + 48..ph + 56].copy_from_slice(&0x1000u64.to_le_bytes());

    image.extend_from_slice(X86_CODE);
    image
}

fn put_be16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_be32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Stands in for the jump to user mode by unwinding with the frame.
pub struct PanicEntry;

impl UserModeEntry for PanicEntry {
    fn enter_new_process(&mut self, frame: EntryFrame) -> ! {
        panic::panic_any(frame)
    }
}

/// Run `f`, which must either return an error or reach [`PanicEntry`].
pub fn capture_entry<T, F: FnOnce() -> T>(f: F) -> Result<EntryFrame, T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(returned) => Err(returned),
        Err(payload) => match payload.downcast::<EntryFrame>() {
            Ok(frame) => Ok(*frame),
            Err(other) => panic::resume_unwind(other),
        },
    }
}
