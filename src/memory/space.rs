//! Software-backed user address spaces.
//!
//! Each mapping is a page-rounded region holding its own bytes. This is the
//! address-space backend the in-kernel loader and the tests run against; a
//! hardware backend only has to provide the same [`AddressSpaceManager`] and
//! [`UserMemory`] contracts.

use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use procimage_arch::Abi;

use super::paging::{pages_spanned, PageFlags};
use super::{AddressSpaceManager, UserMemory, VirtAddr, PAGE_SIZE};
use crate::config::ExecConfig;
use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(pub usize);

#[derive(Debug, Clone)]
pub struct Region {
    pub base: VirtAddr,
    pub flags: PageFlags,
    data: Vec<u8>,
}

impl Region {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn end(&self) -> VirtAddr {
        VirtAddr::new(self.base.0 + self.data.len() as u64)
    }

    fn contains_range(&self, addr: VirtAddr, len: usize) -> bool {
        match addr.0.checked_add(len as u64) {
            Some(end) => addr.0 >= self.base.0 && end <= self.end().0,
            None => false,
        }
    }

    fn overlaps(&self, start: VirtAddr, end: VirtAddr) -> bool {
        start.0 < self.end().0 && self.base.0 < end.0
    }

    fn offset_of(&self, addr: VirtAddr) -> usize {
        (addr.0 - self.base.0) as usize
    }
}

#[derive(Debug, Clone)]
pub struct SoftAddressSpace {
    id: SpaceId,
    regions: Vec<Region>,
    user_limit: VirtAddr,
    page_budget: usize,
    pages_used: usize,
    stack_top: Option<VirtAddr>,
}

impl SoftAddressSpace {
    /// An empty space whose user half ends at `user_limit`. The top-level
    /// page table is charged against `page_budget` up front.
    pub fn new(id: SpaceId, user_limit: VirtAddr, page_budget: usize) -> Self {
        Self {
            id,
            regions: Vec::new(),
            user_limit,
            page_budget,
            pages_used: 1,
            stack_top: None,
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn pages_used(&self) -> usize {
        self.pages_used
    }

    pub fn stack_top(&self) -> Option<VirtAddr> {
        self.stack_top
    }

    /// Map `[base, base + size)`, rounded out to whole pages, zero-filled.
    pub fn define_region(&mut self, base: VirtAddr, size: usize, flags: PageFlags) -> ExecResult<()> {
        if size == 0 {
            return Err(ExecError::InvalidArgument);
        }

        let raw_end = base
            .checked_add(size as u64)
            .ok_or(ExecError::BadAddress)?;
        if raw_end > self.user_limit {
            return Err(ExecError::BadAddress);
        }

        let start = base.align_down(PAGE_SIZE as u64);
        let end = raw_end.align_up(PAGE_SIZE as u64);
        if self.regions.iter().any(|region| region.overlaps(start, end)) {
            return Err(ExecError::BadAddress);
        }

        let pages = pages_spanned(base, size).ok_or(ExecError::BadAddress)?;
        if self.pages_used + pages > self.page_budget {
            return Err(ExecError::OutOfMemory);
        }
        self.pages_used += pages;

        self.regions.push(Region {
            base: start,
            flags: flags | PageFlags::PRESENT | PageFlags::USER_ACCESSIBLE,
            data: vec![0; (end.0 - start.0) as usize],
        });
        self.regions.sort_by(|a, b| a.base.cmp(&b.base));
        Ok(())
    }

    /// Write segment contents during loading; page permissions do not apply.
    pub fn load_bytes(&mut self, dst: VirtAddr, bytes: &[u8]) -> ExecResult<()> {
        let region = self
            .region_for_mut(dst, bytes.len())
            .ok_or(ExecError::BadAddress)?;
        let offset = region.offset_of(dst);
        region.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_bytes(&self, addr: VirtAddr, len: usize) -> ExecResult<&[u8]> {
        let region = self.region_for(addr, len).ok_or(ExecError::BadAddress)?;
        let offset = region.offset_of(addr);
        Ok(&region.data[offset..offset + len])
    }

    pub fn read_word(&self, abi: &Abi, addr: VirtAddr) -> ExecResult<u64> {
        let bytes = self.read_bytes(addr, abi.word_size)?;
        abi.decode_word(bytes).ok_or(ExecError::BadAddress)
    }

    /// Bytes of the NUL-terminated string at `addr`, terminator excluded.
    pub fn read_c_str(&self, addr: VirtAddr) -> ExecResult<&[u8]> {
        let region = self.region_for(addr, 1).ok_or(ExecError::BadAddress)?;
        let tail = &region.data[region.offset_of(addr)..];
        let len = tail
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(ExecError::BadAddress)?;
        Ok(&tail[..len])
    }

    fn region_for(&self, addr: VirtAddr, len: usize) -> Option<&Region> {
        self.regions
            .iter()
            .find(|region| region.contains_range(addr, len))
    }

    fn region_for_mut(&mut self, addr: VirtAddr, len: usize) -> Option<&mut Region> {
        self.regions
            .iter_mut()
            .find(|region| region.contains_range(addr, len))
    }
}

impl UserMemory for SoftAddressSpace {
    fn copy_out(&mut self, src: &[u8], dst: VirtAddr) -> ExecResult<()> {
        let region = self
            .region_for_mut(dst, src.len())
            .filter(|region| region.flags.is_user_writable())
            .ok_or(ExecError::BadAddress)?;
        let offset = region.offset_of(dst);
        region.data[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

pub struct SoftSpaceManager {
    config: ExecConfig,
    next_id: usize,
    created: usize,
    active: Option<SpaceId>,
}

impl SoftSpaceManager {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            config,
            next_id: 1,
            created: 0,
            active: None,
        }
    }

    pub fn spaces_created(&self) -> usize {
        self.created
    }

    pub fn active(&self) -> Option<SpaceId> {
        self.active
    }
}

impl AddressSpaceManager for SoftSpaceManager {
    type Space = SoftAddressSpace;

    fn create(&mut self) -> ExecResult<SoftAddressSpace> {
        if self.config.page_budget == 0 {
            return Err(ExecError::OutOfMemory);
        }

        let id = SpaceId(self.next_id);
        self.next_id += 1;
        self.created += 1;
        debug!("address space {} created", id.0);
        Ok(SoftAddressSpace::new(
            id,
            self.config.abi.user_stack_top,
            self.config.page_budget,
        ))
    }

    fn activate(&mut self, space: &SoftAddressSpace) {
        self.active = Some(space.id());
    }

    fn define_stack(&mut self, space: &mut SoftAddressSpace) -> ExecResult<VirtAddr> {
        if let Some(top) = space.stack_top() {
            return Ok(top);
        }
        if self.config.stack_pages == 0 {
            return Err(ExecError::OutOfMemory);
        }

        let top = self.config.abi.user_stack_top;
        let size = self.config.stack_pages * PAGE_SIZE;
        let base = top
            .checked_sub(size as u64)
            .ok_or(ExecError::OutOfMemory)?;
        space.define_region(base, size, PageFlags::user(true, false))?;
        space.stack_top = Some(top);
        debug!("address space {}: stack {}..{}", space.id().0, base, top);
        Ok(top)
    }
}
