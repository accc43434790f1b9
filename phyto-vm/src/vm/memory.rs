use tracing::debug;

use super::{VmError, VmResult};

pub const PAGE_SIZE: usize = 64 * 1024;

/// Handle returned by `Memory::allocate`.
pub type PageHandle = u64;

/// One fixed-size, zero-initialised block of VM memory.
///
/// Accesses are bounds-checked against `PAGE_SIZE`; multi-byte values are little-endian.
pub struct Page {
    handle: PageHandle,
    bytes: Box<[u8]>,
}

impl Page {
    fn new(handle: PageHandle) -> Self {
        Self {
            handle,
            bytes: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    pub fn handle(&self) -> PageHandle {
        self.handle
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Fails unless `address..address + len` lies inside the page.
    pub fn check_range(&self, address: usize, len: usize) -> VmResult<()> {
        match address.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(()),
            _ => Err(VmError::PageOutOfBounds {
                handle: self.handle,
                address,
                len,
            }),
        }
    }

    pub fn read_bytes(&self, address: usize, len: usize) -> VmResult<&[u8]> {
        self.check_range(address, len)?;
        Ok(&self.bytes[address..address + len])
    }

    pub fn write_bytes(&mut self, address: usize, data: &[u8]) -> VmResult<()> {
        self.check_range(address, data.len())?;
        self.bytes[address..address + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_f64(&self, address: usize) -> VmResult<f64> {
        let bytes = self.read_bytes(address, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    pub fn write_f64(&mut self, address: usize, value: f64) -> VmResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("handle", &self.handle)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Arena of pages indexed by handle. Freed slots stay empty; handles are never reused.
#[derive(Debug, Default)]
pub struct Memory {
    slots: Vec<Option<Page>>,
    live: usize,
    max_pages: Option<usize>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_pages: Option<usize>) -> Self {
        Self {
            max_pages,
            ..Self::default()
        }
    }

    /// Number of currently allocated pages.
    pub fn live_pages(&self) -> usize {
        self.live
    }

    pub fn ensure_can_allocate(&self) -> VmResult<()> {
        match self.max_pages {
            Some(max) if self.live >= max => Err(VmError::PageLimit(max)),
            _ => Ok(()),
        }
    }

    pub fn allocate(&mut self) -> VmResult<PageHandle> {
        self.ensure_can_allocate()?;
        let handle = self.slots.len() as PageHandle;
        self.slots.push(Some(Page::new(handle)));
        self.live += 1;
        debug!(handle, live = self.live, "page allocated");
        Ok(handle)
    }

    /// Releases a page. Freeing a handle that is not live is a no-op.
    pub fn free(&mut self, handle: PageHandle) {
        let Some(slot) = self.slot_mut(handle) else {
            return;
        };
        if slot.take().is_some() {
            self.live -= 1;
            debug!(handle, live = self.live, "page freed");
        }
    }

    pub fn exists(&self, handle: PageHandle) -> bool {
        self.get(handle).is_ok()
    }

    pub fn get(&self, handle: PageHandle) -> VmResult<&Page> {
        usize::try_from(handle)
            .ok()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
            .ok_or(VmError::PageNotFound(handle))
    }

    pub fn get_mut(&mut self, handle: PageHandle) -> VmResult<&mut Page> {
        self.slot_mut(handle)
            .and_then(Option::as_mut)
            .ok_or(VmError::PageNotFound(handle))
    }

    /// Live pages in handle order.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.slots.iter().flatten()
    }

    fn slot_mut(&mut self, handle: PageHandle) -> Option<&mut Option<Page>> {
        usize::try_from(handle)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
    }
}
