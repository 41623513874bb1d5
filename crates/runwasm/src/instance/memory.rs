use crate::interpreter::Trap;

/// Size of one wasm page in bytes.
pub const PAGE_SIZE: usize = 65_536;

/// Hard ceiling for a 32-bit linear memory, in pages.
const MAX_PAGES: u64 = 65_536;

/// A linear memory owned by an instance.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    max_pages: u64,
}

impl Memory {
    pub(crate) fn new(min_pages: u64, max_pages: Option<u64>) -> Result<Self, anyhow::Error> {
        let max_pages = max_pages.unwrap_or(MAX_PAGES).min(MAX_PAGES);
        anyhow::ensure!(
            min_pages <= max_pages,
            "memory minimum {min_pages} exceeds maximum {max_pages} pages"
        );
        Ok(Self {
            bytes: vec![0; min_pages as usize * PAGE_SIZE],
            max_pages,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Current size in pages.
    pub fn pages(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE) as u32
    }

    /// Grow by `delta` pages, returning the previous size or `None` if
    /// the maximum would be exceeded.
    pub(crate) fn grow(&mut self, delta: u32) -> Option<u32> {
        let old = self.pages();
        let new = old as u64 + delta as u64;
        if new > self.max_pages {
            return None;
        }
        self.bytes.resize(new as usize * PAGE_SIZE, 0);
        Some(old)
    }

    /// Bounds-checked byte range `[addr, addr + len)`.
    fn range(&self, addr: u64, len: u64) -> Result<std::ops::Range<usize>, Trap> {
        let end = addr.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.bytes.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(addr as usize..end as usize)
    }

    pub(crate) fn load<const N: usize>(&self, addr: u64) -> Result<[u8; N], Trap> {
        let range = self.range(addr, N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[range]);
        Ok(out)
    }

    pub(crate) fn store(&mut self, addr: u64, bytes: &[u8]) -> Result<(), Trap> {
        let range = self.range(addr, bytes.len() as u64)?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn fill(&mut self, dst: u64, value: u8, len: u64) -> Result<(), Trap> {
        let range = self.range(dst, len)?;
        self.bytes[range].fill(value);
        Ok(())
    }

    pub(crate) fn copy_within(&mut self, dst: u64, src: u64, len: u64) -> Result<(), Trap> {
        let src = self.range(src, len)?;
        let dst = self.range(dst, len)?;
        self.bytes.copy_within(src, dst.start);
        Ok(())
    }

    /// Copy `len` bytes of `segment` starting at `src` into memory at `dst`.
    pub(crate) fn init(&mut self, dst: u64, segment: &[u8], src: u64, len: u64) -> Result<(), Trap> {
        let src_end = src.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        if src_end > segment.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        self.store(dst, &segment[src as usize..src_end as usize])
    }

    /// Text stored at the start of memory, up to the first NUL byte.
    pub fn read_c_str(&self) -> String {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bytes.len());
        String::from_utf8_lossy(&self.bytes[..end]).into_owned()
    }
}
