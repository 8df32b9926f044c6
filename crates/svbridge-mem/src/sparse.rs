use std::collections::BTreeMap;

use thiserror::Error;

use crate::word::{PackedWord, WORD_BYTES};

/// Errors returned by [`SparseMemory`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// A word access used an address that is not 8-byte aligned.
    #[error("word access at 0x{addr:x} is not 8-byte aligned")]
    Misaligned { addr: u64 },

    /// The requested byte range wraps around the end of the 64-bit address space.
    #[error("access of {len} bytes at 0x{addr:x} overflows the address space")]
    AddressOverflow { addr: u64, len: usize },
}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// Sparse, byte-addressed memory stored as aligned 64-bit words.
///
/// Words that were never written are absent; the `read_*` accessors return zero for them while
/// [`SparseMemory::try_read_word`] reports their absence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SparseMemory {
    words: BTreeMap<u64, u64>,
}

const WORD: u64 = WORD_BYTES as u64;

fn check_aligned(addr: u64) -> MemoryResult<()> {
    if addr % WORD != 0 {
        return Err(MemoryError::Misaligned { addr });
    }
    Ok(())
}

fn check_range(addr: u64, len: usize) -> MemoryResult<()> {
    if len == 0 {
        return Ok(());
    }
    addr.checked_add(len as u64 - 1)
        .map(|_| ())
        .ok_or(MemoryError::AddressOverflow { addr, len })
}

impl SparseMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aligned address of the word containing byte `addr`.
    pub const fn word_base(addr: u64) -> u64 {
        addr & !(WORD - 1)
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains_word(&self, addr: u64) -> bool {
        self.words.contains_key(&addr)
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Iterates over `(address, value)` pairs of every stored word in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.words.iter().map(|(&addr, &value)| (addr, value))
    }

    pub fn write_word(&mut self, addr: u64, value: u64) -> MemoryResult<()> {
        check_aligned(addr)?;
        self.words.insert(addr, value);
        Ok(())
    }

    /// Reads the word at `addr`, treating an absent word as zero.
    pub fn read_word(&self, addr: u64) -> MemoryResult<u64> {
        Ok(self.try_read_word(addr)?.unwrap_or(0))
    }

    /// Reads the word at `addr` without defaulting; `None` means it was never written.
    pub fn try_read_word(&self, addr: u64) -> MemoryResult<Option<u64>> {
        check_aligned(addr)?;
        Ok(self.words.get(&addr).copied())
    }

    pub fn remove_word(&mut self, addr: u64) -> MemoryResult<Option<u64>> {
        check_aligned(addr)?;
        Ok(self.words.remove(&addr))
    }

    /// Writes consecutive words starting at `base`.
    pub fn write_words(&mut self, base: u64, words: &[PackedWord]) -> MemoryResult<()> {
        check_aligned(base)?;
        check_range(base, words.len() * WORD_BYTES)?;
        for (i, word) in words.iter().enumerate() {
            self.words.insert(base + i as u64 * WORD, word.get());
        }
        Ok(())
    }

    /// Stores explicit zero words over `count` words starting at `base`.
    ///
    /// Unlike leaving the range unwritten, this makes the words present in the image.
    pub fn zero_words(&mut self, base: u64, count: usize) -> MemoryResult<()> {
        check_aligned(base)?;
        check_range(base, count * WORD_BYTES)?;
        for i in 0..count as u64 {
            self.words.insert(base + i * WORD, 0);
        }
        Ok(())
    }

    /// Reads bytes starting at any address. Unwritten bytes read as zero.
    pub fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> MemoryResult<()> {
        check_range(addr, dst.len())?;
        for (i, byte) in dst.iter_mut().enumerate() {
            let a = addr + i as u64;
            let word = self.words.get(&Self::word_base(a)).copied().unwrap_or(0);
            *byte = (word >> ((a % WORD) * 8)) as u8;
        }
        Ok(())
    }

    /// Writes bytes starting at any address, merging into the surrounding words.
    pub fn write_bytes(&mut self, addr: u64, src: &[u8]) -> MemoryResult<()> {
        check_range(addr, src.len())?;
        for (i, &byte) in src.iter().enumerate() {
            let a = addr + i as u64;
            let shift = (a % WORD) * 8;
            let word = self.words.entry(Self::word_base(a)).or_insert(0);
            *word = (*word & !(0xFFu64 << shift)) | (u64::from(byte) << shift);
        }
        Ok(())
    }

    pub fn read_u8(&self, addr: u64) -> MemoryResult<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&self, addr: u64) -> MemoryResult<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&self, addr: u64) -> MemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&self, addr: u64) -> MemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> MemoryResult<()> {
        self.write_bytes(addr, &[value])
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> MemoryResult<()> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> MemoryResult<()> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> MemoryResult<()> {
        self.write_bytes(addr, &value.to_le_bytes())
    }
}
