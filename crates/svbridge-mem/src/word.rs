use crate::element::ElementWidth;

/// Size of one unit of transfer into synthetic memory.
pub const WORD_BYTES: usize = 8;

/// An 8-byte unit formed by concatenating sub-word elements, lowest address first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PackedWord(u64);

impl PackedWord {
    pub const ZERO: PackedWord = PackedWord(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Builds a word from up to 8 little-endian bytes, zero-extending a short prefix.
    pub fn from_le_prefix(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= WORD_BYTES);
        let mut buf = [0u8; WORD_BYTES];
        let len = bytes.len().min(WORD_BYTES);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self(u64::from_le_bytes(buf))
    }

    pub fn to_le_bytes(self) -> [u8; WORD_BYTES] {
        self.0.to_le_bytes()
    }

    /// Packs `elements` low-to-high; missing trailing elements are zero.
    pub fn pack(elements: &[u64], width: ElementWidth) -> Self {
        debug_assert!(elements.len() <= width.elements_per_word());
        let mut raw = 0u64;
        for (i, value) in elements.iter().take(width.elements_per_word()).enumerate() {
            raw |= (value & width.mask()) << (i as u32 * width.bits());
        }
        Self(raw)
    }

    /// Returns element `index` of this word interpreted as `width`-sized elements.
    pub fn element(self, index: usize, width: ElementWidth) -> u64 {
        debug_assert!(index < width.elements_per_word());
        if width == ElementWidth::Double {
            return self.0;
        }
        (self.0 >> (index as u32 * width.bits())) & width.mask()
    }
}

impl From<u64> for PackedWord {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<PackedWord> for u64 {
    fn from(word: PackedWord) -> Self {
        word.0
    }
}

/// Accumulates elements low-to-high and emits a word whenever 8 bytes are filled.
///
/// All elements pushed into one builder share a width that divides the word size, so an element
/// never straddles two words.
#[derive(Debug)]
pub(crate) struct WordBuilder {
    words: Vec<PackedWord>,
    current: u64,
    fill: usize,
}

impl WordBuilder {
    pub(crate) fn with_capacity(words: usize) -> Self {
        Self {
            words: Vec::with_capacity(words),
            current: 0,
            fill: 0,
        }
    }

    pub(crate) fn push(&mut self, bits: u64, width: ElementWidth) {
        self.current |= (bits & width.mask()) << (self.fill as u32 * 8);
        self.fill += width.bytes();
        if self.fill == WORD_BYTES {
            self.words.push(PackedWord(self.current));
            self.current = 0;
            self.fill = 0;
        }
    }

    /// Flushes a trailing partial word (zero-extended) and returns every word built.
    pub(crate) fn finish(mut self) -> Vec<PackedWord> {
        if self.fill > 0 {
            self.words.push(PackedWord(self.current));
        }
        self.words
    }
}
