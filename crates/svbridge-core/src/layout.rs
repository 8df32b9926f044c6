use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use svbridge_mem::{BufferShape, WORD_BYTES};

use crate::error::StagingError;
use crate::machine::{DEFAULT_RETURN_REGISTER, GPR_COUNT};

/// First synthetic address handed out by the default allocator.
pub const DEFAULT_REGION_BASE: u64 = 0x10_0000;

/// Default region alignment. Small buffers land at `0x100000`, `0x200000`, `0x300000`, ...
pub const DEFAULT_REGION_ALIGN: u64 = 0x10_0000;

const WORD: u64 = WORD_BYTES as u64;

/// Which way a buffer's contents travel across the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub const fn is_input(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub const fn is_output(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// A buffer argument: its shape, the register receiving its synthetic base address, and that
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSlot {
    pub name: String,
    pub register: usize,
    pub shape: BufferShape,
    pub direction: Direction,
    pub base: u64,
}

impl BufferSlot {
    /// Byte range of the packed image, rounded up to whole words.
    pub fn span(&self) -> Range<u64> {
        self.base..self.base + self.shape.packed_words() as u64 * WORD
    }

    /// Aligned address of packed word `index`.
    pub fn word_addr(&self, index: usize) -> u64 {
        self.base + index as u64 * WORD
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarSource {
    /// Supplied by the caller, in declaration order.
    Argument,
    /// Packed row pitch in bytes of the named buffer.
    RowPitch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarSlot {
    pub name: String,
    pub register: usize,
    pub source: ScalarSource,
}

/// Places buffers into non-overlapping, aligned regions of the synthetic address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAllocator {
    base: u64,
    align: u64,
}

impl Default for AddressAllocator {
    fn default() -> Self {
        Self {
            base: DEFAULT_REGION_BASE,
            align: DEFAULT_REGION_ALIGN,
        }
    }
}

impl AddressAllocator {
    pub const fn new(base: u64, align: u64) -> Self {
        Self { base, align }
    }

    pub const fn base(&self) -> u64 {
        self.base
    }

    pub const fn align(&self) -> u64 {
        self.align
    }

    fn validate(&self) -> Result<(), StagingError> {
        if !self.align.is_power_of_two() || self.align < WORD {
            return Err(StagingError::InvalidAlignment(self.align));
        }
        Ok(())
    }

    fn align_up(&self, addr: u64) -> Option<u64> {
        addr.checked_add(self.align - 1).map(|a| a & !(self.align - 1))
    }

    /// Assigns a base to every `(name, len)` request in order, skipping `reserved` ranges.
    fn place(
        &self,
        requests: &[(&str, u64)],
        reserved: &[Range<u64>],
    ) -> Result<Vec<u64>, StagingError> {
        self.validate()?;
        let mut cursor = self.base;
        let mut bases = Vec::with_capacity(requests.len());
        for &(name, len) in requests {
            let exhausted = || StagingError::AddressSpaceExhausted {
                buffer: name.to_string(),
                len,
            };
            let mut candidate = self.align_up(cursor).ok_or_else(exhausted)?;
            loop {
                let end = candidate.checked_add(len).ok_or_else(exhausted)?;
                match reserved
                    .iter()
                    .find(|r| ranges_overlap(&(candidate..end), r) || r.contains(&candidate))
                {
                    Some(hit) => candidate = self.align_up(hit.end).ok_or_else(exhausted)?,
                    None => break,
                }
            }
            bases.push(candidate);
            // Empty buffers still get distinct addresses.
            cursor = candidate
                .checked_add(len.max(WORD))
                .ok_or_else(exhausted)?;
        }
        Ok(bases)
    }
}

fn ranges_overlap(a: &Range<u64>, b: &Range<u64>) -> bool {
    !a.is_empty() && !b.is_empty() && a.start < b.end && b.start < a.end
}

/// Per-kernel description of where every argument lives in the simulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    kernel: String,
    scalars: Vec<ScalarSlot>,
    buffers: Vec<BufferSlot>,
    return_register: Option<usize>,
}

impl StagingLayout {
    pub fn builder(kernel: impl Into<String>) -> StagingLayoutBuilder {
        StagingLayoutBuilder {
            kernel: kernel.into(),
            scalars: Vec::new(),
            buffers: Vec::new(),
            return_register: Some(DEFAULT_RETURN_REGISTER),
            allocator: AddressAllocator::default(),
        }
    }

    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    pub fn scalars(&self) -> &[ScalarSlot] {
        &self.scalars
    }

    pub fn buffers(&self) -> &[BufferSlot] {
        &self.buffers
    }

    pub fn buffer(&self, name: &str) -> Option<&BufferSlot> {
        self.buffers.iter().find(|b| b.name == name)
    }

    pub fn return_register(&self) -> Option<usize> {
        self.return_register
    }

    /// Number of scalars the caller must supply.
    pub fn argument_count(&self) -> usize {
        self.scalars
            .iter()
            .filter(|s| s.source == ScalarSource::Argument)
            .count()
    }

    /// Number of buffers the caller must supply (inputs and in/out buffers).
    pub fn input_count(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.direction.is_input())
            .count()
    }

    /// Fails if any buffer overlaps `range` (used for the code image).
    pub(crate) fn check_clear_of(&self, code: &Range<u64>) -> Result<(), StagingError> {
        for slot in &self.buffers {
            let span = slot.span();
            if ranges_overlap(&span, code) {
                return Err(StagingError::OverlapsCode {
                    buffer: slot.name.clone(),
                    span,
                    code: code.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_disjoint(&self) -> Result<(), StagingError> {
        for (i, a) in self.buffers.iter().enumerate() {
            for b in &self.buffers[i + 1..] {
                let (a_span, b_span) = (a.span(), b.span());
                if ranges_overlap(&a_span, &b_span) {
                    return Err(StagingError::Overlap {
                        first: a.name.clone(),
                        second: b.name.clone(),
                        first_span: a_span,
                        second_span: b_span,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PendingBuffer {
    name: String,
    register: usize,
    shape: BufferShape,
    direction: Direction,
    pinned: Option<u64>,
}

/// Builder for [`StagingLayout`]. Validation happens in [`StagingLayoutBuilder::build`].
#[derive(Debug, Clone)]
pub struct StagingLayoutBuilder {
    kernel: String,
    scalars: Vec<ScalarSlot>,
    buffers: Vec<PendingBuffer>,
    return_register: Option<usize>,
    allocator: AddressAllocator,
}

impl StagingLayoutBuilder {
    pub fn scalar(mut self, name: impl Into<String>, register: usize) -> Self {
        self.scalars.push(ScalarSlot {
            name: name.into(),
            register,
            source: ScalarSource::Argument,
        });
        self
    }

    /// A scalar filled with the packed row pitch (bytes) of `buffer`.
    pub fn row_pitch(
        mut self,
        name: impl Into<String>,
        register: usize,
        buffer: impl Into<String>,
    ) -> Self {
        self.scalars.push(ScalarSlot {
            name: name.into(),
            register,
            source: ScalarSource::RowPitch(buffer.into()),
        });
        self
    }

    pub fn buffer(
        mut self,
        name: impl Into<String>,
        register: usize,
        shape: BufferShape,
        direction: Direction,
    ) -> Self {
        self.buffers.push(PendingBuffer {
            name: name.into(),
            register,
            shape,
            direction,
            pinned: None,
        });
        self
    }

    pub fn input(self, name: impl Into<String>, register: usize, shape: BufferShape) -> Self {
        self.buffer(name, register, shape, Direction::In)
    }

    pub fn output(self, name: impl Into<String>, register: usize, shape: BufferShape) -> Self {
        self.buffer(name, register, shape, Direction::Out)
    }

    pub fn inout(self, name: impl Into<String>, register: usize, shape: BufferShape) -> Self {
        self.buffer(name, register, shape, Direction::InOut)
    }

    /// A buffer at a fixed synthetic address instead of an allocated one.
    pub fn pinned(
        mut self,
        name: impl Into<String>,
        register: usize,
        shape: BufferShape,
        direction: Direction,
        base: u64,
    ) -> Self {
        self.buffers.push(PendingBuffer {
            name: name.into(),
            register,
            shape,
            direction,
            pinned: Some(base),
        });
        self
    }

    pub fn return_register(mut self, register: usize) -> Self {
        self.return_register = Some(register);
        self
    }

    pub fn no_return_value(mut self) -> Self {
        self.return_register = None;
        self
    }

    pub fn allocator(mut self, allocator: AddressAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn build(self) -> Result<StagingLayout, StagingError> {
        let mut names = BTreeSet::new();
        let mut registers: BTreeMap<usize, &str> = BTreeMap::new();
        let inputs = self
            .scalars
            .iter()
            .map(|s| (s.name.as_str(), s.register))
            .chain(self.buffers.iter().map(|b| (b.name.as_str(), b.register)));
        for (name, register) in inputs {
            if !names.insert(name) {
                return Err(StagingError::DuplicateName(name.to_string()));
            }
            if register >= GPR_COUNT {
                return Err(StagingError::RegisterOutOfRange {
                    name: name.to_string(),
                    register,
                });
            }
            if let Some(first) = registers.insert(register, name) {
                return Err(StagingError::RegisterReused {
                    register,
                    first: first.to_string(),
                    second: name.to_string(),
                });
            }
        }
        if let Some(register) = self.return_register {
            if register >= GPR_COUNT {
                return Err(StagingError::RegisterOutOfRange {
                    name: "return value".to_string(),
                    register,
                });
            }
        }

        for scalar in &self.scalars {
            if let ScalarSource::RowPitch(buffer) = &scalar.source {
                if !self.buffers.iter().any(|b| &b.name == buffer) {
                    return Err(StagingError::UnknownBuffer {
                        scalar: scalar.name.clone(),
                        buffer: buffer.clone(),
                    });
                }
            }
        }

        let mut reserved = Vec::new();
        for pending in &self.buffers {
            pending
                .shape
                .validate()
                .map_err(|source| StagingError::Shape {
                    buffer: pending.name.clone(),
                    source,
                })?;
            if let Some(base) = pending.pinned {
                if base % WORD != 0 {
                    return Err(StagingError::MisalignedBase {
                        buffer: pending.name.clone(),
                        base,
                    });
                }
                let len = pending.shape.packed_words() as u64 * WORD;
                let end = base
                    .checked_add(len)
                    .ok_or_else(|| StagingError::AddressSpaceExhausted {
                        buffer: pending.name.clone(),
                        len,
                    })?;
                reserved.push(base..end);
            }
        }

        let requests: Vec<(&str, u64)> = self
            .buffers
            .iter()
            .filter(|b| b.pinned.is_none())
            .map(|b| (b.name.as_str(), b.shape.packed_words() as u64 * WORD))
            .collect();
        let mut placed = self.allocator.place(&requests, &reserved)?.into_iter();

        let mut buffers = Vec::with_capacity(self.buffers.len());
        for pending in self.buffers {
            let base = match pending.pinned {
                Some(base) => base,
                // One base per unpinned request, in order.
                None => placed.next().unwrap_or_default(),
            };
            tracing::trace!(
                kernel = %self.kernel,
                buffer = %pending.name,
                base,
                words = pending.shape.packed_words(),
                "placed buffer"
            );
            buffers.push(BufferSlot {
                name: pending.name,
                register: pending.register,
                shape: pending.shape,
                direction: pending.direction,
                base,
            });
        }

        let layout = StagingLayout {
            kernel: self.kernel,
            scalars: self.scalars,
            buffers,
            return_register: self.return_register,
        };
        layout.check_disjoint()?;
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svbridge_mem::ElementWidth;

    fn bytes(len: usize) -> BufferShape {
        BufferShape::linear(len, ElementWidth::Byte)
    }

    #[test]
    fn default_allocator_reproduces_fixed_convention() {
        let layout = StagingLayout::builder("xchacha_hchacha20")
            .output("out", 3, bytes(32))
            .input("in", 4, bytes(16))
            .input("key", 5, bytes(32))
            .build()
            .unwrap();
        let bases: Vec<_> = layout.buffers().iter().map(|b| b.base).collect();
        assert_eq!(bases, vec![0x10_0000, 0x20_0000, 0x30_0000]);
    }

    #[test]
    fn large_buffers_push_later_regions_up() {
        let layout = StagingLayout::builder("big")
            .input("a", 3, bytes(0x10_0001))
            .input("b", 4, bytes(8))
            .build()
            .unwrap();
        assert_eq!(layout.buffer("a").unwrap().base, 0x10_0000);
        assert_eq!(layout.buffer("b").unwrap().base, 0x30_0000);
    }

    #[test]
    fn allocation_skips_pinned_regions() {
        let layout = StagingLayout::builder("pinned")
            .pinned("fixed", 3, bytes(64), Direction::In, 0x10_0000)
            .input("auto", 4, bytes(64))
            .build()
            .unwrap();
        assert_eq!(layout.buffer("auto").unwrap().base, 0x20_0000);
    }

    #[test]
    fn overlapping_pinned_buffers_are_rejected() {
        let err = StagingLayout::builder("collide")
            .pinned("a", 3, bytes(64), Direction::In, 0x10_0000)
            .pinned("b", 4, bytes(8), Direction::Out, 0x10_0038)
            .build()
            .unwrap_err();
        assert!(matches!(err, StagingError::Overlap { ref first, ref second, .. }
            if first == "a" && second == "b"));
    }

    #[test]
    fn partial_words_count_towards_overlap() {
        // 9 bytes occupy two words, so a buffer at +8 collides.
        let err = StagingLayout::builder("tail")
            .pinned("a", 3, bytes(9), Direction::In, 0x1000)
            .pinned("b", 4, bytes(1), Direction::In, 0x1008)
            .build()
            .unwrap_err();
        assert!(matches!(err, StagingError::Overlap { .. }));
    }

    #[test]
    fn register_rules_are_enforced() {
        let err = StagingLayout::builder("k")
            .scalar("n", 3)
            .input("src", 3, bytes(4))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            StagingError::RegisterReused {
                register: 3,
                first: "n".to_string(),
                second: "src".to_string()
            }
        );

        let err = StagingLayout::builder("k")
            .scalar("n", GPR_COUNT)
            .build()
            .unwrap_err();
        assert!(matches!(err, StagingError::RegisterOutOfRange { .. }));

        let err = StagingLayout::builder("k")
            .scalar("x", 3)
            .scalar("x", 4)
            .build()
            .unwrap_err();
        assert_eq!(err, StagingError::DuplicateName("x".to_string()));
    }

    #[test]
    fn return_register_may_alias_an_argument() {
        let layout = StagingLayout::builder("vpx_get_mb_ss")
            .input("src", 3, BufferShape::linear(256, ElementWidth::Half))
            .build()
            .unwrap();
        assert_eq!(layout.return_register(), Some(DEFAULT_RETURN_REGISTER));
        assert_eq!(layout.input_count(), 1);
        assert_eq!(layout.argument_count(), 0);
    }

    #[test]
    fn row_pitch_must_name_a_buffer() {
        let err = StagingLayout::builder("k")
            .row_pitch("pitch", 4, "img")
            .build()
            .unwrap_err();
        assert!(matches!(err, StagingError::UnknownBuffer { .. }));
    }

    #[test]
    fn allocator_alignment_is_validated() {
        let err = StagingLayout::builder("k")
            .input("a", 3, bytes(8))
            .allocator(AddressAllocator::new(0x1000, 12))
            .build()
            .unwrap_err();
        assert_eq!(err, StagingError::InvalidAlignment(12));
    }

    #[test]
    fn pinned_base_must_be_aligned() {
        let err = StagingLayout::builder("k")
            .pinned("a", 3, bytes(8), Direction::In, 0x1004)
            .build()
            .unwrap_err();
        assert!(matches!(err, StagingError::MisalignedBase { base: 0x1004, .. }));
    }

    #[test]
    fn exhausting_the_address_space_is_an_error() {
        let err = StagingLayout::builder("k")
            .input("a", 3, bytes(64))
            .allocator(AddressAllocator::new(u64::MAX - 15, 8))
            .build()
            .unwrap_err();
        assert!(matches!(err, StagingError::AddressSpaceExhausted { .. }));
    }
}
