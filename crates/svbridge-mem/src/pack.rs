use thiserror::Error;

use crate::element::{Element, ElementSink, ElementSource, ElementWidth};
use crate::word::{PackedWord, WordBuilder, WORD_BYTES};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("row stride {stride} is smaller than row width {width}")]
    StrideTooSmall { width: usize, stride: usize },

    #[error("buffer holds {actual} elements but the shape needs {required}")]
    BufferTooShort { required: usize, actual: usize },

    #[error("buffer holds {actual} elements but the shape allows at most {allowed}")]
    BufferTooLong { allowed: usize, actual: usize },

    #[error("element width mismatch: shape uses {expected} elements, buffer holds {actual}")]
    WidthMismatch {
        expected: ElementWidth,
        actual: ElementWidth,
    },

    #[error("{actual} packed words cannot cover a {required}-word image")]
    NotEnoughWords { required: usize, actual: usize },

    #[error("shape {width}x{height} (stride {stride}) overflows the address space")]
    Overflow {
        width: usize,
        height: usize,
        stride: usize,
    },
}

/// Logical shape of a caller buffer: `height` rows of `width` elements, rows `stride` elements
/// apart in the caller's storage.
///
/// The packed image in synthetic memory is always `width * height` elements with no gaps; the
/// stride only describes where the rows live on the caller side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferShape {
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub element: ElementWidth,
}

impl BufferShape {
    /// A contiguous one-row buffer of `len` elements.
    pub const fn linear(len: usize, element: ElementWidth) -> Self {
        Self {
            width: len,
            height: 1,
            stride: len,
            element,
        }
    }

    pub const fn grid(width: usize, height: usize, stride: usize, element: ElementWidth) -> Self {
        Self {
            width,
            height,
            stride,
            element,
        }
    }

    pub const fn of<T: Element>(len: usize) -> Self {
        Self::linear(len, T::WIDTH)
    }

    pub const fn element_count(&self) -> usize {
        self.width * self.height
    }

    /// Bytes occupied by the tightly packed image.
    pub const fn packed_len(&self) -> usize {
        self.element_count() * self.element.bytes()
    }

    /// Words occupied by the packed image, counting a trailing partial word.
    pub const fn packed_words(&self) -> usize {
        self.packed_len().div_ceil(WORD_BYTES)
    }

    /// Byte distance between consecutive rows of the packed image.
    pub const fn row_pitch(&self) -> usize {
        self.width * self.element.bytes()
    }

    /// Minimum number of elements the caller's buffer must hold.
    pub const fn required_len(&self) -> usize {
        if self.width == 0 || self.height == 0 {
            0
        } else {
            (self.height - 1) * self.stride + self.width
        }
    }

    /// Maximum number of elements a caller buffer may hold. A single row must match its width
    /// exactly; the last row of a grid may run on to a full stride.
    pub const fn max_len(&self) -> usize {
        match self.height {
            0 => 0,
            1 => self.width,
            _ if self.width == 0 => 0,
            height => height.saturating_mul(self.stride),
        }
    }

    pub fn validate(&self) -> Result<(), ShapeError> {
        if self.height > 1 && self.stride < self.width {
            return Err(ShapeError::StrideTooSmall {
                width: self.width,
                stride: self.stride,
            });
        }
        let overflow = || ShapeError::Overflow {
            width: self.width,
            height: self.height,
            stride: self.stride,
        };
        self.width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.element.bytes()))
            .and_then(|n| n.checked_add(WORD_BYTES))
            .ok_or_else(overflow)?;
        if self.height > 0 {
            (self.height - 1)
                .checked_mul(self.stride)
                .and_then(|n| n.checked_add(self.width))
                .ok_or_else(overflow)?;
        }
        Ok(())
    }

    /// Checks that a caller buffer of `len` elements of `width` fits this shape.
    pub fn check_buffer(&self, width: ElementWidth, len: usize) -> Result<(), ShapeError> {
        self.validate()?;
        if width != self.element {
            return Err(ShapeError::WidthMismatch {
                expected: self.element,
                actual: width,
            });
        }
        let required = self.required_len();
        if len < required {
            return Err(ShapeError::BufferTooShort {
                required,
                actual: len,
            });
        }
        let allowed = self.max_len();
        if len > allowed {
            return Err(ShapeError::BufferTooLong {
                allowed,
                actual: len,
            });
        }
        Ok(())
    }
}

/// Packs the logical content of `source` into words, row by row, honouring the source stride.
///
/// The result holds exactly [`BufferShape::packed_words`] words. A trailing partial word is
/// zero-extended; nothing past `source.len()` is ever read.
pub fn pack<S: ElementSource + ?Sized>(
    source: &S,
    shape: &BufferShape,
) -> Result<Vec<PackedWord>, ShapeError> {
    shape.check_buffer(source.width(), source.len())?;

    let mut builder = WordBuilder::with_capacity(shape.packed_words());
    for row in 0..shape.height {
        let start = row * shape.stride;
        for col in 0..shape.width {
            builder.push(source.load(start + col), shape.element);
        }
    }
    Ok(builder.finish())
}

/// Unpacks a tightly packed image back into `sink`, honouring the destination stride.
///
/// Only the `width * height` valid elements are written; padding in the final word and the
/// stride gaps between destination rows are left untouched.
pub fn unpack<S: ElementSink + ?Sized>(
    words: &[PackedWord],
    shape: &BufferShape,
    sink: &mut S,
) -> Result<(), ShapeError> {
    shape.check_buffer(sink.width(), sink.len())?;
    let required = shape.packed_words();
    if words.len() < required {
        return Err(ShapeError::NotEnoughWords {
            required,
            actual: words.len(),
        });
    }

    let per_word = shape.element.elements_per_word();
    let mut packed_index = 0usize;
    for row in 0..shape.height {
        let start = row * shape.stride;
        for col in 0..shape.width {
            let word = words[packed_index / per_word];
            sink.store(start + col, word.element(packed_index % per_word, shape.element));
            packed_index += 1;
        }
    }
    Ok(())
}
