use core::fmt;

use crate::word::WORD_BYTES;

/// Width of a single logical element inside a packed word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementWidth {
    Byte,
    Half,
    Word,
    Double,
}

impl ElementWidth {
    pub const ALL: [ElementWidth; 4] = [
        ElementWidth::Byte,
        ElementWidth::Half,
        ElementWidth::Word,
        ElementWidth::Double,
    ];

    pub const fn bytes(self) -> usize {
        match self {
            ElementWidth::Byte => 1,
            ElementWidth::Half => 2,
            ElementWidth::Word => 4,
            ElementWidth::Double => 8,
        }
    }

    pub const fn bits(self) -> u32 {
        (self.bytes() * 8) as u32
    }

    /// Number of elements of this width that fit in one [`crate::PackedWord`].
    pub const fn elements_per_word(self) -> usize {
        WORD_BYTES / self.bytes()
    }

    /// Mask selecting the low `bits()` bits of a `u64`.
    pub const fn mask(self) -> u64 {
        match self {
            ElementWidth::Double => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    pub const fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(ElementWidth::Byte),
            2 => Some(ElementWidth::Half),
            4 => Some(ElementWidth::Word),
            8 => Some(ElementWidth::Double),
            _ => None,
        }
    }
}

impl fmt::Display for ElementWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-byte", self.bytes())
    }
}

/// A fixed-width integer that can travel through a packed word.
///
/// Values are carried as the low [`ElementWidth::bits`] bits of a `u64`; signed values are masked
/// on the way in and truncated (two's complement) on the way out.
pub trait Element: Copy + Default + fmt::Debug + 'static {
    const WIDTH: ElementWidth;

    fn to_bits(self) -> u64;

    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $width:ident as $unsigned:ty;)*) => {
        $(
            impl Element for $ty {
                const WIDTH: ElementWidth = ElementWidth::$width;

                #[inline]
                fn to_bits(self) -> u64 {
                    self as $unsigned as u64
                }

                #[inline]
                fn from_bits(bits: u64) -> Self {
                    bits as $unsigned as $ty
                }
            }
        )*
    };
}

impl_element! {
    u8 => Byte as u8;
    i8 => Byte as u8;
    u16 => Half as u16;
    i16 => Half as u16;
    u32 => Word as u32;
    i32 => Word as u32;
    u64 => Double as u64;
    i64 => Double as u64;
}

/// Read-only, width-erased view over a caller buffer.
///
/// Object safe so that buffers of different element types can be staged together.
pub trait ElementSource {
    fn width(&self) -> ElementWidth;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns element `index` as its low `width().bits()` bits.
    fn load(&self, index: usize) -> u64;
}

/// Writable, width-erased view over caller storage receiving unpacked elements.
pub trait ElementSink {
    fn width(&self) -> ElementWidth;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&mut self, index: usize, bits: u64);
}

impl<T: Element> ElementSource for [T] {
    fn width(&self) -> ElementWidth {
        T::WIDTH
    }

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn load(&self, index: usize) -> u64 {
        self[index].to_bits() & T::WIDTH.mask()
    }
}

impl<T: Element> ElementSource for Vec<T> {
    fn width(&self) -> ElementWidth {
        T::WIDTH
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn load(&self, index: usize) -> u64 {
        self.as_slice().load(index)
    }
}

impl<S: ElementSource + ?Sized> ElementSource for &S {
    fn width(&self) -> ElementWidth {
        (**self).width()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn load(&self, index: usize) -> u64 {
        (**self).load(index)
    }
}

impl<T: Element> ElementSink for [T] {
    fn width(&self) -> ElementWidth {
        T::WIDTH
    }

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn store(&mut self, index: usize, bits: u64) {
        self[index] = T::from_bits(bits);
    }
}

impl<T: Element> ElementSink for Vec<T> {
    fn width(&self) -> ElementWidth {
        T::WIDTH
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn store(&mut self, index: usize, bits: u64) {
        self.as_mut_slice().store(index, bits);
    }
}

impl<S: ElementSink + ?Sized> ElementSink for &mut S {
    fn width(&self) -> ElementWidth {
        (**self).width()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn store(&mut self, index: usize, bits: u64) {
        (**self).store(index, bits);
    }
}
