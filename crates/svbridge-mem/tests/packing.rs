use proptest::prelude::*;
use svbridge_mem::{
    pack, unpack, BufferShape, Element, ElementWidth, PackedWord, SparseMemory, WORD_BYTES,
};

fn round_trip<T: Element + PartialEq>(values: &[T]) {
    let shape = BufferShape::of::<T>(values.len());
    let words = pack(values, &shape).unwrap();
    assert_eq!(words.len(), shape.packed_words());

    let mut mem = SparseMemory::new();
    mem.write_words(0x10_0000, &words).unwrap();

    let read_back: Vec<PackedWord> = (0..words.len() as u64)
        .map(|i| PackedWord::new(mem.read_word(0x10_0000 + i * 8).unwrap()))
        .collect();
    let mut out = vec![T::default(); values.len()];
    unpack(&read_back, &shape, &mut out[..]).unwrap();
    assert_eq!(out, values);
}

proptest! {
    #[test]
    fn round_trip_bytes(values in proptest::collection::vec(any::<u8>(), 0..200)) {
        round_trip(&values);
    }

    #[test]
    fn round_trip_halves(values in proptest::collection::vec(any::<i16>(), 0..200)) {
        round_trip(&values);
    }

    #[test]
    fn round_trip_words(values in proptest::collection::vec(any::<u32>(), 0..200)) {
        round_trip(&values);
    }

    #[test]
    fn round_trip_doubles(values in proptest::collection::vec(any::<i64>(), 0..200)) {
        round_trip(&values);
    }

    #[test]
    fn unwritten_addresses_read_zero(
        written in proptest::collection::btree_map(0u64..512, any::<u64>(), 0..32),
        target in 0u64..512,
    ) {
        let mut mem = SparseMemory::new();
        for (&slot, &value) in &written {
            mem.write_word(slot * 8, value).unwrap();
        }
        let expected = written.get(&target).copied().unwrap_or(0);
        prop_assert_eq!(mem.read_word(target * 8).unwrap(), expected);
        let present = mem.try_read_word(target * 8).unwrap().is_some();
        prop_assert_eq!(present, written.contains_key(&target));
    }

    #[test]
    fn stride_does_not_leak_into_packed_image(
        width in 1usize..24,
        height in 1usize..8,
        pad in 1usize..9,
        seed in any::<u64>(),
    ) {
        let stride = width + pad;
        let mut state = seed | 1;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u16
        };

        let mut strided = vec![0xDEADu16; (height - 1) * stride + width];
        let mut dense = vec![0u16; width * height];
        for row in 0..height {
            for col in 0..width {
                let v = next();
                strided[row * stride + col] = v;
                dense[row * width + col] = v;
            }
        }

        let strided_shape = BufferShape::grid(width, height, stride, ElementWidth::Half);
        let dense_shape = BufferShape::grid(width, height, width, ElementWidth::Half);
        let strided_words = pack(&strided[..], &strided_shape).unwrap();
        let dense_words = pack(&dense[..], &dense_shape).unwrap();
        prop_assert_eq!(strided_words, dense_words);
    }
}

#[test]
fn thirty_six_byte_buffer_has_a_zero_extended_tail() {
    let src: Vec<u8> = (0..36).map(|i| 0xC0 ^ i as u8).collect();
    let shape = BufferShape::of::<u8>(src.len());
    let words = pack(&src[..], &shape).unwrap();

    assert_eq!(words.len(), 5);
    for (i, word) in words[..4].iter().enumerate() {
        assert_eq!(word.to_le_bytes()[..], src[i * WORD_BYTES..(i + 1) * WORD_BYTES]);
    }
    let tail = words[4].to_le_bytes();
    assert_eq!(tail[..4], src[32..]);
    assert_eq!(tail[4..], [0, 0, 0, 0]);

    let mut dst = [0u8; 36];
    unpack(&words, &shape, &mut dst[..]).unwrap();
    assert_eq!(dst[..], src[..]);
}

#[test]
fn strided_round_trip_restores_rows_only() {
    let shape = BufferShape::grid(3, 3, 4, ElementWidth::Word);
    let src: Vec<u32> = (0..11).collect();
    let words = pack(&src[..], &shape).unwrap();
    assert_eq!(words.len(), shape.packed_words());

    let mut dst = vec![u32::MAX; 11];
    unpack(&words, &shape, &mut dst[..]).unwrap();
    assert_eq!(
        dst,
        vec![0, 1, 2, u32::MAX, 4, 5, 6, u32::MAX, 8, 9, 10]
    );
}
