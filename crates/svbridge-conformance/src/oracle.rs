//! Host-side reference implementations the bridged kernels are checked against.
//!
//! Each function is bit-exact with the C routine it mirrors, including integer wrap-around and
//! truncation to 16 bits where the C code stores into `short`.

/// Sum of squares of a 16x16 macroblock (`vpx_get_mb_ss`).
pub fn get_mb_ss(src: &[i16; 256]) -> u32 {
    src.iter().fold(0u32, |acc, &v| {
        let v = i32::from(v);
        acc.wrapping_add((v * v) as u32)
    })
}

/// Sum of squared differences and sum of differences over a `w` x `h` block. Strides are in
/// elements.
pub fn variance(
    src: &[u8],
    src_stride: usize,
    reference: &[u8],
    ref_stride: usize,
    w: usize,
    h: usize,
) -> (u32, i32) {
    let mut sse = 0u32;
    let mut sum = 0i32;
    for y in 0..h {
        for x in 0..w {
            let a = i32::from(src[y * src_stride + x]);
            let b = i32::from(reference[y * ref_stride + x]);
            let diff = a - b;
            sum += diff;
            sse = sse.wrapping_add((diff * diff) as u32);
        }
    }
    (sse, sum)
}

/// `vpx_variance{w}x{h}`: returns `(variance, sse)`.
pub fn variance_wxh(
    src: &[u8],
    src_stride: usize,
    reference: &[u8],
    ref_stride: usize,
    w: usize,
    h: usize,
) -> (u32, u32) {
    let (sse, sum) = variance(src, src_stride, reference, ref_stride, w, h);
    let mean_sq = (i64::from(sum) * i64::from(sum)) / (w * h) as i64;
    (sse.wrapping_sub(mean_sq as u32), sse)
}

/// `vpx_mse{w}x{h}`: the sum of squared differences.
pub fn mse_wxh(
    src: &[u8],
    src_stride: usize,
    reference: &[u8],
    ref_stride: usize,
    w: usize,
    h: usize,
) -> u32 {
    variance(src, src_stride, reference, ref_stride, w, h).0
}

/// VP8 forward 4x4 DCT. `pitch` is the input row distance in bytes.
pub fn fdct4x4(input: &[i16], pitch: usize) -> [i16; 16] {
    let row = pitch / 2;
    let mut out = [0i16; 16];

    for i in 0..4 {
        let ip = &input[i * row..i * row + 4];
        let a1 = (i32::from(ip[0]) + i32::from(ip[3])) * 8;
        let b1 = (i32::from(ip[1]) + i32::from(ip[2])) * 8;
        let c1 = (i32::from(ip[1]) - i32::from(ip[2])) * 8;
        let d1 = (i32::from(ip[0]) - i32::from(ip[3])) * 8;

        let op = &mut out[i * 4..i * 4 + 4];
        op[0] = (a1 + b1) as i16;
        op[2] = (a1 - b1) as i16;
        op[1] = ((c1 * 2217 + d1 * 5352 + 14500) >> 12) as i16;
        op[3] = ((d1 * 2217 - c1 * 5352 + 7500) >> 12) as i16;
    }

    let first = out;
    for i in 0..4 {
        let a1 = i32::from(first[i]) + i32::from(first[i + 12]);
        let b1 = i32::from(first[i + 4]) + i32::from(first[i + 8]);
        let c1 = i32::from(first[i + 4]) - i32::from(first[i + 8]);
        let d1 = i32::from(first[i]) - i32::from(first[i + 12]);

        out[i] = ((a1 + b1 + 7) >> 4) as i16;
        out[i + 8] = ((a1 - b1 + 7) >> 4) as i16;
        out[i + 4] = (((c1 * 2217 + d1 * 5352 + 12000) >> 16) + i32::from(d1 != 0)) as i16;
        out[i + 12] = ((d1 * 2217 - c1 * 5352 + 51000) >> 16) as i16;
    }
    out
}

/// "expand 32-byte k"
pub const CHACHA_CONSTANTS: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(16);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(12);
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(8);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(7);
}

fn double_rounds(x: &mut [u32; 16]) {
    for _ in 0..10 {
        quarter_round(x, 0, 4, 8, 12);
        quarter_round(x, 1, 5, 9, 13);
        quarter_round(x, 2, 6, 10, 14);
        quarter_round(x, 3, 7, 11, 15);
        quarter_round(x, 0, 5, 10, 15);
        quarter_round(x, 1, 6, 11, 12);
        quarter_round(x, 2, 7, 8, 13);
        quarter_round(x, 3, 4, 9, 14);
    }
}

fn le_words<const N: usize>(bytes: &[u8]) -> [u32; N] {
    let mut words = [0u32; N];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// HChaCha20 subkey derivation used by XChaCha20.
pub fn hchacha20(input: &[u8; 16], key: &[u8; 32]) -> [u8; 32] {
    let mut x = [0u32; 16];
    x[..4].copy_from_slice(&CHACHA_CONSTANTS);
    x[4..12].copy_from_slice(&le_words::<8>(key));
    x[12..].copy_from_slice(&le_words::<4>(input));
    double_rounds(&mut x);

    let mut out = [0u8; 32];
    for (chunk, word) in out
        .chunks_exact_mut(4)
        .zip(x[..4].iter().chain(&x[12..]))
    {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

/// One 64-byte keystream block for `state`.
pub fn chacha20_block(state: &[u32; 16]) -> [u8; 64] {
    let mut x = *state;
    double_rounds(&mut x);
    let mut out = [0u8; 64];
    for (i, chunk) in out.chunks_exact_mut(4).enumerate() {
        chunk.copy_from_slice(&x[i].wrapping_add(state[i]).to_le_bytes());
    }
    out
}

/// XORs `message` with the ChaCha20 keystream starting at `state`. The block counter is the
/// 64-bit value in words 12 (low) and 13 (high).
pub fn chacha20_xor(state: &[u32; 16], message: &[u8]) -> Vec<u8> {
    let mut state = *state;
    let mut out = Vec::with_capacity(message.len());
    for chunk in message.chunks(64) {
        let block = chacha20_block(&state);
        out.extend(chunk.iter().zip(block).map(|(m, k)| m ^ k));
        state[12] = state[12].wrapping_add(1);
        if state[12] == 0 {
            state[13] = state[13].wrapping_add(1);
        }
    }
    out
}

/// Index of the running maximum of `a`, or -1 when no element exceeds zero.
pub fn maxloc(a: &[i32]) -> i32 {
    let mut m = 0;
    let mut nm = -1;
    for (i, &v) in a.iter().enumerate() {
        if v > m {
            m = v;
            nm = i as i32;
        }
    }
    nm
}

/// Copy of a five-limb curve25519 field element (`curve25519_copy`).
pub fn curve25519_copy(input: &[u64; 5]) -> [u64; 5] {
    *input
}

const CDEF_DIV_TABLE: [u32; 7] = [840, 420, 280, 210, 168, 140, 120];

/// AV1 CDEF direction search over an 8x8 block of 16-bit pixels (`cdef_find_dir`).
///
/// `stride` is in pixels and `bitdepth_min_8` is the bit depth less eight (at most 8). Returns
/// `(direction, variance)`. Costs accumulate as `unsigned` in the C code and wrap the same way
/// here.
pub fn cdef_find_dir(img: &[u16], stride: usize, bitdepth_min_8: u32) -> (i32, u32) {
    let mut partial_hv = [[0i32; 8]; 2];
    let mut partial_diag = [[0i32; 15]; 2];
    let mut partial_alt = [[0i32; 11]; 4];

    for y in 0..8 {
        for x in 0..8 {
            let px = (u32::from(img[y * stride + x]) >> bitdepth_min_8) as i32 - 128;
            partial_diag[0][y + x] += px;
            partial_alt[0][y + (x >> 1)] += px;
            partial_hv[0][y] += px;
            partial_alt[1][3 + y - (x >> 1)] += px;
            partial_diag[1][7 + y - x] += px;
            partial_alt[2][3 - (y >> 1) + x] += px;
            partial_hv[1][x] += px;
            partial_alt[3][(y >> 1) + x] += px;
        }
    }

    let sq = |v: i32| v.wrapping_mul(v) as u32;
    let mut cost = [0u32; 8];
    for n in 0..8 {
        cost[2] = cost[2].wrapping_add(sq(partial_hv[0][n]));
        cost[6] = cost[6].wrapping_add(sq(partial_hv[1][n]));
    }
    cost[2] = cost[2].wrapping_mul(105);
    cost[6] = cost[6].wrapping_mul(105);

    for (n, &d) in CDEF_DIV_TABLE.iter().enumerate() {
        for (dir, diag) in [(0, &partial_diag[0]), (4, &partial_diag[1])] {
            let pair = sq(diag[n]).wrapping_add(sq(diag[14 - n]));
            cost[dir] = cost[dir].wrapping_add(pair.wrapping_mul(d));
        }
    }
    cost[0] = cost[0].wrapping_add(sq(partial_diag[0][7]).wrapping_mul(105));
    cost[4] = cost[4].wrapping_add(sq(partial_diag[1][7]).wrapping_mul(105));

    for (n, alt) in partial_alt.iter().enumerate() {
        let c = &mut cost[n * 2 + 1];
        for m in 0..5 {
            *c = c.wrapping_add(sq(alt[3 + m]));
        }
        *c = c.wrapping_mul(105);
        for m in 0..3 {
            let pair = sq(alt[m]).wrapping_add(sq(alt[10 - m]));
            *c = c.wrapping_add(pair.wrapping_mul(CDEF_DIV_TABLE[2 * m + 1]));
        }
    }

    let mut best_dir = 0;
    let mut best_cost = cost[0];
    for (n, &c) in cost.iter().enumerate().skip(1) {
        if c > best_cost {
            best_cost = c;
            best_dir = n;
        }
    }
    let var = best_cost.wrapping_sub(cost[best_dir ^ 4]) >> 10;
    (best_dir as i32, var)
}
