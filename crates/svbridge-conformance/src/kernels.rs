//! Bridged kernels: host-callable wrappers that stage a call through a [`CallBridge`], and the
//! candidate implementations the [`HostSimulator`] runs for them.
//!
//! Wrappers follow the usual register convention: arguments from r3 upward, return value in r3.
//! Candidates only touch data through [`Cpu`] loads and stores, so they see exactly what the
//! bridge staged.

use svbridge_core::{
    BridgeError, BufferArg, BufferShape, CallBridge, ElementWidth, OutputSpec, SimulatorFault,
    StagingError, StagingLayout,
};

use crate::host::{Cpu, HostSimulator, KernelImage};

pub const GET_MB_SS: &str = "vpx_get_mb_ss";
pub const VARIANCE: &str = "vpx_variance";
pub const FDCT4X4: &str = "vp8_short_fdct4x4";
pub const HCHACHA20: &str = "xchacha_hchacha20";
pub const CHACHA20_ENCRYPT: &str = "xchacha_encrypt_bytes";
pub const MAXLOC: &str = "maxloc";
pub const CURVE25519_COPY: &str = "curve25519_copy";
pub const CDEF_FIND_DIR: &str = "cdef_find_dir";
pub const TRAP: &str = "trap";

/// Registers every candidate kernel under its wrapper's name.
pub fn register_candidates(sim: &mut HostSimulator) {
    sim.register(GET_MB_SS, mb_ss_kernel)
        .register(VARIANCE, variance_kernel)
        .register(FDCT4X4, fdct4x4_kernel)
        .register(HCHACHA20, hchacha20_kernel)
        .register(CHACHA20_ENCRYPT, chacha20_encrypt_kernel)
        .register(MAXLOC, maxloc_kernel)
        .register(CURVE25519_COPY, curve25519_copy_kernel)
        .register(CDEF_FIND_DIR, cdef_find_dir_kernel)
        .register(TRAP, trap_kernel);
}

fn staging(kernel: &str) -> impl FnOnce(StagingError) -> BridgeError + '_ {
    move |source| BridgeError::Staging {
        kernel: kernel.to_string(),
        source,
    }
}

fn image(kernel: &str) -> Vec<u8> {
    KernelImage::new(kernel).encode()
}

pub fn get_mb_ss(bridge: &CallBridge, src: &[i16; 256]) -> Result<u32, BridgeError> {
    let layout = StagingLayout::builder(GET_MB_SS)
        .input("src", 3, BufferShape::of::<i16>(256))
        .build()
        .map_err(staging(GET_MB_SS))?;
    let ret = bridge.call(
        &image(GET_MB_SS),
        &[],
        vec![BufferArg::new(&src[..])],
        &layout,
        &mut [],
    )?;
    Ok(ret.unwrap_or_default() as u32)
}

/// Returns `(variance, sse)` of a `w` x `h` block. Strides are in elements.
pub fn variance_wxh(
    bridge: &CallBridge,
    src: &[u8],
    src_stride: usize,
    reference: &[u8],
    ref_stride: usize,
    w: usize,
    h: usize,
) -> Result<(u32, u32), BridgeError> {
    let layout = StagingLayout::builder(VARIANCE)
        .input("src", 3, BufferShape::grid(w, h, src_stride, ElementWidth::Byte))
        .row_pitch("src_stride", 4, "src")
        .input("ref", 5, BufferShape::grid(w, h, ref_stride, ElementWidth::Byte))
        .row_pitch("ref_stride", 6, "ref")
        .scalar("w", 7)
        .scalar("h", 8)
        .output("sse", 9, BufferShape::of::<u32>(1))
        .build()
        .map_err(staging(VARIANCE))?;

    let mut sse = [0u32; 1];
    let ret = bridge.call(
        &image(VARIANCE),
        &[w as u64, h as u64],
        vec![BufferArg::new(src), BufferArg::new(reference)],
        &layout,
        &mut [OutputSpec::new("sse", &mut sse)],
    )?;
    Ok((ret.unwrap_or_default() as u32, sse[0]))
}

/// VP8 forward DCT of a 4x4 block whose rows are `pitch` bytes apart.
pub fn fdct4x4(bridge: &CallBridge, input: &[i16], pitch: usize) -> Result<[i16; 16], BridgeError> {
    let layout = StagingLayout::builder(FDCT4X4)
        .input("input", 3, BufferShape::grid(4, 4, pitch / 2, ElementWidth::Half))
        .output("output", 4, BufferShape::of::<i16>(16))
        .row_pitch("pitch", 5, "input")
        .no_return_value()
        .build()
        .map_err(staging(FDCT4X4))?;

    let mut output = [0i16; 16];
    bridge.call(
        &image(FDCT4X4),
        &[],
        vec![BufferArg::new(input)],
        &layout,
        &mut [OutputSpec::new("output", &mut output)],
    )?;
    Ok(output)
}

pub fn hchacha20(
    bridge: &CallBridge,
    input: &[u8; 16],
    key: &[u8; 32],
) -> Result<[u8; 32], BridgeError> {
    let layout = StagingLayout::builder(HCHACHA20)
        .output("out", 3, BufferShape::of::<u8>(32))
        .input("in", 4, BufferShape::of::<u8>(16))
        .input("key", 5, BufferShape::of::<u8>(32))
        .no_return_value()
        .build()
        .map_err(staging(HCHACHA20))?;

    let mut out = [0u8; 32];
    bridge.call(
        &image(HCHACHA20),
        &[],
        vec![BufferArg::new(&input[..]), BufferArg::new(&key[..])],
        &layout,
        &mut [OutputSpec::new("out", &mut out)],
    )?;
    Ok(out)
}

/// Encrypts (or decrypts) `message` with the ChaCha20 keystream of `state`.
pub fn chacha20_xor(
    bridge: &CallBridge,
    state: &[u32; 16],
    message: &[u8],
) -> Result<Vec<u8>, BridgeError> {
    let len = message.len();
    let layout = StagingLayout::builder(CHACHA20_ENCRYPT)
        .input("ctx", 3, BufferShape::of::<u32>(16))
        .input("m", 4, BufferShape::of::<u8>(len))
        .output("c", 5, BufferShape::of::<u8>(len))
        .scalar("bytes", 6)
        .no_return_value()
        .build()
        .map_err(staging(CHACHA20_ENCRYPT))?;

    let mut out = vec![0u8; len];
    bridge.call(
        &image(CHACHA20_ENCRYPT),
        &[len as u64],
        vec![BufferArg::new(&state[..]), BufferArg::new(message)],
        &layout,
        &mut [OutputSpec::new("c", &mut out)],
    )?;
    Ok(out)
}

pub fn maxloc(bridge: &CallBridge, a: &[i32]) -> Result<i32, BridgeError> {
    let layout = StagingLayout::builder(MAXLOC)
        .input("a", 3, BufferShape::of::<i32>(a.len()))
        .scalar("n", 4)
        .build()
        .map_err(staging(MAXLOC))?;
    let ret = bridge.call(
        &image(MAXLOC),
        &[a.len() as u64],
        vec![BufferArg::new(a)],
        &layout,
        &mut [],
    )?;
    Ok(ret.unwrap_or_default() as i32)
}

pub fn curve25519_copy(bridge: &CallBridge, input: &[u64; 5]) -> Result<[u64; 5], BridgeError> {
    let layout = StagingLayout::builder(CURVE25519_COPY)
        .output("out", 3, BufferShape::of::<u64>(5))
        .input("in", 4, BufferShape::of::<u64>(5))
        .no_return_value()
        .build()
        .map_err(staging(CURVE25519_COPY))?;

    let mut out = [0u64; 5];
    bridge.call(
        &image(CURVE25519_COPY),
        &[],
        vec![BufferArg::new(&input[..])],
        &layout,
        &mut [OutputSpec::new("out", &mut out)],
    )?;
    Ok(out)
}

/// CDEF direction search over an 8x8 block of 16-bit pixels whose rows are `stride` pixels
/// apart. Returns `(direction, variance)`.
pub fn cdef_find_dir(
    bridge: &CallBridge,
    img: &[u16],
    stride: usize,
    bitdepth_min_8: u32,
) -> Result<(i32, u32), BridgeError> {
    let layout = StagingLayout::builder(CDEF_FIND_DIR)
        .input("img", 3, BufferShape::grid(8, 8, stride, ElementWidth::Half))
        .row_pitch("stride", 4, "img")
        .output("var", 5, BufferShape::of::<u32>(1))
        .scalar("bitdepth_min_8", 6)
        .build()
        .map_err(staging(CDEF_FIND_DIR))?;

    let mut var = [0u32; 1];
    let ret = bridge.call(
        &image(CDEF_FIND_DIR),
        &[u64::from(bitdepth_min_8)],
        vec![BufferArg::new(img)],
        &layout,
        &mut [OutputSpec::new("var", &mut var)],
    )?;
    Ok((ret.unwrap_or_default() as i32, var[0]))
}

/// Calls a kernel that always traps.
pub fn trap(bridge: &CallBridge) -> Result<u64, BridgeError> {
    let layout = StagingLayout::builder(TRAP)
        .build()
        .map_err(staging(TRAP))?;
    let ret = bridge.call(&image(TRAP), &[], Vec::new(), &layout, &mut [])?;
    Ok(ret.unwrap_or_default())
}

fn mb_ss_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    let src = cpu.gpr(3);
    let mut sum = 0u32;
    for word in 0..64 {
        let packed = cpu.load_u64(src + word * 8)?;
        for lane in 0..4 {
            let v = i32::from((packed >> (lane * 16)) as u16 as i16);
            sum = sum.wrapping_add((v * v) as u32);
        }
    }
    cpu.set_gpr(3, u64::from(sum));
    Ok(())
}

fn variance_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    let (src, src_stride) = (cpu.gpr(3), cpu.gpr(4));
    let (reference, ref_stride) = (cpu.gpr(5), cpu.gpr(6));
    let (w, h, sse_ptr) = (cpu.gpr(7), cpu.gpr(8), cpu.gpr(9));
    if w == 0 || h == 0 {
        return Err(cpu.trap("empty block"));
    }

    let mut sum = 0i32;
    let mut sse = 0u32;
    for y in 0..h {
        for x in 0..w {
            let a = i32::from(cpu.load_u8(src + y * src_stride + x)?);
            let b = i32::from(cpu.load_u8(reference + y * ref_stride + x)?);
            let diff = a - b;
            sum += diff;
            sse = sse.wrapping_add((diff * diff) as u32);
        }
    }
    cpu.store_u32(sse_ptr, sse)?;
    let mean_sq = (i64::from(sum) * i64::from(sum)) / (w * h) as i64;
    cpu.set_gpr(3, u64::from(sse.wrapping_sub(mean_sq as u32)));
    Ok(())
}

fn fdct4x4_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    let (input, output, pitch) = (cpu.gpr(3), cpu.gpr(4), cpu.gpr(5));

    // Horizontal pass into the output buffer.
    for row in 0..4u64 {
        let ip = input + row * pitch;
        let x0 = load_i16(cpu, ip)?;
        let x1 = load_i16(cpu, ip + 2)?;
        let x2 = load_i16(cpu, ip + 4)?;
        let x3 = load_i16(cpu, ip + 6)?;
        let a1 = (x0 + x3) * 8;
        let b1 = (x1 + x2) * 8;
        let c1 = (x1 - x2) * 8;
        let d1 = (x0 - x3) * 8;

        let op = output + row * 8;
        cpu.store_u16(op, (a1 + b1) as u16)?;
        cpu.store_u16(op + 2, ((c1 * 2217 + d1 * 5352 + 14500) >> 12) as u16)?;
        cpu.store_u16(op + 4, (a1 - b1) as u16)?;
        cpu.store_u16(op + 6, ((d1 * 2217 - c1 * 5352 + 7500) >> 12) as u16)?;
    }

    // Vertical pass in place.
    for col in 0..4u64 {
        let ip = output + col * 2;
        let y0 = load_i16(cpu, ip)?;
        let y1 = load_i16(cpu, ip + 8)?;
        let y2 = load_i16(cpu, ip + 16)?;
        let y3 = load_i16(cpu, ip + 24)?;
        let a1 = y0 + y3;
        let b1 = y1 + y2;
        let c1 = y1 - y2;
        let d1 = y0 - y3;

        cpu.store_u16(ip, ((a1 + b1 + 7) >> 4) as u16)?;
        cpu.store_u16(
            ip + 8,
            (((c1 * 2217 + d1 * 5352 + 12000) >> 16) + i32::from(d1 != 0)) as u16,
        )?;
        cpu.store_u16(ip + 16, ((a1 - b1 + 7) >> 4) as u16)?;
        cpu.store_u16(ip + 24, ((d1 * 2217 - c1 * 5352 + 51000) >> 16) as u16)?;
    }
    Ok(())
}

/// ChaCha working state lives in r16..r31, one 32-bit lane per register.
const CHACHA_BASE: usize = 16;

fn lane(cpu: &Cpu, i: usize) -> u32 {
    cpu.gpr(CHACHA_BASE + i) as u32
}

fn set_lane(cpu: &mut Cpu, i: usize, v: u32) {
    cpu.set_gpr(CHACHA_BASE + i, u64::from(v));
}

fn chacha_quarter_round(cpu: &mut Cpu, a: usize, b: usize, c: usize, d: usize) {
    for (x, y, z, shift) in [(a, b, d, 16), (c, d, b, 12), (a, b, d, 8), (c, d, b, 7)] {
        let sum = lane(cpu, x).wrapping_add(lane(cpu, y));
        set_lane(cpu, x, sum);
        let mixed = (lane(cpu, z) ^ sum).rotate_left(shift);
        set_lane(cpu, z, mixed);
    }
}

fn chacha_double_rounds(cpu: &mut Cpu) {
    for _ in 0..10 {
        for (a, b, c, d) in [
            (0, 4, 8, 12),
            (1, 5, 9, 13),
            (2, 6, 10, 14),
            (3, 7, 11, 15),
            (0, 5, 10, 15),
            (1, 6, 11, 12),
            (2, 7, 8, 13),
            (3, 4, 9, 14),
        ] {
            chacha_quarter_round(cpu, a, b, c, d);
        }
    }
}

fn load_lanes(
    cpu: &mut Cpu,
    lanes: std::ops::Range<usize>,
    addr: u64,
) -> Result<(), SimulatorFault> {
    for (i, index) in lanes.enumerate() {
        let v = cpu.load_u32(addr + i as u64 * 4)?;
        set_lane(cpu, index, v);
    }
    Ok(())
}

fn hchacha20_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    let (out, input, key) = (cpu.gpr(3), cpu.gpr(4), cpu.gpr(5));
    for (index, word) in [0x6170_7865u32, 0x3320_646e, 0x7962_2d32, 0x6b20_6574]
        .into_iter()
        .enumerate()
    {
        set_lane(cpu, index, word);
    }
    load_lanes(cpu, 4..12, key)?;
    load_lanes(cpu, 12..16, input)?;
    chacha_double_rounds(cpu);

    for (i, index) in (0..4).chain(12..16).enumerate() {
        let v = lane(cpu, index);
        cpu.store_u32(out + i as u64 * 4, v)?;
    }
    Ok(())
}

fn chacha20_encrypt_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    let (ctx, m, c, bytes) = (cpu.gpr(3), cpu.gpr(4), cpu.gpr(5), cpu.gpr(6));
    let mut j = [0u32; 16];
    for (i, word) in j.iter_mut().enumerate() {
        *word = cpu.load_u32(ctx + i as u64 * 4)?;
    }

    let mut done = 0u64;
    while done < bytes {
        for (index, word) in j.iter().enumerate() {
            set_lane(cpu, index, *word);
        }
        chacha_double_rounds(cpu);

        let mut block = [0u8; 64];
        for (index, chunk) in block.chunks_exact_mut(4).enumerate() {
            let x = lane(cpu, index).wrapping_add(j[index]);
            chunk.copy_from_slice(&x.to_le_bytes());
        }
        let take = (bytes - done).min(64);
        for k in 0..take {
            let v = cpu.load_u8(m + done + k)? ^ block[k as usize];
            cpu.store_u8(c + done + k, v)?;
        }

        j[12] = j[12].wrapping_add(1);
        if j[12] == 0 {
            j[13] = j[13].wrapping_add(1);
        }
        done += take;
    }

    cpu.store_u32(ctx + 48, j[12])?;
    cpu.store_u32(ctx + 52, j[13])
}

fn maxloc_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    let (a, n) = (cpu.gpr(3), cpu.gpr(4));

    let mut m = 0i32;
    let mut nm = -1i64;
    let mut i = 0u64;
    while i < n {
        while i < n && load_i32(cpu, a + i * 4)? <= m {
            i += 1;
        }
        if i < n {
            m = load_i32(cpu, a + i * 4)?;
            nm = i as i64;
        }
        i += 1;
    }
    cpu.set_gpr(3, nm as u64);
    Ok(())
}

fn curve25519_copy_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    let (out, input) = (cpu.gpr(3), cpu.gpr(4));
    for limb in 0..5 {
        let v = cpu.load_u64(input + limb * 8)?;
        cpu.store_u64(out + limb * 8, v)?;
    }
    Ok(())
}

const CDEF_DIV: [u32; 7] = [840, 420, 280, 210, 168, 140, 120];

fn square(v: i32) -> u32 {
    v.wrapping_mul(v) as u32
}

/// Cost of a 15-entry diagonal line: mirrored pairs weighted by `CDEF_DIV`, centre by 105.
fn diagonal_cost(line: &[i32; 15]) -> u32 {
    let edges = (0..7).fold(0u32, |acc, n| {
        let pair = square(line[n]).wrapping_add(square(line[14 - n]));
        acc.wrapping_add(pair.wrapping_mul(CDEF_DIV[n]))
    });
    edges.wrapping_add(square(line[7]).wrapping_mul(105))
}

/// Cost of an 11-entry half-slope line: five full-length centre entries and three mirrored pairs.
fn slanted_cost(line: &[i32; 11]) -> u32 {
    let centre = line[3..8]
        .iter()
        .fold(0u32, |acc, &v| acc.wrapping_add(square(v)))
        .wrapping_mul(105);
    (0..3).fold(centre, |acc, m| {
        let pair = square(line[m]).wrapping_add(square(line[10 - m]));
        acc.wrapping_add(pair.wrapping_mul(CDEF_DIV[2 * m + 1]))
    })
}

fn cdef_find_dir_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    let (img, pitch, var_ptr, shift) = (cpu.gpr(3), cpu.gpr(4), cpu.gpr(5), cpu.gpr(6));
    if shift > 8 {
        return Err(cpu.trap("bit depth out of range"));
    }

    let mut rows = [0i32; 8];
    let mut cols = [0i32; 8];
    let mut diag = [[0i32; 15]; 2];
    let mut alt = [[0i32; 11]; 4];
    for y in 0..8usize {
        let row = img + y as u64 * pitch;
        for x in 0..8usize {
            let px = i32::from(cpu.load_u16(row + x as u64 * 2)? >> shift) - 128;
            rows[y] += px;
            cols[x] += px;
            diag[0][y + x] += px;
            diag[1][7 + y - x] += px;
            alt[0][y + x / 2] += px;
            alt[1][3 + y - x / 2] += px;
            alt[2][3 - y / 2 + x] += px;
            alt[3][y / 2 + x] += px;
        }
    }

    let line = |sums: &[i32; 8]| {
        sums.iter()
            .fold(0u32, |acc, &v| acc.wrapping_add(square(v)))
            .wrapping_mul(105)
    };
    let cost = [
        diagonal_cost(&diag[0]),
        slanted_cost(&alt[0]),
        line(&rows),
        slanted_cost(&alt[1]),
        diagonal_cost(&diag[1]),
        slanted_cost(&alt[2]),
        line(&cols),
        slanted_cost(&alt[3]),
    ];

    // First strictly greater cost wins.
    let mut best = 0;
    for dir in 1..8 {
        if cost[dir] > cost[best] {
            best = dir;
        }
    }
    cpu.store_u32(var_ptr, cost[best].wrapping_sub(cost[best ^ 4]) >> 10)?;
    cpu.set_gpr(3, best as u64);
    Ok(())
}

fn load_i16(cpu: &Cpu, addr: u64) -> Result<i32, SimulatorFault> {
    cpu.load_u16(addr).map(|v| i32::from(v as i16))
}

fn load_i32(cpu: &Cpu, addr: u64) -> Result<i32, SimulatorFault> {
    cpu.load_u32(addr).map(|v| v as i32)
}

fn trap_kernel(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
    Err(cpu.trap("unconditional trap"))
}
