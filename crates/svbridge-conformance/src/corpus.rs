use std::fmt;

use svbridge_core::{BridgeError, CallBridge, Stage};

use crate::{kernels, oracle};

/// Small deterministic PRNG for corpus generation.
#[derive(Clone, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 {
            0x9e37_79b9_7f4a_7c15
        } else {
            seed
        };
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform-ish value in `lo..=hi`.
    pub fn range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next_u64() % (hi - lo + 1)
    }

    pub fn fill_bytes(&mut self, out: &mut [u8]) {
        for chunk in out.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// The functions covered by the corpus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelKind {
    GetMbSs,
    Variance,
    Fdct4x4,
    HChaCha20,
    ChaCha20,
    MaxLoc,
    Curve25519Copy,
    CdefFindDir,
}

impl KernelKind {
    pub const ALL: [KernelKind; 8] = [
        KernelKind::GetMbSs,
        KernelKind::Variance,
        KernelKind::Fdct4x4,
        KernelKind::HChaCha20,
        KernelKind::ChaCha20,
        KernelKind::MaxLoc,
        KernelKind::Curve25519Copy,
        KernelKind::CdefFindDir,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            KernelKind::GetMbSs => kernels::GET_MB_SS,
            KernelKind::Variance => kernels::VARIANCE,
            KernelKind::Fdct4x4 => kernels::FDCT4X4,
            KernelKind::HChaCha20 => kernels::HCHACHA20,
            KernelKind::ChaCha20 => kernels::CHACHA20_ENCRYPT,
            KernelKind::MaxLoc => kernels::MAXLOC,
            KernelKind::Curve25519Copy => kernels::CURVE25519_COPY,
            KernelKind::CdefFindDir => kernels::CDEF_FIND_DIR,
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug)]
enum CaseInput {
    GetMbSs(Box<[i16; 256]>),
    Variance {
        src: Vec<u8>,
        src_stride: usize,
        reference: Vec<u8>,
        ref_stride: usize,
        w: usize,
        h: usize,
    },
    Fdct4x4 {
        input: Vec<i16>,
        pitch: usize,
    },
    HChaCha20 {
        input: [u8; 16],
        key: [u8; 32],
    },
    ChaCha20 {
        state: [u32; 16],
        message: Vec<u8>,
    },
    MaxLoc(Vec<i32>),
    Curve25519Copy([u64; 5]),
    CdefFindDir {
        img: Vec<u16>,
        stride: usize,
        bitdepth_min_8: u32,
    },
}

/// Why a case did not pass. `stage` is `None` for a result mismatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseFailure {
    pub stage: Option<Stage>,
    pub message: String,
}

impl From<BridgeError> for CaseFailure {
    fn from(err: BridgeError) -> Self {
        Self {
            stage: Some(err.stage()),
            message: err.to_string(),
        }
    }
}

fn compare<T: PartialEq + fmt::Debug>(expected: T, actual: T) -> Result<(), CaseFailure> {
    if expected == actual {
        return Ok(());
    }
    Err(CaseFailure {
        stage: None,
        message: format!("expected {expected:?}, got {actual:?}"),
    })
}

/// One generated input for one kernel.
#[derive(Clone, Debug)]
pub struct TestCase {
    pub case_idx: usize,
    pub kind: KernelKind,
    input: CaseInput,
}

impl TestCase {
    pub fn generate(case_idx: usize, kind: KernelKind, rng: &mut XorShift64) -> Self {
        let input = match kind {
            KernelKind::GetMbSs => {
                let mut src = Box::new([0i16; 256]);
                // Mostly residual-sized values with the occasional full-range one.
                for v in src.iter_mut() {
                    *v = if rng.range(0, 15) == 0 {
                        rng.next_u32() as i16
                    } else {
                        rng.range(0, 510) as i16 - 255
                    };
                }
                CaseInput::GetMbSs(src)
            }
            KernelKind::Variance => {
                let w = 4usize << rng.range(0, 2);
                let h = 4usize << rng.range(0, 2);
                let src_stride = w + rng.range(0, 8) as usize;
                let ref_stride = w + rng.range(0, 8) as usize;
                let mut src = vec![0u8; src_stride * h];
                let mut reference = vec![0u8; ref_stride * h];
                rng.fill_bytes(&mut src);
                rng.fill_bytes(&mut reference);
                CaseInput::Variance {
                    src,
                    src_stride,
                    reference,
                    ref_stride,
                    w,
                    h,
                }
            }
            KernelKind::Fdct4x4 => {
                let stride = 4 + rng.range(0, 4) as usize;
                let input = (0..stride * 4)
                    .map(|_| rng.range(0, 510) as i16 - 255)
                    .collect();
                CaseInput::Fdct4x4 {
                    input,
                    pitch: stride * 2,
                }
            }
            KernelKind::HChaCha20 => {
                let mut input = [0u8; 16];
                let mut key = [0u8; 32];
                rng.fill_bytes(&mut input);
                rng.fill_bytes(&mut key);
                CaseInput::HChaCha20 { input, key }
            }
            KernelKind::ChaCha20 => {
                let mut state: [u32; 16] = std::array::from_fn(|_| rng.next_u32());
                state[..4].copy_from_slice(&oracle::CHACHA_CONSTANTS);
                if rng.range(0, 3) == 0 {
                    // Exercise the carry into the high counter word.
                    state[12] = u32::MAX;
                }
                let mut message = vec![0u8; rng.range(1, 200) as usize];
                rng.fill_bytes(&mut message);
                CaseInput::ChaCha20 { state, message }
            }
            KernelKind::MaxLoc => {
                let len = rng.range(1, 64) as usize;
                CaseInput::MaxLoc(
                    (0..len)
                        .map(|_| rng.range(0, 200) as i32 - 100)
                        .collect(),
                )
            }
            KernelKind::Curve25519Copy => {
                CaseInput::Curve25519Copy(std::array::from_fn(|_| rng.next_u64()))
            }
            KernelKind::CdefFindDir => {
                let stride = 8 + rng.range(0, 8) as usize;
                let bitdepth_min_8 = 2 * rng.range(0, 2) as u32;
                let max = (256u64 << bitdepth_min_8) - 1;
                // Either noise or a sloped edge with a clear direction.
                let (a, b) = (rng.range(0, 7), rng.range(0, 7));
                let edge = rng.range(0, 2) == 0;
                let img = (0..8 * stride)
                    .map(|i| {
                        if edge {
                            let (y, x) = ((i / stride) as u64, (i % stride) as u64);
                            ((((x * a + y * b) * 37) % 256) << bitdepth_min_8) as u16
                        } else {
                            rng.range(0, max) as u16
                        }
                    })
                    .collect();
                CaseInput::CdefFindDir {
                    img,
                    stride,
                    bitdepth_min_8,
                }
            }
        };
        Self {
            case_idx,
            kind,
            input,
        }
    }

    /// Runs the case through `bridge` and compares against the oracle.
    pub fn check(&self, bridge: &CallBridge) -> Result<(), CaseFailure> {
        match &self.input {
            CaseInput::GetMbSs(src) => {
                compare(oracle::get_mb_ss(src), kernels::get_mb_ss(bridge, src)?)
            }
            CaseInput::Variance {
                src,
                src_stride,
                reference,
                ref_stride,
                w,
                h,
            } => compare(
                oracle::variance_wxh(src, *src_stride, reference, *ref_stride, *w, *h),
                kernels::variance_wxh(bridge, src, *src_stride, reference, *ref_stride, *w, *h)?,
            ),
            CaseInput::Fdct4x4 { input, pitch } => compare(
                oracle::fdct4x4(input, *pitch),
                kernels::fdct4x4(bridge, input, *pitch)?,
            ),
            CaseInput::HChaCha20 { input, key } => compare(
                oracle::hchacha20(input, key),
                kernels::hchacha20(bridge, input, key)?,
            ),
            CaseInput::ChaCha20 { state, message } => compare(
                oracle::chacha20_xor(state, message),
                kernels::chacha20_xor(bridge, state, message)?,
            ),
            CaseInput::MaxLoc(a) => compare(oracle::maxloc(a), kernels::maxloc(bridge, a)?),
            CaseInput::Curve25519Copy(limbs) => compare(
                oracle::curve25519_copy(limbs),
                kernels::curve25519_copy(bridge, limbs)?,
            ),
            CaseInput::CdefFindDir {
                img,
                stride,
                bitdepth_min_8,
            } => compare(
                oracle::cdef_find_dir(img, *stride, *bitdepth_min_8),
                kernels::cdef_find_dir(bridge, img, *stride, *bitdepth_min_8)?,
            ),
        }
    }
}
