use std::collections::BTreeMap;

use svbridge_mem::SparseMemory;

pub const GPR_COUNT: usize = 128;
pub const FPR_COUNT: usize = 128;

/// Link-register value installed before every call. A kernel returns by branching to it, and
/// simulators stop when control reaches this address.
pub const RETURN_SENTINEL: u64 = 0xff_ffff;

/// Register holding the first argument on entry and the return value on exit.
pub const DEFAULT_RETURN_REGISTER: usize = 3;

/// Named special purpose registers a kernel may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Spr {
    Xer,
    Lr,
    Ctr,
    Srr0,
    Srr1,
}

impl Spr {
    pub const ALL: [Spr; 5] = [Spr::Xer, Spr::Lr, Spr::Ctr, Spr::Srr0, Spr::Srr1];

    pub const fn name(self) -> &'static str {
        match self {
            Spr::Xer => "XER",
            Spr::Lr => "LR",
            Spr::Ctr => "CTR",
            Spr::Srr0 => "SRR0",
            Spr::Srr1 => "SRR1",
        }
    }
}

/// Everything besides the register files and memory that a simulated call starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialState {
    pub sprs: BTreeMap<Spr, u64>,
    /// Vector/predication state (`SVSTATE`); zero means scalar execution.
    pub svstate: u64,
    pub cr: u32,
    pub big_endian: bool,
}

impl Default for SpecialState {
    fn default() -> Self {
        let mut sprs = BTreeMap::new();
        sprs.insert(Spr::Lr, RETURN_SENTINEL);
        Self {
            sprs,
            svstate: 0,
            cr: 0,
            big_endian: false,
        }
    }
}

impl SpecialState {
    /// Value of `spr`, zero when it was never set.
    pub fn spr(&self, spr: Spr) -> u64 {
        self.sprs.get(&spr).copied().unwrap_or(0)
    }

    pub fn set_spr(&mut self, spr: Spr, value: u64) {
        self.sprs.insert(spr, value);
    }
}

/// Initial state of one simulated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub gpr: [u64; GPR_COUNT],
    pub fpr: [u64; FPR_COUNT],
    pub special: SpecialState,
    pub memory: SparseMemory,
    /// Entry address; the code image is loaded here.
    pub pc: u64,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            gpr: [0; GPR_COUNT],
            fpr: [0; FPR_COUNT],
            special: SpecialState::default(),
            memory: SparseMemory::new(),
            pc: 0,
        }
    }
}

/// State reported back by a simulator.
///
/// Registers are keyed by index and may be absent; absence is what lets the bridge distinguish
/// "the simulator did not report this" from "the value is zero".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalState {
    pub gpr: BTreeMap<usize, u64>,
    pub memory: SparseMemory,
    pub pc: Option<u64>,
}

impl FinalState {
    /// Reports every register and word of `state`.
    pub fn from_machine(state: MachineState) -> Self {
        Self {
            gpr: state.gpr.iter().copied().enumerate().collect(),
            memory: state.memory,
            pc: Some(state.pc),
        }
    }
}
