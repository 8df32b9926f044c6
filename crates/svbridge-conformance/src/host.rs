//! A host-side [`Simulator`] that executes registered kernels against simulated machine state.
//!
//! Code images are not decoded instruction by instruction. An image names a kernel (see
//! [`KernelImage`]) and the simulator dispatches to the Rust function registered under that name,
//! handing it a [`Cpu`] that only exposes the register file and synthetic memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use svbridge_core::{FinalState, MachineState, Simulator, SimulatorFault, Spr};
use svbridge_mem::MemoryError;

const IMAGE_MAGIC: &[u8; 4] = b"SVBK";
const IMAGE_HEADER: usize = IMAGE_MAGIC.len() + 2;

/// Encoded form of a kernel reference: `SVBK`, little-endian `u16` name length, UTF-8 name,
/// zero padding to a 4-byte boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelImage {
    name: String,
}

impl KernelImage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encode(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let len = u16::try_from(name.len()).unwrap_or(u16::MAX);
        let mut out = Vec::with_capacity(IMAGE_HEADER + name.len() + 3);
        out.extend_from_slice(IMAGE_MAGIC);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&name[..usize::from(len)]);
        out.resize(out.len().next_multiple_of(4), 0);
        out
    }

    pub fn decode(code: &[u8]) -> Result<Self, SimulatorFault> {
        let malformed = |msg: &str| SimulatorFault::MalformedImage(msg.to_string());
        let header = code
            .get(..IMAGE_HEADER)
            .ok_or_else(|| malformed("image shorter than its header"))?;
        if &header[..4] != IMAGE_MAGIC {
            return Err(malformed("bad image magic"));
        }
        let len = usize::from(u16::from_le_bytes([header[4], header[5]]));
        let name = code
            .get(IMAGE_HEADER..IMAGE_HEADER + len)
            .ok_or_else(|| malformed("truncated kernel name"))?;
        let name = std::str::from_utf8(name).map_err(|_| malformed("kernel name is not UTF-8"))?;
        Ok(Self::new(name))
    }
}

/// The machine as a kernel sees it while running.
#[derive(Debug)]
pub struct Cpu {
    state: MachineState,
}

impl Cpu {
    fn new(state: MachineState) -> Self {
        Self { state }
    }

    pub fn pc(&self) -> u64 {
        self.state.pc
    }

    pub fn gpr(&self, index: usize) -> u64 {
        self.state.gpr[index]
    }

    pub fn set_gpr(&mut self, index: usize, value: u64) {
        self.state.gpr[index] = value;
    }

    pub fn spr(&self, spr: Spr) -> u64 {
        self.state.special.spr(spr)
    }

    pub fn set_spr(&mut self, spr: Spr, value: u64) {
        self.state.special.set_spr(spr, value);
    }

    /// A trap at the current pc.
    pub fn trap(&self, reason: impl Into<String>) -> SimulatorFault {
        SimulatorFault::Trap {
            pc: self.state.pc,
            reason: reason.into(),
        }
    }

    fn access_fault(&self, err: MemoryError) -> SimulatorFault {
        self.trap(format!("storage access: {err}"))
    }

    pub fn load_u8(&self, addr: u64) -> Result<u8, SimulatorFault> {
        self.state
            .memory
            .read_u8(addr)
            .map_err(|e| self.access_fault(e))
    }

    pub fn load_u16(&self, addr: u64) -> Result<u16, SimulatorFault> {
        self.state
            .memory
            .read_u16(addr)
            .map_err(|e| self.access_fault(e))
    }

    pub fn load_u32(&self, addr: u64) -> Result<u32, SimulatorFault> {
        self.state
            .memory
            .read_u32(addr)
            .map_err(|e| self.access_fault(e))
    }

    pub fn load_u64(&self, addr: u64) -> Result<u64, SimulatorFault> {
        self.state
            .memory
            .read_u64(addr)
            .map_err(|e| self.access_fault(e))
    }

    pub fn store_u8(&mut self, addr: u64, value: u8) -> Result<(), SimulatorFault> {
        let result = self.state.memory.write_u8(addr, value);
        result.map_err(|e| self.access_fault(e))
    }

    pub fn store_u16(&mut self, addr: u64, value: u16) -> Result<(), SimulatorFault> {
        let result = self.state.memory.write_u16(addr, value);
        result.map_err(|e| self.access_fault(e))
    }

    pub fn store_u32(&mut self, addr: u64, value: u32) -> Result<(), SimulatorFault> {
        let result = self.state.memory.write_u32(addr, value);
        result.map_err(|e| self.access_fault(e))
    }

    pub fn store_u64(&mut self, addr: u64, value: u64) -> Result<(), SimulatorFault> {
        let result = self.state.memory.write_u64(addr, value);
        result.map_err(|e| self.access_fault(e))
    }

    fn into_state(self) -> MachineState {
        self.state
    }
}

pub type KernelFn = fn(&mut Cpu) -> Result<(), SimulatorFault>;

/// Runs kernels registered by name. Little-endian only.
#[derive(Default)]
pub struct HostSimulator {
    kernels: BTreeMap<String, KernelFn>,
    init_calls: AtomicUsize,
}

impl HostSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulator with every candidate kernel of this crate registered.
    pub fn with_candidates() -> Self {
        let mut sim = Self::new();
        crate::kernels::register_candidates(&mut sim);
        sim
    }

    pub fn register(&mut self, name: impl Into<String>, kernel: KernelFn) -> &mut Self {
        self.kernels.insert(name.into(), kernel);
        self
    }

    /// How many times [`Simulator::initialize`] has been called.
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for HostSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSimulator")
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .field("init_calls", &self.init_calls())
            .finish()
    }
}

impl Simulator for HostSimulator {
    fn name(&self) -> &str {
        "host"
    }

    fn initialize(&self) -> Result<(), SimulatorFault> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run(&self, code: &[u8], initial: &MachineState) -> Result<FinalState, SimulatorFault> {
        if initial.special.big_endian {
            return Err(SimulatorFault::Unavailable(
                "big-endian execution is not supported".to_string(),
            ));
        }
        let image = KernelImage::decode(code)?;
        let kernel = self.kernels.get(image.name()).ok_or_else(|| {
            SimulatorFault::MalformedImage(format!("unknown kernel `{}`", image.name()))
        })?;

        let mut cpu = Cpu::new(initial.clone());
        kernel(&mut cpu)?;

        let mut state = cpu.into_state();
        state.pc = state.special.spr(Spr::Lr);
        tracing::trace!(kernel = image.name(), pc = state.pc, "kernel returned");
        Ok(FinalState::from_machine(state))
    }
}

/// Wraps a simulator and strips chosen registers and memory words from its final state.
#[derive(Debug)]
pub struct FaultInjector<S> {
    inner: S,
    registers: BTreeSet<usize>,
    words: BTreeSet<u64>,
}

impl<S: Simulator> FaultInjector<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            registers: BTreeSet::new(),
            words: BTreeSet::new(),
        }
    }

    pub fn drop_register(mut self, register: usize) -> Self {
        self.registers.insert(register);
        self
    }

    /// `addr` is rounded down to its word.
    pub fn drop_word(mut self, addr: u64) -> Self {
        self.words.insert(svbridge_mem::SparseMemory::word_base(addr));
        self
    }
}

impl<S: Simulator> Simulator for FaultInjector<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initialize(&self) -> Result<(), SimulatorFault> {
        self.inner.initialize()
    }

    fn run(&self, code: &[u8], initial: &MachineState) -> Result<FinalState, SimulatorFault> {
        let mut state = self.inner.run(code, initial)?;
        for register in &self.registers {
            state.gpr.remove(register);
        }
        for &addr in &self.words {
            // Word bases are aligned, so removal cannot fail.
            let _ = state.memory.remove_word(addr);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_r3_r4(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
        cpu.set_gpr(3, cpu.gpr(3).wrapping_add(cpu.gpr(4)));
        Ok(())
    }

    fn copy_word(cpu: &mut Cpu) -> Result<(), SimulatorFault> {
        let v = cpu.load_u64(cpu.gpr(3))?;
        cpu.store_u64(cpu.gpr(4), v)
    }

    fn sim() -> HostSimulator {
        let mut sim = HostSimulator::new();
        sim.register("add", add_r3_r4).register("copy", copy_word);
        sim
    }

    #[test]
    fn image_encoding_is_padded_and_decodes() {
        let image = KernelImage::new("add");
        let code = image.encode();
        assert_eq!(&code[..4], b"SVBK");
        assert_eq!(code.len() % 4, 0);
        assert_eq!(KernelImage::decode(&code).unwrap(), image);
    }

    #[test]
    fn malformed_images_are_rejected() {
        let sim = sim();
        let state = MachineState::default();
        for code in [
            Vec::new(),
            b"SVB".to_vec(),
            b"XXXX\x03\x00add\x00".to_vec(),
            b"SVBK\x09\x00add".to_vec(),
            KernelImage::new("nope").encode(),
        ] {
            assert!(matches!(
                sim.run(&code, &state),
                Err(SimulatorFault::MalformedImage(_))
            ));
        }
    }

    #[test]
    fn kernels_see_registers_and_memory() {
        let sim = sim();
        let mut state = MachineState::default();
        state.gpr[3] = 40;
        state.gpr[4] = 2;
        let out = sim.run(&KernelImage::new("add").encode(), &state).unwrap();
        assert_eq!(out.gpr.get(&3), Some(&42));
        assert_eq!(out.pc, Some(svbridge_core::RETURN_SENTINEL));

        let mut state = MachineState::default();
        state.gpr[3] = 0x1000;
        state.gpr[4] = 0x2000;
        state.memory.write_word(0x1000, 0xfeed).unwrap();
        let out = sim.run(&KernelImage::new("copy").encode(), &state).unwrap();
        assert_eq!(out.memory.try_read_word(0x2000), Ok(Some(0xfeed)));
    }

    #[test]
    fn big_endian_mode_is_unavailable() {
        let mut state = MachineState::default();
        state.special.big_endian = true;
        assert!(matches!(
            sim().run(&KernelImage::new("add").encode(), &state),
            Err(SimulatorFault::Unavailable(_))
        ));
    }

    #[test]
    fn injector_removes_reported_values() {
        let sim = FaultInjector::new(sim()).drop_register(3).drop_word(0x2004);
        let mut state = MachineState::default();
        state.gpr[3] = 0x1000;
        state.gpr[4] = 0x2000;
        state.memory.write_word(0x1000, 1).unwrap();
        let out = sim.run(&KernelImage::new("copy").encode(), &state).unwrap();
        assert!(!out.gpr.contains_key(&3));
        assert_eq!(out.gpr.get(&4), Some(&0x2000));
        assert!(!out.memory.contains_word(0x2000));
        assert!(out.memory.contains_word(0x1000));
    }
}
