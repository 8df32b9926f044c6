//! Cross-ISA call bridge.
//!
//! A native call `result = kernel(args...)` is turned into an isolated simulated machine state,
//! executed by an external [`Simulator`], and the final state is turned back into a return value
//! and caller-visible output buffers:
//!
//! 1. [`CallBridge::stage`] builds a fresh [`SimulationSession`]: scalars go into general purpose
//!    registers, buffers are packed into synthetic memory at addresses chosen by the kernel's
//!    [`StagingLayout`], output-only buffers are pre-zeroed.
//! 2. [`CallBridge::run`] hands the session to the simulator behind a [`SimulatorHandle`] and
//!    consumes it, releasing the session on every exit path.
//! 3. [`CallBridge::unstage`] reads the return register and copies output buffers back. Anything
//!    the simulator did not report is a [`MissingResultError`], never a silent zero.
//!
//! Synthetic memory is byte addressed on both the staging and the read-back path.

#![forbid(unsafe_code)]

mod bridge;
mod error;
mod layout;
mod machine;
mod session;
mod simulator;

pub use crate::bridge::{BufferArg, CallBridge, OutputSpec};
pub use crate::error::{BridgeError, ExecutionError, MissingResultError, Stage, StagingError};
pub use crate::layout::{
    AddressAllocator, BufferSlot, Direction, ScalarSlot, ScalarSource, StagingLayout,
    StagingLayoutBuilder, DEFAULT_REGION_ALIGN, DEFAULT_REGION_BASE,
};
pub use crate::machine::{
    FinalState, MachineState, SpecialState, Spr, DEFAULT_RETURN_REGISTER, FPR_COUNT, GPR_COUNT,
    RETURN_SENTINEL,
};
pub use crate::session::{SessionId, SimulationResult, SimulationSession};
pub use crate::simulator::{Simulator, SimulatorFault, SimulatorHandle};

pub use svbridge_mem::{BufferShape, Element, ElementWidth, SparseMemory};
