use std::fmt;
use std::ops::Range;

use svbridge_mem::{MemoryError, ShapeError};
use thiserror::Error;

use crate::session::SessionId;
use crate::simulator::SimulatorFault;

/// A call could not be staged. Detected before the simulator is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StagingError {
    #[error("buffers `{first}` ({first_span:#x?}) and `{second}` ({second_span:#x?}) overlap")]
    Overlap {
        first: String,
        second: String,
        first_span: Range<u64>,
        second_span: Range<u64>,
    },

    #[error("buffer `{buffer}` ({span:#x?}) overlaps the code image ({code:#x?})")]
    OverlapsCode {
        buffer: String,
        span: Range<u64>,
        code: Range<u64>,
    },

    #[error("register r{register} for `{name}` is outside the register file")]
    RegisterOutOfRange { name: String, register: usize },

    #[error("register r{register} is assigned to both `{first}` and `{second}`")]
    RegisterReused {
        register: usize,
        first: String,
        second: String,
    },

    #[error("layout declares `{0}` more than once")]
    DuplicateName(String),

    #[error("row pitch `{scalar}` refers to unknown buffer `{buffer}`")]
    UnknownBuffer { scalar: String, buffer: String },

    #[error("buffer `{buffer}` base 0x{base:x} is not word aligned")]
    MisalignedBase { buffer: String, base: u64 },

    #[error("allocator alignment 0x{0:x} must be a power of two of at least one word")]
    InvalidAlignment(u64),

    #[error("no room in the synthetic address space for buffer `{buffer}` ({len} bytes)")]
    AddressSpaceExhausted { buffer: String, len: u64 },

    #[error("expected {expected} scalar arguments, got {actual}")]
    ScalarCount { expected: usize, actual: usize },

    #[error("expected {expected} input buffers, got {actual}")]
    BufferCount { expected: usize, actual: usize },

    #[error("buffer `{buffer}`: {source}")]
    Shape {
        buffer: String,
        #[source]
        source: ShapeError,
    },

    #[error("`{0}` is not an output buffer of this layout")]
    UnknownOutput(String),

    #[error("memory staging failed: {0}")]
    Memory(#[from] MemoryError),

    #[error("simulator initialisation failed: {0}")]
    SimulatorInit(#[source] SimulatorFault),

    #[error("simulator handle has been shut down")]
    SimulatorShutDown,
}

/// The simulator failed to execute a staged session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("simulator `{simulator}` failed in session {session}: {fault}")]
pub struct ExecutionError {
    pub session: SessionId,
    pub simulator: String,
    #[source]
    pub fault: SimulatorFault,
}

/// Data the bridge expected in the final state was not reported by the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissingResultError {
    #[error("return register r{register} absent from the final state")]
    Register { register: usize },

    #[error("word 0x{addr:x} of buffer `{buffer}` absent from the final memory")]
    MemoryWord { buffer: String, addr: u64 },
}

/// Phase of a call in which a [`BridgeError`] arose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Staging,
    Execution,
    Unstaging,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Staging => "staging",
            Stage::Execution => "execution",
            Stage::Unstaging => "unstaging",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one bridged call, tagged with the kernel it was made for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("kernel `{kernel}`: staging failed: {source}")]
    Staging {
        kernel: String,
        #[source]
        source: StagingError,
    },

    #[error("kernel `{kernel}`: {source}")]
    Execution {
        kernel: String,
        #[source]
        source: ExecutionError,
    },

    #[error("kernel `{kernel}` session {session}: {source}")]
    MissingResult {
        kernel: String,
        session: SessionId,
        #[source]
        source: MissingResultError,
    },

    #[error("kernel `{kernel}` session {session}: unstaging failed: {source}")]
    Unstaging {
        kernel: String,
        session: SessionId,
        #[source]
        source: StagingError,
    },
}

impl BridgeError {
    pub fn kernel(&self) -> &str {
        match self {
            BridgeError::Staging { kernel, .. }
            | BridgeError::Execution { kernel, .. }
            | BridgeError::MissingResult { kernel, .. }
            | BridgeError::Unstaging { kernel, .. } => kernel,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            BridgeError::Staging { .. } => Stage::Staging,
            BridgeError::Execution { .. } => Stage::Execution,
            BridgeError::MissingResult { .. } | BridgeError::Unstaging { .. } => Stage::Unstaging,
        }
    }

    pub fn as_staging(&self) -> Option<&StagingError> {
        match self {
            BridgeError::Staging { source, .. } | BridgeError::Unstaging { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            BridgeError::Execution { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn as_missing_result(&self) -> Option<&MissingResultError> {
        match self {
            BridgeError::MissingResult { source, .. } => Some(source),
            _ => None,
        }
    }
}
