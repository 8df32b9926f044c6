use std::fmt;
use std::sync::Arc;

use svbridge_mem::SparseMemory;

use crate::machine::{FinalState, MachineState};
use crate::simulator::HandleInner;

/// Identifies one simulated invocation in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Holds a session's slot in the handle's accounting; released on drop.
pub(crate) struct SessionLease {
    handle: Arc<HandleInner>,
    id: SessionId,
}

impl SessionLease {
    pub(crate) fn new(handle: Arc<HandleInner>, id: SessionId) -> Self {
        Self { handle, id }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.handle.release_session();
        tracing::trace!(session = %self.id, "session released");
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionLease").field(&self.id).finish()
    }
}

/// One isolated, ready-to-execute call: a borrowed code image plus the machine state built for
/// it.
///
/// A session is never reused; [`crate::CallBridge::run`] consumes it.
#[derive(Debug)]
pub struct SimulationSession<'code> {
    pub(crate) kernel: String,
    pub(crate) code: &'code [u8],
    pub(crate) state: MachineState,
    pub(crate) lease: SessionLease,
}

impl<'code> SimulationSession<'code> {
    pub fn id(&self) -> SessionId {
        self.lease.id()
    }

    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    pub fn code(&self) -> &'code [u8] {
        self.code
    }

    pub fn machine(&self) -> &MachineState {
        &self.state
    }
}

/// Final state of a completed session.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub(crate) session: SessionId,
    pub(crate) kernel: String,
    pub(crate) state: FinalState,
}

impl SimulationResult {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    pub fn final_state(&self) -> &FinalState {
        &self.state
    }

    pub fn gpr(&self, index: usize) -> Option<u64> {
        self.state.gpr.get(&index).copied()
    }

    pub fn memory(&self) -> &SparseMemory {
        &self.state.memory
    }
}
