use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::machine::{FinalState, MachineState};
use crate::session::{SessionId, SessionLease};

/// Failure reported by a simulator. Fatal to the invocation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulatorFault {
    #[error("malformed code image: {0}")]
    MalformedImage(String),

    #[error("trap at pc=0x{pc:x}: {reason}")]
    Trap { pc: u64, reason: String },

    #[error("simulator unavailable: {0}")]
    Unavailable(String),
}

/// An instruction-level execution engine.
///
/// `run` is a blocking, deterministic function of its inputs: the same image and initial state
/// always produce the same final state or the same fault.
pub trait Simulator: Send + Sync {
    fn name(&self) -> &str;

    /// One-time engine start-up. Called at most once per [`SimulatorHandle`].
    fn initialize(&self) -> Result<(), SimulatorFault> {
        Ok(())
    }

    fn run(&self, code: &[u8], initial: &MachineState) -> Result<FinalState, SimulatorFault>;
}

impl<S: Simulator + ?Sized> Simulator for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn initialize(&self) -> Result<(), SimulatorFault> {
        (**self).initialize()
    }

    fn run(&self, code: &[u8], initial: &MachineState) -> Result<FinalState, SimulatorFault> {
        (**self).run(code, initial)
    }
}

pub(crate) struct HandleInner {
    simulator: Box<dyn Simulator>,
    init: OnceLock<Result<(), SimulatorFault>>,
    live_sessions: AtomicUsize,
    next_session: AtomicU64,
    shut_down: AtomicBool,
}

impl HandleInner {
    pub(crate) fn release_session(&self) {
        self.live_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Process-wide access to one simulator, created once and passed to every [`crate::CallBridge`]
/// that needs it.
///
/// Cloning is cheap and shares the engine, its one-time initialisation and session accounting.
#[derive(Clone)]
pub struct SimulatorHandle {
    inner: Arc<HandleInner>,
}

impl SimulatorHandle {
    pub fn new<S: Simulator + 'static>(simulator: S) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                simulator: Box::new(simulator),
                init: OnceLock::new(),
                live_sessions: AtomicUsize::new(0),
                next_session: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn simulator(&self) -> &dyn Simulator {
        self.inner.simulator.as_ref()
    }

    /// Runs [`Simulator::initialize`] the first time it is called and replays that outcome on
    /// every later call.
    pub fn ensure_initialized(&self) -> Result<(), SimulatorFault> {
        self.inner
            .init
            .get_or_init(|| {
                let name = self.inner.simulator.name();
                tracing::debug!(simulator = name, "initialising simulator");
                let outcome = self.inner.simulator.initialize();
                if let Err(err) = &outcome {
                    tracing::warn!(simulator = name, "simulator initialisation failed: {err}");
                }
                outcome
            })
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.inner.init.get(), Some(Ok(())))
    }

    /// Sessions staged but not yet consumed by a run (or dropped).
    pub fn live_sessions(&self) -> usize {
        self.inner.live_sessions.load(Ordering::Acquire)
    }

    pub fn sessions_started(&self) -> u64 {
        self.inner.next_session.load(Ordering::Acquire) - 1
    }

    /// Closes the handle for new sessions. Meant for process exit; sessions already staged may
    /// still run.
    pub fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                simulator = self.inner.simulator.name(),
                live_sessions = self.live_sessions(),
                "simulator handle shut down"
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    pub(crate) fn open_session(&self) -> SessionLease {
        let id = SessionId::new(self.inner.next_session.fetch_add(1, Ordering::AcqRel));
        self.inner.live_sessions.fetch_add(1, Ordering::AcqRel);
        SessionLease::new(Arc::clone(&self.inner), id)
    }
}

impl fmt::Debug for SimulatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatorHandle")
            .field("simulator", &self.inner.simulator.name())
            .field("initialized", &self.is_initialized())
            .field("live_sessions", &self.live_sessions())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
