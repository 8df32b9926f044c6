#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use svbridge::{CallBridge, FinalState, MachineState, Simulator, SimulatorFault, SimulatorHandle};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Reports the initial state back unchanged and remembers the last one it was given.
#[derive(Default)]
pub struct Recorder {
    runs: AtomicUsize,
    last: Mutex<Option<MachineState>>,
}

impl Recorder {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<MachineState> {
        self.last.lock().unwrap().clone()
    }
}

impl Simulator for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn run(&self, _code: &[u8], initial: &MachineState) -> Result<FinalState, SimulatorFault> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(initial.clone());
        Ok(FinalState::from_machine(initial.clone()))
    }
}

pub fn recording_bridge() -> (CallBridge, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let bridge = CallBridge::new(SimulatorHandle::new(Arc::clone(&recorder)));
    (bridge, recorder)
}

/// Bytes of the code image used with the recorder; any non-empty image will do.
pub const CODE: &[u8] = &[0x60, 0x00, 0x00, 0x00];
