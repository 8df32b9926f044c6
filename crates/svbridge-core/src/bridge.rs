use std::fmt;

use svbridge_mem::{
    pack, unpack, Element, ElementSink, ElementSource, ElementWidth, PackedWord, ShapeError,
};

use crate::error::{BridgeError, ExecutionError, MissingResultError, StagingError};
use crate::layout::{BufferSlot, Direction, ScalarSource, StagingLayout};
use crate::machine::MachineState;
use crate::session::{SimulationResult, SimulationSession};
use crate::simulator::SimulatorHandle;

/// A caller-owned buffer copied into the session at staging time.
pub struct BufferArg<'a> {
    source: Box<dyn ElementSource + 'a>,
}

impl<'a> BufferArg<'a> {
    pub fn new<T: Element>(data: &'a [T]) -> Self {
        Self {
            source: Box::new(data),
        }
    }

    pub fn from_source<S: ElementSource + 'a>(source: S) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn width(&self) -> ElementWidth {
        self.source.width()
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

impl fmt::Debug for BufferArg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferArg")
            .field("width", &self.width())
            .field("len", &self.len())
            .finish()
    }
}

/// Caller storage receiving an output buffer at unstaging time.
pub struct OutputSpec<'a> {
    slot: &'a str,
    sink: Box<dyn ElementSink + 'a>,
}

impl<'a> OutputSpec<'a> {
    pub fn new<T: Element>(slot: &'a str, dst: &'a mut [T]) -> Self {
        Self {
            slot,
            sink: Box::new(dst),
        }
    }

    pub fn from_sink<S: ElementSink + 'a>(slot: &'a str, sink: S) -> Self {
        Self {
            slot,
            sink: Box::new(sink),
        }
    }

    pub fn slot(&self) -> &str {
        self.slot
    }
}

impl fmt::Debug for OutputSpec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSpec")
            .field("slot", &self.slot)
            .field("width", &self.sink.width())
            .field("len", &self.sink.len())
            .finish()
    }
}

fn shape_error(slot: &BufferSlot) -> impl FnOnce(ShapeError) -> StagingError + '_ {
    move |source| StagingError::Shape {
        buffer: slot.name.clone(),
        source,
    }
}

/// Stages native calls into a simulator and brings their results back.
#[derive(Debug, Clone)]
pub struct CallBridge {
    handle: SimulatorHandle,
}

impl CallBridge {
    pub fn new(handle: SimulatorHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &SimulatorHandle {
        &self.handle
    }

    /// Builds a fresh session for one call of `layout.kernel()`.
    ///
    /// `scalars` are the caller-supplied scalar arguments in declaration order; `buffers` are the
    /// input and in/out buffers in declaration order. Output-only buffers are zero-filled in
    /// synthetic memory.
    pub fn stage<'code>(
        &self,
        code: &'code [u8],
        scalars: &[u64],
        buffers: Vec<BufferArg<'_>>,
        layout: &StagingLayout,
    ) -> Result<SimulationSession<'code>, BridgeError> {
        let state = self
            .build_state(code, scalars, buffers, layout)
            .map_err(|source| BridgeError::Staging {
                kernel: layout.kernel().to_string(),
                source,
            })?;

        let lease = self.handle.open_session();
        tracing::debug!(
            kernel = layout.kernel(),
            session = %lease.id(),
            code_len = code.len(),
            words = state.memory.word_count(),
            "staged call"
        );
        Ok(SimulationSession {
            kernel: layout.kernel().to_string(),
            code,
            state,
            lease,
        })
    }

    fn build_state(
        &self,
        code: &[u8],
        scalars: &[u64],
        buffers: Vec<BufferArg<'_>>,
        layout: &StagingLayout,
    ) -> Result<MachineState, StagingError> {
        if self.handle.is_shut_down() {
            return Err(StagingError::SimulatorShutDown);
        }
        self.handle
            .ensure_initialized()
            .map_err(StagingError::SimulatorInit)?;

        if scalars.len() != layout.argument_count() {
            return Err(StagingError::ScalarCount {
                expected: layout.argument_count(),
                actual: scalars.len(),
            });
        }
        if buffers.len() != layout.input_count() {
            return Err(StagingError::BufferCount {
                expected: layout.input_count(),
                actual: buffers.len(),
            });
        }

        let mut state = MachineState::default();
        let code_span = state.pc..state.pc.saturating_add(code.len() as u64);
        layout.check_clear_of(&code_span)?;

        let mut args = scalars.iter();
        for slot in layout.scalars() {
            let value = match &slot.source {
                ScalarSource::Argument => args.next().copied().unwrap_or_default(),
                ScalarSource::RowPitch(buffer) => layout
                    .buffer(buffer)
                    .map(|b| b.shape.row_pitch() as u64)
                    .ok_or_else(|| StagingError::UnknownBuffer {
                        scalar: slot.name.clone(),
                        buffer: buffer.clone(),
                    })?,
            };
            state.gpr[slot.register] = value;
        }

        let mut inputs = buffers.into_iter();
        for slot in layout.buffers() {
            state.gpr[slot.register] = slot.base;
            match slot.direction {
                Direction::In | Direction::InOut => {
                    let Some(arg) = inputs.next() else {
                        return Err(StagingError::BufferCount {
                            expected: layout.input_count(),
                            actual: 0,
                        });
                    };
                    let words = pack(arg.source.as_ref(), &slot.shape).map_err(shape_error(slot))?;
                    state.memory.write_words(slot.base, &words)?;
                }
                Direction::Out => {
                    state
                        .memory
                        .zero_words(slot.base, slot.shape.packed_words())?;
                }
            }
            tracing::trace!(
                buffer = %slot.name,
                register = slot.register,
                base = slot.base,
                words = slot.shape.packed_words(),
                "staged buffer"
            );
        }

        Ok(state)
    }

    /// Executes `session`. The session is consumed and released whether or not the simulator
    /// succeeds.
    pub fn run(&self, session: SimulationSession<'_>) -> Result<SimulationResult, BridgeError> {
        let simulator = self.handle.simulator();
        let id = session.id();
        let span = tracing::debug_span!("simulate", kernel = session.kernel(), session = %id);
        let _enter = span.enter();

        let outcome = simulator.run(session.code, &session.state);
        let SimulationSession { kernel, lease, .. } = session;
        drop(lease);

        match outcome {
            Ok(state) => {
                tracing::debug!(
                    gprs = state.gpr.len(),
                    words = state.memory.word_count(),
                    "simulation finished"
                );
                Ok(SimulationResult {
                    session: id,
                    kernel,
                    state,
                })
            }
            Err(fault) => {
                tracing::debug!("simulation failed: {fault}");
                Err(BridgeError::Execution {
                    kernel,
                    source: ExecutionError {
                        session: id,
                        simulator: simulator.name().to_string(),
                        fault,
                    },
                })
            }
        }
    }

    /// Reads the return value and copies every requested output buffer into caller storage.
    ///
    /// Returns `None` when the layout declares no return register.
    pub fn unstage(
        &self,
        result: &SimulationResult,
        layout: &StagingLayout,
        outputs: &mut [OutputSpec<'_>],
    ) -> Result<Option<u64>, BridgeError> {
        let kernel = || result.kernel().to_string();
        let session = result.session();

        let return_value = match layout.return_register() {
            Some(register) => Some(result.gpr(register).ok_or_else(|| {
                BridgeError::MissingResult {
                    kernel: kernel(),
                    session,
                    source: MissingResultError::Register { register },
                }
            })?),
            None => None,
        };

        // Every output is read back and checked before any caller storage is written.
        let mut ready = Vec::with_capacity(outputs.len());
        for output in outputs.iter() {
            let unstaging = |source| BridgeError::Unstaging {
                kernel: kernel(),
                session,
                source,
            };
            let slot = layout
                .buffer(output.slot)
                .filter(|slot| slot.direction.is_output())
                .ok_or_else(|| unstaging(StagingError::UnknownOutput(output.slot.to_string())))?;
            slot.shape
                .check_buffer(output.sink.width(), output.sink.len())
                .map_err(shape_error(slot))
                .map_err(unstaging)?;
            let words = collect_words(result, slot).map_err(|err| match err {
                CollectError::Missing(source) => BridgeError::MissingResult {
                    kernel: kernel(),
                    session,
                    source,
                },
                CollectError::Staging(source) => unstaging(source),
            })?;
            ready.push((slot, words));
        }

        for (output, (slot, words)) in outputs.iter_mut().zip(&ready) {
            unpack(words, &slot.shape, output.sink.as_mut())
                .map_err(shape_error(slot))
                .map_err(|source| BridgeError::Unstaging {
                    kernel: kernel(),
                    session,
                    source,
                })?;
        }

        tracing::debug!(
            kernel = result.kernel(),
            session = %session,
            outputs = outputs.len(),
            "unstaged call"
        );
        Ok(return_value)
    }

    /// `stage`, `run` and `unstage` in one step.
    pub fn call(
        &self,
        code: &[u8],
        scalars: &[u64],
        buffers: Vec<BufferArg<'_>>,
        layout: &StagingLayout,
        outputs: &mut [OutputSpec<'_>],
    ) -> Result<Option<u64>, BridgeError> {
        let session = self.stage(code, scalars, buffers, layout)?;
        let result = self.run(session)?;
        self.unstage(&result, layout, outputs)
    }
}

enum CollectError {
    Missing(MissingResultError),
    Staging(StagingError),
}

fn collect_words(
    result: &SimulationResult,
    slot: &BufferSlot,
) -> Result<Vec<PackedWord>, CollectError> {
    (0..slot.shape.packed_words())
        .map(|i| {
            let addr = slot.word_addr(i);
            match result.memory().try_read_word(addr) {
                Ok(Some(value)) => Ok(PackedWord::new(value)),
                Ok(None) => Err(CollectError::Missing(MissingResultError::MemoryWord {
                    buffer: slot.name.clone(),
                    addr,
                })),
                Err(err) => Err(CollectError::Staging(err.into())),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use svbridge_mem::BufferShape;

    use super::*;
    use crate::machine::FinalState;
    use crate::simulator::{Simulator, SimulatorFault};

    /// r3 = input base, r4 = output base, r5 = element count (u32). Doubles each element and
    /// returns the sum of the inputs in r3.
    struct Doubler;

    impl Simulator for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn run(&self, code: &[u8], initial: &MachineState) -> Result<FinalState, SimulatorFault> {
            if code.is_empty() {
                return Err(SimulatorFault::MalformedImage("empty image".to_string()));
            }
            let mut state = initial.clone();
            let (src, dst, n) = (state.gpr[3], state.gpr[4], state.gpr[5]);
            let pc = state.pc;
            let trap = |_: svbridge_mem::MemoryError| SimulatorFault::Trap {
                pc,
                reason: "bad access".to_string(),
            };
            let mut sum = 0u64;
            for i in 0..n {
                let v = state.memory.read_u32(src + i * 4).map_err(trap)?;
                sum += u64::from(v);
                state
                    .memory
                    .write_u32(dst + i * 4, v.wrapping_mul(2))
                    .map_err(trap)?;
            }
            state.gpr[3] = sum;
            Ok(FinalState::from_machine(state))
        }
    }

    /// Reports nothing at all.
    struct Silent;

    impl Simulator for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn run(&self, _code: &[u8], _initial: &MachineState) -> Result<FinalState, SimulatorFault> {
            Ok(FinalState::default())
        }
    }

    const CODE: &[u8] = &[0x4e, 0x80, 0x00, 0x20];

    fn doubler_layout(len: usize) -> StagingLayout {
        StagingLayout::builder("double")
            .input("src", 3, BufferShape::of::<u32>(len))
            .output("dst", 4, BufferShape::of::<u32>(len))
            .scalar("n", 5)
            .build()
            .unwrap()
    }

    #[test]
    fn call_round_trips_buffers_and_return_value() {
        let bridge = CallBridge::new(SimulatorHandle::new(Doubler));
        let layout = doubler_layout(5);
        let src = [1u32, 2, 3, 4, 5];
        let mut dst = [0u32; 5];
        let ret = bridge
            .call(
                CODE,
                &[5],
                vec![BufferArg::new(&src)],
                &layout,
                &mut [OutputSpec::new("dst", &mut dst)],
            )
            .unwrap();
        assert_eq!(ret, Some(15));
        assert_eq!(dst, [2, 4, 6, 8, 10]);
        assert_eq!(bridge.handle().live_sessions(), 0);
    }

    #[test]
    fn stage_places_addresses_and_zeroes_outputs() {
        let bridge = CallBridge::new(SimulatorHandle::new(Doubler));
        let layout = doubler_layout(3);
        let src = [7u32, 8, 9];
        let session = bridge
            .stage(CODE, &[3], vec![BufferArg::new(&src)], &layout)
            .unwrap();
        let machine = session.machine();
        assert_eq!(machine.gpr[3], 0x10_0000);
        assert_eq!(machine.gpr[4], 0x20_0000);
        assert_eq!(machine.gpr[5], 3);
        assert_eq!(machine.memory.try_read_word(0x10_0000), Ok(Some(7 | (8 << 32))));
        assert_eq!(machine.memory.try_read_word(0x10_0008), Ok(Some(9)));
        assert_eq!(machine.memory.try_read_word(0x20_0000), Ok(Some(0)));
        assert_eq!(machine.memory.try_read_word(0x20_0008), Ok(Some(0)));
        assert_eq!(machine.memory.try_read_word(0x20_0010), Ok(None));
        assert_eq!(bridge.handle().live_sessions(), 1);
        drop(session);
        assert_eq!(bridge.handle().live_sessions(), 0);
    }

    #[test]
    fn row_pitch_scalar_is_filled_from_the_shape() {
        let bridge = CallBridge::new(SimulatorHandle::new(Doubler));
        let layout = StagingLayout::builder("pitch")
            .input("block", 3, BufferShape::grid(4, 4, 9, ElementWidth::Half))
            .row_pitch("pitch", 4, "block")
            .build()
            .unwrap();
        let block = [0i16; 36];
        let session = bridge
            .stage(CODE, &[], vec![BufferArg::new(&block)], &layout)
            .unwrap();
        assert_eq!(session.machine().gpr[4], 8);
    }

    #[test]
    fn argument_counts_are_checked() {
        let bridge = CallBridge::new(SimulatorHandle::new(Doubler));
        let layout = doubler_layout(2);
        let src = [1u32, 2];

        let err = bridge
            .stage(CODE, &[], vec![BufferArg::new(&src)], &layout)
            .unwrap_err();
        assert!(matches!(
            err.as_staging(),
            Some(StagingError::ScalarCount {
                expected: 1,
                actual: 0
            })
        ));

        let err = bridge.stage(CODE, &[2], Vec::new(), &layout).unwrap_err();
        assert!(matches!(
            err.as_staging(),
            Some(StagingError::BufferCount {
                expected: 1,
                actual: 0
            })
        ));
        assert_eq!(bridge.handle().sessions_started(), 0);
    }

    #[test]
    fn element_width_mismatch_is_a_staging_error() {
        let bridge = CallBridge::new(SimulatorHandle::new(Doubler));
        let layout = doubler_layout(2);
        let src = [1u16, 2];
        let err = bridge
            .stage(CODE, &[2], vec![BufferArg::new(&src)], &layout)
            .unwrap_err();
        assert_eq!(err.stage(), crate::Stage::Staging);
        assert!(matches!(
            err.as_staging(),
            Some(StagingError::Shape {
                source: ShapeError::WidthMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn buffer_over_the_code_image_is_rejected() {
        let bridge = CallBridge::new(SimulatorHandle::new(Doubler));
        let layout = StagingLayout::builder("low")
            .pinned("src", 3, BufferShape::of::<u8>(8), Direction::In, 0)
            .build()
            .unwrap();
        let err = bridge
            .stage(CODE, &[], vec![BufferArg::new(&[0u8; 8])], &layout)
            .unwrap_err();
        assert!(matches!(
            err.as_staging(),
            Some(StagingError::OverlapsCode { .. })
        ));
    }

    #[test]
    fn faults_become_execution_errors_and_release_the_session() {
        let bridge = CallBridge::new(SimulatorHandle::new(Doubler));
        let layout = doubler_layout(1);
        let session = bridge
            .stage(&[], &[1], vec![BufferArg::new(&[1u32])], &layout)
            .unwrap();
        let id = session.id();
        let err = bridge.run(session).unwrap_err();
        assert_eq!(err.stage(), crate::Stage::Execution);
        assert_eq!(err.kernel(), "double");
        let exec = err.as_execution().unwrap();
        assert_eq!(exec.session, id);
        assert_eq!(exec.simulator, "doubler");
        assert!(matches!(exec.fault, SimulatorFault::MalformedImage(_)));
        assert_eq!(bridge.handle().live_sessions(), 0);
    }

    #[test]
    fn absent_results_are_reported_not_defaulted() {
        let bridge = CallBridge::new(SimulatorHandle::new(Arc::new(Silent)));
        let layout = doubler_layout(1);
        let session = bridge
            .stage(CODE, &[1], vec![BufferArg::new(&[1u32])], &layout)
            .unwrap();
        let result = bridge.run(session).unwrap();

        let mut dst = [0u32; 1];
        let err = bridge
            .unstage(&result, &layout, &mut [OutputSpec::new("dst", &mut dst)])
            .unwrap_err();
        assert!(matches!(
            err.as_missing_result(),
            Some(MissingResultError::Register { register: 3 })
        ));

        let quiet = StagingLayout::builder("double")
            .input("src", 3, BufferShape::of::<u32>(1))
            .output("dst", 4, BufferShape::of::<u32>(1))
            .scalar("n", 5)
            .no_return_value()
            .build()
            .unwrap();
        let err = bridge
            .unstage(&result, &quiet, &mut [OutputSpec::new("dst", &mut dst)])
            .unwrap_err();
        assert_eq!(
            err.as_missing_result(),
            Some(&MissingResultError::MemoryWord {
                buffer: "dst".to_string(),
                addr: 0x20_0000,
            })
        );
    }

    #[test]
    fn unknown_output_slot_is_an_unstaging_error() {
        let bridge = CallBridge::new(SimulatorHandle::new(Doubler));
        let layout = doubler_layout(1);
        let session = bridge
            .stage(CODE, &[1], vec![BufferArg::new(&[4u32])], &layout)
            .unwrap();
        let result = bridge.run(session).unwrap();
        let mut dst = [0u32; 1];
        for slot in ["missing", "src"] {
            let err = bridge
                .unstage(&result, &layout, &mut [OutputSpec::new(slot, &mut dst)])
                .unwrap_err();
            assert_eq!(err.stage(), crate::Stage::Unstaging);
            assert_eq!(
                err.as_staging(),
                Some(&StagingError::UnknownOutput(slot.to_string()))
            );
        }
    }

    #[test]
    fn shut_down_handle_refuses_new_sessions() {
        let handle = SimulatorHandle::new(Doubler);
        let bridge = CallBridge::new(handle.clone());
        handle.shutdown();
        let err = bridge
            .stage(CODE, &[1], vec![BufferArg::new(&[1u32])], &doubler_layout(1))
            .unwrap_err();
        assert_eq!(err.as_staging(), Some(&StagingError::SimulatorShutDown));
    }
}
