mod harness;

use anyhow::Result;
use svbridge::{
    BufferArg, BufferShape, Direction, ElementWidth, OutputSpec, ShapeError, StagingError,
    StagingLayout,
};

use harness::{recording_bridge, CODE};

#[test]
fn partial_final_word_is_zero_extended() -> Result<()> {
    harness::init_tracing();
    let (bridge, recorder) = recording_bridge();
    let layout = StagingLayout::builder("bytes36")
        .input("buf", 3, BufferShape::of::<u8>(36))
        .no_return_value()
        .build()?;
    let data: Vec<u8> = (1..=36).collect();

    bridge.call(CODE, &[], vec![BufferArg::new(&data)], &layout, &mut [])?;

    let machine = recorder.last().unwrap();
    let base = machine.gpr[3];
    assert_eq!(base, 0x10_0000);
    for word in 0..4u64 {
        let expected =
            u64::from_le_bytes(std::array::from_fn(|i| (word * 8 + i as u64 + 1) as u8));
        assert_eq!(machine.memory.try_read_word(base + word * 8)?, Some(expected));
    }
    assert_eq!(
        machine.memory.try_read_word(base + 32)?,
        Some(u64::from_le_bytes([33, 34, 35, 36, 0, 0, 0, 0]))
    );
    assert_eq!(machine.memory.try_read_word(base + 40)?, None);
    assert_eq!(machine.memory.word_count(), 5);
    Ok(())
}

#[test]
fn unwritten_memory_reads_as_zero_before_execution() -> Result<()> {
    let (bridge, _recorder) = recording_bridge();
    let layout = StagingLayout::builder("empty")
        .input("buf", 3, BufferShape::of::<u32>(2))
        .build()?;
    let session = bridge.stage(CODE, &[], vec![BufferArg::new(&[1u32, 2])], &layout)?;
    let memory = &session.machine().memory;
    assert_eq!(memory.read_word(0x40_0000)?, 0);
    assert_eq!(memory.read_u16(0x10_0008)?, 0);
    assert_eq!(memory.read_u32(0x10_0004)?, 2);
    Ok(())
}

#[test]
fn overlap_is_rejected_before_the_simulator_runs() {
    let (bridge, recorder) = recording_bridge();
    let built = StagingLayout::builder("collide")
        .pinned("a", 3, BufferShape::of::<u8>(16), Direction::In, 0x10_0000)
        .pinned("b", 4, BufferShape::of::<u8>(16), Direction::Out, 0x10_0008)
        .build();
    assert!(matches!(built, Err(StagingError::Overlap { .. })));

    // Allocated slots step around pinned ones instead of colliding.
    let layout = StagingLayout::builder("around")
        .pinned("fixed", 3, BufferShape::of::<u8>(16), Direction::In, 0x10_0000)
        .output("out", 4, BufferShape::of::<u8>(16))
        .build()
        .unwrap();
    assert_eq!(layout.buffer("out").unwrap().base, 0x20_0000);

    // A buffer over the code image is caught at stage time.
    let layout = StagingLayout::builder("code")
        .pinned("low", 3, BufferShape::of::<u8>(8), Direction::In, 0)
        .build()
        .unwrap();
    let err = bridge
        .stage(CODE, &[], vec![BufferArg::new(&[0u8; 8])], &layout)
        .unwrap_err();
    assert!(matches!(
        err.as_staging(),
        Some(StagingError::OverlapsCode { .. })
    ));
    assert_eq!(recorder.runs(), 0);
    assert_eq!(bridge.handle().sessions_started(), 0);
}

#[test]
fn outputs_are_pre_zeroed_and_read_back() -> Result<()> {
    let (bridge, recorder) = recording_bridge();
    let layout = StagingLayout::builder("zeroed")
        .output("out", 3, BufferShape::of::<i16>(7))
        .no_return_value()
        .build()?;

    let mut out = [0x5555i16; 7];
    bridge.call(
        CODE,
        &[],
        Vec::new(),
        &layout,
        &mut [OutputSpec::new("out", &mut out)],
    )?;

    let machine = recorder.last().unwrap();
    for addr in [0x10_0000, 0x10_0008] {
        assert_eq!(machine.memory.try_read_word(addr)?, Some(0));
    }
    assert_eq!(out, [0; 7]);
    Ok(())
}

#[test]
fn caller_stride_does_not_change_the_staged_image() -> Result<()> {
    let (bridge, recorder) = recording_bridge();
    let dense: Vec<u16> = (0..12).collect();
    let mut padded = vec![0xdead_u16; 3 * 7];
    for row in 0..3 {
        padded[row * 7..row * 7 + 4].copy_from_slice(&dense[row * 4..row * 4 + 4]);
    }

    let mut images = Vec::new();
    for (data, stride) in [(&dense, 4), (&padded, 7)] {
        let layout = StagingLayout::builder("grid")
            .input("g", 3, BufferShape::grid(4, 3, stride, ElementWidth::Half))
            .row_pitch("pitch", 4, "g")
            .build()?;
        bridge.call(CODE, &[], vec![BufferArg::new(data)], &layout, &mut [])?;
        let machine = recorder.last().unwrap();
        assert_eq!(machine.gpr[4], 8);
        images.push(machine.memory);
    }
    assert_eq!(images[0], images[1]);
    Ok(())
}

#[test]
fn inout_round_trip_leaves_destination_padding_alone() -> Result<()> {
    let (bridge, _recorder) = recording_bridge();
    let layout = StagingLayout::builder("inout")
        .inout("g", 3, BufferShape::grid(3, 2, 5, ElementWidth::Byte))
        .build()?;
    let src = [1u8, 2, 3, 0, 0, 4, 5, 6];
    let mut dst = [0xffu8; 8];

    let ret = bridge.call(
        CODE,
        &[],
        vec![BufferArg::new(&src)],
        &layout,
        &mut [OutputSpec::new("g", &mut dst)],
    )?;

    // The recorder reports r3 unchanged: the buffer's base address.
    assert_eq!(ret, Some(0x10_0000));
    assert_eq!(dst, [1, 2, 3, 0xff, 0xff, 4, 5, 6]);
    Ok(())
}

#[test]
fn buffer_longer_than_its_slot_is_rejected() {
    let (bridge, recorder) = recording_bridge();
    let layout = StagingLayout::builder("exact")
        .input("v", 3, BufferShape::of::<u32>(3))
        .build()
        .unwrap();
    let err = bridge
        .stage(CODE, &[], vec![BufferArg::new(&[1u32, 2, 3, 4, 5])], &layout)
        .unwrap_err();
    assert!(matches!(
        err.as_staging(),
        Some(StagingError::Shape {
            source: ShapeError::BufferTooLong {
                allowed: 3,
                actual: 5
            },
            ..
        })
    ));
    assert_eq!(recorder.runs(), 0);

    // A grid's final row may still be padded out to the stride.
    let grid = StagingLayout::builder("grid")
        .input("g", 3, BufferShape::grid(2, 2, 4, ElementWidth::Byte))
        .build()
        .unwrap();
    assert!(bridge
        .stage(CODE, &[], vec![BufferArg::new(&[0u8; 8])], &grid)
        .is_ok());
    assert!(bridge
        .stage(CODE, &[], vec![BufferArg::new(&[0u8; 9])], &grid)
        .is_err());
}
