//! Dispatch engine integration tests.
//!
//! Opens the engine against the simulated DAC (and, where needed, a local
//! TCP listener standing in for the remote actuator host) and drives it
//! the way the host frame loop does.

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rtc_common::error_sink::ErrorLog;
use rtc_common::ingest::UpdateOutcome;
use rtc_common::param::ParamBuffer;
use rtc_common::recorder::{ActuatorRecorder, MemoryRecorder};
use rtc_mirror::config::names;
use rtc_mirror::{
    AdapterModel, DacError, DacProbe, FailOn, FrameHeader, HEADER_LEN, MirrorArgs, MirrorContext,
    MirrorEngine, MirrorError, SimulatedDac,
};

const WAIT: Duration = Duration::from_secs(5);

/// `nacts` demands, all on the DAC, clamped to `[0, 1000]`.
fn params(nacts: usize) -> ParamBuffer {
    ParamBuffer::new()
        .with(names::ACT_INIT, Vec::<u16>::new())
        .with(names::ACT_MAPPING, Vec::<i32>::new())
        .with(names::ACT_MAX, vec![1000u16; nacts])
        .with(names::ACT_MIN, vec![0u16; nacts])
        .with(names::ACT_OFFSET, Vec::<f32>::new())
        .with(names::ACT_SCALE, Vec::<f32>::new())
        .with(names::ACT_SOURCE, Vec::<i32>::new())
        .with(names::NACT_INIT_PDAO32, Vec::<i32>::new())
        .with(names::NACT_PDAO32, nacts as i32)
        .with(names::NACTS, nacts as i32)
}

struct Rig {
    engine: MirrorEngine,
    probe: DacProbe,
    errors: Arc<ErrorLog>,
}

fn open_with(args: &MirrorArgs, p: &ParamBuffer, nacts: usize, recorder: Option<Arc<MemoryRecorder>>) -> Rig {
    let dac = SimulatedDac::new(AdapterModel::Pd2Ao, 8);
    let probe = dac.probe();
    let errors = Arc::new(ErrorLog::new());
    let ctx = MirrorContext {
        errors: errors.clone(),
        recorder: recorder.map(|r| r as Arc<dyn ActuatorRecorder>),
        prefix: "dm".into(),
    };
    let engine = MirrorEngine::open(args, Box::new(dac), p, ctx, nacts, 0).expect("open");
    Rig {
        engine,
        probe,
        errors,
    }
}

fn open(p: &ParamBuffer, nacts: usize) -> Rig {
    open_with(&MirrorArgs::default(), p, nacts, None)
}

fn try_open(args: &MirrorArgs, p: &ParamBuffer, probe_fail: FailOn) -> (Result<MirrorEngine, MirrorError>, DacProbe, Arc<ErrorLog>) {
    let dac = SimulatedDac::new(AdapterModel::Pd2Ao, 8);
    let probe = dac.probe();
    probe.fail_on(probe_fail);
    let errors = Arc::new(ErrorLog::new());
    let ctx = MirrorContext {
        errors: errors.clone(),
        recorder: None,
        prefix: "dm".into(),
    };
    (MirrorEngine::open(args, Box::new(dac), p, ctx, 4, 0), probe, errors)
}

fn wait_dispatches(engine: &MirrorEngine, n: u64) {
    let deadline = Instant::now() + WAIT;
    while engine.stats().dispatch_count < n {
        assert!(Instant::now() < deadline, "dispatch {n} never completed");
        thread::sleep(Duration::from_millis(1));
    }
}

fn socket_args(port: u16) -> MirrorArgs {
    MirrorArgs {
        host: Some("127.0.0.1".into()),
        port,
        timeout_ms: 2000,
        ..MirrorArgs::default()
    }
}

fn read_frame(s: &mut TcpStream) -> (FrameHeader, Vec<u16>) {
    let mut header = [0u8; HEADER_LEN];
    s.read_exact(&mut header).unwrap();
    let header = FrameHeader::parse(&header).expect("tagged header");
    let mut payload = vec![0u8; header.payload_len()];
    s.read_exact(&mut payload).unwrap();
    let values = payload
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    (header, values)
}

// ─── Open / Close ───────────────────────────────────────────────────

#[test]
fn clamp_scenario_reaches_dac() {
    let rig = open(&params(4), 4);
    let clipped = rig.engine.send(&[2000.4, -5.0, 500.2, 999.6], 1, 0.0, false, false).unwrap();
    assert_eq!(clipped, 2);

    assert!(rig.probe.wait_for_writes(4, WAIT));
    assert_eq!(&rig.probe.registers()[..4], &[1000, 0, 500, 1000]);
    wait_dispatches(&rig.engine, 1);
    assert_eq!(rig.errors.total(), 0);
}

#[test]
fn open_brings_dac_up_and_close_releases_it() {
    let rig = open(&params(4), 4);
    assert!(rig.engine.is_open());
    assert!(rig.probe.is_acquired() && rig.probe.is_triggered());
    assert_eq!((rig.probe.resets(), rig.probe.ao32_resets()), (1, 1));

    rig.engine.close();
    rig.engine.close();
    assert!(!rig.engine.is_open());
    assert!(!rig.probe.is_acquired());
    assert_eq!(rig.probe.resets(), 2);
    assert!(matches!(
        rig.engine.send(&[0.0; 4], 2, 0.0, false, false),
        Err(MirrorError::Closed)
    ));
}

#[test]
fn drop_closes_engine() {
    let rig = open(&params(2), 2);
    let probe = rig.probe.clone();
    drop(rig);
    assert!(!probe.is_acquired());
}

#[test]
fn failed_bring_up_unwinds() {
    let (result, probe, errors) = try_open(&MirrorArgs::default(), &params(4), FailOn::TRIGGER);
    assert!(matches!(result, Err(MirrorError::Dac(DacError::Trigger(_)))));
    assert!(!probe.is_acquired());
    assert_eq!(errors.total(), 1);
}

#[test]
fn rejected_params_release_dac() {
    let p = params(4).with(names::ACT_MIN, vec![0u16, 0, 2000, 0]);
    let (result, probe, errors) = try_open(&MirrorArgs::default(), &p, FailOn::empty());
    match result {
        Err(MirrorError::Params(errs)) => assert!(errs.mentions(names::ACT_MIN)),
        other => panic!("expected parameter rejection, got {:?}", other.err()),
    }
    assert!(!probe.is_acquired());
    assert!(errors.total() >= 1);
}

#[test]
fn float_output_is_refused() {
    let args = MirrorArgs {
        as_float: true,
        ..MirrorArgs::default()
    };
    let (result, probe, _) = try_open(&args, &params(4), FailOn::empty());
    assert!(matches!(result, Err(MirrorError::FloatOutput)));
    assert_eq!(probe.resets(), 0);
}

#[test]
fn unreachable_socket_fails_open() {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let (result, probe, _) = try_open(&socket_args(port), &params(4), FailOn::empty());
    assert!(matches!(result, Err(MirrorError::Sink(_))));
    assert!(!probe.is_acquired());
}

// ─── Send ───────────────────────────────────────────────────────────

#[test]
fn send_validates_input() {
    let rig = open(&params(4), 4);
    assert!(matches!(
        rig.engine.send(&[0.0; 3], 1, 0.0, false, false),
        Err(MirrorError::DemandLength { expected: 4, found: 3 })
    ));
    assert!(matches!(
        rig.engine.send(&[0.0; 4], 9, 0.0, true, false),
        Err(MirrorError::Upstream(9))
    ));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(rig.probe.write_count(), 0);
    assert_eq!(rig.engine.stats().dispatch_count, 0);
}

#[test]
fn recorder_sees_recorded_frames_only() {
    let rec = Arc::new(MemoryRecorder::new(8, 64));
    let rig = open_with(&MirrorArgs::default(), &params(2), 2, Some(rec.clone()));
    assert_eq!(rec.width(), 2);

    rig.engine.send(&[10.0, 20.0], 1, 0.5, false, false).unwrap();
    wait_dispatches(&rig.engine, 1);
    assert!(rec.last().is_none());

    rig.engine.send(&[30.0, 40.0], 2, 1.5, false, true).unwrap();
    let last = rec.last().expect("recorded");
    assert_eq!(last.frame, 2);
    assert_eq!(last.timestamp, 1.5);
    assert_eq!(last.values, vec![30, 40]);
}

#[test]
fn too_wide_recorder_rejects_mapping() {
    let rec = Arc::new(MemoryRecorder::new(8, 2));
    let rig = open_with(&MirrorArgs::default(), &params(2), 2, Some(rec.clone()));
    let p = params(2)
        .with(names::ACT_MAPPING, vec![0, 1, 2])
        .with(names::ACT_SOURCE, vec![0, 1, 1])
        .with(names::ACT_MAX, vec![1000u16; 3])
        .with(names::ACT_MIN, vec![0u16; 3])
        .with(names::NACT_PDAO32, 3);
    let errs = rig.engine.new_param(&p, 1).unwrap_err();
    assert!(errs.mentions(names::ACT_MAPPING));
    assert_eq!(rig.engine.config().dim, 2);
}

// ─── Reconfiguration ────────────────────────────────────────────────

#[test]
fn nacts_change_keeps_previous_config() {
    let rig = open(&params(4), 4);
    let errs = rig.engine.new_param(&params(5), 3).unwrap_err();
    assert!(errs.mentions(names::NACTS));
    assert_eq!(rig.engine.config().nacts, 4);
    assert!(rig.errors.latest().is_some_and(|r| r.frame == 3));

    rig.engine.send(&[1.0, 2.0, 3.0, 4.0], 4, 0.0, false, false).unwrap();
    assert!(rig.probe.wait_for_writes(4, WAIT));
}

#[test]
fn mapping_routes_to_channels() {
    let rec = Arc::new(MemoryRecorder::new(8, 64));
    let rig = open_with(&MirrorArgs::default(), &params(4), 4, Some(rec.clone()));
    let p = params(4)
        .with(names::ACT_MAPPING, vec![5, 2])
        .with(names::ACT_MAX, vec![1000u16; 2])
        .with(names::ACT_MIN, vec![0u16; 2])
        .with(names::NACT_PDAO32, 2);
    assert_eq!(rig.engine.new_param(&p, 1), Ok(UpdateOutcome::Applied));
    assert_eq!(rig.engine.config().dim, 2);
    assert_eq!(rec.width(), 2);

    rig.engine.send(&[10.0, 20.0, 30.0, 40.0], 2, 0.0, false, false).unwrap();
    assert!(rig.probe.wait_for_writes(2, WAIT));
    assert_eq!(rig.probe.writes(), vec![(5, 10), (2, 20)]);
}

#[test]
fn bad_optional_field_degrades() {
    let rig = open(&params(2), 2);
    let p = params(2)
        .with(names::ACT_SCALE, vec![2.0f32; 3])
        .with(names::ACT_OFFSET, vec![5.0f32; 2]);
    let outcome = rig.engine.new_param(&p, 1).unwrap();
    assert!(outcome.is_degraded());
    assert_eq!(outcome.warnings()[0].name(), names::ACT_SCALE);
    assert!(rig.errors.total() >= 1);

    rig.engine.send(&[10.0, 20.0], 2, 0.0, false, false).unwrap();
    assert!(rig.probe.wait_for_writes(2, WAIT));
    assert_eq!(&rig.probe.registers()[..2], &[15, 25]);
}

// ─── Trajectory ─────────────────────────────────────────────────────

#[test]
fn trajectory_steps_from_previous_frame() {
    let p = params(2).with(names::ACT_OSC_ARR, vec![0.0f32, 0.5, 1.0]);
    let rig = open(&p, 2);

    rig.engine.send(&[100.0, 200.0], 1, 0.0, false, false).unwrap();
    assert!(rig.probe.wait_for_writes(6, WAIT));
    wait_dispatches(&rig.engine, 1);
    rig.engine.send(&[200.0, 200.0], 2, 0.0, false, false).unwrap();
    assert!(rig.probe.wait_for_writes(12, WAIT));

    assert_eq!(
        rig.probe.writes(),
        vec![
            (0, 0),
            (1, 0),
            (0, 50),
            (1, 100),
            (0, 100),
            (1, 200),
            (0, 100),
            (1, 200),
            (0, 150),
            (1, 200),
            (0, 200),
            (1, 200),
        ]
    );
}

#[test]
fn per_actuator_trajectory() {
    let p = params(2)
        .with(names::ACT_OSC_ARR, vec![0.5f32, 1.0, 1.0, 1.0])
        .with(names::ACT_OSC_PER_ACT, 1)
        .with(names::ACT_OSC_TIME, 100_000);
    let rig = open(&p, 2);

    rig.engine.send(&[100.0, 100.0], 1, 0.0, false, false).unwrap();
    assert!(rig.probe.wait_for_writes(4, WAIT));
    assert_eq!(rig.probe.writes(), vec![(0, 50), (1, 100), (0, 100), (1, 100)]);
}

// ─── Socket ─────────────────────────────────────────────────────────

#[test]
fn socket_share_and_init_sequence() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let p = params(4)
        .with(names::NACT_PDAO32, 2)
        .with(names::ACT_INIT, vec![7u16, 8, 9])
        .with(names::NACT_INIT_PDAO32, 2);
    let rig = open_with(&socket_args(port), &p, 4, None);
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(WAIT)).unwrap();

    let (header, values) = read_frame(&mut peer);
    assert_eq!(header, FrameHeader { count: 1, frame: 0 });
    assert_eq!(values, vec![9]);
    assert!(rig.probe.wait_for_writes(2, WAIT));
    assert_eq!(rig.probe.writes(), vec![(0, 7), (1, 8)]);

    rig.engine.send(&[1.0, 2.0, 500.0, 2000.0], 42, 0.0, false, false).unwrap();
    let (header, values) = read_frame(&mut peer);
    assert_eq!(header, FrameHeader { count: 2, frame: 42 });
    assert_eq!(values, vec![500, 1000]);
    assert!(rig.probe.wait_for_writes(4, WAIT));
    assert_eq!(&rig.probe.writes()[2..], &[(0, 1), (1, 2)]);
}

#[test]
fn prefix_is_sent_once() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let args = MirrorArgs {
        send_prefix: true,
        ..socket_args(port)
    };
    let p = params(2).with(names::NACT_PDAO32, 0);
    let rig = open_with(&args, &p, 2, None);
    let (mut peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(WAIT)).unwrap();

    let mut prefix = [0u8; 6];
    peer.read_exact(&mut prefix).unwrap();
    assert_eq!(&prefix[..4], &2u32.to_le_bytes());
    assert_eq!(&prefix[4..], b"dm");

    rig.engine.send(&[3.0, 4.0], 5, 0.0, false, false).unwrap();
    let (header, values) = read_frame(&mut peer);
    assert_eq!(header.frame, 5);
    assert_eq!(values, vec![3, 4]);
}

#[test]
fn socket_failure_reported_on_next_send() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let p = params(2).with(names::NACT_PDAO32, 1);
    let rig = open_with(&socket_args(port), &p, 2, None);
    drop(listener.accept().unwrap());
    drop(listener);

    let mut frame = 0;
    while rig.engine.stats().send_failures == 0 {
        frame += 1;
        assert!(frame < 200, "socket never failed");
        let _ = rig.engine.send(&[1.0, 2.0], frame, 0.0, false, false);
        wait_dispatches(&rig.engine, u64::from(frame));
        thread::sleep(Duration::from_millis(5));
    }

    let next = frame + 1;
    let writes = rig.probe.write_count();
    assert!(matches!(
        rig.engine.send(&[3.0, 4.0], next, 0.0, false, false),
        Err(MirrorError::PreviousSendFailed { frame }) if frame == next
    ));
    assert!(rig.probe.wait_for_writes(writes + 1, WAIT));
    assert_eq!(rig.probe.registers()[0], 3);
}

#[test]
fn failure_survives_overlapping_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    // Three full steps of 60 ms: each dispatch is in flight for ~180 ms.
    let p = params(2)
        .with(names::NACT_PDAO32, 1)
        .with(names::ACT_OSC_ARR, vec![1.0f32, 1.0, 1.0])
        .with(names::ACT_OSC_TIME, 60_000_000);
    let rig = open_with(&socket_args(port), &p, 2, None);
    drop(listener.accept().unwrap());
    drop(listener);

    let mut frame = 0;
    while rig.engine.stats().send_failures == 0 {
        frame += 1;
        assert!(frame < 40, "socket never failed");
        let _ = rig.engine.send(&[1.0, 2.0], frame, 0.0, false, false);
        wait_dispatches(&rig.engine, u64::from(frame));
    }
    let failures = rig.engine.stats().send_failures;

    // A: reports the failure seen above, then fails itself.
    let a = frame + 1;
    let writes = rig.probe.write_count();
    assert!(matches!(
        rig.engine.send(&[3.0, 4.0], a, 0.0, false, false),
        Err(MirrorError::PreviousSendFailed { .. })
    ));
    assert!(rig.probe.wait_for_writes(writes + 1, WAIT), "A never started");

    // B: queued while A is still settling.
    let b = a + 1;
    rig.engine.send(&[5.0, 6.0], b, 0.0, false, false).unwrap();

    // A finishes with a failed send; the worker moves straight on to B.
    let deadline = Instant::now() + WAIT;
    while rig.engine.stats().send_failures == failures {
        assert!(Instant::now() < deadline, "A never finished");
        thread::sleep(Duration::from_millis(1));
    }
    assert!(rig.engine.stats().dispatch_count < u64::from(b), "B already finished");

    // C: must still hear about A even though B is in flight.
    let c = b + 1;
    assert!(matches!(
        rig.engine.send(&[7.0, 8.0], c, 0.0, false, false),
        Err(MirrorError::PreviousSendFailed { frame }) if frame == c
    ));
    assert!(matches!(
        rig.engine.send(&[7.0, 8.0], c, 0.0, false, false),
        Ok(0)
    ));
}

// ─── Overlapping frames ─────────────────────────────────────────────

#[test]
fn send_never_waits_for_dispatch_and_last_frame_wins() {
    // Each dispatch holds the DAC for three 30 ms steps.
    let p = params(2)
        .with(names::ACT_OSC_ARR, vec![1.0f32, 1.0, 1.0])
        .with(names::ACT_OSC_TIME, 30_000_000);
    let rig = open(&p, 2);

    const FRAMES: u32 = 20;
    let mut slowest = Duration::ZERO;
    for frame in 1..=FRAMES {
        let v = frame as f32 * 10.0;
        let started = Instant::now();
        assert_eq!(rig.engine.send(&[v, v + 5.0], frame, 0.0, false, false).unwrap(), 0);
        slowest = slowest.max(started.elapsed());
        thread::sleep(Duration::from_millis(2));
    }
    assert!(slowest < Duration::from_millis(30), "send blocked for {slowest:?}");

    let last = [FRAMES as u16 * 10, FRAMES as u16 * 10 + 5];
    let deadline = Instant::now() + WAIT;
    while rig.probe.registers()[..2] != last {
        assert!(Instant::now() < deadline, "last frame never reached the DAC");
        thread::sleep(Duration::from_millis(1));
    }

    rig.engine.close();
    let stats = rig.engine.stats();
    assert!(stats.dispatch_count >= 2);
    assert!(stats.dispatch_count < u64::from(FRAMES), "frames were not collapsed");
    assert_eq!(stats.send_failures, 0);
    assert!(stats.min_ns >= 90_000_000);
    assert_eq!(rig.errors.total(), 0);
}
