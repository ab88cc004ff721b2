//! End-to-end flight reproduction through the full pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rockettelem::config::TelemetryConfig;
use rockettelem::packet::{parse_packet, CallSign, PACKET_HEADER_SIZE};
use rockettelem::pipeline::TelemetryPipeline;
use rockettelem::sensors::{AccelSample, BaroSample, Sample, SensorKind};
use rockettelem::state::FlightState;

const GROUND_MBAR: f32 = 1013.25;

fn pressure_at(altitude_m: f32) -> f32 {
    GROUND_MBAR * (1.0 - altitude_m / 44_330.0).powf(1.0 / 0.1903)
}

/// Pad, boost, coast, descent and six quiet seconds on the ground, sampled
/// at 50Hz of mission time.
fn flight_profile() -> Vec<(u64, f32, f32)> {
    let mut profile = Vec::new();
    let mut now = 0u64;
    let mut push = |now: &mut u64, altitude: f32, accel: f32| {
        profile.push((*now, altitude, accel));
        *now += 20_000;
    };
    for _ in 0..100 {
        push(&mut now, 0.0, 0.5);
    }
    for i in 0..200 {
        push(&mut now, i as f32 * 2.0, if i < 50 { 50.0 } else { 0.5 });
    }
    for i in 0..400 {
        push(&mut now, (400 - i) as f32, 0.5);
    }
    for _ in 0..300 {
        push(&mut now, 0.0, 0.5);
    }
    profile
}

#[test]
fn replayed_flight_lands_logs_and_transmits() {
    let flight_fs = tempfile::tempdir().unwrap();
    let landed_fs = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let radio_path = scratch.path().join("radio.bin");

    let config = TelemetryConfig {
        call_sign: CallSign::from("VA3TST").unwrap(),
        flight_fs: flight_fs.path().into(),
        landed_fs: landed_fs.path().into(),
        nv_state_path: scratch.path().join("flight-state"),
        syslog_path: scratch.path().join("telemetry.log"),
        radio_dev: radio_path.clone(),
        eject_led: None,
        reference_pressure_mbar: GROUND_MBAR,
        enabled_sensors: vec![SensorKind::Baro, SensorKind::Accel],
    };

    let pipeline = TelemetryPipeline::start(&config).unwrap();
    let state = Arc::clone(pipeline.state());

    for (i, (timestamp_us, altitude, accel)) in flight_profile().into_iter().enumerate() {
        pipeline.publish(Sample::Baro(BaroSample {
            timestamp_us,
            pressure_mbar: pressure_at(altitude),
            temperature_c: 20.0,
        }));
        pipeline.publish(Sample::Accel(AccelSample {
            timestamp_us,
            x: 0.0,
            y: 0.0,
            z: accel,
        }));
        // Pace the replay so no subscriber queue overflows
        if i % 5 == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // The fusion thread should walk the rocket to landed, and the logger
    // should extract the flight and hand the state back to idle
    let deadline = Instant::now() + Duration::from_secs(15);
    let extraction = landed_fs.path().join("elog_1_0.bin");
    while Instant::now() < deadline {
        if state.flight_state() == FlightState::Idle && extraction.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    pipeline.shutdown();

    assert_eq!(state.flight_state(), FlightState::Idle);
    assert!(state.elevation_mm().abs() < 20_000);

    // The extraction file holds the flight's packets
    let extracted = std::fs::read(&extraction).unwrap();
    assert!(extracted.len() > PACKET_HEADER_SIZE);
    let (header, blocks) = parse_packet(&extracted).unwrap();
    assert_eq!(&header.call_sign[..6], b"VA3TST");
    assert!(!blocks.is_empty());

    // The radio saw framed packets, not raw state
    let transmitted = std::fs::read(&radio_path).unwrap();
    assert!(transmitted.len() > PACKET_HEADER_SIZE);
    let (header, blocks) = parse_packet(&transmitted).unwrap();
    assert_eq!(&header.call_sign[..6], b"VA3TST");
    assert!(!blocks.is_empty());
    // First transmitted frame carries sequence number zero
    assert_eq!(header.packet_num, 0);
}

#[test]
fn pipeline_survives_a_missing_sensor_set() {
    // Only a barometer: no accel samples ever arrive. The pipeline must
    // come up, fuse altitude, and keep packets flowing.
    let flight_fs = tempfile::tempdir().unwrap();
    let landed_fs = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    let config = TelemetryConfig {
        call_sign: CallSign::from("VA3TST").unwrap(),
        flight_fs: flight_fs.path().into(),
        landed_fs: landed_fs.path().into(),
        nv_state_path: scratch.path().join("flight-state"),
        syslog_path: scratch.path().join("telemetry.log"),
        radio_dev: scratch.path().join("radio.bin"),
        eject_led: None,
        reference_pressure_mbar: GROUND_MBAR,
        enabled_sensors: vec![SensorKind::Baro],
    };

    let pipeline = TelemetryPipeline::start(&config).unwrap();
    for i in 0..500u64 {
        pipeline.publish(Sample::Baro(BaroSample {
            timestamp_us: i * 20_000,
            pressure_mbar: GROUND_MBAR,
            temperature_c: 20.0,
        }));
        if i % 10 == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    // Give the logger a moment to drain at least one full packet
    let flight_log = flight_fs.path().join("flog_1_0.bin");
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if flight_log.metadata().map(|m| m.len() > 0).unwrap_or(false) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let state = Arc::clone(pipeline.state());
    pipeline.shutdown();

    assert_eq!(state.flight_state(), FlightState::Idle);
    let logged = std::fs::read(&flight_log).unwrap();
    assert!(logged.len() > PACKET_HEADER_SIZE);
    let (_, blocks) = parse_packet(&logged).unwrap();
    // Pressure, temperature and fused altitude blocks all made it in
    let kinds: Vec<_> = blocks.iter().map(|b| b.block_type).collect();
    assert!(kinds.contains(&rockettelem::packet::BlockType::Pressure));
    assert!(kinds.contains(&rockettelem::packet::BlockType::Temperature));
    assert!(kinds.contains(&rockettelem::packet::BlockType::AltSea));
}
