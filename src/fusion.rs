//! Sensor fusion and flight-phase tracking.
//!
//! The fusion thread consumes raw barometer and accelerometer samples,
//! converts pressure into altitude against the configured reference
//! pressure, and publishes the result back on the bus as the
//! `fusion_altitude` topic at the barometer's rate. The same stream feeds
//! the detector; when the detector reports an event the fusion thread owns
//! the resulting flight-state transition and announces it with a status
//! sample so it lands in the packet stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::info;

use crate::detector::{Detector, DetectorEvent};
use crate::sensors::{AltitudeSample, Sample, SensorBus, StatusSample};
use crate::state::{FlightState, FlightSubstate, RocketState};
use crate::status::StatusCode;

const RECV_POLL: Duration = Duration::from_millis(100);

/// Convert barometric pressure to altitude above the reference pressure
/// level using the international barometric formula.
pub fn pressure_to_altitude(pressure_mbar: f32, reference_mbar: f32) -> f32 {
    44_330.0 * (1.0 - (pressure_mbar / reference_mbar).powf(0.1903))
}

pub struct Fusion {
    bus: Arc<SensorBus>,
    state: Arc<RocketState>,
    reference_pressure_mbar: f32,
    detector: Option<Detector>,
    known_state: (FlightState, FlightSubstate),
}

impl Fusion {
    pub fn new(bus: Arc<SensorBus>, state: Arc<RocketState>, reference_pressure_mbar: f32) -> Self {
        let known_state = (state.flight_state(), state.substate());
        Self {
            bus,
            state,
            reference_pressure_mbar,
            detector: None,
            known_state,
        }
    }

    /// Feed one raw sample through fusion. Samples of kinds the fusion task
    /// does not consume are ignored.
    pub fn process(&mut self, sample: &Sample) {
        let reference = self.reference_pressure_mbar;
        if self.detector.is_none() {
            let mut fresh = Detector::new(sample.timestamp_us());
            fresh.set_state(self.known_state.0, self.known_state.1);
            self.detector = Some(fresh);
        }
        let Some(detector) = self.detector.as_mut() else {
            return;
        };

        // Other tasks move the flight state too; the logger returns the
        // rocket to idle once a landed extraction completes
        let stored = (self.state.flight_state(), self.state.substate());
        if stored != self.known_state {
            detector.set_state(stored.0, stored.1);
            self.known_state = stored;
        }

        match sample {
            Sample::Baro(baro) => {
                let altitude = AltitudeSample {
                    timestamp_us: baro.timestamp_us,
                    altitude_m: pressure_to_altitude(baro.pressure_mbar, reference),
                };
                self.bus.publish(Sample::FusedAltitude(altitude));

                let had_elevation = detector.elevation().is_some();
                detector.add_altitude(&altitude);
                if !had_elevation {
                    if let Some(elevation) = detector.elevation() {
                        self.state.set_elevation_mm((elevation * 1000.0) as i32);
                    }
                }
                self.apply_events(baro.timestamp_us);
            }
            Sample::Accel(accel) => {
                detector.add_accel(accel.timestamp_us, accel.magnitude());
                self.apply_events(accel.timestamp_us);
            }
            _ => {}
        }
    }

    /// Fusion thread body. Runs until `running` clears and the bus drains.
    pub fn run(mut self, samples: Receiver<Sample>, running: Arc<AtomicBool>) {
        info!("fusion thread started");
        loop {
            match samples.recv_timeout(RECV_POLL) {
                Ok(sample) => self.process(&sample),
                Err(RecvTimeoutError::Timeout) => {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("fusion thread stopping");
    }

    /// Fold a detected event into the shared flight state and tell the
    /// detector about its new state.
    fn apply_events(&mut self, timestamp_us: u64) {
        let Some(detector) = self.detector.as_mut() else {
            return;
        };
        let Some(event) = detector.detect() else {
            return;
        };
        let code = match event {
            DetectorEvent::Airborne => {
                info!("airborne event detected, entering ascent");
                self.state.set_flight_state(FlightState::Airborne);
                self.state.set_substate(FlightSubstate::Ascent);
                detector.set_state(FlightState::Airborne, FlightSubstate::Ascent);
                StatusCode::ChangedAirborne
            }
            DetectorEvent::Apogee => {
                let (apogee_alt, apogee_time) = detector.apogee();
                info!("apogee of {apogee_alt:.0}m detected at t+{apogee_time}us, entering descent");
                self.state.set_substate(FlightSubstate::Descent);
                detector.set_state(FlightState::Airborne, FlightSubstate::Descent);
                StatusCode::ChangedApogee
            }
            DetectorEvent::Landing => {
                info!("landing event detected");
                self.state.set_flight_state(FlightState::Landed);
                self.state.set_substate(FlightSubstate::Unknown);
                detector.set_state(FlightState::Landed, FlightSubstate::Unknown);
                StatusCode::ChangedLanded
            }
        };
        self.known_state = (self.state.flight_state(), self.state.substate());
        self.bus.publish(Sample::Status(StatusSample {
            timestamp_us,
            code,
        }));
    }
}
