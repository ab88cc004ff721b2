//! Flight-event detection from fused altitude and acceleration.
//!
//! The detector runs entirely inside the fusion thread; nothing here is
//! shared. Altitude and acceleration each pass through a small median filter
//! to knock out spikes, then a larger moving average to smooth noise. A
//! moving altitude window backs landing detection, the same strategy AltOS
//! uses, which keeps landing from triggering during ascent or descent.

use tracing::debug;

use crate::filter::{AverageFilter, MedianFilter, WindowCriteria};
use crate::sensors::AltitudeSample;
use crate::state::{FlightState, FlightSubstate};

/// How long measurements stay valid for detection, in microseconds.
pub const STALE_MEASUREMENT_TIME_US: u64 = 1_000_000;

/// The maximum the altitude can vary by in metres to consider us landed.
pub const LANDED_ALT_WINDOW_SIZE_M: f32 = 10.0;

/// How long altitude variation must stay inside the landing window, in
/// microseconds.
pub const LANDED_ALT_WINDOW_DURATION_US: u64 = 5_000_000;

/// The change in altitude from ground level that means we are airborne.
pub const AIRBORNE_ALT_THRESHOLD_M: f32 = 20.0;

/// The acceleration above which we consider the rocket to be flying.
pub const AIRBORNE_ACCEL_THRESHOLD: f32 = 15.0;

/// How far below the maximum altitude we consider apogee to have passed.
pub const APOGEE_ALT_THRESHOLD_M: f32 = 20.0;

/// The acceleration above which apogee will not be detected, since the
/// barometer cannot be trusted at transonic speeds.
pub const APOGEE_ACCEL_THRESHOLD: f32 = 15.0;

/// The maximum altitude above the ground datum at which a landing can be
/// declared. A still rocket far above the datum is a wedged parachute or a
/// bad barometer, not a landing.
pub const LANDED_MAX_ALTITUDE_M: f32 = 100.0;

/// Time after initialization before an altitude reading is latched as the
/// ground elevation, in microseconds.
pub const INIT_ELEVATION_DELAY_US: u64 = 100_000;

pub const ALTITUDE_MEDIAN_WINDOW: usize = 5;
pub const ALTITUDE_AVERAGE_WINDOW: usize = 10;
pub const ACCEL_MEDIAN_WINDOW: usize = 5;
pub const ACCEL_AVERAGE_WINDOW: usize = 10;

/// Events the detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorEvent {
    /// The rocket has left the pad.
    Airborne,
    /// The rocket has passed its highest point.
    Apogee,
    /// The rocket is on the ground again.
    Landing,
}

/// Filtered rocket dynamics and the state needed to detect flight events.
pub struct Detector {
    alt_median: MedianFilter<ALTITUDE_MEDIAN_WINDOW>,
    alt_average: AverageFilter<ALTITUDE_AVERAGE_WINDOW>,
    accel_median: MedianFilter<ACCEL_MEDIAN_WINDOW>,
    accel_average: AverageFilter<ACCEL_AVERAGE_WINDOW>,
    alt_window: WindowCriteria,

    init_time_us: u64,
    current_time_us: u64,
    last_alt_update_us: u64,
    last_accel_update_us: u64,

    current_alt: f32,
    current_accel: f32,
    apogee_alt: f32,
    apogee_time_us: u64,

    elevation: Option<f32>,
    state: FlightState,
    substate: FlightSubstate,
}

impl Detector {
    /// Create a detector. Feed it several samples and set the real flight
    /// state before trusting its events.
    pub fn new(init_time_us: u64) -> Self {
        Self {
            alt_median: MedianFilter::new(),
            alt_average: AverageFilter::new(),
            accel_median: MedianFilter::new(),
            accel_average: AverageFilter::new(),
            alt_window: WindowCriteria::new(LANDED_ALT_WINDOW_SIZE_M, LANDED_ALT_WINDOW_DURATION_US),
            init_time_us,
            current_time_us: init_time_us,
            last_alt_update_us: 0,
            last_accel_update_us: 0,
            current_alt: 0.0,
            current_accel: 0.0,
            apogee_alt: f32::MIN,
            apogee_time_us: 0,
            elevation: None,
            state: FlightState::Airborne,
            substate: FlightSubstate::Unknown,
        }
    }

    /// Add a fused altitude sample, updating the filters, apogee tracking,
    /// the landing window and the elevation latch.
    pub fn add_altitude(&mut self, sample: &AltitudeSample) {
        // Samples can arrive slightly out of order; time never runs backwards
        if sample.timestamp_us > self.current_time_us {
            self.current_time_us = sample.timestamp_us;
        }

        let median = self.alt_median.add(sample.altitude_m);
        self.current_alt = self.alt_average.add(median);

        if self.current_alt > self.apogee_alt {
            self.apogee_alt = self.current_alt;
            self.apogee_time_us = sample.timestamp_us;
        }

        self.alt_window.add(
            self.current_alt,
            sample.timestamp_us.saturating_sub(self.last_alt_update_us),
        );

        if self.elevation.is_none()
            && self.current_time_us.saturating_sub(self.init_time_us) > INIT_ELEVATION_DELAY_US
        {
            // The filters should be full by now, making this a sensible datum
            debug!("latched ground elevation at {:.1} m", self.current_alt);
            self.elevation = Some(self.current_alt);
        }

        self.last_alt_update_us = sample.timestamp_us;
    }

    /// Add an acceleration magnitude in metres per second squared. Any sign
    /// on the value is discarded.
    pub fn add_accel(&mut self, timestamp_us: u64, acceleration: f32) {
        if timestamp_us > self.current_time_us {
            self.current_time_us = timestamp_us;
        }
        let median = self.accel_median.add(acceleration.abs());
        self.current_accel = self.accel_average.add(median);
        self.last_accel_update_us = timestamp_us;
    }

    /// The filtered altitude the detector is currently using.
    pub fn current_altitude(&self) -> f32 {
        self.current_alt
    }

    /// The filtered acceleration magnitude the detector is currently using.
    pub fn current_accel(&self) -> f32 {
        self.current_accel
    }

    /// The maximum filtered altitude seen so far and when it was seen.
    pub fn apogee(&self) -> (f32, u64) {
        (self.apogee_alt, self.apogee_time_us)
    }

    pub fn elevation(&self) -> Option<f32> {
        self.elevation
    }

    /// Set the ground elevation explicitly instead of waiting for the
    /// automatic capture.
    pub fn set_elevation(&mut self, elevation: f32) {
        self.elevation = Some(elevation);
    }

    /// Tell the detector the rocket's flight state. Must be kept current or
    /// the detector will report events that make no sense.
    pub fn set_state(&mut self, state: FlightState, substate: FlightSubstate) {
        self.state = state;
        self.substate = substate;
    }

    fn alt_valid(&self) -> bool {
        self.current_time_us.saturating_sub(self.last_alt_update_us) < STALE_MEASUREMENT_TIME_US
    }

    fn accel_valid(&self) -> bool {
        self.current_time_us.saturating_sub(self.last_accel_update_us) < STALE_MEASUREMENT_TIME_US
    }

    /// Altitude moved away from ground level, or the acceleration is above
    /// anything gravity can do. The two are accepted disjunctively so that a
    /// badly set elevation cannot make launch unobservable; the worst case
    /// is a spurious airborne followed by a quick landing, which the state
    /// machine tolerates.
    fn is_airborne(&self) -> bool {
        let elevation = self.elevation.unwrap_or(0.0);
        (self.alt_valid() && (self.current_alt - elevation).abs() > AIRBORNE_ALT_THRESHOLD_M)
            || (self.accel_valid() && self.current_accel > AIRBORNE_ACCEL_THRESHOLD)
    }

    fn is_apogee(&self) -> bool {
        self.alt_valid()
            && self.apogee_alt - self.current_alt > APOGEE_ALT_THRESHOLD_M
            && self.accel_valid()
            && self.current_accel < APOGEE_ACCEL_THRESHOLD
    }

    fn is_landed(&self) -> bool {
        let datum = self.elevation.unwrap_or(0.0);
        self.alt_valid()
            && self.alt_window.satisfied()
            && self.current_alt - datum < LANDED_MAX_ALTITUDE_M
            && self.accel_valid()
            && self.current_accel < AIRBORNE_ACCEL_THRESHOLD
    }

    /// Check for a flight event given the current filtered dynamics. The
    /// checks are conditional on flight state; a check that makes no sense
    /// in the current state is never evaluated.
    pub fn detect(&self) -> Option<DetectorEvent> {
        match self.state {
            FlightState::Idle => {
                // Hold off until there is a filtered altitude to use as the
                // landed altitude
                self.elevation?;
                if self.is_airborne() {
                    debug!("detected airborne event from the idle state");
                    return Some(DetectorEvent::Airborne);
                }
                None
            }
            FlightState::Airborne => match self.substate {
                FlightSubstate::Unknown => {
                    if self.is_landed() {
                        debug!("detected a landing event from the airborne state, unknown substate");
                        return Some(DetectorEvent::Landing);
                    }
                    if self.is_apogee() {
                        debug!("detected apogee from the airborne state");
                        return Some(DetectorEvent::Apogee);
                    }
                    None
                }
                FlightSubstate::Ascent => {
                    if self.is_apogee() {
                        debug!("detected apogee from the airborne state");
                        return Some(DetectorEvent::Apogee);
                    }
                    None
                }
                FlightSubstate::Descent => {
                    if self.is_landed() {
                        debug!("detected a landing event from the descent state");
                        return Some(DetectorEvent::Landing);
                    }
                    None
                }
            },
            FlightState::Landed => None,
        }
    }
}
