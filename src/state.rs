//! Process-wide rocket flight state.
//!
//! All fields are independent machine words behind atomics, so readers never
//! take a lock. Flight-state changes are written through to a one-line
//! non-volatile blob so a power cycle on the pad or under parachute resumes
//! in the right state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::{debug, warn};

/// The current flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FlightState {
    /// The rocket is idle on the pad.
    Idle = 0,
    /// The rocket is in the air.
    Airborne = 1,
    /// The rocket is landed.
    Landed = 2,
}

impl FlightState {
    fn from_i32(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Idle),
            1 => Some(Self::Airborne),
            2 => Some(Self::Landed),
            _ => None,
        }
    }
}

/// The phase within the airborne state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FlightSubstate {
    Unknown = 0,
    Ascent = 1,
    Descent = 2,
}

impl FlightSubstate {
    fn from_i32(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Unknown),
            1 => Some(Self::Ascent),
            2 => Some(Self::Descent),
            _ => None,
        }
    }
}

const NV_STATE_PREFIX: &str = "Flight state: ";

/// State information about the rocket, shared by every thread.
#[derive(Debug)]
pub struct RocketState {
    flight_state: AtomicI32,
    substate: AtomicI32,
    /// Altitude above sea level at ground level in millimetres, signed in
    /// case of a constant sensor error.
    elevation_mm: AtomicI32,
    nv_path: PathBuf,
}

impl RocketState {
    /// Load the flight state from non-volatile storage, defaulting to
    /// [`FlightState::Idle`] if the blob is missing or unparseable.
    pub fn load(nv_path: impl Into<PathBuf>) -> Self {
        let nv_path = nv_path.into();
        let flight_state = match read_nv_state(&nv_path) {
            Ok(state) => state,
            Err(err) => {
                warn!("could not restore flight state ({err}), starting idle");
                FlightState::Idle
            }
        };
        Self {
            flight_state: AtomicI32::new(flight_state as i32),
            substate: AtomicI32::new(FlightSubstate::Unknown as i32),
            elevation_mm: AtomicI32::new(0),
            nv_path,
        }
    }

    pub fn flight_state(&self) -> FlightState {
        FlightState::from_i32(self.flight_state.load(Ordering::SeqCst))
            .unwrap_or(FlightState::Idle)
    }

    /// Set the flight state, writing it through to non-volatile storage.
    /// Storage failures are logged and do not block the transition.
    pub fn set_flight_state(&self, state: FlightState) {
        self.flight_state.store(state as i32, Ordering::SeqCst);
        debug!("flight state changed to {state:?}");
        let blob = format!("{NV_STATE_PREFIX}{}\n", state as i32);
        if let Err(err) = fs::write(&self.nv_path, blob) {
            warn!("could not persist flight state: {err}");
        }
    }

    pub fn substate(&self) -> FlightSubstate {
        FlightSubstate::from_i32(self.substate.load(Ordering::SeqCst))
            .unwrap_or(FlightSubstate::Unknown)
    }

    pub fn set_substate(&self, substate: FlightSubstate) {
        self.substate.store(substate as i32, Ordering::SeqCst);
    }

    pub fn elevation_mm(&self) -> i32 {
        self.elevation_mm.load(Ordering::SeqCst)
    }

    pub fn set_elevation_mm(&self, elevation_mm: i32) {
        self.elevation_mm.store(elevation_mm, Ordering::SeqCst);
    }
}

fn read_nv_state(path: &Path) -> Result<FlightState, String> {
    let contents = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let value = contents
        .strip_prefix(NV_STATE_PREFIX)
        .ok_or_else(|| format!("malformed state blob {contents:?}"))?;
    let raw: i32 = value.trim().parse().map_err(|_| format!("bad state ordinal {value:?}"))?;
    FlightState::from_i32(raw).ok_or_else(|| format!("state ordinal {raw} out of range"))
}
