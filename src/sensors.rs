//! Typed sensor samples and the in-process publish-subscribe bus.
//!
//! Device drivers live outside the core; they publish timestamped samples on
//! named topics. A subscriber registers the set of kinds it wants and gets a
//! single channel back, so one blocking `recv` waits on every subscribed
//! topic at once, like parking in a multi-descriptor poll. Per-topic sample
//! order is preserved by the channel.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use heapless::Vec as BoundedVec;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::status::{ErrorCode, ProcessId, StatusCode};

/// Depth of each subscriber's queue. Slow consumers drop the newest sample
/// rather than stalling a producer.
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

const MAX_KINDS: usize = 8;

/// The kinds of data that can appear on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accel,
    Gyro,
    Baro,
    Mag,
    Gnss,
    FusedAltitude,
    Status,
    Error,
}

impl SensorKind {
    /// The bus topic this kind is published on.
    pub fn topic(self) -> &'static str {
        match self {
            Self::Accel => "sensor_accel",
            Self::Gyro => "sensor_gyro",
            Self::Baro => "sensor_baro",
            Self::Mag => "sensor_mag",
            Self::Gnss => "sensor_gnss",
            Self::FusedAltitude => "fusion_altitude",
            Self::Status => "status_message",
            Self::Error => "error_message",
        }
    }
}

/// Barometer reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaroSample {
    /// Microseconds since boot.
    pub timestamp_us: u64,
    /// Pressure in millibar.
    pub pressure_mbar: f32,
    /// Temperature in degrees Celsius.
    pub temperature_c: f32,
}

/// Accelerometer reading in metres per second squared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub timestamp_us: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelSample {
    /// Magnitude of the acceleration vector; detection discards signs.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Gyroscope reading in radians per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroSample {
    pub timestamp_us: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Magnetometer reading in microtesla.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagSample {
    pub timestamp_us: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// GNSS fix. A latitude and longitude both exactly zero means no fix yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnssSample {
    pub timestamp_us: u64,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Mean sea level altitude in metres.
    pub altitude_m: f32,
}

impl GnssSample {
    pub fn has_fix(&self) -> bool {
        self.latitude_deg != 0.0 || self.longitude_deg != 0.0
    }
}

/// Fused altitude above mean sea level, produced by the fusion task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltitudeSample {
    pub timestamp_us: u64,
    pub altitude_m: f32,
}

/// A telemetry status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSample {
    pub timestamp_us: u64,
    pub code: StatusCode,
}

/// A process error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorSample {
    pub timestamp_us: u64,
    pub process: ProcessId,
    pub code: ErrorCode,
}

/// Any sample the bus can carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Baro(BaroSample),
    Accel(AccelSample),
    Gyro(GyroSample),
    Mag(MagSample),
    Gnss(GnssSample),
    FusedAltitude(AltitudeSample),
    Status(StatusSample),
    Error(ErrorSample),
}

impl Sample {
    pub fn kind(&self) -> SensorKind {
        match self {
            Self::Baro(_) => SensorKind::Baro,
            Self::Accel(_) => SensorKind::Accel,
            Self::Gyro(_) => SensorKind::Gyro,
            Self::Mag(_) => SensorKind::Mag,
            Self::Gnss(_) => SensorKind::Gnss,
            Self::FusedAltitude(_) => SensorKind::FusedAltitude,
            Self::Status(_) => SensorKind::Status,
            Self::Error(_) => SensorKind::Error,
        }
    }

    pub fn timestamp_us(&self) -> u64 {
        match self {
            Self::Baro(s) => s.timestamp_us,
            Self::Accel(s) => s.timestamp_us,
            Self::Gyro(s) => s.timestamp_us,
            Self::Mag(s) => s.timestamp_us,
            Self::Gnss(s) => s.timestamp_us,
            Self::FusedAltitude(s) => s.timestamp_us,
            Self::Status(s) => s.timestamp_us,
            Self::Error(s) => s.timestamp_us,
        }
    }
}

struct Subscriber {
    kinds: BoundedVec<SensorKind, MAX_KINDS>,
    sender: Sender<Sample>,
}

/// The in-process sensor bus.
pub struct SensorBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl SensorBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to a set of sample kinds. The returned receiver yields
    /// samples of any subscribed kind in publish order.
    pub fn subscribe(&self, kinds: &[SensorKind]) -> Receiver<Sample> {
        let (sender, receiver) = bounded(SUBSCRIBER_QUEUE_DEPTH);
        let mut wanted = BoundedVec::new();
        for kind in kinds.iter().take(MAX_KINDS) {
            let _ = wanted.push(*kind);
        }
        self.subscribers.lock().push(Subscriber { kinds: wanted, sender });
        receiver
    }

    /// Publish a sample to every subscriber interested in its kind.
    /// Subscribers whose queues are full miss this sample; subscribers that
    /// hung up are unregistered.
    pub fn publish(&self, sample: Sample) {
        let kind = sample.kind();
        self.subscribers.lock().retain(|subscriber| {
            if !subscriber.kinds.contains(&kind) {
                return true;
            }
            match subscriber.sender.try_send(sample) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("subscriber queue full, dropping a {} sample", kind.topic());
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    /// Publish an error report on behalf of a process.
    pub fn publish_error(&self, timestamp_us: u64, process: ProcessId, code: ErrorCode) {
        self.publish(Sample::Error(ErrorSample {
            timestamp_us,
            process,
            code,
        }));
    }
}

impl Default for SensorBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baro(timestamp_us: u64) -> Sample {
        Sample::Baro(BaroSample {
            timestamp_us,
            pressure_mbar: 1013.25,
            temperature_c: 21.0,
        })
    }

    #[test]
    fn subscribers_only_see_their_kinds() {
        let bus = SensorBus::new();
        let baro_rx = bus.subscribe(&[SensorKind::Baro]);
        let accel_rx = bus.subscribe(&[SensorKind::Accel]);

        bus.publish(baro(1));
        bus.publish(Sample::Accel(AccelSample {
            timestamp_us: 2,
            x: 0.0,
            y: 0.0,
            z: 9.81,
        }));

        assert_eq!(baro_rx.try_recv().unwrap().kind(), SensorKind::Baro);
        assert!(baro_rx.try_recv().is_err());
        assert_eq!(accel_rx.try_recv().unwrap().kind(), SensorKind::Accel);
    }

    #[test]
    fn per_topic_order_is_preserved() {
        let bus = SensorBus::new();
        let rx = bus.subscribe(&[SensorKind::Baro]);
        for timestamp in 0..10 {
            bus.publish(baro(timestamp));
        }
        for timestamp in 0..10 {
            assert_eq!(rx.try_recv().unwrap().timestamp_us(), timestamp);
        }
    }

    #[test]
    fn hung_up_subscribers_are_dropped() {
        let bus = SensorBus::new();
        let rx = bus.subscribe(&[SensorKind::Baro]);
        drop(rx);
        bus.publish(baro(1));
        assert!(bus.subscribers.lock().is_empty());
    }

    #[test]
    fn accel_magnitude_discards_signs() {
        let sample = AccelSample {
            timestamp_us: 0,
            x: -3.0,
            y: 4.0,
            z: 0.0,
        };
        assert!((sample.magnitude() - 5.0).abs() < 1e-6);
    }
}
