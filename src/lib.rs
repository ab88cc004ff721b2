//! # Model-Rocket Telemetry Core
//!
//! The data plane of a model-rocket flight computer: it ingests timestamped
//! sensor samples, fuses altitude and acceleration into filtered rocket
//! dynamics, drives the idle / airborne / landed flight-phase state
//! machine, assembles compact binary radio frames, and distributes them to
//! a durable flight logger and a radio transmitter.
//!
//! ## Features
//!
//! - **Fusion & event detection**: median + moving-average filter chains, a
//!   moving-window landing detector, apogee tracking and airborne detection
//! - **Packet assembly**: a fixed 255-byte frame with typed blocks and a
//!   half-minute time base with per-block millisecond offsets
//! - **Packet buffering**: bounded slot pools with blocking consumers and
//!   oldest-victim recycling so producers never stall
//! - **Durable logging**: ping-pong pre-flight files, append-only in-flight
//!   logging, and landed extraction onto removable storage
//! - **Bounded memory**: fixed-capacity collections on every hot path
//!
//! ## Quick start
//!
//! ```no_run
//! use rockettelem::config::TelemetryConfig;
//! use rockettelem::pipeline::TelemetryPipeline;
//!
//! let config = TelemetryConfig::default();
//! let pipeline = TelemetryPipeline::start(&config).expect("bring-up failed");
//! // Sensor drivers publish onto pipeline.bus(); the pipeline does the rest.
//! pipeline.join();
//! ```
//!
//! ## Architecture
//!
//! - [`sensors`] - typed samples and the in-process publish-subscribe bus
//! - [`fusion`] - pressure-to-altitude fusion, detector and state machine
//! - [`detector`] - filtered dynamics and flight-event predicates
//! - [`collection`] - sample intake and per-sink packet assembly
//! - [`packet`] - the bit-exact radio frame
//! - [`buffer`] - bounded empty/full slot pools
//! - [`logging`] - ping-pong flight logs and landed extraction
//! - [`transmit`] - the radio drain
//! - [`state`] - the atomic flight-state store with NV write-through

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod collection;
pub mod config;
pub mod detector;
pub mod filter;
pub mod fusion;
pub mod logging;
pub mod packet;
pub mod pipeline;
pub mod sensors;
pub mod state;
pub mod status;
pub mod syslog;
pub mod transmit;

// Re-export the types most integrations touch
pub use buffer::{PacketBuffer, PacketSlot};
pub use config::TelemetryConfig;
pub use detector::{Detector, DetectorEvent};
pub use packet::{BlockBody, BlockType, CallSign, PacketHeader};
pub use pipeline::TelemetryPipeline;
pub use sensors::{Sample, SensorBus, SensorKind};
pub use state::{FlightState, FlightSubstate, RocketState};
