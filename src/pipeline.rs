//! Thread wiring for the telemetry core.
//!
//! Five long-lived tasks share three structures: the sensor bus, the rocket
//! state store, and a packet buffer per sink. Sensor drivers (or their
//! replay stand-ins) live outside the core and publish onto the bus handle
//! this module exposes.

use std::fs::OpenOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{error, warn};

use crate::buffer::PacketBuffer;
use crate::collection::{collection_kinds, collection_main};
use crate::config::TelemetryConfig;
use crate::fusion::Fusion;
use crate::logging::{EjectLed, GpioEjectLed, Logger, NullEjectLed};
use crate::sensors::{Sample, SensorBus, SensorKind};
use crate::state::RocketState;
use crate::transmit::Transmitter;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not open the radio device: {0}")]
    Radio(std::io::Error),
    #[error("could not start a thread: {0}")]
    Spawn(std::io::Error),
}

/// Handles to the running telemetry core.
pub struct TelemetryPipeline {
    bus: Arc<SensorBus>,
    state: Arc<RocketState>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl TelemetryPipeline {
    /// Bring up the shared structures and spawn the collection, fusion,
    /// logging and transmit threads.
    pub fn start(config: &TelemetryConfig) -> Result<Self, PipelineError> {
        let bus = Arc::new(SensorBus::new());
        let state = Arc::new(RocketState::load(&config.nv_state_path));
        let logging_buffer = Arc::new(PacketBuffer::new());
        let transmit_buffer = Arc::new(PacketBuffer::new());
        let running = Arc::new(AtomicBool::new(true));

        let call_sign = config.call_sign;

        // A sensor missing from the enabled set stays out for the whole
        // process lifetime, same as a driver whose metadata never shows up
        for kind in [
            SensorKind::Accel,
            SensorKind::Gyro,
            SensorKind::Baro,
            SensorKind::Mag,
            SensorKind::Gnss,
        ] {
            if !config.enabled_sensors.contains(&kind) {
                warn!("sensor topic {} is not enabled, skipping it", kind.topic());
            }
        }

        let radio = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.radio_dev)
            .map_err(PipelineError::Radio)?;

        let mut handles = Vec::new();

        let collection_rx = bus.subscribe(&collection_kinds(&config.enabled_sensors));
        handles.push(
            std::thread::Builder::new()
                .name("collection".into())
                .spawn({
                    let logging_buffer = Arc::clone(&logging_buffer);
                    let transmit_buffer = Arc::clone(&transmit_buffer);
                    let running = Arc::clone(&running);
                    move || {
                        if let Err(err) = collection_main(
                            collection_rx,
                            logging_buffer,
                            transmit_buffer,
                            call_sign,
                            running,
                        ) {
                            // Setup failures are unrecoverable by design
                            error!("collection thread failed: {err}");
                            std::process::exit(1);
                        }
                    }
                })
                .map_err(PipelineError::Spawn)?,
        );

        let fusion_rx = bus.subscribe(&[SensorKind::Baro, SensorKind::Accel]);
        handles.push(
            std::thread::Builder::new()
                .name("fusion".into())
                .spawn({
                    let fusion = Fusion::new(
                        Arc::clone(&bus),
                        Arc::clone(&state),
                        config.reference_pressure_mbar,
                    );
                    let running = Arc::clone(&running);
                    move || fusion.run(fusion_rx, running)
                })
                .map_err(PipelineError::Spawn)?,
        );

        let led: Box<dyn EjectLed> = match &config.eject_led {
            Some(path) => Box::new(GpioEjectLed::new(path)),
            None => Box::new(NullEjectLed),
        };
        handles.push(
            std::thread::Builder::new()
                .name("logging".into())
                .spawn({
                    let logger = Logger::new(
                        Arc::clone(&state),
                        Arc::clone(&logging_buffer),
                        &config.flight_fs,
                        &config.landed_fs,
                        led,
                    );
                    let running = Arc::clone(&running);
                    move || {
                        if let Err(err) = logger.run(running) {
                            error!("logging thread failed: {err}");
                            std::process::exit(1);
                        }
                    }
                })
                .map_err(PipelineError::Spawn)?,
        );

        handles.push(
            std::thread::Builder::new()
                .name("transmit".into())
                .spawn({
                    let transmitter = Transmitter::new(Arc::clone(&transmit_buffer), radio);
                    let running = Arc::clone(&running);
                    move || transmitter.run(running)
                })
                .map_err(PipelineError::Spawn)?,
        );

        Ok(Self {
            bus,
            state,
            running,
            handles,
        })
    }

    /// The bus handle sensor drivers publish onto.
    pub fn bus(&self) -> &Arc<SensorBus> {
        &self.bus
    }

    /// The shared flight state.
    pub fn state(&self) -> &Arc<RocketState> {
        &self.state
    }

    /// Convenience for drivers that hold the pipeline itself.
    pub fn publish(&self, sample: Sample) {
        self.bus.publish(sample);
    }

    /// Block until every thread exits. They run for the process lifetime,
    /// so this effectively parks the caller.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }

    /// Ask every thread to stop and wait for them. Used by tests and
    /// orderly shutdown paths.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}
