//! Sensor collection: turns the sample stream into packets.
//!
//! The collection thread drains the bus and appends a block for every
//! reading, twice: once into the logging sink at full fidelity, once into
//! the transmit sink where slow-moving kinds (pressure, temperature) are
//! capped so real-time feeds dominate the limited radio bandwidth. Completed
//! packets are handed to the sink buffers; a sink stamps its own sequence
//! numbers since the assembler cannot know if or in what order packets go
//! out.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::buffer::{PacketBuffer, PacketSlot};
use crate::packet::{BlockBody, BlockType, CallSign, BLOCK_TYPE_COUNT};
use crate::sensors::{
    AccelSample, AltitudeSample, BaroSample, ErrorSample, GnssSample, GyroSample, MagSample,
    Sample, SensorKind, StatusSample,
};

/// How many readings of each lower-priority kind fit in one transmit packet.
pub const TRANSMIT_NUM_LOW_PRIORITY_READINGS: u8 = 2;

const RECV_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("could not get an initial empty packet for collection")]
    NoInitialPacket,
}

/* Unit conversion helpers, bit-exact with the packet field definitions */

pub fn us_to_ms(us: u64) -> u32 {
    (us / 1000) as u32
}

fn pascals(millibar: f32) -> u32 {
    (millibar * 100.0) as u32
}

fn millidegrees(celsius: f32) -> i32 {
    (celsius * 1000.0) as i32
}

fn cm_per_sec_squared(meters_per_sec_squared: f32) -> i16 {
    (meters_per_sec_squared * 100.0) as i16
}

fn tenth_degree(radians: f32) -> i16 {
    (radians * 1800.0 / PI) as i16
}

fn tenth_microtesla(microtesla: f32) -> i16 {
    (microtesla * 1000.0) as i16
}

fn point_one_microdegrees(degrees: f64) -> i32 {
    (degrees * 1e7) as i32
}

fn millimeters(meters: f32) -> i32 {
    (meters * 1000.0) as i32
}

/// Per-sink assembly state: the packet being filled and how many blocks of
/// each type it already holds.
pub struct CollectionContext {
    buffer: Arc<PacketBuffer>,
    current: Option<Box<PacketSlot>>,
    block_count: [u8; BLOCK_TYPE_COUNT],
    call_sign: CallSign,
}

impl CollectionContext {
    pub fn new(buffer: Arc<PacketBuffer>, call_sign: CallSign) -> Result<Self, CollectionError> {
        let current = buffer.get_empty().ok_or(CollectionError::NoInitialPacket)?;
        Ok(Self {
            buffer,
            current: Some(current),
            block_count: [0; BLOCK_TYPE_COUNT],
            call_sign,
        })
    }

    /// The number of blocks of `block_type` in the packet being assembled.
    pub fn count(&self, block_type: BlockType) -> u8 {
        self.block_count[block_type.index()]
    }

    fn try_append(&mut self, body: &BlockBody, mission_time_ms: u32) -> bool {
        let Some(slot) = self.current.as_mut() else {
            return false;
        };
        if slot.is_empty() {
            slot.start_packet(&self.call_sign, mission_time_ms);
        }
        if slot.append(body, mission_time_ms).is_ok() {
            self.block_count[body.block_type().index()] += 1;
            true
        } else {
            false
        }
    }

    /// Add a block to the packet being assembled, closing it and starting a
    /// new one if the block does not fit or its time is incompatible with
    /// the packet's time base. Returns false if the block had to be dropped.
    pub fn add_or_new(&mut self, body: &BlockBody, mission_time_ms: u32) -> bool {
        if self.try_append(body, mission_time_ms) {
            return true;
        }
        if !self.rotate(mission_time_ms) {
            return false;
        }
        if self.try_append(body, mission_time_ms) {
            true
        } else {
            debug!("dropping a {:?} block that does not fit a fresh packet", body.block_type());
            false
        }
    }

    /// Publish the packet under assembly and start a new one.
    fn rotate(&mut self, mission_time_ms: u32) -> bool {
        if let Some(done) = self.current.take() {
            debug!("completed a packet of length {}", done.len());
            self.buffer.put_full(done);
        }
        match self.buffer.get_empty() {
            Some(mut fresh) => {
                fresh.start_packet(&self.call_sign, mission_time_ms);
                self.current = Some(fresh);
                self.block_count = [0; BLOCK_TYPE_COUNT];
                true
            }
            None => {
                error!("couldn't get an empty packet or overwrite a full one");
                false
            }
        }
    }

    /// Publish whatever has been assembled so far. Used at shutdown so the
    /// sinks see the tail of the stream.
    pub fn finish(&mut self) {
        if let Some(slot) = self.current.take() {
            if slot.is_empty() {
                self.buffer.put_empty(slot);
            } else {
                self.buffer.put_full(slot);
            }
        }
    }
}

/// The two collection sinks fed from one sensor stream.
pub struct ProcessingContext {
    logging: CollectionContext,
    transmit: CollectionContext,
}

impl ProcessingContext {
    pub fn new(
        logging_buffer: Arc<PacketBuffer>,
        transmit_buffer: Arc<PacketBuffer>,
        call_sign: CallSign,
    ) -> Result<Self, CollectionError> {
        Ok(Self {
            logging: CollectionContext::new(logging_buffer, call_sign)?,
            transmit: CollectionContext::new(transmit_buffer, call_sign)?,
        })
    }

    /// Route one sample into blocks in both sinks.
    pub fn handle(&mut self, sample: &Sample) {
        match sample {
            Sample::Baro(baro) => self.handle_baro(baro),
            Sample::Accel(accel) => self.handle_accel(accel),
            Sample::Gyro(gyro) => self.handle_gyro(gyro),
            Sample::Mag(mag) => self.handle_mag(mag),
            Sample::Gnss(gnss) => self.handle_gnss(gnss),
            Sample::FusedAltitude(altitude) => self.handle_altitude(altitude),
            Sample::Status(status) => self.handle_status(status),
            Sample::Error(report) => self.handle_error(report),
        }
    }

    fn handle_baro(&mut self, baro: &BaroSample) {
        let mission_time = us_to_ms(baro.timestamp_us);
        let pressure = BlockBody::Pressure {
            pascals: pascals(baro.pressure_mbar),
        };
        let temperature = BlockBody::Temperature {
            millicelsius: millidegrees(baro.temperature_c),
        };
        self.logging.add_or_new(&pressure, mission_time);
        self.logging.add_or_new(&temperature, mission_time);

        if self.transmit.count(BlockType::Pressure) < TRANSMIT_NUM_LOW_PRIORITY_READINGS {
            self.transmit.add_or_new(&pressure, mission_time);
        }
        if self.transmit.count(BlockType::Temperature) < TRANSMIT_NUM_LOW_PRIORITY_READINGS {
            self.transmit.add_or_new(&temperature, mission_time);
        }
    }

    fn handle_accel(&mut self, accel: &AccelSample) {
        let mission_time = us_to_ms(accel.timestamp_us);
        let block = BlockBody::AccelRel {
            x: cm_per_sec_squared(accel.x),
            y: cm_per_sec_squared(accel.y),
            z: cm_per_sec_squared(accel.z),
        };
        self.logging.add_or_new(&block, mission_time);
        self.transmit.add_or_new(&block, mission_time);
    }

    fn handle_gyro(&mut self, gyro: &GyroSample) {
        let mission_time = us_to_ms(gyro.timestamp_us);
        let block = BlockBody::AngularVel {
            x: tenth_degree(gyro.x),
            y: tenth_degree(gyro.y),
            z: tenth_degree(gyro.z),
        };
        self.logging.add_or_new(&block, mission_time);
        self.transmit.add_or_new(&block, mission_time);
    }

    fn handle_mag(&mut self, mag: &MagSample) {
        let mission_time = us_to_ms(mag.timestamp_us);
        let block = BlockBody::Magnetic {
            x: tenth_microtesla(mag.x),
            y: tenth_microtesla(mag.y),
            z: tenth_microtesla(mag.z),
        };
        self.logging.add_or_new(&block, mission_time);
        self.transmit.add_or_new(&block, mission_time);
    }

    fn handle_gnss(&mut self, gnss: &GnssSample) {
        // Don't send packets with no sat fix
        if !gnss.has_fix() {
            return;
        }
        let mission_time = us_to_ms(gnss.timestamp_us);
        let coords = BlockBody::LatLong {
            latitude: point_one_microdegrees(gnss.latitude_deg),
            longitude: point_one_microdegrees(gnss.longitude_deg),
        };
        let altitude = BlockBody::AltSea {
            altitude_mm: millimeters(gnss.altitude_m),
        };
        self.logging.add_or_new(&coords, mission_time);
        self.logging.add_or_new(&altitude, mission_time);
        self.transmit.add_or_new(&coords, mission_time);
        self.transmit.add_or_new(&altitude, mission_time);
    }

    fn handle_altitude(&mut self, altitude: &AltitudeSample) {
        let mission_time = us_to_ms(altitude.timestamp_us);
        let block = BlockBody::AltSea {
            altitude_mm: millimeters(altitude.altitude_m),
        };
        self.logging.add_or_new(&block, mission_time);
        self.transmit.add_or_new(&block, mission_time);
    }

    fn handle_status(&mut self, status: &StatusSample) {
        let mission_time = us_to_ms(status.timestamp_us);
        let block = BlockBody::Status {
            code: status.code.code(),
        };
        self.logging.add_or_new(&block, mission_time);
        self.transmit.add_or_new(&block, mission_time);
    }

    fn handle_error(&mut self, report: &ErrorSample) {
        let mission_time = us_to_ms(report.timestamp_us);
        let block = BlockBody::Error {
            process: report.process as u8,
            code: report.code as u8,
        };
        self.logging.add_or_new(&block, mission_time);
        self.transmit.add_or_new(&block, mission_time);
    }

    /// Flush both sinks. See [`CollectionContext::finish`].
    pub fn finish(&mut self) {
        self.logging.finish();
        self.transmit.finish();
    }
}

/// The kinds the collection thread subscribes to: every enabled sensor plus
/// the synthetic topics the fusion task publishes.
pub fn collection_kinds(enabled_sensors: &[SensorKind]) -> Vec<SensorKind> {
    let mut kinds = enabled_sensors.to_vec();
    for extra in [SensorKind::FusedAltitude, SensorKind::Status, SensorKind::Error] {
        if !kinds.contains(&extra) {
            kinds.push(extra);
        }
    }
    kinds
}

/// Collection thread body. Runs until `running` clears and the bus drains.
pub fn collection_main(
    samples: Receiver<Sample>,
    logging_buffer: Arc<PacketBuffer>,
    transmit_buffer: Arc<PacketBuffer>,
    call_sign: CallSign,
    running: Arc<AtomicBool>,
) -> Result<(), CollectionError> {
    info!("collection thread started");
    let mut context = ProcessingContext::new(logging_buffer, transmit_buffer, call_sign)?;

    loop {
        match samples.recv_timeout(RECV_POLL) {
            Ok(sample) => context.handle(&sample),
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    context.finish();
    info!("collection thread stopping");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{parse_packet, PACKET_HEADER_SIZE};

    fn sign() -> CallSign {
        CallSign::from("VA3TST").unwrap()
    }

    fn context() -> (ProcessingContext, Arc<PacketBuffer>, Arc<PacketBuffer>) {
        let logging = Arc::new(PacketBuffer::new());
        let transmit = Arc::new(PacketBuffer::new());
        let ctx = ProcessingContext::new(Arc::clone(&logging), Arc::clone(&transmit), sign())
            .unwrap();
        (ctx, logging, transmit)
    }

    fn baro(timestamp_us: u64) -> BaroSample {
        BaroSample {
            timestamp_us,
            pressure_mbar: 1013.25,
            temperature_c: 21.5,
        }
    }

    #[test]
    fn conversions_match_the_wire_units() {
        assert_eq!(pascals(1013.25), 101_325);
        assert_eq!(millidegrees(-12.5), -12_500);
        assert_eq!(cm_per_sec_squared(-9.81), -981); // truncation, not rounding
        assert_eq!(millimeters(1189.0), 1_189_000);
        assert_eq!(tenth_microtesla(2.5), 2500);
        // Field strengths past ~32.7uT saturate rather than wrap
        assert_eq!(tenth_microtesla(48.123), i16::MAX);
        assert_eq!(us_to_ms(1_500_999), 1500);
        // One bit of float slop is expected on the irrational conversions
        assert!((i32::from(tenth_degree(PI)) - 1800).abs() <= 1);
        assert!((point_one_microdegrees(45.3824911) - 453_824_911i32).abs() <= 1);
    }

    #[test]
    fn baro_blocks_are_capped_in_the_transmit_sink() {
        let (mut ctx, _logging, _transmit) = context();
        for i in 0..3u64 {
            ctx.handle(&Sample::Baro(baro(i * 10_000)));
        }
        assert_eq!(ctx.logging.count(BlockType::Pressure), 3);
        assert_eq!(ctx.logging.count(BlockType::Temperature), 3);
        assert_eq!(ctx.transmit.count(BlockType::Pressure), 2);
        assert_eq!(ctx.transmit.count(BlockType::Temperature), 2);
    }

    #[test]
    fn transmit_cap_resets_with_each_packet() {
        let (mut ctx, _logging, transmit) = context();
        for i in 0..3u64 {
            ctx.handle(&Sample::Baro(baro(i * 10_000)));
        }
        // Force a rotation by filling the transmit packet with accel blocks
        let mut i = 0u64;
        while transmit.queued().1 == 0 {
            ctx.handle(&Sample::Accel(AccelSample {
                timestamp_us: i * 1000,
                x: 0.1,
                y: 0.2,
                z: 9.8,
            }));
            i += 1;
        }
        assert_eq!(ctx.transmit.count(BlockType::Pressure), 0);
        ctx.handle(&Sample::Baro(baro(i * 1000)));
        assert_eq!(ctx.transmit.count(BlockType::Pressure), 1);
    }

    #[test]
    fn gnss_without_a_fix_is_suppressed() {
        let (mut ctx, _logging, _transmit) = context();
        ctx.handle(&Sample::Gnss(GnssSample {
            timestamp_us: 1000,
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            altitude_m: 120.0,
        }));
        assert_eq!(ctx.logging.count(BlockType::LatLong), 0);
        assert_eq!(ctx.logging.count(BlockType::AltSea), 0);

        ctx.handle(&Sample::Gnss(GnssSample {
            timestamp_us: 2000,
            latitude_deg: 45.3824911,
            longitude_deg: -75.6982474,
            altitude_m: 120.0,
        }));
        assert_eq!(ctx.logging.count(BlockType::LatLong), 1);
        assert_eq!(ctx.logging.count(BlockType::AltSea), 1);
    }

    #[test]
    fn full_packets_rotate_and_the_block_survives() {
        let logging = Arc::new(PacketBuffer::new());
        let mut ctx = CollectionContext::new(Arc::clone(&logging), sign()).unwrap();
        // Accel blocks are 10 bytes; the 25th does not fit in 255 and must
        // land at the front of a fresh packet
        let block = BlockBody::AccelRel { x: 1, y: 2, z: 3 };
        for _ in 0..25 {
            assert!(ctx.add_or_new(&block, 1000));
        }
        let (_, full) = logging.queued();
        assert_eq!(full, 1);

        let published = logging.get_full();
        let (header, blocks) = parse_packet(published.as_bytes()).unwrap();
        assert_eq!(header.blocks, 24);
        assert_eq!(blocks.len(), 24);
        assert_eq!(ctx.count(BlockType::AccelRel), 1);
    }

    #[test]
    fn incompatible_mission_time_starts_a_new_packet() {
        let logging = Arc::new(PacketBuffer::new());
        let mut ctx = CollectionContext::new(Arc::clone(&logging), sign()).unwrap();
        let block = BlockBody::AltSea { altitude_mm: 1000 };
        assert!(ctx.add_or_new(&block, 1000));
        // Two minutes later: cannot be an offset from time base 0
        assert!(ctx.add_or_new(&block, 120_000));

        let published = logging.get_full();
        let (header, blocks) = parse_packet(published.as_bytes()).unwrap();
        assert_eq!(header.timestamp, 0);
        assert_eq!(blocks.len(), 1);
        // The fresh packet carries the new time base
        let current = ctx.current.as_ref().unwrap();
        let (header, _) = parse_packet(current.as_bytes()).unwrap();
        assert_eq!(header.timestamp, 4);
    }

    #[test]
    fn status_and_error_samples_become_blocks() {
        use crate::status::{ErrorCode, ProcessId, StatusCode};
        let (mut ctx, logging, _transmit) = context();
        ctx.handle(&Sample::Status(StatusSample {
            timestamp_us: 5_000_000,
            code: StatusCode::ChangedAirborne,
        }));
        ctx.handle(&Sample::Error(ErrorSample {
            timestamp_us: 6_000_000,
            process: ProcessId::Fusion,
            code: ErrorCode::General,
        }));
        ctx.finish();

        let published = logging.get_full();
        let (_, blocks) = parse_packet(published.as_bytes()).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].bodies[0].1, BlockBody::Status { code: 0x02 });
        assert_eq!(blocks[1].bodies[0].1, BlockBody::Error { process: 2, code: 0 });
    }

    #[test]
    fn finish_publishes_only_nonempty_packets() {
        let logging = Arc::new(PacketBuffer::new());
        let mut ctx = CollectionContext::new(Arc::clone(&logging), sign()).unwrap();
        ctx.finish();
        assert_eq!(logging.queued(), (crate::buffer::NUM_SLOTS, 0));

        let mut ctx = CollectionContext::new(Arc::clone(&logging), sign()).unwrap();
        ctx.add_or_new(&BlockBody::AltSea { altitude_mm: 1 }, 0);
        ctx.finish();
        let published = logging.get_full();
        assert!(published.len() > PACKET_HEADER_SIZE);
    }
}
