//! Durable flight logging.
//!
//! While idle on the pad the logger rotates between two pre-flight files
//! every [`PING_PONG_DURATION`], truncating the file it rotates onto, which
//! bounds retained pre-launch history to between one and two swap
//! intervals while keeping every write on the power-safe filesystem. In
//! flight the swapping stops and the active file is synced every few
//! packets. Once landed, both files are concatenated onto the removable
//! extraction filesystem, the eject LED is raised, and the rocket is handed
//! back to the idle state for another flight.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::buffer::PacketBuffer;
use crate::state::{FlightState, RocketState};

/// Seconds of guaranteed pre-launch data retained by the ping-pong pair.
pub const PING_PONG_DURATION: Duration = Duration::from_secs(30);

/// Prefix for flight log file names on the power-safe filesystem.
pub const FLIGHT_LOG_PREFIX: &str = "flog";

/// Prefix for extraction log file names on the removable filesystem.
pub const EXTRACTION_LOG_PREFIX: &str = "elog";

/// The number of times opening a log file will be attempted.
const NUM_TIMES_TRY_OPEN: u32 = 3;

/// Sync the active file every time this many packets have been written.
const SYNC_EVERY_PACKETS: u32 = 4;

/// Chunk size for the landed copy-out.
const COPY_CHUNK: usize = 8192;

/// How long to wait for a packet before re-checking flight state.
const DRAIN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("could not open a log file: {0}")]
    Open(std::io::Error),
}

/// The eject LED tells the operator when the removable card is safe to
/// pull. Driven low for the whole interval the card may be written.
pub trait EjectLed: Send {
    fn set_safe_to_eject(&mut self, safe: bool) -> std::io::Result<()>;
}

/// An eject LED behind a GPIO value file.
pub struct GpioEjectLed {
    path: PathBuf,
}

impl GpioEjectLed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EjectLed for GpioEjectLed {
    fn set_safe_to_eject(&mut self, safe: bool) -> std::io::Result<()> {
        std::fs::write(&self.path, if safe { "1" } else { "0" })?;
        info!("eject LED {}", if safe { "on" } else { "off" });
        Ok(())
    }
}

/// For boards without the LED, and for tests.
pub struct NullEjectLed;

impl EjectLed for NullEjectLed {
    fn set_safe_to_eject(&mut self, _safe: bool) -> std::io::Result<()> {
        Ok(())
    }
}

fn log_file_name(prefix: &str, flight_number: u32, serial_number: u32) -> String {
    format!("{prefix}_{flight_number}_{serial_number}.bin")
}

/// Parse `<prefix>_<flight>_<serial>.bin`, returning the two numbers.
fn parse_log_name(name: &str, prefix: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('_')?;
    let rest = rest.strip_suffix(".bin")?;
    let (flight, serial) = rest.split_once('_')?;
    Some((flight.parse().ok()?, serial.parse().ok()?))
}

/// Pick a flight number using previous files in the directory to avoid
/// naming conflicts: one past the highest found, or a random number if the
/// directory cannot be read.
pub fn choose_flight_number(dir: &Path, prefix: &str) -> u32 {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            error!("could not read {} to pick a flight number ({err}), picking at random", dir.display());
            return rand::random();
        }
    };
    let max_flight = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| parse_log_name(&entry.file_name().to_string_lossy(), prefix))
        .map(|(flight, _serial)| flight)
        .max()
        .unwrap_or(0);
    debug!("previous max flight number: {max_flight}");
    max_flight + 1
}

/// Open a numbered log file, retrying a few times since the power-safe
/// filesystem can be briefly busy after a sync.
fn open_log_file(
    dir: &Path,
    prefix: &str,
    flight_number: u32,
    serial_number: u32,
    append: bool,
) -> std::io::Result<File> {
    let path = dir.join(log_file_name(prefix, flight_number, serial_number));
    let mut last_err = None;
    for attempt in 0..NUM_TIMES_TRY_OPEN {
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true).read(true);
        }
        match options.open(&path) {
            Ok(file) => {
                debug!("opened log file {}", path.display());
                return Ok(file);
            }
            Err(err) => {
                error!("error (attempt {attempt}) opening {}: {err}", path.display());
                last_err = Some(err);
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("log file open attempts exhausted")))
}

/// Set the length of a file to zero and reset its write position.
fn clear_file(file: &mut File) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.sync_data()?;
    Ok(())
}

/// Copy a file's contents onto another in chunks, then clear the source.
///
/// A failing write does not break the loop, in case it only fails once; if
/// any write failed the source is left untouched so the data can be
/// retried on the next power cycle.
fn copy_out(src: &mut File, dst: &mut File) -> std::io::Result<()> {
    src.seek(SeekFrom::Start(0))?;
    let mut chunk = [0u8; COPY_CHUNK];
    let mut write_error = None;
    loop {
        let nbytes = src.read(&mut chunk)?;
        if nbytes == 0 {
            break;
        }
        if let Err(err) = dst.write_all(&chunk[..nbytes]) {
            error!("failed to write to the extraction file: {err}");
            write_error = Some(err);
        }
    }
    if let Some(err) = write_error {
        return Err(err);
    }
    clear_file(src)
}

/// The pre-flight ping-pong file pair.
struct PingPong {
    active: File,
    standby: File,
}

impl PingPong {
    /// Make the standby file active, truncating it so at most two intervals
    /// of pre-launch history are retained.
    fn swap(&mut self) -> std::io::Result<()> {
        std::mem::swap(&mut self.active, &mut self.standby);
        clear_file(&mut self.active)
    }
}

/// The logging thread's state.
pub struct Logger {
    state: Arc<RocketState>,
    buffer: Arc<PacketBuffer>,
    flight_dir: PathBuf,
    landed_dir: PathBuf,
    led: Box<dyn EjectLed>,
    swap_interval: Duration,
}

impl Logger {
    pub fn new(
        state: Arc<RocketState>,
        buffer: Arc<PacketBuffer>,
        flight_dir: impl Into<PathBuf>,
        landed_dir: impl Into<PathBuf>,
        led: Box<dyn EjectLed>,
    ) -> Self {
        Self {
            state,
            buffer,
            flight_dir: flight_dir.into(),
            landed_dir: landed_dir.into(),
            led,
            swap_interval: PING_PONG_DURATION,
        }
    }

    /// Override the ping-pong interval; tests use a short one.
    pub fn with_swap_interval(mut self, swap_interval: Duration) -> Self {
        self.swap_interval = swap_interval;
        self
    }

    /// Logging thread body. Returns only on unrecoverable setup failure or
    /// once `running` clears.
    pub fn run(mut self, running: Arc<AtomicBool>) -> Result<(), LoggingError> {
        info!("logging thread started");

        let flight_number = choose_flight_number(&self.flight_dir, FLIGHT_LOG_PREFIX);
        let mut flight_serial = 0u32;
        let extract_number = choose_flight_number(&self.landed_dir, EXTRACTION_LOG_PREFIX);
        let mut extract_serial = 0u32;

        let mut next_flight_file = |serial: &mut u32| {
            let file = open_log_file(&self.flight_dir, FLIGHT_LOG_PREFIX, flight_number, *serial, false);
            *serial += 1;
            file
        };

        let mut files = PingPong {
            active: next_flight_file(&mut flight_serial).map_err(LoggingError::Open)?,
            standby: next_flight_file(&mut flight_serial).map_err(LoggingError::Open)?,
        };
        // Both files were just truncated, so neither holds any data yet
        let mut last_swap = Instant::now();
        let mut packet_seq = 0u32;

        while running.load(Ordering::SeqCst) {
            match self.state.flight_state() {
                FlightState::Idle => {
                    if last_swap.elapsed() >= self.swap_interval {
                        if let Err(err) = files.swap() {
                            error!("could not truncate the file being swapped in: {err}");
                        }
                        last_swap = Instant::now();
                        info!("swapped logging files");
                    }
                    self.drain_one(&mut files, &mut packet_seq, flight_number, &mut flight_serial)?;
                }
                FlightState::Airborne => {
                    self.drain_one(&mut files, &mut packet_seq, flight_number, &mut flight_serial)?;
                }
                FlightState::Landed => {
                    self.extract(&mut files, extract_number, &mut extract_serial, flight_number, &mut flight_serial)?;
                    packet_seq = 0;
                }
            }
        }

        for file in [&mut files.active, &mut files.standby] {
            let _ = file.flush();
            let _ = file.sync_data();
        }
        info!("logging thread stopping");
        Ok(())
    }

    /// Wait for one packet from the logging sink and write it out, opening
    /// a replacement file if the write fails. The packet is returned to the
    /// pool whether or not the write succeeded.
    fn drain_one(
        &mut self,
        files: &mut PingPong,
        packet_seq: &mut u32,
        flight_number: u32,
        flight_serial: &mut u32,
    ) -> Result<(), LoggingError> {
        // Not safe to eject from now until the files are copied out
        if let Err(err) = self.led.set_safe_to_eject(false) {
            debug!("could not drive the eject LED: {err}");
        }

        let Some(mut packet) = self.buffer.get_full_timeout(DRAIN_POLL) else {
            return Ok(());
        };
        packet.set_packet_num(*packet_seq as u8);
        *packet_seq += 1;

        if let Err(err) = files.active.write_all(packet.as_bytes()) {
            error!("opening a new logging file because writing the current one failed: {err}");
            files.active = open_log_file(
                &self.flight_dir,
                FLIGHT_LOG_PREFIX,
                flight_number,
                *flight_serial,
                false,
            )
            .map_err(LoggingError::Open)?;
            *flight_serial += 1;
        } else {
            debug!("logged {} bytes", packet.len());
        }
        self.buffer.put_empty(packet);

        // Sync sparingly, the power-safe filesystem makes it expensive
        if *packet_seq % SYNC_EVERY_PACKETS == 0 {
            let _ = files.active.sync_data();
        }
        Ok(())
    }

    /// Copy the pre-flight pair onto the removable filesystem: standby
    /// first since it holds the older interval, then active. Sources that
    /// fail to copy are replaced rather than truncated so their data
    /// survives for the next attempt.
    fn extract(
        &mut self,
        files: &mut PingPong,
        extract_number: u32,
        extract_serial: &mut u32,
        flight_number: u32,
        flight_serial: &mut u32,
    ) -> Result<(), LoggingError> {
        // Append so an earlier partial extraction is never overwritten
        let mut extract_file = match open_log_file(
            &self.landed_dir,
            EXTRACTION_LOG_PREFIX,
            extract_number,
            *extract_serial,
            true,
        ) {
            Ok(file) => {
                *extract_serial += 1;
                file
            }
            Err(err) => {
                error!("error opening extraction log file: {err}");
                *extract_serial += 1;
                return Ok(());
            }
        };
        debug!("copying files to the extraction file system");

        // If standby holds nothing the copy is a no-op
        if copy_out(&mut files.standby, &mut extract_file).is_err() {
            files.standby = open_log_file(
                &self.flight_dir,
                FLIGHT_LOG_PREFIX,
                flight_number,
                *flight_serial,
                false,
            )
            .map_err(LoggingError::Open)?;
            *flight_serial += 1;
        }
        if copy_out(&mut files.active, &mut extract_file).is_err() {
            files.active = open_log_file(
                &self.flight_dir,
                FLIGHT_LOG_PREFIX,
                flight_number,
                *flight_serial,
                false,
            )
            .map_err(LoggingError::Open)?;
            *flight_serial += 1;
        }

        if extract_file.sync_all().is_err() {
            warn!("couldn't sync the extraction log file");
        }
        drop(extract_file);

        // It's now safe to take out the card, and the logs are on it, so
        // the rocket can go around again
        if let Err(err) = self.led.set_safe_to_eject(true) {
            debug!("could not drive the eject LED: {err}");
        }
        self.state.set_flight_state(FlightState::Idle);
        Ok(())
    }
}
