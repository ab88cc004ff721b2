//! Radio transmission.
//!
//! The transmitter drains the transmit sink and writes each assembled
//! frame to the radio device in order. The radio is an opaque blocking
//! byte sink; write errors are logged and the loop re-entered, dropping
//! that frame rather than the link.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::buffer::PacketBuffer;

const DRAIN_POLL: Duration = Duration::from_millis(100);

pub struct Transmitter<W: Write + Send> {
    buffer: Arc<PacketBuffer>,
    radio: W,
}

impl<W: Write + Send> Transmitter<W> {
    pub fn new(buffer: Arc<PacketBuffer>, radio: W) -> Self {
        Self { buffer, radio }
    }

    /// Transmitter thread body. Runs until `running` clears.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!("transmit thread started");
        let mut packet_seq = 0u32;
        while running.load(Ordering::SeqCst) {
            let Some(mut packet) = self.buffer.get_full_timeout(DRAIN_POLL) else {
                continue;
            };
            packet.set_packet_num(packet_seq as u8);
            packet_seq += 1;

            if let Err(err) = self.radio.write_all(packet.as_bytes()) {
                error!("radio write failed: {err}");
            } else {
                debug!("transmitted {} bytes", packet.len());
                let _ = self.radio.flush();
            }
            self.buffer.put_empty(packet);
        }
        info!("transmit thread stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{parse_packet, CallSign};

    /// `run` consumes self, so the radio bytes come back via a shared Vec.
    struct SharedRadio(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for SharedRadio {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn frames_reach_the_radio_in_publish_order_with_sequence_numbers() {
        let buffer = Arc::new(PacketBuffer::new());
        for stamp in [0u32, 31_000] {
            let mut slot = buffer.get_empty().unwrap();
            slot.start_packet(&CallSign::from("VA3TST").unwrap(), stamp);
            buffer.put_full(slot);
        }

        let running = Arc::new(AtomicBool::new(true));
        let stopper = {
            let running = Arc::clone(&running);
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                while buffer.queued().1 > 0 {
                    std::thread::sleep(Duration::from_millis(10));
                }
                std::thread::sleep(Duration::from_millis(50));
                running.store(false, Ordering::SeqCst);
            })
        };

        let bytes = Arc::new(parking_lot::Mutex::new(Vec::new()));
        Transmitter::new(Arc::clone(&buffer), SharedRadio(Arc::clone(&bytes))).run(running);
        stopper.join().unwrap();

        let sent = bytes.lock().clone();
        assert_eq!(sent.len(), 26);
        let (first, _) = parse_packet(&sent[..13]).unwrap();
        let (second, _) = parse_packet(&sent[13..]).unwrap();
        assert_eq!(first.timestamp, 0);
        assert_eq!(first.packet_num, 0);
        assert_eq!(second.timestamp, 1);
        assert_eq!(second.packet_num, 1);
    }
}
