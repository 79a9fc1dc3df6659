//! Parallel sensor sampling.
//!
//! Each sensor sits on its own I2C bus and is owned by a dedicated reader
//! thread. A sample fans one request out to all three readers and collects the
//! replies against a deadline:
//!
//! ```text
//!              ┌─► bus-left  ──► AS5600 ─┐
//! sample(seq) ─┼─► bus-right ──► AS5600 ─┼─► (seq, value) ─► SensorSample
//!              └─► bus-gyro  ──► MPU6050 ┘
//! ```
//!
//! The timestamp is taken before any request goes out. A reader that fails,
//! or misses the deadline, invalidates the whole sample. Late replies carry an
//! old sequence number and are discarded on the next collection.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::error::{Error, Result};
use crate::hal::{AngleSensor, RateGyro};
use crate::time::Clock;

/// One consistent reading of all three sensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    /// Clock time captured before the reads were issued
    pub timestamp: f64,
    pub left_angle: u16,
    pub right_angle: u16,
    /// deg/s, counter-clockwise positive
    pub gyro_rate: f64,
}

/// Why a sample was rejected.
#[derive(Debug)]
pub struct SampleFault {
    pub sensor: &'static str,
    pub error: Error,
}

impl std::fmt::Display for SampleFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.sensor, self.error)
    }
}

/// A long-lived thread that performs one read per request.
struct BusReader<T> {
    name: &'static str,
    requests: Sender<u64>,
    replies: Receiver<(u64, Result<T>)>,
}

impl<T: Send + 'static> BusReader<T> {
    fn spawn<F>(name: &'static str, mut read: F) -> Result<Self>
    where
        F: FnMut() -> Result<T> + Send + 'static,
    {
        let (req_tx, req_rx) = bounded::<u64>(1);
        let (rep_tx, rep_rx) = bounded::<(u64, Result<T>)>(1);

        thread::Builder::new()
            .name(format!("bus-{}", name))
            .spawn(move || {
                // Exits when the sampler drops its request sender
                for seq in req_rx.iter() {
                    if rep_tx.send((seq, read())).is_err() {
                        break;
                    }
                }
                log::debug!("Bus reader {} stopped", name);
            })
            .map_err(|_| Error::ThreadSpawn("bus reader"))?;

        Ok(Self {
            name,
            requests: req_tx,
            replies: rep_rx,
        })
    }

    /// Queue a read. Fails if the reader is still stuck on an earlier one.
    fn request(&self, seq: u64) -> Result<()> {
        match self.requests.try_send(seq) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::Timeout),
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::Other(format!("{} reader thread exited", self.name)))
            }
        }
    }

    /// Wait for the reply to `seq`, dropping stale replies.
    fn collect(&self, seq: u64, deadline: Instant) -> Result<T> {
        loop {
            match self.replies.recv_deadline(deadline) {
                Ok((reply_seq, value)) if reply_seq == seq => return value,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Other(format!("{} reader thread exited", self.name)));
                }
            }
        }
    }
}

/// Takes time-aligned samples from both encoders and the gyro.
pub struct SensorSampler {
    clock: Arc<dyn Clock>,
    left: BusReader<u16>,
    right: BusReader<u16>,
    gyro: BusReader<f64>,
    timeout: Duration,
    seq: u64,
}

impl SensorSampler {
    /// Move each sensor onto its own reader thread.
    pub fn new(
        mut left: Box<dyn AngleSensor>,
        mut right: Box<dyn AngleSensor>,
        mut gyro: Box<dyn RateGyro>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            clock,
            left: BusReader::spawn("left", move || left.read_angle())?,
            right: BusReader::spawn("right", move || right.read_angle())?,
            gyro: BusReader::spawn("gyro", move || gyro.read_rate())?,
            timeout,
            seq: 0,
        })
    }

    /// Read all three sensors in parallel.
    pub fn sample(&mut self) -> std::result::Result<SensorSample, SampleFault> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let timestamp = self.clock.now();

        let sent = [
            self.left.request(seq),
            self.right.request(seq),
            self.gyro.request(seq),
        ];

        let deadline = Instant::now() + self.timeout;
        // Collect every reply that was requested, even after a failure, so
        // nothing from this round is left queued.
        let left = match &sent[0] {
            Ok(()) => self.left.collect(seq, deadline),
            Err(_) => Err(Error::Timeout),
        };
        let right = match &sent[1] {
            Ok(()) => self.right.collect(seq, deadline),
            Err(_) => Err(Error::Timeout),
        };
        let gyro = match &sent[2] {
            Ok(()) => self.gyro.collect(seq, deadline),
            Err(_) => Err(Error::Timeout),
        };

        let left_angle = left.map_err(|error| SampleFault {
            sensor: "left encoder",
            error,
        })?;
        let right_angle = right.map_err(|error| SampleFault {
            sensor: "right encoder",
            error,
        })?;
        let gyro_rate = gyro.map_err(|error| SampleFault {
            sensor: "gyro",
            error,
        })?;

        Ok(SensorSample {
            timestamp,
            left_angle,
            right_angle,
            gyro_rate,
        })
    }
}
