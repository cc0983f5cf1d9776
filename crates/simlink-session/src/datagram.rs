//! Manual-control send and telemetry receive channels.
//!
//! The two channels are independent of each other and of the stream session:
//! they share no state with it and keep working while it reconnects.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use simlink_frame::{ManualControl, Telemetry};
use simlink_transport::{resolve_one, DatagramSocket};
use tracing::{debug, info, trace, warn};

use crate::config::DatagramConfig;
use crate::error::{Result, SessionError};
use crate::event::{EventSink, SessionEvent};

/// Fire-and-forget sender for manual-control datagrams.
#[derive(Debug)]
pub struct ControlSender {
    socket: DatagramSocket,
    dest: SocketAddr,
}

impl ControlSender {
    /// Resolve `dest` and bind an ephemeral local socket for it.
    pub fn open(dest: &str) -> Result<Self> {
        let dest = resolve_one(dest)?;
        let socket = DatagramSocket::unbound_for(dest)?;
        Ok(Self { socket, dest })
    }

    /// Send one 24-byte control record. There is no acknowledgement.
    pub fn send(&self, control: &ManualControl) -> Result<usize> {
        let sent = self.socket.send_to(&control.encode(), self.dest)?;
        debug!(
            dest = %self.dest,
            throttle = control.throttle,
            brake = control.brake,
            steer = control.steer,
            "manual control sent"
        );
        Ok(sent)
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }
}

/// Passes at most one report per interval and counts what it held back.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            suppressed: 0,
        }
    }

    /// `Some(suppressed)` if a report may go out at `now`, where `suppressed`
    /// is the number of reports dropped since the previous one.
    pub fn check(&mut self, now: Instant) -> Option<u64> {
        let due = self
            .last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}

/// Totals for a telemetry receiver's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryStats {
    /// Datagrams received.
    pub received: u64,
    /// Datagrams decoded into a record.
    pub decoded: u64,
    /// Datagrams too short for a record.
    pub malformed: u64,
    /// Receive failures other than the poll timeout.
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    decoded: AtomicU64,
    malformed: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TelemetryStats {
        TelemetryStats {
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Background telemetry listener.
///
/// Every datagram is decoded independently; a bad one is reported
/// (rate-limited) and the next one is processed as usual.
pub struct TelemetryReceiver {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryReceiver {
    /// Bind `config.telemetry_bind` and start receiving.
    pub fn spawn(config: &DatagramConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        let socket = DatagramSocket::bind(&config.telemetry_bind)?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        let local_addr = socket.local_addr();

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let worker = Worker {
            socket,
            sink,
            running: running.clone(),
            counters: counters.clone(),
            limiter: RateLimiter::new(config.report_interval),
            buf: vec![0u8; config.recv_buffer.max(1)],
            poll_interval: config.poll_interval,
        };
        let handle = thread::Builder::new()
            .name("simlink-telemetry".to_string())
            .spawn(move || worker.run())
            .map_err(|source| SessionError::Spawn {
                name: "simlink-telemetry".to_string(),
                source,
            })?;

        info!(addr = %local_addr, "telemetry receiver started");
        Ok(Self {
            local_addr,
            running,
            counters,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> TelemetryStats {
        self.counters.snapshot()
    }

    /// Stop the receive loop and wait for it. Returns at most one poll
    /// interval later.
    pub fn stop(&mut self) -> TelemetryStats {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("telemetry thread panicked");
            }
        }
        self.counters.snapshot()
    }
}

impl Drop for TelemetryReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    socket: DatagramSocket,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    limiter: RateLimiter,
    buf: Vec<u8>,
    poll_interval: Duration,
}

impl Worker {
    fn run(mut self) {
        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut self.buf) {
                Ok((size, from)) => self.handle(size, from),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    self.anomaly(None, err.to_string());
                    // Avoid spinning on a persistent socket error.
                    thread::sleep(self.poll_interval.min(Duration::from_millis(50)));
                }
            }
        }
        debug!(stats = ?self.counters.snapshot(), "telemetry receiver stopped");
    }

    fn handle(&mut self, size: usize, from: SocketAddr) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match Telemetry::decode(&self.buf[..size]) {
            Ok(telemetry) => {
                self.counters.decoded.fetch_add(1, Ordering::Relaxed);
                trace!(%from, size, id = %telemetry.id, "telemetry");
                self.sink.emit(SessionEvent::Telemetry {
                    from,
                    size,
                    telemetry,
                });
            }
            Err(err) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                self.anomaly(Some(from), err.to_string());
            }
        }
    }

    fn anomaly(&mut self, from: Option<SocketAddr>, error: String) {
        let Some(suppressed) = self.limiter.check(Instant::now()) else {
            return;
        };
        warn!(from = ?from, %error, suppressed, "telemetry anomaly");
        self.sink.emit(SessionEvent::TelemetryAnomaly {
            from,
            error,
            suppressed,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use simlink_frame::{Vec3, TELEMETRY_SIZE};

    use super::*;
    use crate::event::NullSink;

    fn loopback_config() -> DatagramConfig {
        DatagramConfig {
            telemetry_bind: "127.0.0.1:0".to_string(),
            poll_interval: Duration::from_millis(20),
            ..DatagramConfig::default()
        }
    }

    fn sample() -> Telemetry {
        Telemetry {
            seconds: 12,
            nanos: 500,
            id: "car1".to_string(),
            location: Vec3 {
                x: 1.0,
                y: 2.0,
                z: 0.5,
            },
            ..Telemetry::default()
        }
    }

    fn next_event(rx: &mpsc::Receiver<SessionEvent>) -> SessionEvent {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("event should arrive")
    }

    #[test]
    fn limiter_passes_first_then_counts_suppressed() {
        let mut limiter = RateLimiter::new(Duration::from_millis(200));
        let t0 = Instant::now();
        assert_eq!(limiter.check(t0), Some(0));
        assert_eq!(limiter.check(t0 + Duration::from_millis(50)), None);
        assert_eq!(limiter.check(t0 + Duration::from_millis(150)), None);
        assert_eq!(limiter.check(t0 + Duration::from_millis(200)), Some(2));
        assert_eq!(limiter.check(t0 + Duration::from_millis(450)), Some(0));
    }

    #[test]
    fn control_sender_emits_24_byte_record() {
        let receiver = DatagramSocket::bind("127.0.0.1:0").expect("bind");
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        let sender =
            ControlSender::open(&receiver.local_addr().to_string()).expect("sender should open");
        let control = ManualControl {
            throttle: 1.0,
            brake: 0.0,
            steer: -0.25,
        };
        assert_eq!(sender.send(&control).expect("send"), 24);

        let mut buf = [0u8; 64];
        let (size, _) = receiver.recv_from(&mut buf).expect("datagram");
        assert_eq!(size, 24);
        assert_eq!(ManualControl::decode(&buf[..size]).expect("decode"), control);
    }

    #[test]
    fn receives_and_decodes_telemetry() {
        let (tx, rx) = mpsc::channel();
        let mut receiver =
            TelemetryReceiver::spawn(&loopback_config(), Arc::new(tx)).expect("spawn");
        let sender = DatagramSocket::unbound_for(receiver.local_addr()).expect("sender");
        sender
            .send_to(&sample().encode(), receiver.local_addr())
            .expect("send");

        match next_event(&rx) {
            SessionEvent::Telemetry {
                size, telemetry, ..
            } => {
                assert_eq!(size, TELEMETRY_SIZE);
                assert_eq!(telemetry, sample());
            }
            other => panic!("unexpected event {other:?}"),
        }
        let stats = receiver.stop();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.decoded, 1);
    }

    #[test]
    fn short_datagram_is_reported_and_next_one_decoded() {
        let (tx, rx) = mpsc::channel();
        let mut receiver =
            TelemetryReceiver::spawn(&loopback_config(), Arc::new(tx)).expect("spawn");
        let dest = receiver.local_addr();
        let sender = DatagramSocket::unbound_for(dest).expect("sender");

        sender.send_to(&[0u8; 40], dest).expect("send short");
        match next_event(&rx) {
            SessionEvent::TelemetryAnomaly {
                from, suppressed, ..
            } => {
                assert_eq!(from.map(|a| a.port()), Some(sender.local_addr().port()));
                assert_eq!(suppressed, 0);
            }
            other => panic!("unexpected event {other:?}"),
        }

        sender.send_to(&sample().encode(), dest).expect("send full");
        assert!(matches!(next_event(&rx), SessionEvent::Telemetry { .. }));

        let stats = receiver.stop();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.decoded, 1);
    }

    #[test]
    fn anomaly_burst_is_rate_limited() {
        let (tx, rx) = mpsc::channel();
        let config = DatagramConfig {
            report_interval: Duration::from_secs(60),
            ..loopback_config()
        };
        let mut receiver = TelemetryReceiver::spawn(&config, Arc::new(tx)).expect("spawn");
        let dest = receiver.local_addr();
        let sender = DatagramSocket::unbound_for(dest).expect("sender");
        for _ in 0..5 {
            sender.send_to(&[1u8; 10], dest).expect("send");
        }
        sender.send_to(&sample().encode(), dest).expect("send full");

        // The valid record arrives last, so every short one was handled first.
        let events: Vec<_> = std::iter::from_fn(|| Some(next_event(&rx)))
            .take_while(|e| !matches!(e, SessionEvent::Telemetry { .. }))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(receiver.stop().malformed, 5);
    }

    #[test]
    fn stop_returns_promptly() {
        let mut receiver =
            TelemetryReceiver::spawn(&loopback_config(), Arc::new(NullSink)).expect("spawn");
        let started = Instant::now();
        let stats = receiver.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stats, TelemetryStats::default());
        // Second stop is a no-op.
        receiver.stop();
    }

    #[test]
    fn bind_conflict_is_an_error() {
        let (config, _first) = {
            let receiver =
                TelemetryReceiver::spawn(&loopback_config(), Arc::new(NullSink)).expect("spawn");
            let config = DatagramConfig {
                telemetry_bind: receiver.local_addr().to_string(),
                ..loopback_config()
            };
            (config, receiver)
        };
        assert!(TelemetryReceiver::spawn(&config, Arc::new(NullSink)).is_err());
    }
}
