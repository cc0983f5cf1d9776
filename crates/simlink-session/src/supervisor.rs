use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde::Serialize;
use simlink_frame::{FrameReader, FrameWriter};
use simlink_transport::LinkStream;
use tracing::{debug, info, warn};

use crate::config::{PendingPolicy, SessionConfig};
use crate::error::{Result, SessionError};
use crate::event::{EventSink, SessionEvent};
use crate::pending::PendingTable;
use crate::receiver::{EpochEnd, Receiver};

/// Connection state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    /// First connect attempt in progress.
    Connecting,
    /// An epoch is live and requests can be sent.
    Connected,
    /// Waiting for or attempting a connection after a loss.
    Reconnecting,
    Stopped,
}

/// The writing half of the live epoch.
pub(crate) struct EpochWriter {
    pub epoch: u64,
    pub writer: FrameWriter<LinkStream>,
}

/// State shared between the session handle and the supervisor thread.
pub(crate) struct Shared {
    pub config: SessionConfig,
    pub pending: Arc<PendingTable>,
    pub sink: Arc<dyn EventSink>,
    pub running: Arc<AtomicBool>,
    state: Mutex<LinkState>,
    state_changed: Condvar,
    writer: Mutex<Option<EpochWriter>>,
    // Clone of the live socket; shutting it down unblocks the receiver.
    closer: Mutex<Option<(u64, LinkStream)>>,
    active_receivers: Arc<AtomicUsize>,
    epochs: AtomicU64,
    connect_attempts: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decrements the live receiver count when the receiver thread exits.
struct ActiveReceiver(Arc<AtomicUsize>);

impl ActiveReceiver {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count.clone())
    }
}

impl Drop for ActiveReceiver {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Shared {
    pub fn new(config: SessionConfig, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            config,
            pending: Arc::new(PendingTable::new()),
            sink,
            running: Arc::new(AtomicBool::new(true)),
            state: Mutex::new(LinkState::Disconnected),
            state_changed: Condvar::new(),
            writer: Mutex::new(None),
            closer: Mutex::new(None),
            active_receivers: Arc::new(AtomicUsize::new(0)),
            epochs: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LinkState {
        *lock(&self.state)
    }

    fn set_state(&self, state: LinkState) {
        let mut current = lock(&self.state);
        // Stopped is terminal.
        if *current != LinkState::Stopped {
            *current = state;
        }
        self.state_changed.notify_all();
    }

    pub fn epochs(&self) -> u64 {
        self.epochs.load(Ordering::SeqCst)
    }

    pub fn active_receivers(&self) -> usize {
        self.active_receivers.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn writer(&self) -> MutexGuard<'_, Option<EpochWriter>> {
        lock(&self.writer)
    }

    /// Block until an epoch is live, the session stops, or `timeout` passes.
    pub fn wait_connected(&self, timeout: std::time::Duration) -> bool {
        let guard = lock(&self.state);
        let (state, _) = self
            .state_changed
            .wait_timeout_while(guard, timeout, |state| {
                *state != LinkState::Connected && *state != LinkState::Stopped
            })
            .unwrap_or_else(PoisonError::into_inner);
        *state == LinkState::Connected
    }

    /// End `epoch` if it is still the live one.
    ///
    /// Used after a failed write. The socket is shut down first so the
    /// receiver loop returns, then the writer is withdrawn.
    pub fn invalidate(&self, epoch: u64) {
        if let Some((live, stream)) = lock(&self.closer).as_ref() {
            if *live == epoch {
                debug!(epoch, "invalidating epoch");
                stream.shutdown();
            }
        }
        let mut writer = self.writer();
        if writer.as_ref().is_some_and(|w| w.epoch == epoch) {
            writer.take();
        }
    }

    /// Stop the supervisor: clear the running flag, close the live socket and
    /// wake any backoff wait.
    ///
    /// The socket goes down before the writer lock is taken. A request blocked
    /// in a write holds that lock until the shutdown fails the write.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some((_, stream)) = lock(&self.closer).as_ref() {
            stream.shutdown();
        }
        self.writer().take();
        self.set_state(LinkState::Stopped);
    }

    /// Interruptible wait between connect attempts. Returns whether the
    /// session is still running.
    fn backoff(&self) -> bool {
        let guard = lock(&self.state);
        let _unused = self
            .state_changed
            .wait_timeout_while(guard, self.config.reconnect_interval, |_| self.is_running())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_running()
    }

    fn connect(&self) -> simlink_transport::Result<LinkStream> {
        match self.config.connect_timeout {
            Some(timeout) => simlink_transport::connect_timeout(&self.config.stream_addr, timeout),
            None => simlink_transport::connect(&self.config.stream_addr),
        }
    }

    fn apply_pending_policy(&self, epoch: u64) {
        match self.config.pending_policy {
            PendingPolicy::Expire => {
                let expired = self.pending.drain(Instant::now());
                if !expired.is_empty() {
                    warn!(epoch, count = expired.len(), "expiring unanswered requests");
                }
                for (request_id, age) in expired {
                    self.sink
                        .emit(SessionEvent::PendingExpired { request_id, age });
                }
            }
            PendingPolicy::Carry => {
                let carried = self.pending.len();
                if carried > 0 {
                    debug!(epoch, carried, "carrying unanswered requests into new epoch");
                }
            }
        }
    }

    /// Run one connection epoch to completion.
    fn run_epoch(&self, epoch: u64, stream: LinkStream) -> Result<EpochEnd> {
        let frame_config = self.config.frame_config();
        let addr = stream
            .peer_addr()
            .map_or_else(|| self.config.stream_addr.clone(), |a| a.to_string());
        let closer = stream.try_clone()?;
        let reader = FrameReader::with_config_link(stream.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::with_config_link(stream, frame_config)?;

        if epoch > 1 {
            self.apply_pending_policy(epoch);
        }

        *lock(&self.closer) = Some((epoch, closer));

        let receiver = Receiver::new(
            epoch,
            reader,
            self.pending.clone(),
            self.sink.clone(),
            self.running.clone(),
        );
        let active = ActiveReceiver::enter(&self.active_receivers);
        let handle = thread::Builder::new()
            .name(format!("simlink-rx-{epoch}"))
            .spawn(move || {
                let _active = active;
                receiver.run()
            });
        let handle = match handle {
            Ok(handle) => handle,
            Err(source) => {
                self.teardown(epoch);
                return Err(SessionError::Spawn {
                    name: format!("simlink-rx-{epoch}"),
                    source,
                });
            }
        };

        *self.writer() = Some(EpochWriter { epoch, writer });
        self.set_state(LinkState::Connected);
        info!(epoch, %addr, "connected");
        self.sink.emit(SessionEvent::Connected { epoch, addr });

        let end = handle
            .join()
            .unwrap_or_else(|_| EpochEnd::Io("receiver thread panicked".to_string()));
        self.teardown(epoch);
        Ok(end)
    }

    fn teardown(&self, epoch: u64) {
        if let Some((_, stream)) = lock(&self.closer).take() {
            stream.shutdown();
        }
        let mut writer = self.writer();
        if writer.as_ref().is_some_and(|w| w.epoch == epoch) {
            writer.take();
        }
    }
}

/// Start the supervisor thread.
pub(crate) fn spawn(shared: Arc<Shared>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("simlink-supervisor".to_string())
        .spawn(move || run(&shared))
        .map_err(|source| SessionError::Spawn {
            name: "simlink-supervisor".to_string(),
            source,
        })
}

fn run(shared: &Shared) {
    let addr = shared.config.stream_addr.clone();
    let mut attempt = 0u64;

    while shared.is_running() {
        attempt += 1;
        shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        shared.set_state(if shared.epochs() == 0 {
            LinkState::Connecting
        } else {
            LinkState::Reconnecting
        });
        debug!(attempt, %addr, "connecting");
        shared.sink.emit(SessionEvent::Connecting {
            attempt,
            addr: addr.clone(),
        });

        match shared.connect() {
            Ok(stream) => {
                attempt = 0;
                let epoch = shared.epochs.fetch_add(1, Ordering::SeqCst) + 1;
                let reason = match shared.run_epoch(epoch, stream) {
                    Ok(end) => end.to_string(),
                    Err(err) => {
                        warn!(epoch, error = %err, "epoch setup failed");
                        err.to_string()
                    }
                };
                if shared.is_running() {
                    shared.set_state(LinkState::Reconnecting);
                    warn!(epoch, %reason, "disconnected");
                } else {
                    info!(epoch, %reason, "disconnected");
                }
                shared
                    .sink
                    .emit(SessionEvent::Disconnected { epoch, reason });
            }
            Err(err) => {
                if !shared.is_running() {
                    break;
                }
                let retry_in = shared.config.reconnect_interval;
                warn!(attempt, %addr, error = %err, ?retry_in, "connect failed");
                shared.sink.emit(SessionEvent::ConnectFailed {
                    attempt,
                    addr: addr.clone(),
                    error: err.to_string(),
                    retry_in,
                });
            }
        }

        if !shared.backoff() {
            break;
        }
    }

    shared.set_state(LinkState::Stopped);
    debug!("supervisor stopped");
}
