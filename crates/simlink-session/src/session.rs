use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use simlink_frame::{FixedStep, MsgType};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::event::{EventSink, SessionEvent};
use crate::pending::RequestIds;
use crate::supervisor::{self, LinkState, Shared};

/// Counters describing a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Connection epochs established so far.
    pub epochs: u64,
    /// Receiver loops currently running. Never more than one.
    pub active_receivers: usize,
    /// Requests awaiting a response.
    pub pending: usize,
    pub connect_attempts: u64,
}

/// A supervised stream connection to the simulator.
///
/// Starting a session spawns the supervisor, which connects, runs one receiver
/// per epoch and reconnects after every loss until [`Session::shutdown`].
///
/// # Example
///
/// ```no_run
/// use std::sync::{mpsc, Arc};
/// use std::time::Duration;
/// use simlink_session::{Session, SessionConfig, SessionEvent};
///
/// let (tx, rx) = mpsc::channel::<SessionEvent>();
/// let session = Session::start(SessionConfig::default(), Arc::new(tx))?;
/// if session.wait_connected(Duration::from_secs(10)) {
///     session.fixed_step(1)?;
/// }
/// for event in rx.iter().take(4) {
///     println!("{event:?}");
/// }
/// # Ok::<(), simlink_session::SessionError>(())
/// ```
pub struct Session {
    shared: Arc<Shared>,
    ids: RequestIds,
    supervisor: Option<JoinHandle<()>>,
}

impl Session {
    /// Spawn the supervisor and return immediately. The first connect attempt
    /// happens in the background.
    pub fn start(config: SessionConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        let shared = Shared::new(config, sink);
        let supervisor = supervisor::spawn(shared.clone())?;
        Ok(Self {
            shared,
            ids: RequestIds::new(),
            supervisor: Some(supervisor),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Advance the simulation by `step_count` fixed steps.
    pub fn fixed_step(&self, step_count: u32) -> Result<u32> {
        self.send_request(MsgType::FixedStep, &FixedStep { step_count }.encode())
    }

    /// Query the fixed-step status. The request carries no payload.
    pub fn get_status(&self) -> Result<u32> {
        self.send_request(MsgType::GetStatus, &[])
    }

    /// Ask the backend to persist its data. The request carries no payload.
    pub fn save_data(&self) -> Result<u32> {
        self.send_request(MsgType::SaveData, &[])
    }

    /// Send a REQUEST frame on the live epoch and return its request id.
    ///
    /// The id is registered as pending before the frame is written, so a
    /// response can never arrive ahead of its entry. A failed write forgets
    /// the entry and ends the epoch.
    pub fn send_request(&self, msg_type: MsgType, payload: &[u8]) -> Result<u32> {
        if !self.shared.is_running() {
            return Err(SessionError::ShuttingDown);
        }

        let mut slot = self.shared.writer();
        let Some(live) = slot.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        let epoch = live.epoch;
        let request_id = self.ids.next_id();

        if !self.shared.pending.register(request_id, Instant::now()) {
            warn!(request_id, "request id still pending, replacing entry");
        }
        if let Err(err) = live.writer.send_request(msg_type, request_id, payload) {
            drop(slot);
            self.shared.pending.forget(request_id);
            warn!(epoch, request_id, %msg_type, error = %err, "request write failed");
            self.shared.invalidate(epoch);
            return Err(err.into());
        }
        drop(slot);

        debug!(epoch, request_id, %msg_type, size = payload.len(), "request sent");
        self.shared.sink.emit(SessionEvent::RequestSent {
            epoch,
            request_id,
            msg_type,
        });
        Ok(request_id)
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Block until an epoch is live. Returns `false` on timeout or shutdown.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        self.shared.wait_connected(timeout)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            epochs: self.shared.epochs(),
            active_receivers: self.shared.active_receivers(),
            pending: self.shared.pending.len(),
            connect_attempts: self.shared.connect_attempts(),
        }
    }

    /// Stop the supervisor, close the stream and join every session thread.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.stop();
        if let Some(handle) = self.supervisor.take() {
            if handle.join().is_err() {
                warn!("supervisor thread panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("stream_addr", &self.shared.config.stream_addr)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}
