use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use simlink_frame::{Frame, FrameError, FrameReader, MsgClass, MsgType, ResultCode, StatusReply};
use tracing::{debug, info, warn};

use crate::event::{EventSink, ResponseBody, ResponseReport, SessionEvent};
use crate::pending::PendingTable;

/// Why a receiver loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochEnd {
    /// The peer closed the stream (possibly mid-frame).
    PeerClosed,
    /// The stream failed with an I/O error.
    Io(String),
    /// The session is stopping.
    Stopped,
}

impl std::fmt::Display for EpochEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpochEnd::PeerClosed => f.write_str("connection closed by peer"),
            EpochEnd::Io(err) => write!(f, "stream error: {err}"),
            EpochEnd::Stopped => f.write_str("session stopped"),
        }
    }
}

/// Reads frames for one connection epoch and dispatches them.
///
/// Framing anomalies are absorbed by the reader; payload anomalies are
/// reported per frame. The loop only ends when the stream does or when the
/// running flag is cleared.
pub struct Receiver<R> {
    epoch: u64,
    reader: FrameReader<R>,
    pending: Arc<PendingTable>,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
}

impl<R: Read> Receiver<R> {
    pub fn new(
        epoch: u64,
        reader: FrameReader<R>,
        pending: Arc<PendingTable>,
        sink: Arc<dyn EventSink>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            epoch,
            reader,
            pending,
            sink,
            running,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Run until the stream ends or the session stops.
    pub fn run(mut self) -> EpochEnd {
        debug!(epoch = self.epoch, "receiver started");
        let end = loop {
            if !self.running.load(Ordering::SeqCst) {
                break EpochEnd::Stopped;
            }
            match self.reader.read_frame() {
                Ok(frame) => self.dispatch(frame),
                Err(err) if err.is_timeout() => continue,
                Err(_) if !self.running.load(Ordering::SeqCst) => break EpochEnd::Stopped,
                Err(FrameError::PeerClosed) => break EpochEnd::PeerClosed,
                Err(err) => break EpochEnd::Io(err.to_string()),
            }
        };
        let stats = self.reader.stats();
        debug!(
            epoch = self.epoch,
            frames = stats.frames,
            rejected_headers = stats.rejected_headers,
            discarded_bytes = stats.discarded_bytes,
            %end,
            "receiver finished"
        );
        end
    }

    fn dispatch(&self, frame: Frame) {
        let received_at = Instant::now();
        let header = frame.header;
        let body = classify(&frame);

        match &body {
            ResponseBody::Malformed(err) => warn!(
                epoch = self.epoch,
                request_id = header.request_id,
                msg_type = %header.msg_type,
                error = %err,
                "malformed payload"
            ),
            ResponseBody::Unexpected => warn!(
                epoch = self.epoch,
                request_id = header.request_id,
                msg_type = %header.msg_type,
                "unexpected {:?} frame from peer",
                header.msg_class
            ),
            _ => {}
        }

        let rtt = self.pending.resolve(header.request_id, received_at);
        match rtt {
            Some(rtt) => info!(
                epoch = self.epoch,
                request_id = header.request_id,
                msg_type = %header.msg_type,
                rtt_ms = rtt.as_secs_f64() * 1000.0,
                "response"
            ),
            None => debug!(
                epoch = self.epoch,
                request_id = header.request_id,
                msg_type = %header.msg_type,
                "frame without pending request"
            ),
        }

        self.sink.emit(SessionEvent::Response(ResponseReport {
            epoch: self.epoch,
            header,
            body,
            rtt,
        }));
    }
}

/// Decode the payload implied by the frame's class and type.
pub(crate) fn classify(frame: &Frame) -> ResponseBody {
    let payload = frame.payload.as_ref();
    let decoded = match (frame.header.msg_class, frame.header.msg_type) {
        (MsgClass::Response, MsgType::SaveData | MsgType::FixedStep) => {
            ResultCode::decode(payload).map(ResponseBody::Result)
        }
        (MsgClass::Response, MsgType::GetStatus) => {
            StatusReply::decode(payload).map(ResponseBody::Status)
        }
        (MsgClass::Request, _) => Ok(ResponseBody::Unexpected),
    };
    decoded.unwrap_or_else(ResponseBody::Malformed)
}
