use std::net::SocketAddr;
use std::sync::mpsc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use simlink_frame::{Header, MsgType, PayloadError, ResultCode, StatusReply, Telemetry};

/// Something the session observed. Every anomaly is surfaced here as well as
/// in the log; none of them stop the session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A connect attempt is starting.
    Connecting { attempt: u64, addr: String },
    /// A new epoch is up and its receiver loop is running.
    Connected { epoch: u64, addr: String },
    /// A connect attempt failed; the next one follows after `retry_in`.
    ConnectFailed {
        attempt: u64,
        addr: String,
        error: String,
        #[serde(serialize_with = "millis")]
        retry_in: Duration,
    },
    /// The epoch ended and its socket has been closed.
    Disconnected { epoch: u64, reason: String },
    /// A request frame was written to the stream.
    RequestSent {
        epoch: u64,
        request_id: u32,
        msg_type: MsgType,
    },
    /// A frame arrived on the stream.
    Response(ResponseReport),
    /// An unanswered request from a previous epoch was dropped.
    PendingExpired {
        request_id: u32,
        #[serde(serialize_with = "millis")]
        age: Duration,
    },
    /// A telemetry datagram decoded cleanly.
    Telemetry {
        from: SocketAddr,
        size: usize,
        telemetry: Telemetry,
    },
    /// A telemetry datagram was malformed or the receive failed.
    TelemetryAnomaly {
        from: Option<SocketAddr>,
        error: String,
        /// Reports dropped by the rate limiter since the previous one.
        suppressed: u64,
    },
}

/// One received stream frame after dispatch and correlation.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseReport {
    pub epoch: u64,
    pub header: Header,
    pub body: ResponseBody,
    /// Round-trip time when the request id matched a pending entry.
    #[serde(serialize_with = "opt_millis")]
    pub rtt: Option<Duration>,
}

impl ResponseReport {
    pub fn request_id(&self) -> u32 {
        self.header.request_id
    }

    pub fn matched(&self) -> bool {
        self.rtt.is_some()
    }
}

/// Decoded payload of a received frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseBody {
    /// SAVE_DATA or FIXED_STEP response.
    Result(ResultCode),
    /// GET_STATUS response.
    Status(StatusReply),
    /// The payload did not have the expected shape.
    Malformed(PayloadError),
    /// A frame the client never expects, e.g. a REQUEST from the peer.
    Unexpected,
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

fn opt_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => millis(d, s),
        None => s.serialize_none(),
    }
}

/// Destination for session events.
///
/// Called from the supervisor, receiver and telemetry threads; implementations
/// must not block for long.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: SessionEvent);
}

impl EventSink for mpsc::Sender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.send(event);
    }
}

impl EventSink for mpsc::SyncSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::TrySendError::Full(event)) = self.try_send(event) {
            tracing::debug!(?event, "event channel full, dropping event");
        }
    }
}

/// Adapts a closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    fn emit(&self, event: SessionEvent) {
        (self.0)(event)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SessionEvent) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use simlink_frame::MsgClass;

    use super::*;

    #[test]
    fn response_serializes_rtt_in_millis() {
        let report = ResponseReport {
            epoch: 1,
            header: Header::response(MsgType::SaveData, 8, 4),
            body: ResponseBody::Result(ResultCode {
                result_code: 0,
                detail_code: 0,
            }),
            rtt: Some(Duration::from_micros(1500)),
        };
        let json = serde_json::to_value(SessionEvent::Response(report)).unwrap();
        assert_eq!(json["event"], "response");
        assert_eq!(json["rtt"], 1.5);
        assert_eq!(json["header"]["msg_type"], "SAVE_DATA");
        assert_eq!(json["header"]["msg_class"], "RESPONSE");
        assert_eq!(json["body"]["kind"], "result");
    }

    #[test]
    fn unmatched_response_serializes_null_rtt() {
        let report = ResponseReport {
            epoch: 2,
            header: Header {
                msg_class: MsgClass::Request,
                ..Header::response(MsgType::GetStatus, 0, 9)
            },
            body: ResponseBody::Unexpected,
            rtt: None,
        };
        assert!(!report.matched());
        let json = serde_json::to_value(SessionEvent::Response(report)).unwrap();
        assert!(json["rtt"].is_null());
        assert_eq!(json["body"]["kind"], "unexpected");
    }

    #[test]
    fn fn_sink_forwards_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sink = FnSink(move |_event: SessionEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        sink.emit(SessionEvent::Disconnected {
            epoch: 1,
            reason: "test".to_string(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sender_sink_ignores_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        tx.emit(SessionEvent::Connecting {
            attempt: 1,
            addr: "127.0.0.1:1".to_string(),
        });
    }
}
