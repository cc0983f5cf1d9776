use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use simlink_session::{
    PendingPolicy, ResponseBody, ResponseReport, Session, SessionError, SessionEvent,
};
use tracing::debug;

use crate::cmd::{parse_duration, RequestArgs};
use crate::exit::{session_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_event, OutputFormat};

/// A one-shot stream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Step(u32),
    Status,
    Save,
}

impl Operation {
    fn send(self, session: &Session) -> Result<u32, SessionError> {
        match self {
            Operation::Step(count) => session.fixed_step(count),
            Operation::Status => session.get_status(),
            Operation::Save => session.save_data(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Operation::Step(_) => "step",
            Operation::Status => "status",
            Operation::Save => "save",
        }
    }
}

pub fn run(op: Operation, args: &RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = args.stream.session_config(PendingPolicy::Expire)?;
    let addr = config.stream_addr.clone();

    let (tx, rx) = mpsc::channel();
    let mut session = Session::start(config, Arc::new(tx))
        .map_err(|err| session_error("session start failed", err))?;
    let deadline = Instant::now() + timeout;

    if !session.wait_connected(timeout) {
        session.shutdown();
        return Err(CliError::new(
            TIMEOUT,
            format!("no connection to {addr} within {timeout:?}"),
        ));
    }

    let request_id = op
        .send(&session)
        .map_err(|err| session_error(&format!("{} failed", op.name()), err))?;
    debug!(request_id, op = op.name(), "waiting for response");

    let outcome = wait_for_response(&rx, request_id, deadline);
    session.shutdown();

    let report = outcome.ok_or_else(|| {
        CliError::new(
            TIMEOUT,
            format!("no response to {} (id {request_id}) within {timeout:?}", op.name()),
        )
    })?;
    print_event(&SessionEvent::Response(report.clone()), format);
    Ok(exit_code(&report))
}

fn wait_for_response(
    rx: &mpsc::Receiver<SessionEvent>,
    request_id: u32,
    deadline: Instant,
) -> Option<ResponseReport> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining == Duration::ZERO {
            return None;
        }
        match rx.recv_timeout(remaining) {
            Ok(SessionEvent::Response(report)) if report.request_id() == request_id => {
                return Some(report)
            }
            Ok(other) => debug!(event = ?other, "ignoring event"),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
        }
    }
}

fn exit_code(report: &ResponseReport) -> i32 {
    let result_code = match &report.body {
        ResponseBody::Result(result) => result.result_code,
        ResponseBody::Status(reply) => reply.result.result_code,
        ResponseBody::Malformed(_) => return DATA_INVALID,
        ResponseBody::Unexpected => return FAILURE,
    };
    if result_code == 0 {
        SUCCESS
    } else {
        FAILURE
    }
}
