use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use simlink_session::{RateLimiter, SessionEvent, TelemetryReceiver};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, TelemetryArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat};

pub fn run(args: TelemetryArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (tx, rx) = mpsc::channel();
    let mut receiver = TelemetryReceiver::spawn(&args.datagram_config(), Arc::new(tx))
        .map_err(|err| session_error("telemetry bind failed", err))?;

    let mut limiter = RateLimiter::new(interval);
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if matches!(event, SessionEvent::Telemetry { .. }) && limiter.check(Instant::now()).is_none()
        {
            continue;
        }
        print_event(&event, format);
        if matches!(event, SessionEvent::Telemetry { .. }) {
            printed += 1;
            if args.count.is_some_and(|count| printed >= count) {
                break;
            }
        }
    }

    let stats = receiver.stop();
    info!(
        received = stats.received,
        decoded = stats.decoded,
        malformed = stats.malformed,
        errors = stats.errors,
        printed,
        "telemetry finished"
    );
    Ok(SUCCESS)
}
