use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use simlink_frame::ManualControl;
use simlink_session::{
    ControlSender, DatagramConfig, EventSink, RateLimiter, Session, SessionError, SessionEvent,
    TelemetryReceiver,
};
use tracing::{info, warn};

use crate::cmd::control::print_sent;
use crate::cmd::{install_ctrlc_handler, parse_duration, RunArgs};
use crate::exit::{session_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_event, OutputFormat};

const MENU: &str = "keys: 1=manual control  2=get status  3=fixed step  4=save data  q=quit";

/// A console command, one per input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    ManualControl,
    GetStatus,
    FixedStep,
    SaveData,
    Quit,
}

impl Key {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "1" => Some(Key::ManualControl),
            "2" => Some(Key::GetStatus),
            "3" => Some(Key::FixedStep),
            "4" => Some(Key::SaveData),
            "q" | "Q" => Some(Key::Quit),
            _ => None,
        }
    }
}

enum Input {
    Line(String),
    Eof,
    Failed(std::io::Error),
}

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let telemetry_interval = parse_duration(&args.telemetry_interval)?;
    let config = args.stream.session_config(args.pending_policy.into())?;
    let control = args.control.to_control();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (tx, rx) = mpsc::channel();
    let sink: Arc<dyn EventSink> = Arc::new(tx);
    let printer = spawn_printer(rx, format, telemetry_interval)?;

    let sender = ControlSender::open(&args.control_addr)
        .map_err(|err| session_error("control socket failed", err))?;
    let mut telemetry = if args.no_telemetry {
        None
    } else {
        let datagram = DatagramConfig {
            control_addr: args.control_addr.clone(),
            telemetry_bind: args.telemetry_bind.clone(),
            ..DatagramConfig::default()
        };
        Some(
            TelemetryReceiver::spawn(&datagram, sink.clone())
                .map_err(|err| session_error("telemetry bind failed", err))?,
        )
    };
    let mut session = Session::start(config, sink.clone())
        .map_err(|err| session_error("session start failed", err))?;
    drop(sink);

    let input = spawn_stdin_reader()?;
    eprintln!("{MENU}");

    let mut result = Ok(SUCCESS);
    while running.load(Ordering::SeqCst) {
        let line = match input.recv_timeout(Duration::from_millis(200)) {
            Ok(Input::Line(line)) => line,
            Ok(Input::Eof) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Input::Failed(err)) => {
                result = Err(CliError::new(FAILURE, format!("input failed: {err}")));
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
        };
        if line.trim().is_empty() {
            continue;
        }
        match Key::parse(&line) {
            Some(Key::Quit) => break,
            Some(key) => dispatch(key, &session, &sender, &control, args.step_count, format),
            None => {
                warn!(input = line.trim(), "unknown key");
                eprintln!("{MENU}");
            }
        }
    }

    session.shutdown();
    if let Some(receiver) = telemetry.as_mut() {
        let stats = receiver.stop();
        info!(
            received = stats.received,
            decoded = stats.decoded,
            malformed = stats.malformed,
            "telemetry stopped"
        );
    }
    // Dropping the last sink clones ends the printer.
    drop(telemetry);
    drop(session);
    if printer.join().is_err() {
        return Err(CliError::new(INTERNAL, "event printer panicked"));
    }
    result
}

fn dispatch(
    key: Key,
    session: &Session,
    sender: &ControlSender,
    control: &ManualControl,
    step_count: u32,
    format: OutputFormat,
) {
    let sent = match key {
        Key::ManualControl => {
            match sender.send(control) {
                Ok(size) => print_sent(sender, size, control, format),
                Err(err) => warn!(error = %err, "manual control send failed"),
            }
            return;
        }
        Key::GetStatus => session.get_status(),
        Key::FixedStep => session.fixed_step(step_count),
        Key::SaveData => session.save_data(),
        Key::Quit => return,
    };
    match sent {
        Ok(_) => {}
        Err(SessionError::NotConnected) => {
            warn!("not connected, request dropped");
        }
        Err(err) => warn!(error = %err, "request failed"),
    }
}

fn spawn_printer(
    rx: mpsc::Receiver<SessionEvent>,
    format: OutputFormat,
    telemetry_interval: Duration,
) -> CliResult<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("simlink-printer".to_string())
        .spawn(move || {
            let mut limiter = RateLimiter::new(telemetry_interval);
            for event in rx {
                if matches!(event, SessionEvent::Telemetry { .. })
                    && limiter.check(Instant::now()).is_none()
                {
                    continue;
                }
                print_event(&event, format);
                if matches!(event, SessionEvent::Connected { .. }) {
                    eprintln!("{MENU}");
                }
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("printer thread failed: {err}")))
}

/// Read stdin on its own thread so the console loop can observe Ctrl-C.
fn spawn_stdin_reader() -> CliResult<mpsc::Receiver<Input>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("simlink-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let input = match line {
                    Ok(line) => Input::Line(line),
                    Err(err) => {
                        let _ = tx.send(Input::Failed(err));
                        return;
                    }
                };
                if tx.send(input).is_err() {
                    return;
                }
            }
            let _ = tx.send(Input::Eof);
        })
        .map_err(|err| CliError::new(INTERNAL, format!("stdin thread failed: {err}")))?;
    Ok(rx)
}
