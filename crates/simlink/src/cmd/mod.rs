use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use simlink_session::{
    DatagramConfig, PendingPolicy, SessionConfig, DEFAULT_CONTROL_ADDR, DEFAULT_STREAM_ADDR,
    DEFAULT_TELEMETRY_BIND,
};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod control;
pub mod mock;
pub mod request;
pub mod run;
pub mod telemetry;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive console: keys 1-4 issue operations, q quits.
    Run(RunArgs),
    /// Advance the simulation by fixed steps and print the response.
    Step(StepArgs),
    /// Query the fixed-step status and print the response.
    Status(RequestArgs),
    /// Ask the backend to save its data and print the response.
    Save(RequestArgs),
    /// Send one manual-control datagram.
    Control(ControlArgs),
    /// Receive and print telemetry datagrams.
    Telemetry(TelemetryArgs),
    /// Run a backend emulator that answers stream requests.
    Mock(MockArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Step(args) => request::run(
            request::Operation::Step(args.count),
            &args.request,
            format,
        ),
        Command::Status(args) => request::run(request::Operation::Status, &args, format),
        Command::Save(args) => request::run(request::Operation::Save, &args, format),
        Command::Control(args) => control::run(args, format),
        Command::Telemetry(args) => telemetry::run(args, format),
        Command::Mock(args) => mock::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Stream endpoint and reconnect settings.
#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// Backend stream endpoint (host:port).
    #[arg(long, env = "SIMLINK_STREAM_ADDR", default_value = DEFAULT_STREAM_ADDR)]
    pub stream_addr: String,
    /// Wait between connect attempts (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub reconnect_interval: String,
    /// Per-attempt connect timeout. Default: OS default.
    #[arg(long)]
    pub connect_timeout: Option<String>,
}

impl StreamArgs {
    pub fn session_config(&self, pending_policy: PendingPolicy) -> CliResult<SessionConfig> {
        Ok(SessionConfig {
            stream_addr: self.stream_addr.clone(),
            reconnect_interval: parse_duration(&self.reconnect_interval)?,
            connect_timeout: self
                .connect_timeout
                .as_deref()
                .map(parse_duration)
                .transpose()?,
            pending_policy,
            ..SessionConfig::default()
        })
    }
}

/// How unanswered requests are treated on reconnect.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PendingArg {
    /// Report leftovers as expired when a new connection starts.
    Expire,
    /// Keep leftovers across the reconnect.
    Carry,
}

impl From<PendingArg> for PendingPolicy {
    fn from(arg: PendingArg) -> Self {
        match arg {
            PendingArg::Expire => PendingPolicy::Expire,
            PendingArg::Carry => PendingPolicy::Carry,
        }
    }
}

/// Manual-control input values.
#[derive(Args, Debug, Clone)]
pub struct ControlValues {
    /// Throttle, 0.0 to 1.0.
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    pub throttle: f64,
    /// Brake, 0.0 to 1.0.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub brake: f64,
    /// Steering, -1.0 (left) to 1.0 (right).
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub steer: f64,
}

impl ControlValues {
    pub fn to_control(&self) -> simlink_frame::ManualControl {
        simlink_frame::ManualControl {
            throttle: self.throttle,
            brake: self.brake,
            steer: self.steer,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub stream: StreamArgs,
    #[command(flatten)]
    pub control: ControlValues,
    /// Manual-control destination (host:port).
    #[arg(long, env = "SIMLINK_CONTROL_ADDR", default_value = DEFAULT_CONTROL_ADDR)]
    pub control_addr: String,
    /// Local telemetry endpoint to bind.
    #[arg(long, env = "SIMLINK_TELEMETRY_BIND", default_value = DEFAULT_TELEMETRY_BIND)]
    pub telemetry_bind: String,
    /// Steps per FIXED_STEP request.
    #[arg(long, default_value_t = 1)]
    pub step_count: u32,
    /// Unanswered-request handling on reconnect.
    #[arg(long, value_enum, default_value = "expire")]
    pub pending_policy: PendingArg,
    /// Minimum spacing between printed telemetry records.
    #[arg(long, default_value = "200ms")]
    pub telemetry_interval: String,
    /// Do not start the telemetry receiver.
    #[arg(long)]
    pub no_telemetry: bool,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    #[command(flatten)]
    pub stream: StreamArgs,
    /// Maximum time to wait for the connection and the response.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct StepArgs {
    #[command(flatten)]
    pub request: RequestArgs,
    /// Number of fixed steps to advance.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub count: u32,
}

#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Manual-control destination (host:port).
    #[arg(long, env = "SIMLINK_CONTROL_ADDR", default_value = DEFAULT_CONTROL_ADDR)]
    pub control_addr: String,
    #[command(flatten)]
    pub control: ControlValues,
}

#[derive(Args, Debug)]
pub struct TelemetryArgs {
    /// Local telemetry endpoint to bind.
    #[arg(long, env = "SIMLINK_TELEMETRY_BIND", default_value = DEFAULT_TELEMETRY_BIND)]
    pub telemetry_bind: String,
    /// Exit after printing N records.
    #[arg(long)]
    pub count: Option<usize>,
    /// Minimum spacing between printed records.
    #[arg(long, default_value = "200ms")]
    pub interval: String,
}

impl TelemetryArgs {
    pub fn datagram_config(&self) -> DatagramConfig {
        DatagramConfig {
            telemetry_bind: self.telemetry_bind.clone(),
            ..DatagramConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct MockArgs {
    /// Stream endpoint to listen on. Port 0 picks a free port.
    #[arg(long, default_value = DEFAULT_STREAM_ADDR)]
    pub listen: String,
    /// Simulated seconds per fixed step.
    #[arg(long, default_value_t = 0.05)]
    pub fixed_delta: f32,
    /// Close each connection after this many responses.
    #[arg(long)]
    pub drop_after: Option<u32>,
    /// Exit after serving this many connections.
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Stream telemetry datagrams to this address (host:port).
    #[arg(long)]
    pub telemetry_target: Option<String>,
    /// Spacing between telemetry datagrams.
    #[arg(long, default_value = "50ms")]
    pub telemetry_rate: String,
    /// Vehicle id carried in telemetry.
    #[arg(long, default_value = "car1")]
    pub vehicle_id: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

/// Clear `running` on Ctrl-C.
pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn stream_args_build_session_config() {
        let args = StreamArgs {
            stream_addr: "10.0.0.2:9093".to_string(),
            reconnect_interval: "250ms".to_string(),
            connect_timeout: Some("2s".to_string()),
        };
        let config = args
            .session_config(PendingPolicy::Carry)
            .expect("config should build");
        assert_eq!(config.stream_addr, "10.0.0.2:9093");
        assert_eq!(config.reconnect_interval, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.pending_policy, PendingPolicy::Carry);
    }
}
