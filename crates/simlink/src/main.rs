mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "simlink", version, about = "Simulated vehicle control client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::PendingArg;

    #[test]
    fn parses_step_subcommand() {
        let cli = Cli::try_parse_from([
            "simlink",
            "step",
            "--count",
            "10",
            "--stream-addr",
            "127.0.0.1:19093",
            "--timeout",
            "2s",
        ])
        .expect("step args should parse");

        let Command::Step(args) = cli.command else {
            panic!("expected step");
        };
        assert_eq!(args.count, 10);
        assert_eq!(args.request.stream.stream_addr, "127.0.0.1:19093");
        assert_eq!(args.request.timeout, "2s");
    }

    #[test]
    fn parses_run_defaults() {
        let cli = Cli::try_parse_from(["simlink", "run"]).expect("run args should parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.control.throttle, 1.0);
        assert_eq!(args.control.brake, 0.0);
        assert_eq!(args.step_count, 1);
        assert_eq!(args.pending_policy, PendingArg::Expire);
        assert!(!args.no_telemetry);
    }

    #[test]
    fn control_accepts_negative_steer() {
        let cli = Cli::try_parse_from(["simlink", "control", "--steer", "-0.5", "--throttle", "0"])
            .expect("control args should parse");
        let Command::Control(args) = cli.command else {
            panic!("expected control");
        };
        assert_eq!(args.control.steer, -0.5);
        assert_eq!(args.control.throttle, 0.0);
    }

    #[test]
    fn rejects_unknown_pending_policy() {
        let err = Cli::try_parse_from(["simlink", "run", "--pending-policy", "keep"])
            .expect_err("unknown policy should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn global_format_after_subcommand() {
        let cli = Cli::try_parse_from(["simlink", "status", "--format", "json"])
            .expect("status args should parse");
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert!(matches!(cli.command, Command::Status(_)));
    }
}
