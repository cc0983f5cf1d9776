use serde::Serialize;
use simlink_frame::ManualControl;
use simlink_session::ControlSender;

use crate::cmd::ControlArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Debug, Serialize)]
struct ControlSent {
    dest: String,
    size: usize,
    throttle: f64,
    brake: f64,
    steer: f64,
}

impl ControlSent {
    fn new(dest: String, size: usize, control: &ManualControl) -> Self {
        Self {
            dest,
            size,
            throttle: control.throttle,
            brake: control.brake,
            steer: control.steer,
        }
    }

    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dest", self.dest.clone()),
            ("size", self.size.to_string()),
            ("throttle", self.throttle.to_string()),
            ("brake", self.brake.to_string()),
            ("steer", self.steer.to_string()),
        ]
    }
}

/// Report a manual-control datagram that left the socket.
pub(crate) fn print_sent(
    sender: &ControlSender,
    size: usize,
    control: &ManualControl,
    format: OutputFormat,
) {
    let record = ControlSent::new(sender.dest().to_string(), size, control);
    print_record(&record, &record.rows(), format);
}

pub fn run(args: ControlArgs, format: OutputFormat) -> CliResult<i32> {
    let sender = ControlSender::open(&args.control_addr)
        .map_err(|err| session_error("control socket failed", err))?;
    let control = args.control.to_control();
    let size = sender
        .send(&control)
        .map_err(|err| session_error("control send failed", err))?;
    print_sent(&sender, size, &control, format);
    Ok(SUCCESS)
}
