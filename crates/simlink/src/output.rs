use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use simlink_frame::{Telemetry, Vec3};
use simlink_session::{ResponseBody, ResponseReport, SessionEvent};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    timestamp: f64,
    #[serde(flatten)]
    inner: &'a T,
}

/// One printable line: event kind, optional epoch and request id, free text.
struct Summary {
    kind: &'static str,
    epoch: Option<u64>,
    request_id: Option<u32>,
    detail: String,
}

pub fn print_event(event: &SessionEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table => {
            let summary = summarize(event);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "EPOCH", "REQUEST", "DETAIL"])
                .add_row(vec![
                    summary.kind.to_string(),
                    opt(summary.epoch),
                    opt(summary.request_id),
                    summary.detail,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let summary = summarize(event);
            let mut line = format!("[{}]", summary.kind);
            if let Some(epoch) = summary.epoch {
                line.push_str(&format!(" epoch={epoch}"));
            }
            if let Some(id) = summary.request_id {
                line.push_str(&format!(" id={id}"));
            }
            println!("{line} {}", summary.detail);
        }
    }
}

/// Print a serializable record, with `rows` used for the human formats.
pub fn print_record<T: Serialize>(record: &T, rows: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in rows {
                table.add_row(vec![field.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = rows.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!("{}", line.join(" "));
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    let out = Stamped {
        timestamp: now_unix_seconds(),
        inner: value,
    };
    println!(
        "{}",
        serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
    );
}

fn summarize(event: &SessionEvent) -> Summary {
    let plain = |kind, detail: String| Summary {
        kind,
        epoch: None,
        request_id: None,
        detail,
    };
    match event {
        SessionEvent::Connecting { attempt, addr } => {
            plain("connecting", format!("attempt {attempt} to {addr}"))
        }
        SessionEvent::Connected { epoch, addr } => Summary {
            epoch: Some(*epoch),
            ..plain("connected", addr.clone())
        },
        SessionEvent::ConnectFailed {
            attempt,
            addr,
            error,
            retry_in,
        } => plain(
            "connect_failed",
            format!(
                "attempt {attempt} to {addr}: {error} (retry in {:.1}s)",
                retry_in.as_secs_f64()
            ),
        ),
        SessionEvent::Disconnected { epoch, reason } => Summary {
            epoch: Some(*epoch),
            ..plain("disconnected", reason.clone())
        },
        SessionEvent::RequestSent {
            epoch,
            request_id,
            msg_type,
        } => Summary {
            epoch: Some(*epoch),
            request_id: Some(*request_id),
            ..plain("request_sent", msg_type.to_string())
        },
        SessionEvent::Response(report) => Summary {
            epoch: Some(report.epoch),
            request_id: Some(report.request_id()),
            ..plain("response", describe_response(report))
        },
        SessionEvent::PendingExpired { request_id, age } => Summary {
            request_id: Some(*request_id),
            ..plain(
                "pending_expired",
                format!("unanswered for {:.1}s", age.as_secs_f64()),
            )
        },
        SessionEvent::Telemetry {
            from, telemetry, ..
        } => plain("telemetry", format!("{} from {from}", describe_telemetry(telemetry))),
        SessionEvent::TelemetryAnomaly {
            from,
            error,
            suppressed,
        } => {
            let from = from.map_or_else(|| "-".to_string(), |a| a.to_string());
            plain(
                "telemetry_anomaly",
                format!("{error} from {from} ({suppressed} suppressed)"),
            )
        }
    }
}

pub fn describe_response(report: &ResponseReport) -> String {
    let body = match &report.body {
        ResponseBody::Result(result) => format!(
            "{} result_code={} detail_code={}",
            report.header.msg_type, result.result_code, result.detail_code
        ),
        ResponseBody::Status(reply) => format!(
            "{} result_code={} step_index={} fixed_delta={} sim_time={}.{:09}s",
            report.header.msg_type,
            reply.result.result_code,
            reply.status.step_index,
            reply.status.fixed_delta,
            reply.status.seconds,
            reply.status.nanos
        ),
        ResponseBody::Malformed(err) => format!("{} {err}", report.header.msg_type),
        ResponseBody::Unexpected => format!(
            "unexpected {:?} {}",
            report.header.msg_class, report.header.msg_type
        ),
    };
    match report.rtt {
        Some(rtt) => format!("{body} rtt={:.3}ms", rtt.as_secs_f64() * 1000.0),
        None => format!("{body} (no pending request)"),
    }
}

pub fn describe_telemetry(t: &Telemetry) -> String {
    format!(
        "id={} t={}.{:09} loc={} rot={} vel={} throttle={:.2} brake={:.2} steer={:.2}",
        t.id,
        t.seconds,
        t.nanos,
        vec3(&t.location),
        vec3(&t.rotation),
        vec3(&t.local_velocity),
        t.control.throttle,
        t.control.brake,
        t.control.steer
    )
}

fn vec3(v: &Vec3) -> String {
    format!("({:.2}, {:.2}, {:.2})", v.x, v.y, v.z)
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn now_unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
