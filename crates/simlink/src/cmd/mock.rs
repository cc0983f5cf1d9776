use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use simlink_frame::{
    FixedStep, Frame, FrameConfig, FrameError, FrameReader, FrameWriter, MsgClass, MsgType,
    ResultCode, Status, StatusReply, Telemetry, Vec3,
};
use simlink_transport::{resolve_one, DatagramSocket, LinkStream, StreamListener};
use tracing::{debug, info, warn};

use crate::cmd::{parse_duration, MockArgs};
use crate::exit::{frame_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_record, OutputFormat};

/// Result code for a request the emulator could not apply.
const RESULT_REJECTED: u32 = 1;
/// Forward speed of the emulated vehicle, m/s.
const CRUISE_SPEED: f32 = 10.0;

/// Simulation clock shared by every connection and the telemetry thread.
#[derive(Debug, Clone, Copy)]
struct SimState {
    fixed_delta: f32,
    step_index: u64,
}

impl SimState {
    fn status(&self) -> Status {
        let delta_nanos = (f64::from(self.fixed_delta) * 1e9).round() as u128;
        let nanos_total = u128::from(self.step_index) * delta_nanos;
        Status {
            fixed_delta: self.fixed_delta,
            step_index: self.step_index,
            seconds: (nanos_total / 1_000_000_000) as i64,
            nanos: (nanos_total % 1_000_000_000) as u32,
        }
    }
}

#[derive(Serialize)]
struct Listening {
    listening: String,
}

pub fn run(args: MockArgs, format: OutputFormat) -> CliResult<i32> {
    let listener =
        StreamListener::bind(&args.listen).map_err(|err| transport_error("bind failed", err))?;
    let addr = listener.local_addr();
    print_record(
        &Listening {
            listening: addr.to_string(),
        },
        &[("listening", addr.to_string())],
        format,
    );

    let state = Arc::new(Mutex::new(SimState {
        fixed_delta: args.fixed_delta,
        step_index: 0,
    }));

    let running = Arc::new(AtomicBool::new(true));
    if let Some(target) = &args.telemetry_target {
        let dest = resolve_one(target).map_err(|err| transport_error("telemetry target", err))?;
        let rate = parse_duration(&args.telemetry_rate)?;
        spawn_telemetry(
            dest,
            rate,
            args.vehicle_id.clone(),
            state.clone(),
            running.clone(),
        )?;
    }

    let mut served = 0usize;
    while args.max_connections.is_none_or(|max| served < max) {
        let stream = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        served += 1;
        let peer = stream.peer_addr();
        info!(peer = ?peer, connection = served, "client connected");
        match serve(stream, &state, args.drop_after) {
            Ok(answered) => info!(peer = ?peer, answered, "client disconnected"),
            Err(err) => warn!(peer = ?peer, error = %err, "connection failed"),
        }
    }

    running.store(false, Ordering::SeqCst);
    Ok(SUCCESS)
}

/// Answer requests on one connection until the client leaves or
/// `drop_after` responses have been sent. Returns the number answered.
fn serve(
    stream: LinkStream,
    state: &Mutex<SimState>,
    drop_after: Option<u32>,
) -> CliResult<u32> {
    let read_half = stream
        .try_clone()
        .map_err(|err| transport_error("clone failed", err))?;
    let mut reader = FrameReader::with_config(read_half, FrameConfig::default());
    let mut writer = FrameWriter::new(stream);
    let mut answered = 0u32;

    while drop_after.is_none_or(|limit| answered < limit) {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::PeerClosed) => break,
            Err(err) => return Err(frame_error("read failed", err)),
        };
        let Some(payload) = respond(&frame, state) else {
            continue;
        };
        writer
            .send(
                MsgClass::Response,
                frame.header.msg_type,
                frame.header.request_id,
                &payload,
            )
            .map_err(|err| frame_error("write failed", err))?;
        answered += 1;
    }
    writer.get_ref().shutdown();
    Ok(answered)
}

/// The response payload for `frame`, or `None` when it is not a request.
fn respond(frame: &Frame, state: &Mutex<SimState>) -> Option<Vec<u8>> {
    if frame.header.msg_class != MsgClass::Request {
        warn!(msg_type = %frame.header.msg_type, "ignoring non-request frame");
        return None;
    }
    let ok = ResultCode {
        result_code: 0,
        detail_code: 0,
    };
    let mut sim = state.lock().unwrap_or_else(PoisonError::into_inner);
    let payload = match frame.header.msg_type {
        MsgType::FixedStep => match FixedStep::decode(&frame.payload) {
            Ok(step) => {
                sim.step_index = sim.step_index.saturating_add(u64::from(step.step_count));
                debug!(
                    request_id = frame.header.request_id,
                    step_count = step.step_count,
                    step_index = sim.step_index,
                    "fixed step"
                );
                ok.encode().to_vec()
            }
            Err(err) => {
                warn!(error = %err, "rejecting fixed step");
                ResultCode {
                    result_code: RESULT_REJECTED,
                    detail_code: 0,
                }
                .encode()
                .to_vec()
            }
        },
        MsgType::GetStatus => StatusReply {
            result: ok,
            status: sim.status(),
        }
        .encode()
        .to_vec(),
        MsgType::SaveData => {
            info!(step_index = sim.step_index, "save data");
            ok.encode().to_vec()
        }
    };
    Some(payload)
}

fn spawn_telemetry(
    dest: SocketAddr,
    rate: Duration,
    vehicle_id: String,
    state: Arc<Mutex<SimState>>,
    running: Arc<AtomicBool>,
) -> CliResult<()> {
    let socket =
        DatagramSocket::unbound_for(dest).map_err(|err| transport_error("telemetry socket", err))?;
    thread::Builder::new()
        .name("simlink-mock-telemetry".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                let sim = *state.lock().unwrap_or_else(PoisonError::into_inner);
                let record = vehicle_record(&vehicle_id, &sim);
                if let Err(err) = socket.send_to(&record.encode(), dest) {
                    debug!(error = %err, %dest, "telemetry send failed");
                }
                thread::sleep(rate);
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("telemetry thread failed: {err}")))?;
    Ok(())
}

/// A vehicle cruising along +x at constant speed, driven by the sim clock.
fn vehicle_record(vehicle_id: &str, sim: &SimState) -> Telemetry {
    let status = sim.status();
    let elapsed = status.seconds as f32 + status.nanos as f32 / 1e9;
    Telemetry {
        seconds: status.seconds,
        nanos: status.nanos as i32,
        id: vehicle_id.to_string(),
        location: Vec3 {
            x: elapsed * CRUISE_SPEED,
            y: 0.0,
            z: 0.0,
        },
        local_velocity: Vec3 {
            x: CRUISE_SPEED,
            y: 0.0,
            z: 0.0,
        },
        control: simlink_frame::ControlState {
            throttle: 0.5,
            brake: 0.0,
            steer: 0.0,
        },
        ..Telemetry::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Mutex<SimState> {
        Mutex::new(SimState {
            fixed_delta: 0.05,
            step_index: 0,
        })
    }

    fn request(msg_type: MsgType, payload: Vec<u8>) -> Frame {
        Frame::new(MsgClass::Request, msg_type, 1, payload)
    }

    #[test]
    fn fixed_step_advances_clock() {
        let state = state();
        let reply = respond(
            &request(MsgType::FixedStep, FixedStep { step_count: 20 }.encode().to_vec()),
            &state,
        )
        .expect("request should be answered");
        assert_eq!(ResultCode::decode(&reply).expect("result").result_code, 0);

        let status = respond(&request(MsgType::GetStatus, Vec::new()), &state)
            .expect("request should be answered");
        let reply = StatusReply::decode(&status).expect("status reply");
        assert_eq!(reply.status.step_index, 20);
        // 0.05 is not exact in f32; the clock stays within a few nanoseconds.
        assert_eq!(reply.status.seconds, 1);
        assert!(reply.status.nanos < 1_000);
    }

    #[test]
    fn malformed_step_is_rejected_not_applied() {
        let state = state();
        let reply = respond(&request(MsgType::FixedStep, vec![1, 2]), &state)
            .expect("request should be answered");
        assert_eq!(
            ResultCode::decode(&reply).expect("result").result_code,
            RESULT_REJECTED
        );
        assert_eq!(state.lock().expect("lock").step_index, 0);
    }

    #[test]
    fn responses_from_client_are_ignored() {
        let frame = Frame::new(MsgClass::Response, MsgType::SaveData, 1, vec![0u8; 8]);
        assert!(respond(&frame, &state()).is_none());
    }

    #[test]
    fn telemetry_record_tracks_clock() {
        let sim = SimState {
            fixed_delta: 0.5,
            step_index: 4,
        };
        let record = vehicle_record("car7", &sim);
        assert_eq!(record.seconds, 2);
        assert_eq!(record.id, "car7");
        assert!((record.location.x - 20.0).abs() < 1e-4);
        let decoded = Telemetry::decode(&record.encode()).expect("decode");
        assert_eq!(decoded, record);
    }
}
