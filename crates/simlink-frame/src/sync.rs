//! Resynchronizing frame state machine.
//!
//! ```text
//!            non-magic byte: discard
//!              ┌─────┐
//!              ▼     │
//!   ┌──────► SeekMagic ──magic──► HeaderTail ──valid──► Payload ──complete──┐
//!   │            ▲                    │                                     │
//!   │            └──────rejected──────┘                                     │
//!   └──────────────────────────────── emit frame ───────────────────────────┘
//! ```
//!
//! The machine only inspects bytes that are already buffered and never looks
//! past the frame it is assembling, so the same code drives the blocking
//! [`crate::FrameReader`] and the tokio codec.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::codec::{decode_header_with_limit, Frame, FrameConfig, Header, ResyncMode, HEADER_SIZE};
use crate::msg::MAGIC;

/// Where the synchronizer is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Scanning one byte at a time for the `0x4D` sentinel.
    SeekMagic,
    /// Sentinel found at the head of the buffer; waiting for the full header.
    HeaderTail,
    /// Header accepted; waiting for `payload_size` bytes.
    Payload(Header),
}

/// Counters since the synchronizer was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames: u64,
    pub rejected_headers: u64,
    pub discarded_bytes: u64,
}

/// Frame synchronizer over a byte buffer.
#[derive(Debug, Clone)]
pub struct FrameSync {
    state: SyncState,
    max_payload: usize,
    mode: ResyncMode,
    stats: SyncStats,
    /// Bytes discarded since the last emitted frame.
    skipped: u64,
}

impl FrameSync {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            state: SyncState::SeekMagic,
            max_payload: config.max_payload_size,
            mode: config.resync,
            stats: SyncStats::default(),
            skipped: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn set_max_payload_size(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }

    /// Drop any partial frame and go back to scanning.
    pub fn reset(&mut self) {
        self.state = SyncState::SeekMagic;
        self.skipped = 0;
    }

    /// How many more bytes the current state needs before it can advance,
    /// given `buffered` bytes already held. Always at least 1.
    pub fn bytes_wanted(&self, buffered: usize) -> usize {
        let target = match self.state {
            SyncState::SeekMagic => 1,
            SyncState::HeaderTail => HEADER_SIZE,
            SyncState::Payload(header) => header.payload_size as usize,
        };
        target.saturating_sub(buffered).max(1)
    }

    /// Advance over `buf`, consuming only bytes that belong to discarded
    /// garbage or to the emitted frame.
    ///
    /// Returns `None` when more input is needed. Framing anomalies never
    /// surface as errors: rejected candidates are counted and skipped.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<Frame> {
        loop {
            match self.state {
                SyncState::SeekMagic => {
                    let &first = buf.first()?;
                    if first == MAGIC {
                        self.state = SyncState::HeaderTail;
                    } else {
                        buf.advance(1);
                        self.discard(1);
                    }
                }
                SyncState::HeaderTail => {
                    if buf.len() < HEADER_SIZE {
                        return None;
                    }
                    let mut raw = [0u8; HEADER_SIZE];
                    raw.copy_from_slice(&buf[..HEADER_SIZE]);

                    match decode_header_with_limit(&raw, self.max_payload) {
                        Ok(header) => {
                            buf.advance(HEADER_SIZE);
                            self.state = SyncState::Payload(header);
                        }
                        Err(rejected) => {
                            let skip = match self.mode {
                                ResyncMode::ByteWise => 1,
                                ResyncMode::SkipCandidate => HEADER_SIZE,
                            };
                            self.stats.rejected_headers += 1;
                            debug!(reason = %rejected, skip, "rejected header candidate, resynchronizing");
                            buf.advance(skip);
                            self.discard(skip);
                            self.state = SyncState::SeekMagic;
                        }
                    }
                }
                SyncState::Payload(header) => {
                    let size = header.payload_size as usize;
                    if buf.len() < size {
                        return None;
                    }
                    let payload = buf.split_to(size).freeze();
                    self.state = SyncState::SeekMagic;
                    self.stats.frames += 1;
                    if self.skipped > 0 {
                        debug!(
                            discarded = self.skipped,
                            request_id = header.request_id,
                            "resynchronized on frame boundary"
                        );
                        self.skipped = 0;
                    }
                    trace!(
                        msg_type = %header.msg_type,
                        request_id = header.request_id,
                        size,
                        "frame complete"
                    );
                    return Some(Frame { header, payload });
                }
            }
        }
    }

    fn discard(&mut self, n: usize) {
        self.stats.discarded_bytes += n as u64;
        self.skipped += n as u64;
    }
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use proptest::prelude::*;

    use super::*;
    use crate::codec::{encode_frame, encode_header};
    use crate::msg::{MsgClass, MsgType};

    fn status_response(request_id: u32) -> BytesMut {
        let mut wire = BytesMut::new();
        encode_frame(
            MsgClass::Response,
            MsgType::GetStatus,
            request_id,
            &[0xAA; 32],
            &mut wire,
        )
        .unwrap();
        wire
    }

    #[test]
    fn emits_frame_and_keeps_trailing_bytes() {
        let mut buf = status_response(9);
        buf.put_slice(b"\x4Dtail");

        let mut sync = FrameSync::default();
        let frame = sync.decode(&mut buf).unwrap();
        assert_eq!(frame.request_id(), 9);
        assert_eq!(frame.payload.len(), 32);
        assert_eq!(buf.as_ref(), b"\x4Dtail");
        assert_eq!(sync.state(), SyncState::SeekMagic);
    }

    #[test]
    fn skips_leading_garbage() {
        let mut buf = BytesMut::from(&[0x00, 0xFF, 0x13, 0x37][..]);
        buf.extend_from_slice(&status_response(1));

        let mut sync = FrameSync::default();
        let frame = sync.decode(&mut buf).unwrap();
        assert_eq!(frame.request_id(), 1);
        assert!(buf.is_empty());
        assert_eq!(sync.stats().discarded_bytes, 4);
        assert_eq!(sync.stats().frames, 1);
    }

    #[test]
    fn false_magic_bytewise_recovers_overlapping_frame() {
        // A stray sentinel followed by an invalid class, immediately before a real frame.
        let mut buf = BytesMut::from(&[MAGIC, 0x00][..]);
        buf.extend_from_slice(&status_response(5));

        let mut sync = FrameSync::default();
        let frame = sync.decode(&mut buf).unwrap();
        assert_eq!(frame.request_id(), 5);
        assert_eq!(sync.stats().rejected_headers, 1);
        assert!(buf.is_empty());
    }

    fn misaligned_prefix_then_two_frames() -> BytesMut {
        // Three bytes: a stray sentinel with an invalid class, then noise.
        let mut buf = BytesMut::from(&[MAGIC, 0x00, 0x01][..]);
        buf.extend_from_slice(&status_response(5));
        buf.extend_from_slice(&status_response(6));
        buf
    }

    fn drain_ids(sync: &mut FrameSync, buf: &mut BytesMut) -> Vec<u32> {
        std::iter::from_fn(|| sync.decode(buf))
            .map(|frame| frame.request_id())
            .collect()
    }

    #[test]
    fn bytewise_resync_keeps_frame_behind_misaligned_prefix() {
        let mut buf = misaligned_prefix_then_two_frames();
        let mut sync = FrameSync::default();

        assert_eq!(drain_ids(&mut sync, &mut buf), vec![5, 6]);
        assert!(buf.is_empty());
        assert_eq!(sync.stats().rejected_headers, 1);
        assert_eq!(sync.stats().discarded_bytes, 3);
    }

    #[test]
    fn skip_candidate_drops_sixteen_bytes_and_loses_overlapping_frame() {
        let mut buf = misaligned_prefix_then_two_frames();
        let cfg = FrameConfig {
            resync: ResyncMode::SkipCandidate,
            ..FrameConfig::default()
        };
        let mut sync = FrameSync::new(&cfg);

        // The rejected candidate takes the prefix and 13 bytes of frame 5's
        // header; its header tail and payload are then scanned away as noise.
        assert_eq!(drain_ids(&mut sync, &mut buf), vec![6]);
        assert!(buf.is_empty());
        assert_eq!(sync.stats().rejected_headers, 1);
        assert_eq!(sync.stats().discarded_bytes, (HEADER_SIZE + 3 + 32) as u64);
        assert_eq!(sync.stats().frames, 1);
    }

    #[test]
    fn oversized_header_is_treated_as_garbage() {
        let mut buf = BytesMut::new();
        buf.put_slice(&encode_header(
            MsgClass::Response,
            MsgType::SaveData,
            2 * 1024 * 1024,
            1,
        ));
        buf.extend_from_slice(&status_response(2));

        let mut sync = FrameSync::default();
        let frame = sync.decode(&mut buf).unwrap();
        assert_eq!(frame.request_id(), 2);
        assert_eq!(sync.stats().rejected_headers, 1);
    }

    #[test]
    fn waits_for_complete_header_and_payload() {
        let wire = status_response(3);
        let mut sync = FrameSync::default();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&wire[..10]);
        assert!(sync.decode(&mut buf).is_none());
        assert_eq!(sync.state(), SyncState::HeaderTail);
        assert_eq!(sync.bytes_wanted(buf.len()), 6);

        buf.extend_from_slice(&wire[10..20]);
        assert!(sync.decode(&mut buf).is_none());
        assert!(matches!(sync.state(), SyncState::Payload(_)));
        assert_eq!(sync.bytes_wanted(buf.len()), 28);

        buf.extend_from_slice(&wire[20..]);
        assert_eq!(sync.decode(&mut buf).unwrap().request_id(), 3);
    }

    #[test]
    fn empty_payload_frame_completes_with_header() {
        let mut buf = BytesMut::new();
        encode_frame(MsgClass::Request, MsgType::SaveData, 4, &[], &mut buf).unwrap();
        let mut sync = FrameSync::default();
        let frame = sync.decode(&mut buf).unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(sync.bytes_wanted(0), 1);
    }

    proptest! {
        #[test]
        fn garbage_prefix_yields_exactly_one_frame(
            garbage in proptest::collection::vec(any::<u8>().prop_filter("no sentinel", |b| *b != MAGIC), 0..64),
            request_id in any::<u32>(),
            trailing in proptest::collection::vec(any::<u8>(), 0..16),
        ) {
            let frame_bytes = status_response(request_id);
            let mut buf = BytesMut::from(garbage.as_slice());
            buf.extend_from_slice(&frame_bytes);
            buf.extend_from_slice(&trailing);

            let mut sync = FrameSync::default();
            let frame = sync.decode(&mut buf).unwrap();
            prop_assert_eq!(frame.request_id(), request_id);
            prop_assert_eq!(buf.as_ref(), trailing.as_slice());
            prop_assert_eq!(sync.stats().discarded_bytes, garbage.len() as u64);
        }

        #[test]
        fn false_sentinels_in_garbage_never_hide_frame(
            garbage in proptest::collection::vec(prop_oneof![Just(MAGIC), Just(0x00u8), Just(0x02u8)], 0..48),
            request_id in any::<u32>(),
        ) {
            // Bytes from {0x4D, 0x00, 0x02} can never spell a known message type,
            // so every candidate header starting in the garbage is rejected.
            let mut buf = BytesMut::from(garbage.as_slice());
            buf.extend_from_slice(&status_response(request_id));

            let mut sync = FrameSync::default();
            let frame = sync.decode(&mut buf).unwrap();
            prop_assert_eq!(frame.request_id(), request_id);
            prop_assert_eq!(frame.payload.as_ref(), &[0xAA; 32][..]);
            prop_assert!(buf.is_empty());
        }
    }
}
