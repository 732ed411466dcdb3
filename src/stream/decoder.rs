use super::event::{Event, EventPayload, DEFAULT_EVENT_TYPE};
use std::collections::HashSet;

/// A complete frame before payload parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event_type: String,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
struct PendingFrame {
    event_type: Option<String>,
    data: String,
    has_data: bool,
    id: Option<String>,
}

impl PendingFrame {
    fn take(&mut self) -> Option<Frame> {
        let pending = std::mem::take(self);
        if !pending.has_data {
            return None;
        }
        Some(Frame {
            event_type: pending
                .event_type
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data: pending.data,
            id: pending.id,
        })
    }
}

/// Incremental text/event-stream decoder.
///
/// Bytes are buffered only until the next line break, so the frames produced
/// do not depend on how the input was chunked. A blank line completes a
/// frame; frames without any `data:` line are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending: PendingFrame,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0usize;
        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let raw = &self.buffer[consumed..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            consumed = end + 1;
            if let Some(frame) = self.accept_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..consumed);
        frames
    }

    /// Bytes held back waiting for a line break, plus whether a frame is
    /// partially assembled.
    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty() || self.pending.has_data || self.pending.event_type.is_some()
    }

    /// Drops any partial line or frame, e.g. when the connection is replaced.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = PendingFrame::default();
    }

    fn accept_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.pending.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        match field {
            "event" => self.pending.event_type = Some(value.trim().to_string()),
            "data" => {
                self.pending.data.push_str(value.trim());
                self.pending.has_data = true;
            }
            "id" => self.pending.id = Some(value.trim().to_string()),
            _ => {}
        }
        None
    }
}

/// Where a subscription resumes: the next sequence number to assign and the
/// frame ids already delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCursor {
    pub next_sequence: u64,
    pub last_event_id: Option<String>,
    pub seen_ids: HashSet<String>,
}

impl StreamCursor {
    pub fn after<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut cursor = Self::default();
        for event in events {
            cursor.next_sequence = cursor.next_sequence.max(event.sequence + 1);
            if let Some(id) = event.id.as_ref() {
                cursor.seen_ids.insert(id.clone());
                cursor.last_event_id = Some(id.clone());
            }
        }
        cursor
    }
}

/// Turns frames into sequenced events, skipping frames whose id was already
/// delivered so a replaying server never produces duplicates.
#[derive(Debug, Default)]
pub struct EventDecoder {
    frames: SseDecoder,
    cursor: StreamCursor,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(cursor: StreamCursor) -> Self {
        Self {
            frames: SseDecoder::new(),
            cursor,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Event> {
        let mut events = Vec::new();
        for frame in self.frames.push(chunk) {
            if let Some(id) = frame.id.as_ref() {
                if !self.cursor.seen_ids.insert(id.clone()) {
                    continue;
                }
                self.cursor.last_event_id = Some(id.clone());
            }
            let sequence = self.cursor.next_sequence;
            self.cursor.next_sequence += 1;
            events.push(Event {
                payload: EventPayload::from_data(&frame.data),
                event_type: frame.event_type,
                sequence,
                id: frame.id,
            });
        }
        events
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.cursor.last_event_id.as_deref()
    }

    pub fn cursor(&self) -> &StreamCursor {
        &self.cursor
    }

    pub fn reset_connection(&mut self) {
        self.frames.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STREAM: &str = "event: run.started\ndata: {\"message\":\"Run started\"}\n\n\
: keepalive comment\n\
event: step.started\r\ndata: {\"test_id\":\r\ndata: \"net.ping\"}\r\n\r\n\
data: not json at all\n\n\
event: first\nevent: step.completed\ndata: {\"test_id\":\"net.ping\",\"result\":\"ok\"}\nid: ev_3\n\n\
event: note\ndata: caf\u{e9} \u{2713}\n\n\
event: run.completed\ndata: {\"ok\":true}\n\n";

    fn decode_in_chunks(bytes: &[u8], sizes: &[usize]) -> Vec<Event> {
        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        let mut offset = 0usize;
        let mut index = 0usize;
        while offset < bytes.len() {
            let size = sizes[index % sizes.len()].max(1);
            let end = (offset + size).min(bytes.len());
            events.extend(decoder.push(&bytes[offset..end]));
            offset = end;
            index += 1;
        }
        events
    }

    #[test]
    fn decodes_types_payloads_and_sequences() {
        let events = decode_in_chunks(STREAM.as_bytes(), &[STREAM.len()]);
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "run.started",
                "step.started",
                "message",
                "step.completed",
                "note",
                "run.completed"
            ]
        );
        let sequences: Vec<_> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);

        assert_eq!(
            events[1].payload,
            EventPayload::Structured(json!({"test_id": "net.ping"}))
        );
        assert_eq!(
            events[2].payload,
            EventPayload::Raw("not json at all".to_string())
        );
        assert_eq!(events[3].id.as_deref(), Some("ev_3"));
        assert_eq!(events[4].payload, EventPayload::Raw("caf\u{e9} \u{2713}".to_string()));
        assert_eq!(events[5].payload, EventPayload::Structured(json!({"ok": true})));
    }

    #[test]
    fn decoding_is_independent_of_chunk_boundaries() {
        let bytes = STREAM.as_bytes();
        let whole = decode_in_chunks(bytes, &[bytes.len()]);

        for size in 1..=17 {
            assert_eq!(decode_in_chunks(bytes, &[size]), whole, "chunk size {size}");
        }
        assert_eq!(decode_in_chunks(bytes, &[3, 1, 7, 2, 11, 5]), whole);
        assert_eq!(decode_in_chunks(bytes, &[64, 1, 1, 2]), whole);
    }

    #[test]
    fn every_single_split_point_yields_the_same_events() {
        let bytes = STREAM.as_bytes();
        let whole = decode_in_chunks(bytes, &[bytes.len()]);
        for split in 1..bytes.len() {
            let mut decoder = EventDecoder::new();
            let mut events = decoder.push(&bytes[..split]);
            events.extend(decoder.push(&bytes[split..]));
            assert_eq!(events, whole, "split at byte {split}");
        }
    }

    #[test]
    fn malformed_payload_does_not_disturb_the_next_frame() {
        let mut decoder = EventDecoder::new();
        let events =
            decoder.push(b"event: step.started\ndata: {\"step\":\n\nevent: step.started\ndata: {\"step\":2}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload, EventPayload::Raw("{\"step\":".to_string()));
        assert_eq!(events[1].payload, EventPayload::Structured(json!({"step": 2})));
    }

    #[test]
    fn frames_without_data_are_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: ping\n\n").is_empty());
        let frames = decoder.push(b"data: x\n\n");
        assert_eq!(
            frames,
            vec![Frame {
                event_type: "message".to_string(),
                data: "x".to_string(),
                id: None
            }]
        );
    }

    #[test]
    fn incomplete_frame_is_held_until_blank_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: run.started\ndata: {}\n").is_empty());
        assert!(decoder.has_partial_frame());
        assert_eq!(decoder.push(b"\n").len(), 1);
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn replayed_ids_are_skipped_without_sequence_gaps() {
        let mut decoder = EventDecoder::new();
        let first = decoder.push(b"id: ev_1\ndata: {}\n\nid: ev_2\ndata: {}\n\n");
        assert_eq!(first.len(), 2);
        assert_eq!(decoder.last_event_id(), Some("ev_2"));

        decoder.reset_connection();
        let replay = decoder.push(
            b"id: ev_1\ndata: {}\n\nid: ev_2\ndata: {}\n\nid: ev_3\nevent: run.completed\ndata: {}\n\n",
        );
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].id.as_deref(), Some("ev_3"));
        assert_eq!(replay[0].sequence, 2);
    }

    #[test]
    fn cursor_after_log_resumes_sequence_and_ids() {
        let mut decoder = EventDecoder::new();
        let log = decoder.push(b"id: a\ndata: 1\n\ndata: 2\n\n");
        let cursor = StreamCursor::after(&log);
        assert_eq!(cursor.next_sequence, 2);
        assert_eq!(cursor.last_event_id.as_deref(), Some("a"));

        let mut resumed = EventDecoder::resume(cursor);
        let events = resumed.push(b"id: a\ndata: 1\n\nid: b\ndata: 3\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, 2);
    }
}
