//! Incremental Stream Parser (C4) — §4.3.
//!
//! Owns the append-only text buffer (text mode) or deep-merged accumulator
//! (object mode), the `emittedIndex → hash` dedup map, and the buffer's
//! memory bound. The 5 MiB cap and JSON-aware truncation described under
//! §4.4 are implemented here rather than on the Stream Helper: the buffer
//! and emitted-index map this paragraph describes are the ones this struct
//! owns, not any state the helper holds.

use crate::artifact;
use crate::error::Result;
use crate::frame::{ArtifactPayload, ComponentPayload, DataPartKind, StreamPart};
use crate::stream_helper::StreamHelper;
use futures::{Stream, StreamExt};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Trailing window (bytes) scanned for an unmatched `<` when deciding
/// whether a flushed tail "might begin a marker" (§4.3 step 4).
const MARKER_LOOKBACK: usize = 20;

/// One record from the abstract delta source the Incremental Stream Parser
/// consumes (§6 "Delta source (input)").
#[derive(Debug, Clone)]
pub enum Delta {
    /// Append text to the current buffer.
    Text(String),
    /// Merge a partial object into the accumulator.
    ObjectDelta(serde_json::Value),
    /// Hint that the next text chunk should have a separator.
    ToolResultBoundary,
    /// Triggers `finalize()` and the owning `StreamHelper`'s `complete()`.
    EndOfStream,
}

pub struct IncrementalStreamParser {
    buffer: String,
    accumulator: serde_json::Value,
    emitted_index: HashMap<usize, String>,
    collected_parts: Vec<StreamPart>,
    prev_chunk_was_tool_boundary: bool,
    max_buffer_bytes: usize,
}

impl IncrementalStreamParser {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            accumulator: serde_json::Value::Object(serde_json::Map::new()),
            emitted_index: HashMap::new(),
            collected_parts: Vec::new(),
            prev_chunk_was_tool_boundary: false,
            max_buffer_bytes,
        }
    }

    /// All parts emitted so far, for final-response reconstruction.
    pub fn collected_parts(&self) -> &[StreamPart] {
        &self.collected_parts
    }

    /// Record that the previous chunk closed out a tool result, so the next
    /// `process_text` call inserts a separating blank line.
    pub fn mark_tool_result_boundary(&mut self) {
        self.prev_chunk_was_tool_boundary = true;
    }

    /// Text-mode operation: append `chunk`, scan for complete markers, and
    /// return any parts that are now safe to flush.
    pub fn process_text(&mut self, chunk: &str) -> Vec<StreamPart> {
        let mut chunk = chunk.to_string();
        if self.prev_chunk_was_tool_boundary && self.buffer.is_empty() {
            chunk = format!("\n\n{chunk}");
        }
        self.prev_chunk_was_tool_boundary = false;

        self.buffer.push_str(&chunk);
        self.enforce_buffer_bound();

        let emitted = if artifact::has_incomplete_marker(&self.buffer) {
            let n = artifact::safe_text_boundary(&self.buffer);
            let (flushable, rest) = self.buffer.split_at(n);
            let parts = artifact::parse_text(flushable);
            let rest = rest.to_string();
            self.buffer = rest;
            parts
        } else {
            let parts = artifact::parse_text(&self.buffer);
            self.buffer.clear();
            self.hold_back_marker_prefix(parts)
        };

        self.collected_parts.extend(emitted.iter().cloned());
        emitted
    }

    /// If the trailing part is text that might begin a marker (an unmatched
    /// `<` within the last [`MARKER_LOOKBACK`] bytes), hold it back in the
    /// buffer and don't emit it yet.
    fn hold_back_marker_prefix(&mut self, mut parts: Vec<StreamPart>) -> Vec<StreamPart> {
        if let Some(StreamPart::Text(text)) = parts.last() {
            let tail_start = text.len().saturating_sub(MARKER_LOOKBACK);
            let mut boundary = tail_start;
            while !text.is_char_boundary(boundary) {
                boundary += 1;
            }
            if let Some(rel) = text[boundary..].rfind('<') {
                let abs = boundary + rel;
                let held = text[abs..].to_string();
                let kept = text[..abs].to_string();
                parts.pop();
                if !kept.is_empty() {
                    parts.push(StreamPart::Text(kept));
                }
                self.buffer = held;
            }
        }
        parts
    }

    /// Object-mode operation: deep-merge `delta` into the accumulator and
    /// emit parts for any newly-complete or newly-changed `dataComponents`
    /// elements.
    pub fn process_object_delta(&mut self, delta: &serde_json::Value) -> Vec<StreamPart> {
        deep_merge(&mut self.accumulator, delta);

        let mut emitted = Vec::new();
        let Some(components) = self
            .accumulator
            .get("dataComponents")
            .and_then(|v| v.as_array())
            .cloned()
        else {
            return emitted;
        };

        for (i, element) in components.iter().enumerate() {
            if !artifact::element_is_complete(element) {
                continue;
            }
            let hash = artifact::element_hash(element);
            if self.emitted_index.get(&i) == Some(&hash) {
                continue;
            }
            if let Some(part) = artifact::parse_object(element) {
                emitted.push(part);
                self.emitted_index.insert(i, hash);
            }
        }

        self.collected_parts.extend(emitted.iter().cloned());
        emitted
    }

    /// Flush any remaining safe text, drop trailing marker-start fragments,
    /// and strip any malformed marker remnants from the residual buffer.
    pub fn finalize(&mut self) -> Vec<StreamPart> {
        let residual = std::mem::take(&mut self.buffer);
        let cleaned = strip_marker_fragments(&residual);
        if cleaned.is_empty() {
            return Vec::new();
        }
        let parts = artifact::parse_text(&cleaned);
        self.collected_parts.extend(parts.iter().cloned());
        parts
    }

    /// Drive a lazy delta source (§6 "Delta source (input)") to completion,
    /// forwarding every produced [`StreamPart`] through `helper` and calling
    /// `helper.complete()` once [`Delta::EndOfStream`] arrives. Grounded on
    /// the teacher's `ReceiverStream`-backed task-update stream in
    /// `orchestrator::executor::streaming` — a generic `Stream<Item = ...>`
    /// consumed with `StreamExt::next()` in a loop, rather than a callback.
    pub async fn drive<S>(&mut self, deltas: S, helper: &StreamHelper) -> Result<()>
    where
        S: Stream<Item = Delta> + Unpin,
    {
        let mut deltas = deltas;
        while let Some(delta) = deltas.next().await {
            match delta {
                Delta::Text(chunk) => {
                    for part in self.process_text(&chunk) {
                        forward_part(helper, part).await?;
                    }
                }
                Delta::ObjectDelta(value) => {
                    for part in self.process_object_delta(&value) {
                        forward_part(helper, part).await?;
                    }
                }
                Delta::ToolResultBoundary => self.mark_tool_result_boundary(),
                Delta::EndOfStream => {
                    for part in self.finalize() {
                        forward_part(helper, part).await?;
                    }
                    return helper.complete().await;
                }
            }
        }
        Ok(())
    }

    /// Enforce the buffer's memory bound (§4.4). On overflow, scan backward
    /// for the last depth-0 boundary (respecting strings and escapes) and
    /// discard everything before it; if no safe boundary exists, clear the
    /// buffer and the emitted-index map so later deltas are re-emitted
    /// rather than silently dropped.
    fn enforce_buffer_bound(&mut self) {
        if self.buffer.len() <= self.max_buffer_bytes {
            return;
        }
        tracing::warn!(
            buffer_len = self.buffer.len(),
            max = self.max_buffer_bytes,
            "incremental stream buffer exceeded cap, truncating"
        );
        match last_depth_zero_boundary(&self.buffer) {
            Some(boundary) => {
                self.buffer = self.buffer[boundary..].to_string();
            }
            None => {
                self.buffer.clear();
                self.emitted_index.clear();
            }
        }
    }
}

/// Deep-merge `delta` into `target`: objects merge key-by-key recursively,
/// arrays and scalars in `delta` replace the corresponding value in
/// `target` wholesale.
fn deep_merge(target: &mut serde_json::Value, delta: &serde_json::Value) {
    match (target, delta) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(delta_map)) => {
            for (key, value) in delta_map {
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, delta) => {
            *target = delta.clone();
        }
    }
}

/// Scan `buffer` backward for the last byte offset at which bracket/brace
/// depth is zero and we are not inside a string, so that `buffer[offset..]`
/// is a self-contained tail. Returns `None` if no such offset is found
/// (i.e. the whole buffer is nested inside an unclosed container).
fn last_depth_zero_boundary(buffer: &str) -> Option<usize> {
    let bytes = buffer.as_bytes();
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    let mut last_zero = None;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    last_zero = Some(i + 1);
                }
            }
            _ => {}
        }
    }

    last_zero.filter(|&offset| offset < buffer.len())
}

fn cleanup_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Three branches: a fully-closed marker, a closing tag, and (last,
        // anchored with `$`) an open-tag fragment that never reached its
        // `>` — residue `finalize()` sees when the stream ends mid-marker.
        Regex::new(r#"(?s)<artifact:[a-z]+[^>]*/?>|</artifact>|<artifact:[a-z]*[^>]*$"#)
            .expect("cleanup regex is a fixed, valid pattern")
    })
}

/// Strip malformed/truncated `<artifact:…>` fragments from residual text at
/// `finalize()` time. Anchored, non-backtracking alternation per the
/// regex-safety note — every branch is a bounded, single-pass scan.
fn strip_marker_fragments(residual: &str) -> String {
    cleanup_regex().replace_all(residual, "").into_owned()
}

/// Forward one [`StreamPart`] through a [`StreamHelper`], reconstructing
/// the typed payload each `write_*` method expects from the part's loosely
/// typed `serde_json::Value`.
async fn forward_part(helper: &StreamHelper, part: StreamPart) -> Result<()> {
    match part {
        StreamPart::Text(text) => helper.write_text(text, 0).await,
        StreamPart::Data {
            kind: DataPartKind::Component,
            id,
            payload,
        } => {
            let component_type = payload
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let mut props = payload.as_object().cloned().unwrap_or_default();
            props.remove("type");
            helper
                .write_component(id, ComponentPayload { component_type, props })
                .await
        }
        StreamPart::Data {
            kind: DataPartKind::Artifact,
            payload,
            ..
        } => {
            helper
                .write_artifact(ArtifactPayload {
                    artifact_id: payload
                        .get("artifact_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    task_id: payload
                        .get("task_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: String::new(),
                    description: String::new(),
                    parts: Vec::new(),
                    metadata: payload,
                })
                .await
        }
    }
}

/// Adapt an unbounded `tokio::sync::mpsc` channel of [`Delta`] records into
/// a `Stream`, for callers whose delta source already speaks that channel
/// shape — the same adapter `orchestrator::executor::streaming` uses
/// (`tokio_stream::wrappers::UnboundedReceiverStream`) to turn its task-update
/// channel into a `Stream` the rest of that module consumes uniformly.
pub fn delta_stream_from_channel(
    rx: tokio::sync::mpsc::UnboundedReceiver<Delta>,
) -> impl Stream<Item = Delta> + Unpin {
    tokio_stream::wrappers::UnboundedReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_emits_immediately() {
        let mut parser = IncrementalStreamParser::new(1024);
        let parts = parser.process_text("hello world");
        assert_eq!(parts.len(), 1);
        assert!(matches!(&parts[0], StreamPart::Text(s) if s == "hello world"));
    }

    #[test]
    fn trailing_angle_bracket_is_held_back() {
        let mut parser = IncrementalStreamParser::new(1024);
        let parts = parser.process_text("hello <");
        assert_eq!(parts.len(), 1);
        assert!(matches!(&parts[0], StreamPart::Text(s) if s == "hello "));

        let parts = parser.process_text("b>world");
        assert_eq!(parts.len(), 1);
        assert!(matches!(&parts[0], StreamPart::Text(s) if s == "<b>world"));
    }

    #[test]
    fn incomplete_marker_withheld_until_closed() {
        let mut parser = IncrementalStreamParser::new(1024);
        let parts = parser.process_text(r#"Report <artifact:ref id="x" "#);
        assert!(parts.is_empty());

        let parts = parser.process_text(r#"task="t"/> done"#);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn tool_result_boundary_inserts_blank_line() {
        let mut parser = IncrementalStreamParser::new(1024);
        parser.mark_tool_result_boundary();
        let parts = parser.process_text("next chunk");
        match &parts[0] {
            StreamPart::Text(s) => assert!(s.starts_with("\n\n")),
            _ => panic!("expected text part"),
        }
    }

    #[test]
    fn object_delta_emits_once_per_distinct_hash() {
        let mut parser = IncrementalStreamParser::new(1024);
        let delta1 = serde_json::json!({
            "dataComponents": [{"id": "c1", "name": "Weather", "props": {"temp": 72}}]
        });
        let emitted = parser.process_object_delta(&delta1);
        assert_eq!(emitted.len(), 1);

        // Same content again -> no re-emission.
        let emitted = parser.process_object_delta(&delta1);
        assert!(emitted.is_empty());

        // Changed content -> re-emitted.
        let delta2 = serde_json::json!({
            "dataComponents": [{"id": "c1", "name": "Weather", "props": {"temp": 80}}]
        });
        let emitted = parser.process_object_delta(&delta2);
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn incomplete_artifact_element_never_emits() {
        let mut parser = IncrementalStreamParser::new(1024);
        let delta = serde_json::json!({
            "dataComponents": [{"id": "c1", "name": "Artifact", "props": {"artifact_id": "a1"}}]
        });
        let emitted = parser.process_object_delta(&delta);
        assert!(emitted.is_empty());
    }

    #[test]
    fn finalize_strips_malformed_marker_fragment() {
        let mut parser = IncrementalStreamParser::new(1024);
        parser.process_text("Report ");
        parser.process_text(r#"<artifact:ref id="x" "#);
        let parts = parser.finalize();
        assert!(parts.is_empty());
    }

    #[test]
    fn cleanup_regex_strips_unterminated_open_tag_with_no_closing_angle_bracket() {
        // No `>` anywhere in this fragment — only the anchored third
        // alternative in `cleanup_regex` can match it.
        assert_eq!(strip_marker_fragments(r#"<artifact:ref id="x" "#), "");
        assert_eq!(
            strip_marker_fragments(r#"Report <artifact:ref id="x" "#),
            "Report "
        );
    }

    #[test]
    fn buffer_overflow_truncates_at_depth_zero_boundary() {
        // Text mode never contains brackets worth preserving a boundary
        // for, so an overflow with no depth-zero point clears entirely.
        let mut parser = IncrementalStreamParser::new(16);
        parser.process_text("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(parser.buffer.is_empty());
    }

    #[test]
    fn last_depth_zero_boundary_finds_completed_object_tail() {
        let buffer = r#"{"a":1}{"b":2"#;
        let boundary = last_depth_zero_boundary(buffer).unwrap();
        assert_eq!(&buffer[boundary..], r#"{"b":2"#);
    }

    #[tokio::test]
    async fn drive_consumes_a_delta_stream_and_completes_the_helper() {
        use crate::config::StreamCoreConfig;
        use crate::sink::CapturingSink;
        use std::sync::Arc;

        let sink = Arc::new(CapturingSink::new());
        let helper = StreamHelper::new(sink.clone(), &StreamCoreConfig::default());
        let mut parser = IncrementalStreamParser::new(1024);

        let deltas = futures::stream::iter(vec![
            Delta::Text("Hello ".into()),
            Delta::Text("world".into()),
            Delta::ObjectDelta(serde_json::json!({
                "dataComponents": [{"id": "c1", "name": "Weather", "props": {"temp": 72}}]
            })),
            Delta::EndOfStream,
        ]);

        parser.drive(deltas, &helper).await.unwrap();

        assert_eq!(sink.collected_text(), "Hello world");
        let frames = sink.frames();
        assert!(frames.iter().any(|f| matches!(f, crate::frame::Frame::DataComponent { .. })));

        // `EndOfStream` must have run `complete()`: further writes are
        // dropped rather than reaching the sink.
        helper.write_text("ignored", 0).await.unwrap();
        assert_eq!(sink.frames().len(), frames.len());
    }

    #[tokio::test]
    async fn delta_stream_from_channel_adapts_an_mpsc_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(Delta::Text("hi".into())).unwrap();
        tx.send(Delta::EndOfStream).unwrap();
        drop(tx);

        let mut stream = delta_stream_from_channel(rx);
        let mut seen = Vec::new();
        while let Some(delta) = stream.next().await {
            let is_end = matches!(delta, Delta::EndOfStream);
            seen.push(delta);
            if is_end {
                break;
            }
        }
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], Delta::Text(ref s) if s == "hi"));
    }
}
