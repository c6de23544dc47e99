//! Artifact Parser (C3) — §4.2.
//!
//! Two entry points: text-mode marker scanning and object-mode
//! `dataComponents` extraction. Both are pure functions; [`crate::incremental`]
//! owns the buffering and dedup state that drives them.

use crate::frame::{ArtifactPayload, ComponentPayload, DataPartKind};
use crate::frame::StreamPart;
use regex::Regex;
use std::sync::OnceLock;

const REF_OPEN: &str = "<artifact:ref";
const CREATE_OPEN: &str = "<artifact:create";
const CREATE_CLOSE: &str = "</artifact>";

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Anchored alternation, no nested quantifiers or backtracking groups
        // — every branch is a fixed literal or a bounded attribute scan.
        Regex::new(
            r#"(?s)<artifact:ref\s+id="[^"]*"\s+task="[^"]*"\s*/>|<artifact:create\s+id="[^"]*"\s+type="[^"]*"\s*>.*?</artifact>"#,
        )
        .expect("marker regex is a fixed, valid pattern")
    })
}

/// Parse a text fragment that may contain embedded `<artifact:…>` markers,
/// producing an ordered sequence of [`StreamPart`]s. Runs of non-marker text
/// become `Text` parts; each fully-closed marker becomes one `Data` part of
/// kind [`DataPartKind::Artifact`].
pub fn parse_text(fragment: &str) -> Vec<StreamPart> {
    let re = marker_regex();
    let mut parts = Vec::new();
    let mut last_end = 0;

    for m in re.find_iter(fragment) {
        if m.start() > last_end {
            parts.push(StreamPart::Text(fragment[last_end..m.start()].to_string()));
        }
        if let Some(part) = marker_to_part(m.as_str()) {
            parts.push(part);
        }
        last_end = m.end();
    }

    if last_end < fragment.len() {
        parts.push(StreamPart::Text(fragment[last_end..].to_string()));
    }

    parts
}

fn marker_to_part(marker: &str) -> Option<StreamPart> {
    let id = attr(marker, "id")?;
    if marker.starts_with(REF_OPEN) {
        let task = attr(marker, "task")?;
        Some(StreamPart::Data {
            kind: DataPartKind::Artifact,
            id: id.clone(),
            payload: serde_json::json!({ "artifact_id": id, "task_id": task, "ref": true }),
        })
    } else if marker.starts_with(CREATE_OPEN) {
        let artifact_type = attr(marker, "type")?;
        let body_start = marker.find('>').map(|i| i + 1)?;
        let body_end = marker.len() - CREATE_CLOSE.len();
        let body = marker.get(body_start..body_end).unwrap_or("").to_string();
        Some(StreamPart::Data {
            kind: DataPartKind::Artifact,
            id: id.clone(),
            payload: serde_json::json!({
                "artifact_id": id,
                "artifact_type": artifact_type,
                "body": body,
            }),
        })
    } else {
        None
    }
}

fn attr<'a>(marker: &'a str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let start = marker.find(&needle)? + needle.len();
    let end = marker[start..].find('"')? + start;
    Some(marker[start..end].to_string())
}

/// True iff `buffer` ends inside an unterminated `<artifact:…>` marker: an
/// opening tag with no matching close, or a `<` that could still be the
/// start of one.
pub fn has_incomplete_marker(buffer: &str) -> bool {
    let re = marker_regex();
    let mut consumed = 0;
    for m in re.find_iter(buffer) {
        consumed = m.end();
    }
    let tail = &buffer[consumed..];
    tail.contains('<')
}

/// Largest offset `N` such that `buffer[0..N)` can be flushed without
/// risking splitting a marker. If no markers are present, `N = length`.
pub fn safe_text_boundary(buffer: &str) -> usize {
    match buffer.rfind('<') {
        Some(idx) => idx,
        None => buffer.len(),
    }
}

/// Parse a `{dataComponents: [...]}`-shaped value. Each element is a
/// `{id, name, props}` triple; elements named `"Artifact"` emit a `Data`
/// part of kind [`DataPartKind::Artifact`], all others a `Data` part of
/// kind [`DataPartKind::Component`]. Idempotent: the same input always
/// produces the same output.
pub fn parse_object(element: &serde_json::Value) -> Option<StreamPart> {
    let id = element.get("id")?.as_str()?.to_string();
    let name = element.get("name")?.as_str()?.to_string();
    let props = element.get("props")?.as_object()?.clone();

    if name == "Artifact" {
        let artifact_id = props.get("artifact_id")?.as_str()?.to_string();
        let task_id = props.get("task_id")?.as_str()?.to_string();
        let payload = ArtifactPayload {
            artifact_id: artifact_id.clone(),
            task_id,
            name: props
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            description: props
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            parts: Vec::new(),
            metadata: serde_json::Value::Object(props.clone()),
        };
        Some(StreamPart::Data {
            kind: DataPartKind::Artifact,
            id,
            payload: serde_json::to_value(payload).ok()?,
        })
    } else {
        let payload = ComponentPayload {
            component_type: name,
            props,
        };
        Some(StreamPart::Data {
            kind: DataPartKind::Component,
            id,
            payload: serde_json::to_value(payload).ok()?,
        })
    }
}

/// Whether a `dataComponents` element is "complete" per §4.3 step 2: has an
/// `id`, a `name`, non-empty `props`, and — for `name = "Artifact"` —
/// `props.artifact_id` and `props.task_id` both present.
pub fn element_is_complete(element: &serde_json::Value) -> bool {
    let Some(id) = element.get("id").and_then(|v| v.as_str()) else {
        return false;
    };
    let Some(name) = element.get("name").and_then(|v| v.as_str()) else {
        return false;
    };
    let Some(props) = element.get("props").and_then(|v| v.as_object()) else {
        return false;
    };
    if id.is_empty() || name.is_empty() || props.is_empty() {
        return false;
    }
    if name == "Artifact" {
        return props.contains_key("artifact_id") && props.contains_key("task_id");
    }
    true
}

/// Content hash for dedup: the JSON encoding of `element` with `name`
/// removed, so a later delta that only touches bookkeeping fields is
/// treated as the same emission.
pub fn element_hash(element: &serde_json::Value) -> String {
    let mut clone = element.clone();
    if let Some(obj) = clone.as_object_mut() {
        obj.remove("name");
    }
    clone.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_with_ref_marker_splits_into_parts() {
        let parts = parse_text(r#"Here: <artifact:ref id="a1" task="t1"/> done"#);
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], StreamPart::Text(s) if s == "Here: "));
        assert!(matches!(&parts[2], StreamPart::Text(s) if s == " done"));
    }

    #[test]
    fn text_with_create_marker_captures_body() {
        let parts = parse_text(r#"<artifact:create id="a1" type="code">fn main() {}</artifact>"#);
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            StreamPart::Data { payload, .. } => {
                assert_eq!(payload["body"], "fn main() {}");
            }
            _ => panic!("expected data part"),
        }
    }

    #[test]
    fn incomplete_marker_detected() {
        assert!(has_incomplete_marker(r#"Report <artifact:ref id="x" "#));
        assert!(!has_incomplete_marker("Report done."));
    }

    #[test]
    fn safe_boundary_stops_before_open_angle() {
        assert_eq!(safe_text_boundary("abc<artifact"), 3);
        assert_eq!(safe_text_boundary("no markers here"), 16);
    }

    #[test]
    fn artifact_without_task_id_is_incomplete() {
        let element = serde_json::json!({
            "id": "c1",
            "name": "Artifact",
            "props": {"artifact_id": "a1"},
        });
        assert!(!element_is_complete(&element));
    }

    #[test]
    fn element_hash_ignores_name() {
        let a = serde_json::json!({"id": "c1", "name": "Weather", "props": {"temp": 72}});
        let b = serde_json::json!({"id": "c1", "name": "WeatherV2", "props": {"temp": 72}});
        assert_eq!(element_hash(&a), element_hash(&b));
    }

    #[test]
    fn parse_object_component_round_trip() {
        let element = serde_json::json!({
            "id": "c1",
            "name": "Weather",
            "props": {"temp": 72},
        });
        let part = parse_object(&element).unwrap();
        match part {
            StreamPart::Data { kind, payload, .. } => {
                assert_eq!(kind, DataPartKind::Component);
                assert_eq!(payload["temp"], 72);
            }
            _ => panic!("expected data part"),
        }
    }
}
