use serde::{Deserialize, Serialize};

use super::tree::{ROOT_WORKFLOW, RowKind};
use crate::stdlib::EVENT_PREFIX;

/// Which edge of a step an event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepPhase {
    /// Emitted before the step body runs.
    StepStart,
    /// Emitted after the step body finished.
    StepEnd,
}

/// One `__JAIPH_EVENT__` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Start or end.
    #[serde(rename = "type")]
    pub phase: StepPhase,
    /// Canonical shell function name, e.g. `main__rule_ready`.
    pub func: String,
    /// Kind as reported by the runtime.
    pub kind: String,
    /// Short name as reported by the runtime.
    pub name: String,
    /// UTC timestamp.
    #[serde(default)]
    pub ts: String,
    /// Exit status (end only).
    #[serde(default)]
    pub status: Option<i32>,
    /// Wall time in milliseconds (end only).
    #[serde(default)]
    pub elapsed_ms: Option<i64>,
    /// Captured stdout file (end only).
    #[serde(default)]
    pub out_file: Option<String>,
    /// Captured stderr file (end only).
    #[serde(default)]
    pub err_file: Option<String>,
}

impl StepEvent {
    /// Row kind and short name derived from [`StepEvent::func`].
    pub fn step(&self) -> (RowKind, &str) {
        classify_func(&self.func)
    }

    /// True for the entry module's `default` workflow, which the root row
    /// stands for. A `default` workflow of an imported module is not the root.
    pub fn is_root(&self, entry_symbol: &str) -> bool {
        self.func
            .strip_prefix(entry_symbol)
            .and_then(|rest| rest.strip_prefix("__workflow_"))
            == Some(ROOT_WORKFLOW)
    }

    /// Exit status, treating a missing value as failure.
    pub fn exit_status(&self) -> i32 {
        self.status.unwrap_or(1)
    }

    /// Whole seconds, never negative.
    pub fn elapsed_secs(&self) -> u64 {
        u64::try_from(self.elapsed_ms.unwrap_or(0).max(0) / 1000).unwrap_or_default()
    }
}

/// Parse a diagnostic line. Anything that is not a well-formed event,
/// including JSON that fails to decode, yields `None`.
pub fn parse_event(line: &str) -> Option<StepEvent> {
    let payload = line.strip_prefix(EVENT_PREFIX)?;
    serde_json::from_str(payload).ok()
}

/// Map a canonical function name onto a row kind and short name. The kind
/// marker closest to the start wins, so names may themselves contain one.
pub fn classify_func(func: &str) -> (RowKind, &str) {
    let first = [
        ("__workflow_", RowKind::Workflow),
        ("__rule_", RowKind::Rule),
        ("__function_", RowKind::Function),
    ]
    .into_iter()
    .filter_map(|(marker, kind)| func.find(marker).map(|index| (index + marker.len(), kind)))
    .min_by_key(|&(start, _)| start);
    if let Some((start, kind)) = first {
        return (kind, &func[start..]);
    }
    if func == "jaiph__prompt" {
        return (RowKind::Prompt, "prompt");
    }
    (RowKind::Step, func)
}

/// Splits a byte stream into complete lines. Partial trailing data is kept
/// until the next chunk or [`LineBuffer::finish`].
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without the
    /// trailing `\n` or `\r\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(&line[..newline]));
        }
        lines
    }

    /// Flush whatever is left as a final line.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(decode_line(&line))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_end_event() {
        let line = r#"__JAIPH_EVENT__ {"type":"STEP_END","func":"lib__git__rule_clean","kind":"rule","name":"clean","ts":"2026-01-01T00:00:00Z","status":3,"elapsed_ms":2999,"out_file":"/r/a.out","err_file":"/r/a.err"}"#;
        let event = parse_event(line).expect("event");
        assert_eq!(event.phase, StepPhase::StepEnd);
        assert_eq!(event.step(), (RowKind::Rule, "clean"));
        assert_eq!(event.exit_status(), 3);
        assert_eq!(event.elapsed_secs(), 2);
        assert_eq!(event.err_file.as_deref(), Some("/r/a.err"));
    }

    #[test]
    fn start_event_has_optional_fields_absent() {
        let line = r#"__JAIPH_EVENT__ {"type":"STEP_START","func":"main__workflow_default","kind":"workflow","name":"default"}"#;
        let event = parse_event(line).expect("event");
        assert!(event.is_root("main"));
        assert!(!event.is_root("lib"));
        assert_eq!(event.status, None);
        assert_eq!(event.exit_status(), 1);
    }

    #[test]
    fn rejects_non_events() {
        assert!(parse_event("plain diagnostic").is_none());
        assert!(parse_event("__JAIPH_EVENT__ {not json").is_none());
        assert!(parse_event(r#"__JAIPH_EVENT__ {"type":"OTHER","func":"f","kind":"k","name":"n"}"#).is_none());
        assert!(parse_event(r#"__JAIPH_EVENT__ {"type":"STEP_END","kind":"k","name":"n"}"#).is_none());
    }

    #[test]
    fn classifies_function_names() {
        assert_eq!(classify_func("a__b__workflow_deploy"), (RowKind::Workflow, "deploy"));
        assert_eq!(classify_func("m__function_notify"), (RowKind::Function, "notify"));
        assert_eq!(classify_func("jaiph__prompt"), (RowKind::Prompt, "prompt"));
        assert_eq!(classify_func("other"), (RowKind::Step, "other"));
    }

    #[test]
    fn names_containing_a_kind_marker_keep_their_kind() {
        assert_eq!(classify_func("m__function_x__rule_y"), (RowKind::Function, "x__rule_y"));
        assert_eq!(classify_func("m__rule_a__workflow_b"), (RowKind::Rule, "a__workflow_b"));
    }

    #[test]
    fn imported_default_workflow_is_not_the_root() {
        let line = r#"__JAIPH_EVENT__ {"type":"STEP_START","func":"lib__workflow_default","kind":"workflow","name":"default"}"#;
        let event = parse_event(line).expect("event");
        assert!(!event.is_root("main"));
        assert!(event.is_root("lib"));
        let nested = r#"__JAIPH_EVENT__ {"type":"STEP_START","func":"main__sub__workflow_default","kind":"workflow","name":"default"}"#;
        assert!(!parse_event(nested).expect("event").is_root("main"));
    }

    #[test]
    fn negative_elapsed_clamps_to_zero() {
        let line = r#"__JAIPH_EVENT__ {"type":"STEP_END","func":"m__rule_r","kind":"rule","name":"r","status":0,"elapsed_ms":-5}"#;
        assert_eq!(parse_event(line).expect("event").elapsed_secs(), 0);
    }

    #[test]
    fn buffers_partial_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"first par").is_empty());
        assert_eq!(buffer.push(b"t\r\nsecond\nthi"), vec!["first part", "second"]);
        assert_eq!(buffer.push(b"rd\n"), vec!["third"]);
        assert_eq!(buffer.finish(), None);
        buffer.push(b"tail");
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn multibyte_characters_split_across_chunks() {
        let bytes = "✓ ok\n".as_bytes();
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&bytes[..1]).is_empty());
        assert_eq!(buffer.push(&bytes[1..]), vec!["✓ ok"]);
    }
}
