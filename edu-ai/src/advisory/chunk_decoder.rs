// Chunk Decoder
//
// Concept: Turn raw transport bytes into ordered StreamFragments
// Synchronization: Fed by the session read loop, output consumed by ContentAccumulator
//
// Framing (server-push event stream):
// - `data: <json>`     payload line, text extracted from the JSON body
// - `data: [DONE]`     terminal sentinel
// - `data: {"error":…}` backend failure, terminal without an end fragment
// - `: ...`            keep-alive comment, ignored
// - `event:`/`id:`/`retry:` fields and blank separators, ignored
//
// Lines may be split across transport chunks (including inside a multibyte
// UTF-8 character); the undecoded tail is kept as a byte residue until its
// newline arrives.

use crate::advisory::types::{AdvisoryError, AdvisoryResult, StreamFragment};
use tracing::{debug, warn};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Incremental line decoder for the LLM event stream
#[derive(Debug)]
pub struct ChunkDecoder {
    /// Bytes after the last newline seen
    residue: Vec<u8>,
    /// Sequence number for the next emitted fragment
    next_sequence: u64,
    /// Sentinel (or end of transport) seen; further input ignored
    finished: bool,
    /// Whether the first line has been checked for a UTF-8 BOM
    bom_checked: bool,
    /// Payload lines dropped as malformed
    skipped_lines: u64,
    /// Error reported in-band by the backend
    failure: Option<AdvisoryError>,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            residue: Vec::new(),
            next_sequence: 1,
            finished: false,
            bom_checked: false,
            skipped_lines: 0,
            failure: None,
        }
    }

    /// Decode one transport chunk into zero or more fragments
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<StreamFragment> {
        let mut fragments = Vec::new();
        if self.finished {
            return fragments;
        }

        self.residue.extend_from_slice(chunk);

        let mut start = 0usize;
        while let Some(rel) = self.residue[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            let line = self.residue[start..end].to_vec();
            start = end + 1;

            self.process_line(&line, &mut fragments);
            if self.finished {
                self.residue.clear();
                return fragments;
            }
        }

        self.residue.drain(..start);
        fragments
    }

    /// Flush at end of transport
    ///
    /// Processes an unterminated last line and emits the final fragment if
    /// the sentinel never arrived. A clean end of transport counts as
    /// end-of-stream.
    pub fn finish(&mut self) -> Vec<StreamFragment> {
        let mut fragments = Vec::new();
        if self.finished {
            return fragments;
        }

        if !self.residue.is_empty() {
            let line = std::mem::take(&mut self.residue);
            self.process_line(&line, &mut fragments);
        }

        if !self.finished {
            debug!("Transport ended without sentinel, closing stream");
            self.emit_end(&mut fragments);
        }
        fragments
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Backend error seen in the stream, if any
    ///
    /// Once set the decoder is finished and never emits the end fragment.
    pub fn take_failure(&mut self) -> Option<AdvisoryError> {
        self.failure.take()
    }

    /// Count of payload lines skipped as malformed
    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    fn process_line(&mut self, raw: &[u8], out: &mut Vec<StreamFragment>) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

        let mut line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                self.skipped_lines += 1;
                warn!(error = %e, "Skipping stream line with invalid UTF-8");
                return;
            }
        };

        if !self.bom_checked {
            self.bom_checked = true;
            line = line.strip_prefix('\u{FEFF}').unwrap_or(line);
        }

        let Some(value) = line.strip_prefix(DATA_PREFIX) else {
            // Blank separators, comments/keep-alives, other event fields
            return;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        if value.trim() == DONE_SENTINEL {
            self.emit_end(out);
            return;
        }

        match payload_text(value) {
            Ok(Some(text)) => {
                let sequence = self.take_sequence();
                out.push(StreamFragment::text(sequence, text));
            }
            Ok(None) => {}
            Err(e @ AdvisoryError::Transport(_)) => {
                warn!(error = %e, "Backend reported an error mid-stream");
                self.failure = Some(e);
                self.finished = true;
            }
            Err(e) => {
                self.skipped_lines += 1;
                warn!(error = %e, "Skipping malformed payload line");
            }
        }
    }

    fn emit_end(&mut self, out: &mut Vec<StreamFragment>) {
        let sequence = self.take_sequence();
        out.push(StreamFragment::end(sequence));
        self.finished = true;
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

/// Extract the text delta carried by one payload
///
/// Recognized shapes, in order:
/// - `{"choices":[{"delta":{"content":"..."}}]}` (chat completions)
/// - `{"choices":[{"text":"..."}]}` (legacy completions)
/// - `{"delta":{"text":"..."}}` (content block deltas)
/// - `{"content":"..."}` / `{"text":"..."}`
/// - a bare JSON string
///
/// Returns `Ok(None)` for well-formed payloads carrying no text (role-only
/// deltas, usage records, empty strings). An `error` member is a
/// `Transport` error; other unusable payloads are `Framing` errors.
pub fn payload_text(payload: &str) -> AdvisoryResult<Option<String>> {
    let json: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| AdvisoryError::Framing(format!("payload is not JSON: {}", e)))?;

    if let Some(err) = json.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(AdvisoryError::Transport(format!(
            "backend reported error: {}",
            message
        )));
    }

    let text = match &json {
        serde_json::Value::String(s) => Some(s.as_str()),
        serde_json::Value::Object(_) => {
            let choice = json.get("choices").and_then(|c| c.get(0));
            choice
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(|t| t.as_str())
                .or_else(|| choice.and_then(|c| c.get("text")).and_then(|t| t.as_str()))
                .or_else(|| {
                    json.get("delta")
                        .and_then(|d| d.get("text"))
                        .and_then(|t| t.as_str())
                })
                .or_else(|| json.get("content").and_then(|t| t.as_str()))
                .or_else(|| json.get("text").and_then(|t| t.as_str()))
        }
        _ => {
            return Err(AdvisoryError::Framing(
                "payload is neither an object nor a string".to_string(),
            ))
        }
    };

    Ok(text.filter(|t| !t.is_empty()).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    #[test]
    fn test_decodes_payloads_and_sentinel() {
        let mut decoder = ChunkDecoder::new();
        let input = format!("{}{}data: [DONE]\n\n", delta("Hello"), delta(" world"));

        let fragments = decoder.decode(input.as_bytes());

        assert_eq!(
            fragments,
            vec![
                StreamFragment::text(1, "Hello"),
                StreamFragment::text(2, " world"),
                StreamFragment::end(3),
            ]
        );
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = ChunkDecoder::new();
        let input = delta("split");
        let (a, b) = input.as_bytes().split_at(12);

        assert!(decoder.decode(a).is_empty());
        assert_eq!(decoder.decode(b), vec![StreamFragment::text(1, "split")]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut decoder = ChunkDecoder::new();
        let input = delta("café");
        let bytes = input.as_bytes();
        // Split inside the two-byte 'é'
        let cut = input.find('é').unwrap() + 1;

        assert!(decoder.decode(&bytes[..cut]).is_empty());
        assert_eq!(
            decoder.decode(&bytes[cut..]),
            vec![StreamFragment::text(1, "café")]
        );
    }

    #[test]
    fn test_keepalives_and_fields_are_ignored() {
        let mut decoder = ChunkDecoder::new();
        let input = ": keep-alive\r\nevent: message\r\nid: 7\r\nretry: 100\r\n\r\ndata: {\"text\":\"x\"}\r\n";

        assert_eq!(
            decoder.decode(input.as_bytes()),
            vec![StreamFragment::text(1, "x")]
        );
        assert_eq!(decoder.skipped_lines(), 0);
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let mut decoder = ChunkDecoder::new();
        let input = format!("data: {{not json\n{}", delta("ok"));

        let fragments = decoder.decode(input.as_bytes());

        assert_eq!(fragments, vec![StreamFragment::text(1, "ok")]);
        assert_eq!(decoder.skipped_lines(), 1);
    }

    #[test]
    fn test_role_only_delta_yields_nothing() {
        let mut decoder = ChunkDecoder::new();
        let input = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n";
        assert!(decoder.decode(input.as_bytes()).is_empty());
        assert_eq!(decoder.skipped_lines(), 0);
    }

    #[test]
    fn test_finish_without_sentinel_emits_end() {
        let mut decoder = ChunkDecoder::new();
        let input = "data: {\"content\":\"tail\"}";

        assert!(decoder.decode(input.as_bytes()).is_empty());
        assert_eq!(
            decoder.finish(),
            vec![StreamFragment::text(1, "tail"), StreamFragment::end(2)]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_empty_stream_yields_only_end() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(b"").is_empty());
        assert_eq!(decoder.finish(), vec![StreamFragment::end(1)]);
    }

    #[test]
    fn test_input_after_sentinel_is_ignored() {
        let mut decoder = ChunkDecoder::new();
        let input = format!("data: [DONE]\n{}", delta("late"));

        assert_eq!(decoder.decode(input.as_bytes()), vec![StreamFragment::end(1)]);
        assert!(decoder.decode(delta("later").as_bytes()).is_empty());
    }

    #[test]
    fn test_payload_shapes() {
        assert_eq!(
            payload_text(r#"{"choices":[{"text":"legacy"}]}"#).unwrap(),
            Some("legacy".to_string())
        );
        assert_eq!(
            payload_text(r#"{"type":"content_block_delta","delta":{"text":"block"}}"#).unwrap(),
            Some("block".to_string())
        );
        assert_eq!(payload_text(r#""bare""#).unwrap(), Some("bare".to_string()));
        assert_eq!(payload_text(r#"{"content":""}"#).unwrap(), None);
        assert!(payload_text("42").is_err());
        assert!(matches!(
            payload_text(r#"{"error":{"message":"overloaded"}}"#),
            Err(AdvisoryError::Transport(m)) if m.contains("overloaded")
        ));
    }

    #[test]
    fn test_error_payload_ends_stream_without_end_fragment() {
        let mut decoder = ChunkDecoder::new();
        let input = format!(
            "{}data: {{\"error\":{{\"message\":\"rate limited\"}}}}\n\n{}data: [DONE]\n\n",
            delta("partial"),
            delta("ignored")
        );

        let fragments = decoder.decode(input.as_bytes());

        assert_eq!(fragments, vec![StreamFragment::text(1, "partial")]);
        assert!(decoder.is_finished());
        assert_eq!(decoder.skipped_lines(), 0);
        assert!(decoder.finish().is_empty());
        let failure = decoder.take_failure().expect("error payload is recorded");
        assert!(failure.to_string().contains("rate limited"));
        assert!(decoder.take_failure().is_none());
    }
}
