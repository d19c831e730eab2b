#![forbid(unsafe_code)]

//! Incremental scanner for the bulk payload.
//!
//! The payload is either a top-level JSON array of records or an object whose
//! `records_field` holds that array. The scanner walks raw bytes, tracking only
//! string/escape state and bracket nesting, and carries nothing across chunks
//! except the bytes of the element it is currently inside. Each completed
//! element is decoded on its own, so a malformed element costs only itself.

use dv_core::Record;
use serde::Serialize;

const PREVIEW_BYTES: usize = 160;
/// Element buffers that grew past this are released after use.
const RETAIN_CAPACITY: usize = 1024 * 1024;

/// Depth-1 field of an object envelope other than the records array.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetaField {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    pub bytes: u64,
    pub elements: u64,
    pub records: u64,
    pub malformed: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ObjectState {
    ExpectKey,
    Key,
    ExpectColon,
    ExpectValue,
    /// Capturing a metadata value.
    Value,
    /// Records array closed; waiting for `,` or `}`.
    AfterRecords,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Frame {
    /// Before the root value.
    Start,
    Envelope(ObjectState),
    Records { in_envelope: bool },
    /// Root value closed, or the root was not a container.
    Done,
}

pub struct RecordParser {
    records_field: String,
    frame: Frame,
    nesting: usize,
    in_string: bool,
    escaped: bool,
    fragment: Vec<u8>,
    key: Vec<u8>,
    current_key: String,
    metadata: Vec<MetaField>,
    stats: ParserStats,
}

impl RecordParser {
    pub fn new(records_field: impl Into<String>) -> Self {
        Self {
            records_field: records_field.into(),
            frame: Frame::Start,
            nesting: 0,
            in_string: false,
            escaped: false,
            fragment: Vec::new(),
            key: Vec::new(),
            current_key: String::new(),
            metadata: Vec::new(),
            stats: ParserStats::default(),
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn metadata(&self) -> &[MetaField] {
        &self.metadata
    }

    pub fn take_metadata(&mut self) -> Vec<MetaField> {
        std::mem::take(&mut self.metadata)
    }

    /// Scans `chunk` and returns every record completed inside it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Record> {
        let mut out = Vec::new();
        self.stats.bytes += chunk.len() as u64;
        for &byte in chunk {
            self.step(byte, &mut out);
        }
        out
    }

    /// Ends the stream. An element cut off by end of input is still decoded
    /// if its bytes form a complete value.
    pub fn finish(&mut self) -> Vec<Record> {
        let mut out = Vec::new();
        match self.frame {
            Frame::Records { .. } => {
                if !self.fragment.is_empty() {
                    self.emit_record(&mut out);
                }
            }
            Frame::Envelope(ObjectState::Value) => {
                if !self.fragment.is_empty() {
                    self.emit_metadata();
                }
            }
            _ => {}
        }
        if !matches!(self.frame, Frame::Done | Frame::Start) {
            tracing::debug!(bytes = self.stats.bytes, "payload ended before its root closed");
        }
        self.frame = Frame::Done;
        out
    }

    fn step(&mut self, byte: u8, out: &mut Vec<Record>) {
        if self.in_string {
            self.string_byte(byte);
            return;
        }

        match self.frame {
            Frame::Start => match byte {
                b'[' => self.frame = Frame::Records { in_envelope: false },
                b'{' => self.frame = Frame::Envelope(ObjectState::ExpectKey),
                b if b.is_ascii_whitespace() => {}
                _ => {
                    tracing::warn!("payload root is neither an array nor an object");
                    self.frame = Frame::Done;
                }
            },
            Frame::Records { in_envelope } => self.records_byte(byte, in_envelope, out),
            Frame::Envelope(state) => self.envelope_byte(byte, state),
            Frame::Done => {}
        }
    }

    fn string_byte(&mut self, byte: u8) {
        if matches!(self.frame, Frame::Envelope(ObjectState::Key)) {
            self.key.push(byte);
        } else {
            self.fragment.push(byte);
        }

        if self.escaped {
            self.escaped = false;
        } else if byte == b'\\' {
            self.escaped = true;
        } else if byte == b'"' {
            self.in_string = false;
            if matches!(self.frame, Frame::Envelope(ObjectState::Key)) {
                self.current_key = serde_json::from_slice::<String>(&self.key)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&self.key).into_owned());
                self.frame = Frame::Envelope(ObjectState::ExpectColon);
            }
        }
    }

    /// Tracks nesting inside a captured value. Returns false when `byte` is a
    /// delimiter of the enclosing container and was not consumed.
    fn value_byte(&mut self, byte: u8, close: u8) -> bool {
        if self.nesting == 0 {
            if byte == b',' || byte == close {
                return false;
            }
            if byte.is_ascii_whitespace() {
                return true;
            }
        }
        match byte {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.nesting += 1,
            b'}' | b']' => self.nesting = self.nesting.saturating_sub(1),
            _ => {}
        }
        self.fragment.push(byte);
        true
    }

    fn records_byte(&mut self, byte: u8, in_envelope: bool, out: &mut Vec<Record>) {
        if self.value_byte(byte, b']') {
            return;
        }
        if !self.fragment.is_empty() {
            self.emit_record(out);
        }
        if byte == b']' {
            self.frame = if in_envelope {
                Frame::Envelope(ObjectState::AfterRecords)
            } else {
                Frame::Done
            };
        }
    }

    fn envelope_byte(&mut self, byte: u8, state: ObjectState) {
        match state {
            ObjectState::ExpectKey => match byte {
                b'"' => {
                    self.key.clear();
                    self.key.push(byte);
                    self.in_string = true;
                    self.frame = Frame::Envelope(ObjectState::Key);
                }
                b'}' => self.frame = Frame::Done,
                _ => {}
            },
            ObjectState::Key => {}
            ObjectState::ExpectColon => {
                if byte == b':' {
                    self.frame = Frame::Envelope(ObjectState::ExpectValue);
                }
            }
            ObjectState::ExpectValue => {
                if byte.is_ascii_whitespace() {
                    return;
                }
                if byte == b'[' && self.current_key == self.records_field {
                    self.frame = Frame::Records { in_envelope: true };
                    return;
                }
                self.fragment.clear();
                self.nesting = 0;
                self.frame = Frame::Envelope(ObjectState::Value);
                self.value_byte(byte, b'}');
            }
            ObjectState::Value => {
                if self.value_byte(byte, b'}') {
                    return;
                }
                self.emit_metadata();
                self.frame = if byte == b'}' {
                    Frame::Done
                } else {
                    Frame::Envelope(ObjectState::ExpectKey)
                };
            }
            ObjectState::AfterRecords => match byte {
                b',' => self.frame = Frame::Envelope(ObjectState::ExpectKey),
                b'}' => self.frame = Frame::Done,
                _ => {}
            },
        }
    }

    fn emit_record(&mut self, out: &mut Vec<Record>) {
        self.stats.elements += 1;
        let ordinal = self.stats.elements;
        match Record::decode(&self.fragment) {
            Ok(record) => {
                self.stats.records += 1;
                out.push(record);
            }
            Err(err) => {
                self.stats.malformed += 1;
                tracing::warn!(
                    ordinal,
                    error = %err,
                    preview = %preview(&self.fragment),
                    "skipping malformed record"
                );
            }
        }
        self.reset_fragment();
    }

    fn emit_metadata(&mut self) {
        match serde_json::from_slice::<serde_json::Value>(&self.fragment) {
            Ok(value) => self.metadata.push(MetaField {
                key: std::mem::take(&mut self.current_key),
                value,
            }),
            Err(err) => tracing::warn!(
                key = %self.current_key,
                error = %err,
                preview = %preview(&self.fragment),
                "skipping malformed metadata field"
            ),
        }
        self.reset_fragment();
    }

    fn reset_fragment(&mut self) {
        self.nesting = 0;
        self.escaped = false;
        self.in_string = false;
        if self.fragment.capacity() > RETAIN_CAPACITY {
            self.fragment = Vec::new();
        } else {
            self.fragment.clear();
        }
    }
}

fn preview(bytes: &[u8]) -> String {
    let cut = bytes.len().min(PREVIEW_BYTES);
    let mut text = String::from_utf8_lossy(&bytes[..cut]).into_owned();
    if bytes.len() > cut {
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"[
        {"obj_name":"uid=a,cn=users,dc=example,dc=test","obj_type":"person","change_type":"changed",
         "all_attributes":{"l":{"backup_values":["Old, \"quoted\" ]}"],"ldap_values":["New"]}},
         "changed_attributes":{"l":"0"}},
        {"obj_name":"cn=b,dc=example,dc=test","obj_type":"group","change_type":"deleted"},
        {"name":"c","object_type":"container","change_type":"moved"}
    ]"#;

    fn names(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    fn parse_split(payload: &[u8], at: usize) -> (Vec<Record>, RecordParser) {
        let mut parser = RecordParser::new("result");
        let mut records = parser.feed(&payload[..at]);
        records.extend(parser.feed(&payload[at..]));
        records.extend(parser.finish());
        (records, parser)
    }

    #[test]
    fn every_split_point_yields_the_same_records() {
        let bytes = PAYLOAD.as_bytes();
        let (whole, _) = parse_split(bytes, bytes.len());
        assert_eq!(
            names(&whole),
            ["uid=a,cn=users,dc=example,dc=test", "cn=b,dc=example,dc=test", "c"]
        );
        for at in 0..=bytes.len() {
            let (split, parser) = parse_split(bytes, at);
            assert_eq!(split, whole, "split at {at}");
            assert_eq!(parser.stats().records, 3);
            assert_eq!(parser.stats().malformed, 0);
        }
    }

    #[test]
    fn single_byte_chunks() {
        let mut parser = RecordParser::new("result");
        let mut records = Vec::new();
        for byte in PAYLOAD.as_bytes() {
            records.extend(parser.feed(std::slice::from_ref(byte)));
        }
        records.extend(parser.finish());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].depth, 2);
        assert!(records[0].changed_attributes.contains("l"));
        let l = records[0]
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get("l"))
            .expect("attribute l");
        assert_eq!(l.previous, vec![r#"Old, "quoted" ]}"#.to_string()]);
    }

    #[test]
    fn malformed_element_is_skipped() {
        let payload = br#"[{"name":"a","object_type":"t","change_type":"changed"},
            {"name":"b","object_type":,"change_type":"changed"},
            42,
            {"name":"c","object_type":"t","change_type":"moved"}]"#;
        let mut parser = RecordParser::new("result");
        let mut records = parser.feed(payload);
        records.extend(parser.finish());
        assert_eq!(names(&records), ["a", "c"]);
        let stats = parser.stats();
        assert_eq!(stats.elements, 4);
        assert_eq!(stats.malformed, 2);
    }

    #[test]
    fn envelope_exposes_metadata_and_named_array() {
        let payload = br#"{"total": 2, "source": {"host": "ldap"},
            "result": [{"name":"a","object_type":"t","change_type":"changed"},
                       {"name":"b","object_type":"t","change_type":"moved"}],
            "complete": true}"#;
        for at in 0..=payload.len() {
            let (records, mut parser) = parse_split(payload, at);
            assert_eq!(names(&records), ["a", "b"], "split at {at}");
            let meta = parser.take_metadata();
            let keys: Vec<&str> = meta.iter().map(|m| m.key.as_str()).collect();
            assert_eq!(keys, ["total", "source", "complete"], "split at {at}");
            assert_eq!(meta[0].value, serde_json::json!(2));
            assert_eq!(meta[2].value, serde_json::json!(true));
        }
    }

    #[test]
    fn other_arrays_in_envelope_are_not_records() {
        let payload = br#"{"warnings":[{"name":"x","object_type":"t","change_type":"c"}],"result":[]}"#;
        let (records, parser) = parse_split(payload, 7);
        assert!(records.is_empty());
        assert_eq!(parser.metadata().len(), 1);
        assert_eq!(parser.metadata()[0].key, "warnings");
    }

    #[test]
    fn truncated_stream_keeps_completed_element() {
        let payload = br#"[{"name":"a","object_type":"t","change_type":"changed"},{"name":"b","obj"#;
        let mut parser = RecordParser::new("result");
        let mut records = parser.feed(payload);
        assert_eq!(names(&records), ["a"]);
        records.extend(parser.finish());
        assert_eq!(names(&records), ["a"]);
        assert_eq!(parser.stats().malformed, 1);

        let mut parser = RecordParser::new("result");
        let mut records = parser.feed(br#"[{"name":"z","object_type":"t","change_type":"c"}"#);
        records.extend(parser.finish());
        assert_eq!(names(&records), ["z"]);
    }

    #[test]
    fn scalar_root_yields_nothing() {
        let mut parser = RecordParser::new("result");
        assert!(parser.feed(b"  \"just a string\"").is_empty());
        assert!(parser.finish().is_empty());
    }
}
