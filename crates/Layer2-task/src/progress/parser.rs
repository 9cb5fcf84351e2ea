//! Checkpoint line parser
//!
//! Three encodings are tolerated, tried in this order:
//!
//! | Encoding | Example |
//! |----------|---------|
//! | call     | `CHECKPOINT('build', 'percent=40 message="compiling"')` |
//! | json     | `CHECKPOINT build {"percent": 40}` |
//! | bare     | `CHECKPOINT build percent=40 message="compiling"` |
//!
//! A json line whose payload does not parse is retried as bare; the bare
//! matcher only accepts `key=value` tokens, so such a line yields nothing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a checkpoint was written in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Call,
    Json,
    Bare,
}

/// A named progress marker extracted from output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub name: String,
    pub data: Map<String, Value>,
    pub encoding: Encoding,
}

impl CheckpointRecord {
    /// Progress percentage carried by the record, clamped to 0-100
    pub fn percent(&self) -> Option<f64> {
        ["percent", "percentage", "progress"]
            .iter()
            .filter_map(|key| self.data.get(*key))
            .find_map(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim_end_matches('%').parse().ok(),
                _ => None,
            })
            .map(|p: f64| p.clamp(0.0, 100.0))
    }

    /// Human readable message; falls back to the checkpoint name
    pub fn message(&self) -> String {
        ["message", "msg"]
            .iter()
            .find_map(|key| self.data.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| self.name.clone())
    }
}

const NAME: &str = r"[A-Za-z0-9_.:\-]+";

fn matcher_patterns() -> Vec<(Encoding, String)> {
    vec![
        (
            Encoding::Call,
            format!(
                r#"CHECKPOINT\(\s*['"]({name})['"]\s*(?:,\s*(?:'([^']*)'|"([^"]*)"))?\s*\)"#,
                name = NAME
            ),
        ),
        (
            Encoding::Json,
            format!(r"\bCHECKPOINT\s+({name})\s+(\{{.*\}})\s*$", name = NAME),
        ),
        (
            Encoding::Bare,
            format!(r"\bCHECKPOINT\s+({name})(?:\s+(.*?))?\s*$", name = NAME),
        ),
    ]
}

/// Ordered set of pattern matchers; the first successful parse wins
#[derive(Debug, Clone)]
pub struct ProgressParser {
    matchers: Vec<(Encoding, Regex)>,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        let matchers = matcher_patterns()
            .into_iter()
            .filter_map(|(enc, p)| Regex::new(&p).ok().map(|re| (enc, re)))
            .collect();
        Self { matchers }
    }

    /// Extract at most one record from a single line
    pub fn parse_line(&self, line: &str) -> Option<CheckpointRecord> {
        let clean = strip_ansi_escapes::strip_str(line);
        if !clean.contains("CHECKPOINT") {
            return None;
        }

        self.matchers.iter().find_map(|(encoding, re)| {
            let caps = re.captures(&clean)?;
            let name = caps.get(1)?.as_str().to_string();
            let payload = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");

            let data = match encoding {
                Encoding::Json => match serde_json::from_str::<Value>(payload) {
                    Ok(Value::Object(map)) => map,
                    _ => return None,
                },
                Encoding::Call | Encoding::Bare => parse_pairs(payload)?,
            };

            Some(CheckpointRecord {
                name,
                data,
                encoding: *encoding,
            })
        })
    }

    /// Extract every record from a block of output, in order
    pub fn parse_block(&self, text: &str) -> Vec<CheckpointRecord> {
        text.lines().filter_map(|l| self.parse_line(l)).collect()
    }
}

/// `key=value` tokens, shell quoting allowed; any other token rejects the line
fn parse_pairs(payload: &str) -> Option<Map<String, Value>> {
    let mut data = Map::new();
    if payload.trim().is_empty() {
        return Some(data);
    }

    for token in shlex::split(payload)? {
        let (key, value) = token.split_once('=')?;
        if !is_key(key) {
            return None;
        }
        data.insert(key.to_string(), coerce(value));
    }
    Some(data)
}

fn is_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn coerce(value: &str) -> Value {
    if let Ok(i) = value.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = value.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_encoding() {
        let parser = ProgressParser::new();
        let rec = parser
            .parse_line(r#"CHECKPOINT('build', 'percent=40 message="compiling sources"')"#)
            .unwrap();
        assert_eq!(rec.encoding, Encoding::Call);
        assert_eq!(rec.name, "build");
        assert_eq!(rec.percent(), Some(40.0));
        assert_eq!(rec.message(), "compiling sources");

        let rec = parser.parse_line(r#"  CHECKPOINT("start")"#).unwrap();
        assert!(rec.data.is_empty());
        assert_eq!(rec.message(), "start");
    }

    #[test]
    fn test_json_encoding() {
        let parser = ProgressParser::new();
        let rec = parser
            .parse_line(r#"CHECKPOINT load {"percent": 75, "rows": 1200, "ok": true}"#)
            .unwrap();
        assert_eq!(rec.encoding, Encoding::Json);
        assert_eq!(rec.data.get("rows"), Some(&json!(1200)));
        assert_eq!(rec.percent(), Some(75.0));
    }

    #[test]
    fn test_bare_encoding_coerces_values() {
        let parser = ProgressParser::new();
        let rec = parser
            .parse_line("[worker] CHECKPOINT fetch percent=12.5 done=false host=db-1")
            .unwrap();
        assert_eq!(rec.encoding, Encoding::Bare);
        assert_eq!(rec.data.get("percent"), Some(&json!(12.5)));
        assert_eq!(rec.data.get("done"), Some(&json!(false)));
        assert_eq!(rec.data.get("host"), Some(&json!("db-1")));
    }

    #[test]
    fn test_malformed_json_yields_nothing() {
        let parser = ProgressParser::new();
        assert!(parser
            .parse_line(r#"CHECKPOINT broken {"percent": 10,"#)
            .is_none());
        assert!(parser.parse_line(r#"CHECKPOINT broken {not json}"#).is_none());
    }

    #[test]
    fn test_malformed_json_and_bare_line_gives_one_record() {
        let parser = ProgressParser::new();
        let output = "starting\n\
                      CHECKPOINT first {\"percent\": oops}\n\
                      CHECKPOINT second percent=50 message=halfway\n\
                      done\n";
        let records = parser.parse_block(output);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "second");
        assert_eq!(records[0].percent(), Some(50.0));
    }

    #[test]
    fn test_non_checkpoint_lines() {
        let parser = ProgressParser::new();
        assert!(parser.parse_line("hello world").is_none());
        assert!(parser.parse_line("CHECKPOINT").is_none());
        assert!(parser
            .parse_line("we reached CHECKPOINT alpha after a long time")
            .is_none());
    }

    #[test]
    fn test_ansi_codes_are_ignored() {
        let parser = ProgressParser::new();
        let rec = parser
            .parse_line("\x1b[32mCHECKPOINT green percent=100\x1b[0m")
            .unwrap();
        assert_eq!(rec.name, "green");
        assert_eq!(rec.percent(), Some(100.0));
    }

    #[test]
    fn test_percent_is_clamped() {
        let parser = ProgressParser::new();
        let rec = parser.parse_line("CHECKPOINT over percent=250").unwrap();
        assert_eq!(rec.percent(), Some(100.0));
        let rec = parser.parse_line("CHECKPOINT text progress=30%").unwrap();
        assert_eq!(rec.percent(), Some(30.0));
    }
}
