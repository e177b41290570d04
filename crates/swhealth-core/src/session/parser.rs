//! Structured parsing of command output.
//!
//! Parsers are best effort: `None` means "keep the raw text".

use serde_json::{Map, Value};

/// Turns raw command text into a structured payload.
pub trait OutputParser: Send + Sync {
    fn parse(&self, command: &str, raw: &str) -> Option<Value>;
}

/// Parses column-aligned tables such as `show interfaces status`.
///
/// The first non-empty line is the header; column boundaries are the start
/// offsets of its words. Each later line becomes an object keyed by the
/// lower-cased header words. Separator lines made of dashes are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TabularParser;

impl TabularParser {
    fn header_columns(line: &[char]) -> Vec<(usize, String)> {
        let mut columns = Vec::new();
        let mut i = 0;
        while i < line.len() {
            if line[i].is_whitespace() {
                i += 1;
                continue;
            }
            let start = i;
            while i < line.len() && !line[i].is_whitespace() {
                i += 1;
            }
            let name: String = line[start..i].iter().collect();
            columns.push((start, name.to_lowercase()));
        }
        columns
    }

    fn is_separator(line: &str) -> bool {
        let trimmed = line.trim();
        !trimmed.is_empty() && trimmed.chars().all(|c| c == '-' || c == '=' || c.is_whitespace())
    }
}

impl OutputParser for TabularParser {
    fn parse(&self, _command: &str, raw: &str) -> Option<Value> {
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<char> = lines.next()?.chars().collect();
        let columns = Self::header_columns(&header);
        if columns.len() < 2 {
            return None;
        }

        let mut rows = Vec::new();
        for line in lines {
            if Self::is_separator(line) {
                continue;
            }
            let chars: Vec<char> = line.chars().collect();
            let mut row = Map::new();
            for (idx, (start, name)) in columns.iter().enumerate() {
                // The last column runs to end of line.
                let end = columns
                    .get(idx + 1)
                    .map_or(chars.len(), |(next, _)| (*next).min(chars.len()));
                let start = (*start).min(chars.len());
                let cell: String = chars[start..end.max(start)].iter().collect();
                row.insert(name.clone(), Value::String(cell.trim().to_string()));
            }
            if row.values().any(|v| v.as_str().is_some_and(|s| !s.is_empty())) {
                rows.push(Value::Object(row));
            }
        }

        if rows.is_empty() {
            None
        } else {
            Some(Value::Array(rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interface_status_table() {
        let raw = "\
Port      Name               Status       Vlan       Duplex  Speed Type
Gi1/0/1   uplink core        connected    trunk        full   1000 10/100/1000BaseTX
Gi1/0/2                      notconnect   10           auto   auto 10/100/1000BaseTX
";
        let parsed = TabularParser.parse("show interfaces status", raw).unwrap();
        let rows = parsed.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["port"], json!("Gi1/0/1"));
        assert_eq!(rows[0]["name"], json!("uplink core"));
        assert_eq!(rows[0]["status"], json!("connected"));
        assert_eq!(rows[1]["name"], json!(""));
        assert_eq!(rows[1]["vlan"], json!("10"));
        assert_eq!(rows[1]["type"], json!("10/100/1000BaseTX"));
    }

    #[test]
    fn test_separator_lines_skipped() {
        let raw = "Mod Ports Model\n--- ----- -----\n1   48    C9300-48P\n";
        let parsed = TabularParser.parse("show module", raw).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert_eq!(parsed[0]["model"], json!("C9300-48P"));
    }

    #[test]
    fn test_unstructured_text_falls_back() {
        assert!(TabularParser.parse("show x", "").is_none());
        assert!(TabularParser.parse("show x", "   \n\n").is_none());
        assert!(TabularParser.parse("show x", "single\n").is_none());
    }

    #[test]
    fn test_header_only_yields_none() {
        assert!(TabularParser.parse("show x", "Port Status\n").is_none());
    }
}
