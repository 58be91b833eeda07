//! DATA preprocessor (C3)
//!
//! Runs on raw source bytes, before the lexer ever sees them. Extracts the
//! literal value list of every `DATA` statement into a flat segment, leaving
//! the `DATA` keyword itself in place (so the parser still produces a
//! structural `DataStatement` AST node per spec.md's invariant 8) but with
//! its payload stripped from the text handed to C2.
//!
//! Per-line and per-label restore points are recorded by a lightweight
//! independent scan for line-number headers and `name:` labels — the full
//! grammar isn't needed to recognize either, and waiting for the parser
//! would create a chicken-and-egg dependency (the parser needs DATA already
//! stripped to avoid re-lexing large literal runs as part of statement
//! parsing).
//!
//! The parser still produces one `ast::DataStatement` per physical `DATA`
//! line (so diagnostics can point at it and `Program::data_statements`
//! stays a flat, ordered list per spec.md's data model): it looks up that
//! line's slice of `DataSegment::values` via `line_value_ranges`, keyed by
//! 1-based physical line index, which this module also fills in.

use crate::ast::DataValue;

#[derive(Debug, Clone, Default)]
pub struct DataSegment {
    pub values: Vec<DataValue>,
    pub line_restore: std::collections::HashMap<u32, usize>,
    pub label_restore: std::collections::HashMap<String, usize>,
    /// Physical (1-based) line index -> `[start, end)` range in `values`
    /// contributed by the `DATA` statement found on that line.
    pub line_value_ranges: std::collections::HashMap<usize, (usize, usize)>,
}

pub struct DataPrepResult {
    pub stripped_source: String,
    pub segment: DataSegment,
}

/// Strip `DATA` payloads from `source`, returning the rewritten source (safe
/// to lex normally) and the extracted segment.
pub fn preprocess(source: &str) -> DataPrepResult {
    let mut segment = DataSegment::default();
    let mut out_lines = Vec::new();
    let mut current_line_number: Option<u32> = None;

    for (zero_based_idx, raw_line) in source.lines().enumerate() {
        let physical_line = zero_based_idx + 1;
        let mut rest = raw_line;

        // Leading line number header.
        let trimmed_start = rest.trim_start();
        let leading_ws_len = rest.len() - trimmed_start.len();
        let digit_len = trimmed_start
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .count();
        if digit_len > 0 {
            if let Ok(n) = trimmed_start[..digit_len].parse::<u32>() {
                current_line_number = Some(n);
            }
            rest = &trimmed_start[digit_len..];
        } else {
            rest = trimmed_start;
            let _ = leading_ws_len;
        }

        // Leading `label:` header (identifier immediately followed by ':').
        let rest_trimmed = rest.trim_start();
        if let Some(colon_pos) = rest_trimmed.find(':') {
            let candidate = &rest_trimmed[..colon_pos];
            if !candidate.is_empty()
                && candidate.chars().next().unwrap().is_alphabetic()
                && candidate
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_')
                && !candidate.eq_ignore_ascii_case("rem")
            {
                let label = candidate.to_string();
                segment
                    .label_restore
                    .entry(label)
                    .or_insert(segment.values.len());
            }
        }

        if let Some(n) = current_line_number {
            segment
                .line_restore
                .entry(n)
                .or_insert(segment.values.len());
        }

        let before = segment.values.len();
        out_lines.push(strip_data_statement(raw_line, &mut segment));
        let after = segment.values.len();
        if after > before {
            segment.line_value_ranges.insert(physical_line, (before, after));
        }
    }

    DataPrepResult {
        stripped_source: out_lines.join("\n"),
        segment,
    }
}

/// Find a `DATA` statement on this physical line (word-bounded, case
/// insensitive) and strip its comma-separated payload, appending the parsed
/// values to `segment`. Lines may hold multiple colon-separated statements;
/// only the first `DATA` occurrence per line is honored since BASIC dialects
/// never allow more than one per line in practice.
fn strip_data_statement(line: &str, segment: &mut DataSegment) -> String {
    let upper = line.to_ascii_uppercase();
    let bytes = line.as_bytes();
    let mut search_from = 0usize;
    while let Some(rel) = upper[search_from..].find("DATA") {
        let idx = search_from + rel;
        let before_ok = idx == 0 || !is_ident_char(bytes[idx - 1] as char);
        let after_idx = idx + 4;
        let after_ok = after_idx >= bytes.len() || !is_ident_char(bytes[after_idx] as char);
        if before_ok && after_ok {
            let payload_start = after_idx;
            let payload = &line[payload_start..];
            let (values, consumed) = parse_data_values(payload);
            segment.values.extend(values);
            let mut result = String::new();
            result.push_str(&line[..payload_start]);
            result.push_str(&payload[consumed..]);
            return result;
        }
        search_from = after_idx;
        if search_from >= bytes.len() {
            break;
        }
    }
    line.to_string()
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Parse a comma-separated literal list up to end-of-line or an unescaped
/// `:` statement separator. Returns the parsed values and how many bytes of
/// `payload` were consumed (so the remainder, e.g. a trailing comment, can
/// be preserved).
fn parse_data_values(payload: &str) -> (Vec<DataValue>, usize) {
    let mut values = Vec::new();
    let chars: Vec<char> = payload.chars().collect();
    let mut i = 0usize;
    loop {
        while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        if chars[i] == '"' {
            let start = i;
            i += 1;
            let mut text = String::new();
            while i < chars.len() {
                if chars[i] == '"' {
                    if chars.get(i + 1) == Some(&'"') {
                        text.push('"');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                text.push(chars[i]);
                i += 1;
            }
            let _ = start;
            values.push(DataValue::Text(text));
        } else {
            let start = i;
            while i < chars.len() && chars[i] != ',' && chars[i] != ':' {
                i += 1;
            }
            let raw: String = chars[start..i].iter().collect();
            let trimmed = raw.trim();
            match trimmed.parse::<f64>() {
                Ok(n) => values.push(DataValue::Number(n)),
                Err(_) => values.push(DataValue::Text(trimmed.to_string())),
            }
        }
        while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
            i += 1;
        }
        if i < chars.len() && chars[i] == ',' {
            i += 1;
            continue;
        }
        break;
    }
    let consumed_bytes: usize = chars[..i].iter().map(|c| c.len_utf8()).sum();
    (values, consumed_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_numbers_and_strings() {
        let result = preprocess("10 DATA 1, 2, \"three\"\n");
        assert_eq!(
            result.segment.values,
            vec![
                DataValue::Number(1.0),
                DataValue::Number(2.0),
                DataValue::Text("three".to_string()),
            ]
        );
        assert!(!result.stripped_source.to_ascii_uppercase().contains("THREE"));
        assert!(result.stripped_source.to_ascii_uppercase().contains("DATA"));
    }

    #[test]
    fn records_line_restore_points() {
        let result = preprocess("10 DATA 1\n20 DATA 2\n");
        assert_eq!(result.segment.line_restore.get(&10), Some(&0));
        assert_eq!(result.segment.line_restore.get(&20), Some(&1));
    }

    #[test]
    fn records_label_restore_points() {
        let src = "start:\nDATA 7, 8\n";
        let result = preprocess(src);
        assert_eq!(result.segment.label_restore.get("start"), Some(&0));
    }

    #[test]
    fn records_per_line_value_ranges() {
        let result = preprocess("10 DATA 1, 2\n20 DATA 3\n");
        assert_eq!(result.segment.line_value_ranges.get(&1), Some(&(0, 2)));
        assert_eq!(result.segment.line_value_ranges.get(&2), Some(&(2, 3)));
    }

    #[test]
    fn does_not_match_data_inside_identifier() {
        let result = preprocess("10 METADATA = 5\n");
        assert!(result.segment.values.is_empty());
    }
}
