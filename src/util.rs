/*
 * Copyright 2023 Aon Cyber Solutions
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::err::Error;
use crate::filter::Filter;
use crate::log::{LogCode, Logs};
use crate::parser::Parser;
use nom::bytes::complete::take;
use nom::IResult;
use std::io::Write;

/// Consumes whatever is left of a sized record so the parser position lands on
/// the next record boundary.
pub(crate) fn parser_eat_remaining(
    input: &[u8],
    record_size: usize,
    bytes_consumed: usize,
) -> IResult<&[u8], &[u8]> {
    take(record_size.saturating_sub(bytes_consumed))(input)
}

/// Decodes a UTF-16LE buffer up to `max_size` bytes, stopping at the first NUL
/// code unit. Unpaired surrogates become replacement characters and are logged.
pub(crate) fn from_utf16_le_string(
    slice: &[u8],
    max_size: usize,
    logs: &mut Logs,
    err_detail: &str,
) -> String {
    let iter = slice[..max_size.min(slice.len())]
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .take_while(|unit| *unit != 0);
    let mut had_errors = false;
    let result = char::decode_utf16(iter)
        .map(|unit| {
            unit.unwrap_or_else(|_| {
                had_errors = true;
                char::REPLACEMENT_CHARACTER
            })
        })
        .collect();
    if had_errors {
        logs.add(
            LogCode::WarningConversion,
            &format!("{}: unpaired surrogate in UTF-16 string", err_detail),
        );
    }
    result
}

/// Strict UTF-16LE decode used by the string-value heuristic: `None` unless
/// every code unit decodes cleanly. Trailing NUL code units are stripped.
pub(crate) fn utf16_le_to_string_strict(slice: &[u8]) -> Option<String> {
    if slice.len() % 2 != 0 {
        return None;
    }
    let mut units: Vec<u16> = slice
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }
    if units.contains(&0) {
        return None;
    }
    char::decode_utf16(units.into_iter())
        .collect::<Result<String, _>>()
        .ok()
}

pub(crate) fn to_hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn data_as_hex<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&to_hex_string(data))
}

/// Walks the whole tree and returns `(keys, values)` totals. Used by tests and
/// benchmarks to sanity-check a parse.
pub fn count_all_keys_and_values(parser: &Parser) -> Result<(usize, usize), Error> {
    let mut keys = 0;
    let mut values = 0;
    for key in parser.iter() {
        let key = key?;
        keys += 1;
        values += key.sub_values.len();
    }
    Ok((keys, values))
}

/// Writes the tree as JSON lines, one key object per line, optionally pruned
/// by a filter.
pub fn write_jsonl<W: Write>(
    parser: &Parser,
    filter: Option<Filter>,
    output: W,
) -> Result<(), Error> {
    let mut writer = std::io::BufWriter::new(output);
    let mut iter = parser.iter();
    if let Some(filter) = filter {
        iter.with_filter(filter);
    }
    for key in iter {
        let key = key?;
        let line = serde_json::to_string(&*key).map_err(|error| Error::Conversion {
            detail: format!("{:?}", error),
        })?;
        writeln!(writer, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_utf16_le_string() {
        let mut logs = Logs::default();
        let bytes = [0x56, 0x00, 0x31, 0x00, 0x2E, 0x00, 0x30, 0x00, 0x00, 0x00];
        assert_eq!(
            "V1.0",
            from_utf16_le_string(&bytes, bytes.len(), &mut logs, "test")
        );
        assert!(!logs.has_logs());

        // lone high surrogate becomes a replacement char and logs a warning
        let bad = [0x00, 0xD8, 0x41, 0x00];
        assert_eq!(
            "\u{FFFD}A",
            from_utf16_le_string(&bad, bad.len(), &mut logs, "test")
        );
        assert!(logs.has_logs());
    }

    #[test]
    fn test_utf16_le_to_string_strict() {
        let bytes = [0x56, 0x00, 0x31, 0x00, 0x2E, 0x00, 0x30, 0x00, 0x00, 0x00];
        assert_eq!(Some("V1.0".to_string()), utf16_le_to_string_strict(&bytes));
        assert_eq!(None, utf16_le_to_string_strict(&[0x41])); // odd length
        assert_eq!(None, utf16_le_to_string_strict(&[0x00, 0xD8])); // lone surrogate
        assert_eq!(None, utf16_le_to_string_strict(&[0x00, 0x00, 0x41, 0x00])); // embedded NUL
    }

    #[test]
    fn test_to_hex_string() {
        assert_eq!("00ff10", to_hex_string(&[0x00, 0xff, 0x10]));
    }

    #[test]
    fn test_parser_eat_remaining() {
        let buf = [1u8, 2, 3, 4, 5, 6];
        let (rest, eaten) = parser_eat_remaining(&buf, 6, 2).unwrap();
        assert_eq!(4, eaten.len());
        assert_eq!(0, rest.len());

        // over-consumed records must not panic
        let (rest, eaten) = parser_eat_remaining(&buf, 1, 2).unwrap();
        assert_eq!(0, eaten.len());
        assert_eq!(6, rest.len());
    }
}
