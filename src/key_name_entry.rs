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

use crate::codepage::{Codepage, ConversionPolicy};
use crate::log::{LogCode, Logs};
use crate::util;
use crate::value_entry::ValueEntry;
use crate::{impl_flags_from_bits, impl_serialize_for_bitflags};
use bitflags::bitflags;
use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;
use serde::Serialize;

pub(crate) const KEY_NAME_ENTRY_HEADER_LENGTH: usize = 20;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct KeyNameFlags: u32 {
        /// Key name bytes are UTF-16LE instead of codepage-encoded.
        const KEY_NAME_UNICODE = 0x0001;
    }
}
impl_serialize_for_bitflags! {KeyNameFlags}
impl_flags_from_bits! {KeyNameFlags, u32}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyNameEntryDetail {
    /// Declared record size, header and value records included.
    pub size: u32,
    pub flags: KeyNameFlags,
    pub key_id: u16,
    pub rgdb_index: u16,
    pub value_count: u16,
    pub name_length: u16,
    pub used_size: u32,
}

/// One key-name record from an RGDB page: the key's textual name plus its
/// inline, ordered value list. The tree position of the key lives in the RGKN
/// entry that points here by `(rgdb_index, key_id)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyNameEntry {
    pub detail: KeyNameEntryDetail,
    pub key_name: String,
    pub sub_values: Vec<ValueEntry>,
    /// Set when the component sizes don't add up to the declared record size.
    /// The enclosing page drops such records and flags itself corrupted.
    pub(crate) malformed: bool,
    pub logs: Logs,
}

impl KeyNameEntry {
    /// Parses one key-name record. The caller hands in exactly the record's
    /// declared bytes; value records that claim to run past that window fail
    /// the parse.
    pub(crate) fn from_bytes(input: &[u8], codepage: Codepage) -> IResult<&[u8], Self> {
        let start_pos = input.as_ptr() as usize;
        let (input, size) = le_u32(input)?;
        let (input, flags_bytes) = le_u32(input)?;
        let (input, key_id) = le_u16(input)?;
        let (input, rgdb_index) = le_u16(input)?;
        let (input, value_count) = le_u16(input)?;
        let (input, name_length) = le_u16(input)?;
        let (input, used_size) = le_u32(input)?;
        let (input, name_bytes) = take(name_length as usize)(input)?;

        let mut logs = Logs::default();
        let flags = KeyNameFlags::from_bits_checked(flags_bytes, &mut logs);
        let key_name = if flags.contains(KeyNameFlags::KEY_NAME_UNICODE) {
            util::from_utf16_le_string(name_bytes, name_bytes.len(), &mut logs, "key name")
        } else {
            codepage
                .decode(name_bytes, ConversionPolicy::Substitute, &mut logs)
                .unwrap_or_default()
        };

        let (input, sub_values) =
            nom::multi::count(ValueEntry::from_bytes(codepage), value_count as usize)(input)?;

        let values_size: usize = sub_values
            .iter()
            .map(|value| value.detail.size as usize)
            .sum();
        let component_sum = KEY_NAME_ENTRY_HEADER_LENGTH + name_length as usize + values_size;
        let malformed = component_sum != size as usize;
        if malformed {
            logs.add(
                LogCode::WarningCorrupt,
                &format!(
                    "Key name record '{}' declares {} bytes but its components span {}",
                    key_name, size, component_sum
                ),
            );
        }

        let (input, _) =
            util::parser_eat_remaining(input, size as usize, input.as_ptr() as usize - start_pos)?;

        Ok((
            input,
            Self {
                detail: KeyNameEntryDetail {
                    size,
                    flags,
                    key_id,
                    rgdb_index,
                    value_count,
                    name_length,
                    used_size,
                },
                key_name,
                sub_values,
                malformed,
                logs,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_entry::{ValueType, VALUE_ENTRY_HEADER_LENGTH};

    fn value_record_bytes(name: &[u8], value_type: u32, data: &[u8]) -> Vec<u8> {
        let size = VALUE_ENTRY_HEADER_LENGTH + name.len() + data.len();
        let mut buf = Vec::new();
        buf.extend_from_slice(&(size as u32).to_le_bytes());
        buf.extend_from_slice(&value_type.to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(data);
        buf
    }

    fn key_record_bytes(
        name: &[u8],
        flags: u32,
        key_id: u16,
        rgdb_index: u16,
        values: &[Vec<u8>],
    ) -> Vec<u8> {
        let values_size: usize = values.iter().map(Vec::len).sum();
        let size = KEY_NAME_ENTRY_HEADER_LENGTH + name.len() + values_size;
        let mut buf = Vec::new();
        buf.extend_from_slice(&(size as u32).to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&key_id.to_le_bytes());
        buf.extend_from_slice(&rgdb_index.to_le_bytes());
        buf.extend_from_slice(&(values.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(size as u32).to_le_bytes()); // used size
        buf.extend_from_slice(name);
        for value in values {
            buf.extend_from_slice(value);
        }
        buf
    }

    #[test]
    fn test_parse_key_record() {
        let values = vec![
            value_record_bytes(b"Version", 1, b"4.10\0"),
            value_record_bytes(b"Flags", 4, &[1, 0, 0, 0]),
        ];
        let buf = key_record_bytes(b"Software", 0, 3, 0, &values);
        let (rest, entry) = KeyNameEntry::from_bytes(&buf, Codepage::default()).unwrap();
        assert!(rest.is_empty());
        assert!(!entry.malformed);
        assert_eq!("Software", entry.key_name);
        assert_eq!((3, 0), (entry.detail.key_id, entry.detail.rgdb_index));
        assert_eq!(2, entry.sub_values.len());
        assert_eq!("Version", entry.sub_values[0].name());
        assert_eq!(ValueType::RegDWord, entry.sub_values[1].value_type);
    }

    #[test]
    fn test_unicode_name_flag() {
        let name = [0x53, 0x00, 0x57, 0x00]; // "SW"
        let buf = key_record_bytes(&name, 0x0001, 1, 0, &[]);
        let (_, entry) = KeyNameEntry::from_bytes(&buf, Codepage::default()).unwrap();
        assert_eq!("SW", entry.key_name);
        assert!(entry.detail.flags.contains(KeyNameFlags::KEY_NAME_UNICODE));
    }

    #[test]
    fn test_component_sum_mismatch() {
        let mut buf = key_record_bytes(b"Software", 0, 3, 0, &[]);
        let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) + 4;
        buf[0..4].copy_from_slice(&declared.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]); // record padding the components don't cover
        let (_, entry) = KeyNameEntry::from_bytes(&buf, Codepage::default()).unwrap();
        assert!(entry.malformed);
        assert!(entry.logs.has_logs());
    }

    #[test]
    fn test_value_overruns_record() {
        let mut value = value_record_bytes(b"Version", 1, b"4.10\0");
        // value claims more bytes than the record window holds
        let oversized = (value.len() + 64) as u32;
        value[0..4].copy_from_slice(&oversized.to_le_bytes());
        let buf = key_record_bytes(b"Software", 0, 3, 0, &[value]);
        assert!(KeyNameEntry::from_bytes(&buf, Codepage::default()).is_err());
    }
}
