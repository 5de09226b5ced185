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
use crate::err::Error;
use crate::impl_enum_from_value;
use crate::log::{LogCode, Logs};
use crate::util;
use enum_primitive_derive::Primitive;
use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;
use num_traits::FromPrimitive;
use serde::Serialize;

pub(crate) const VALUE_ENTRY_HEADER_LENGTH: usize = 14;

/// On-disk value types, exposed verbatim.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Primitive, Serialize)]
#[repr(u32)]
pub enum ValueType {
    RegNone = 0,
    RegSZ = 1,
    RegExpandSZ = 2,
    RegBinary = 3,
    RegDWord = 4,
    RegDWordBigEndian = 5,
    RegLink = 6,
    RegMultiSZ = 7,
    RegResourceList = 8,
    RegFullResourceDescriptor = 9,
    RegResourceRequirementsList = 10,
    RegQWord = 11,
    Unknown = 0x0fff_ffff,
}
impl_enum_from_value! { ValueType }

/// A value's payload interpreted per its type tag.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ValueContent {
    ValueNone,
    ValueString(String),
    ValueMultiString(Vec<String>),
    ValueBinary(Vec<u8>),
    ValueU32(u32),
    ValueI64(i64),
    /// The payload is too short for the declared type.
    ValueError,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValueEntryDetail {
    /// Declared record size, this header included.
    pub size: u32,
    /// The raw type word; `value_type` is the decoded view.
    pub value_type_raw: u32,
    pub name_length: u16,
    pub data_length: u32,
}

/// One value record from the inline list inside a key-name record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValueEntry {
    pub detail: ValueEntryDetail,
    pub value_type: ValueType,
    pub value_name: String,
    #[serde(serialize_with = "util::data_as_hex")]
    pub value_data: Vec<u8>,
    pub(crate) codepage: Codepage,
    pub logs: Logs,
}

impl ValueEntry {
    /// Parser for one value record. Returned as a closure so it can feed
    /// `nom::multi::count` over the record list.
    pub(crate) fn from_bytes(codepage: Codepage) -> impl Fn(&[u8]) -> IResult<&[u8], Self> {
        move |input: &[u8]| {
            let start_pos = input.as_ptr() as usize;
            let (input, size) = le_u32(input)?;
            let (input, value_type_raw) = le_u32(input)?;
            let (input, name_length) = le_u16(input)?;
            let (input, data_length) = le_u32(input)?;
            let (input, name_bytes) = take(name_length as usize)(input)?;
            let (input, data_bytes) = take(data_length as usize)(input)?;

            let mut logs = Logs::default();
            let value_type = ValueType::from_value(value_type_raw, &mut logs);
            let value_name = codepage
                .decode(name_bytes, ConversionPolicy::Substitute, &mut logs)
                .unwrap_or_default();

            let (input, _) = util::parser_eat_remaining(
                input,
                size as usize,
                input.as_ptr() as usize - start_pos,
            )?;

            Ok((
                input,
                Self {
                    detail: ValueEntryDetail {
                        size,
                        value_type_raw,
                        name_length,
                        data_length,
                    },
                    value_type,
                    value_name,
                    value_data: data_bytes.to_vec(),
                    codepage,
                    logs,
                },
            ))
        }
    }

    pub fn name(&self) -> &str {
        &self.value_name
    }

    pub fn data_size(&self) -> usize {
        self.value_data.len()
    }

    /// Raw payload bytes, exactly as stored. No padding is added.
    pub fn data(&self) -> Vec<u8> {
        self.value_data.clone()
    }

    /// Integer interpretation, defined for `RegDWord`, `RegDWordBigEndian`
    /// and `RegQWord` only.
    pub fn data_as_integer(&self) -> Result<i64, Error> {
        match self.value_type {
            ValueType::RegDWord => Ok(u32::from_le_bytes(self.data_array::<4>()?) as i64),
            ValueType::RegDWordBigEndian => Ok(u32::from_be_bytes(self.data_array::<4>()?) as i64),
            ValueType::RegQWord => Ok(i64::from_le_bytes(self.data_array::<8>()?)),
            _ => Err(Error::UnsupportedValue {
                detail: format!(
                    "data_as_integer is not defined for {:?} value '{}'",
                    self.value_type, self.value_name
                ),
            }),
        }
    }

    /// String interpretation, defined for `RegSZ`, `RegExpandSZ` and
    /// `RegLink` only. Even-length payloads that decode cleanly as UTF-16LE
    /// are preferred; everything else goes through the file's codepage.
    /// Trailing NULs are stripped.
    pub fn data_as_string(&self) -> Result<String, Error> {
        match self.value_type {
            ValueType::RegSZ | ValueType::RegExpandSZ | ValueType::RegLink => {
                Ok(self.decode_string_payload(&self.value_data))
            }
            _ => Err(Error::UnsupportedValue {
                detail: format!(
                    "data_as_string is not defined for {:?} value '{}'",
                    self.value_type, self.value_name
                ),
            }),
        }
    }

    /// The payload as a [`ValueContent`] discriminated by the type tag.
    /// Resource descriptors and unrecognized types come back as binary.
    pub fn get_content(&self) -> ValueContent {
        match self.value_type {
            ValueType::RegNone => ValueContent::ValueNone,
            ValueType::RegSZ | ValueType::RegExpandSZ | ValueType::RegLink => {
                ValueContent::ValueString(self.decode_string_payload(&self.value_data))
            }
            ValueType::RegMultiSZ => {
                let decoded = self.decode_string_payload(&self.value_data);
                ValueContent::ValueMultiString(
                    decoded
                        .split('\0')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            ValueType::RegDWord => match self.data_array::<4>() {
                Ok(data) => ValueContent::ValueU32(u32::from_le_bytes(data)),
                Err(_) => ValueContent::ValueError,
            },
            ValueType::RegDWordBigEndian => match self.data_array::<4>() {
                Ok(data) => ValueContent::ValueU32(u32::from_be_bytes(data)),
                Err(_) => ValueContent::ValueError,
            },
            ValueType::RegQWord => match self.data_array::<8>() {
                Ok(data) => ValueContent::ValueI64(i64::from_le_bytes(data)),
                Err(_) => ValueContent::ValueError,
            },
            ValueType::RegBinary
            | ValueType::RegResourceList
            | ValueType::RegFullResourceDescriptor
            | ValueType::RegResourceRequirementsList
            | ValueType::Unknown => ValueContent::ValueBinary(self.value_data.clone()),
        }
    }

    fn decode_string_payload(&self, data: &[u8]) -> String {
        if data.len() % 2 == 0 {
            if let Some(decoded) = util::utf16_le_to_string_strict(data) {
                return decoded;
            }
        }
        let mut logs = Logs::default();
        let decoded = self
            .codepage
            .decode(data, ConversionPolicy::Substitute, &mut logs)
            .unwrap_or_default();
        decoded.trim_end_matches('\0').to_string()
    }

    fn data_array<const N: usize>(&self) -> Result<[u8; N], Error> {
        self.value_data
            .get(..N)
            .and_then(|slice| <[u8; N]>::try_from(slice).ok())
            .ok_or_else(|| Error::InvalidData {
                detail: format!(
                    "{:?} value '{}' holds {} data bytes, expected {}",
                    self.value_type,
                    self.value_name,
                    self.value_data.len(),
                    N
                ),
            })
    }
}
