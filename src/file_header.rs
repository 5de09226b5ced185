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

use crate::log::{LogCode, Logs};
use nom::bytes::complete::{tag, take};
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;
use serde::Serialize;

pub(crate) const FILE_HEADER_LENGTH: usize = 32;
/// The only version family this parser understands. Other majors are decoded
/// on a best-effort basis with the corrupted flag raised.
pub(crate) const SUPPORTED_MAJOR_VERSION: u16 = 4;
/// Slack allowed between the declared file size and the adapter length before
/// the mismatch counts as corruption.
pub(crate) const FILE_SIZE_TOLERANCE: u64 = 0x200;

/// Fixed-size header at offset 0 of a CREG file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FileHeader {
    pub major_version: u16,
    pub minor_version: u16,
    /// Total file size in bytes as recorded by the writer.
    pub file_size: u32,
    /// Number of RGDB pages that follow the key index.
    pub data_block_count: u32,
    pub first_data_block_offset: u32,
    /// Identity of the root key's name record.
    pub root_rgdb_index: u16,
    pub root_key_id: u16,
    pub logs: Logs,
}

impl FileHeader {
    /// Parses the CREG file header.
    pub(crate) fn from_bytes(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _signature) = tag("CREG")(input)?;
        let (input, major_version) = le_u16(input)?;
        let (input, minor_version) = le_u16(input)?;
        let (input, file_size) = le_u32(input)?;
        let (input, data_block_count) = le_u32(input)?;
        let (input, first_data_block_offset) = le_u32(input)?;
        let (input, root_descriptor) = le_u32(input)?;
        let (input, _reserved) = take(8usize)(input)?;

        let mut logs = Logs::default();
        if major_version != SUPPORTED_MAJOR_VERSION {
            logs.add(
                LogCode::WarningParse,
                &format!("Unsupported version family: {}.{}", major_version, minor_version),
            );
        }

        Ok((
            input,
            Self {
                major_version,
                minor_version,
                file_size,
                data_block_count,
                first_data_block_offset,
                root_rgdb_index: (root_descriptor >> 16) as u16,
                root_key_id: (root_descriptor & 0xFFFF) as u16,
                logs,
            },
        ))
    }

    pub(crate) fn is_supported_version(&self) -> bool {
        self.major_version == SUPPORTED_MAJOR_VERSION
    }
}
