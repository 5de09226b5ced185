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

use crate::codepage::Codepage;
use crate::err::Error;
use crate::key_name_entry::{KeyNameEntry, KEY_NAME_ENTRY_HEADER_LENGTH};
use crate::log::{LogCode, Logs};
use nom::bytes::complete::tag;
use nom::number::complete::{le_u16, le_u32};
use nom::{Finish, IResult};
use serde::Serialize;
use std::collections::HashSet;

pub(crate) const DATA_PAGE_HEADER_LENGTH: usize = 24;
/// RGDB page sizes are multiples of this.
pub(crate) const DATA_PAGE_SIZE_UNIT: u32 = 0x1000;
/// Byte offset of the checksum slot within the page.
pub(crate) const CHECKSUM_OFFSET: usize = 20;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DataPageHeader {
    /// Declared page size in bytes, this header included.
    pub size: u32,
    pub flags: u32,
    /// Positional index of the page; must match where the page sits in the
    /// RGDB chain.
    pub page_index: u16,
    /// Offset from the page base to the first free byte; records stop here.
    pub free_space_offset: u32,
    pub checksum: u32,
}

impl DataPageHeader {
    pub(crate) fn from_bytes(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _signature) = tag("RGDB")(input)?;
        let (input, size) = le_u32(input)?;
        let (input, flags) = le_u32(input)?;
        let (input, page_index) = le_u16(input)?;
        let (input, _reserved) = le_u16(input)?;
        let (input, free_space_offset) = le_u32(input)?;
        let (input, checksum) = le_u32(input)?;

        Ok((
            input,
            Self {
                size,
                flags,
                page_index,
                free_space_offset,
                checksum,
            },
        ))
    }
}

/// One decoded RGDB page: the header plus every well-formed key-name record.
/// Checksum and layout violations are advisory — the page stays usable and the
/// problems land in `logs` with `is_corrupted` set.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DataPage {
    pub header: DataPageHeader,
    pub key_entries: Vec<KeyNameEntry>,
    pub is_corrupted: bool,
    pub logs: Logs,
}

impl DataPage {
    /// Decodes a page from its raw bytes. `page` holds the declared size when
    /// the file is intact; a shorter buffer parses what it can and is flagged.
    pub(crate) fn from_bytes(
        page: &[u8],
        expected_index: u16,
        codepage: Codepage,
    ) -> Result<Self, Error> {
        let (_, header) = DataPageHeader::from_bytes(page).finish()?;

        let mut logs = Logs::default();
        let mut is_corrupted = false;

        if header.size == 0 || header.size % DATA_PAGE_SIZE_UNIT != 0 {
            is_corrupted = true;
            logs.add(
                LogCode::WarningCorrupt,
                &format!("Page size {:#x} is not a multiple of the page unit", header.size),
            );
        }
        if (page.len() as u32) < header.size {
            is_corrupted = true;
            logs.add(
                LogCode::WarningCorrupt,
                &format!(
                    "Page declares {:#x} bytes but only {:#x} were read",
                    header.size,
                    page.len()
                ),
            );
        }
        if header.page_index != expected_index {
            is_corrupted = true;
            logs.add(
                LogCode::WarningCorrupt,
                &format!(
                    "Page declares index {} at chain position {}",
                    header.page_index, expected_index
                ),
            );
        }
        let computed = Self::calculate_checksum(page);
        if computed != header.checksum {
            is_corrupted = true;
            logs.add(
                LogCode::WarningCorrupt,
                &format!(
                    "Page {} checksum mismatch: declared {:#010x}, computed {:#010x}",
                    header.page_index, header.checksum, computed
                ),
            );
        }

        let mut limit = page.len().min(header.size as usize);
        let free_space_offset = header.free_space_offset as usize;
        if free_space_offset >= DATA_PAGE_HEADER_LENGTH {
            limit = limit.min(free_space_offset);
        }

        let mut key_entries = Vec::new();
        let mut offset = DATA_PAGE_HEADER_LENGTH;
        while offset + 4 <= limit {
            let record_size = u32::from_le_bytes([
                page[offset],
                page[offset + 1],
                page[offset + 2],
                page[offset + 3],
            ]) as usize;
            if record_size == 0 {
                break;
            }
            if record_size < KEY_NAME_ENTRY_HEADER_LENGTH {
                is_corrupted = true;
                logs.add(
                    LogCode::WarningCorrupt,
                    &format!("Record at {:#x} declares impossible size {}", offset, record_size),
                );
                break;
            }
            if offset + record_size > limit {
                is_corrupted = true;
                logs.add(
                    LogCode::WarningCorrupt,
                    &format!("Record at {:#x} extends past the end of the page", offset),
                );
                break;
            }
            match KeyNameEntry::from_bytes(&page[offset..offset + record_size], codepage).finish()
            {
                Ok((_, entry)) => {
                    if entry.malformed {
                        is_corrupted = true;
                        logs.extend(&entry.logs);
                    } else {
                        key_entries.push(entry);
                    }
                }
                Err(error) => {
                    is_corrupted = true;
                    logs.add(
                        LogCode::WarningCorrupt,
                        &format!("Record at {:#x} failed to parse: {:?}", offset, error.code),
                    );
                    break;
                }
            }
            offset += record_size;
        }

        let mut seen = HashSet::new();
        for entry in &key_entries {
            if !seen.insert(entry.detail.key_id) {
                is_corrupted = true;
                logs.add(
                    LogCode::WarningCorrupt,
                    &format!(
                        "Duplicate key id {} in page {}",
                        entry.detail.key_id, header.page_index
                    ),
                );
            }
        }

        Ok(Self {
            header,
            key_entries,
            is_corrupted,
            logs,
        })
    }

    /// First record carrying `key_id`; linear probe, there is no on-disk
    /// index.
    pub(crate) fn find_key_entry(&self, key_id: u16) -> Option<&KeyNameEntry> {
        self.key_entries
            .iter()
            .find(|entry| entry.detail.key_id == key_id)
    }

    /// XOR fold of the page's little-endian u32 words with the checksum slot
    /// zeroed.
    pub(crate) fn calculate_checksum(page: &[u8]) -> u32 {
        let mut xsum = 0u32;
        let mut index = 0;
        while index + 4 <= page.len() {
            if index != CHECKSUM_OFFSET {
                xsum ^= u32::from_le_bytes([
                    page[index],
                    page[index + 1],
                    page[index + 2],
                    page[index + 3],
                ]);
            }
            index += 4;
        }
        xsum
    }
}
