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

/// "No link" sentinel for RGKN offset fields.
pub const NO_LINK: u32 = 0xFFFF_FFFF;
/// Identity half used by entries with no backing key-name record (the root).
pub(crate) const NO_ID: u16 = 0xFFFF;

pub(crate) const KEY_INDEX_HEADER_LENGTH: u32 = 20;
pub(crate) const KEY_INDEX_ENTRY_LENGTH: u32 = 28;

/// Header of the RGKN region, which immediately follows the file header.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyIndexHeader {
    /// Size of the whole region, this header included.
    pub size: u32,
    /// Offset of the root entry, relative to the region base.
    pub root_entry_offset: u32,
    pub free_list_offset: u32,
    pub entry_count: u32,
}

impl KeyIndexHeader {
    pub(crate) fn from_bytes(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, _signature) = tag("RGKN")(input)?;
        let (input, size) = le_u32(input)?;
        let (input, root_entry_offset) = le_u32(input)?;
        let (input, free_list_offset) = le_u32(input)?;
        let (input, entry_count) = le_u32(input)?;

        Ok((
            input,
            Self {
                size,
                root_entry_offset,
                free_list_offset,
                entry_count,
            },
        ))
    }
}

/// Fixed-width RGKN entry. The tree shape lives entirely in the three link
/// fields; the name and values live in an RGDB page addressed by
/// `(rgdb_index, key_id)`. All links are byte offsets relative to the region
/// base, or [`NO_LINK`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct KeyIndexEntry {
    /// Name hash written by Windows. A lookup hint at best; never trusted for
    /// equality — name comparison always uses the decoded name.
    pub hash: u32,
    pub parent_offset: u32,
    pub first_sub_key_offset: u32,
    pub next_sibling_offset: u32,
    pub key_id: u16,
    pub rgdb_index: u16,
}

impl KeyIndexEntry {
    fn from_bytes() -> impl Fn(&[u8]) -> IResult<&[u8], Self> {
        |input: &[u8]| {
            let (input, hash) = le_u32(input)?;
            let (input, parent_offset) = le_u32(input)?;
            let (input, first_sub_key_offset) = le_u32(input)?;
            let (input, next_sibling_offset) = le_u32(input)?;
            let (input, key_id) = le_u16(input)?;
            let (input, rgdb_index) = le_u16(input)?;
            let (input, _reserved) = take(8usize)(input)?;
            Ok((
                input,
                Self {
                    hash,
                    parent_offset,
                    first_sub_key_offset,
                    next_sibling_offset,
                    key_id,
                    rgdb_index,
                },
            ))
        }
    }

    /// True for entries that have no key-name record by construction. Real
    /// roots are written this way.
    pub(crate) fn is_nameless(&self) -> bool {
        self.key_id == NO_ID && self.rgdb_index == NO_ID
    }
}

/// The decoded RGKN region: an arena of entries addressed by their byte
/// offset. Links are resolved through [`KeyIndex::entry_at`], never through
/// owning references, so hostile link values cannot produce ownership cycles.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyIndex {
    pub header: KeyIndexHeader,
    entries: Vec<KeyIndexEntry>,
    pub logs: Logs,
}

impl KeyIndex {
    /// Parses the full region (header plus entry array). `input` should hold
    /// `header.size` bytes when the file is intact; a shorter slice decodes
    /// whatever entries fit and logs the truncation.
    pub(crate) fn from_bytes(input: &[u8]) -> IResult<&[u8], Self> {
        let region_length = input.len();
        let (input, header) = KeyIndexHeader::from_bytes(input)?;

        let mut logs = Logs::default();
        let fit = (region_length - KEY_INDEX_HEADER_LENGTH as usize) / KEY_INDEX_ENTRY_LENGTH as usize;
        let count = (header.entry_count as usize).min(fit);
        if count < header.entry_count as usize {
            logs.add(
                LogCode::WarningCorrupt,
                &format!(
                    "Key index declares {} entries but only {} fit the region",
                    header.entry_count, count
                ),
            );
        }
        let (input, entries) = nom::multi::count(KeyIndexEntry::from_bytes(), count)(input)?;

        Ok((
            input,
            Self {
                header,
                entries,
                logs,
            },
        ))
    }

    /// Translates a link offset to an entry. `None` means the offset does not
    /// land on an entry boundary inside the region; callers filter the
    /// [`NO_LINK`] sentinel before asking.
    pub(crate) fn entry_at(&self, offset: u32) -> Option<&KeyIndexEntry> {
        if offset < KEY_INDEX_HEADER_LENGTH {
            return None;
        }
        let relative = offset - KEY_INDEX_HEADER_LENGTH;
        if relative % KEY_INDEX_ENTRY_LENGTH != 0 {
            return None;
        }
        self.entries.get((relative / KEY_INDEX_ENTRY_LENGTH) as usize)
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_truncated(&self) -> bool {
        self.logs.has_logs()
    }
}
