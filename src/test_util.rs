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

//! Builds synthetic CREG images for the test suite: a key tree in, the exact
//! on-disk bytes out. Link offsets, record sizes and page checksums are
//! produced the way Windows would have written them, so tests can then break
//! specific fields on purpose.

use crate::codepage::{Codepage, ConversionPolicy};
use crate::data_page::{CHECKSUM_OFFSET, DATA_PAGE_HEADER_LENGTH, DATA_PAGE_SIZE_UNIT};
use crate::data_page::DataPage;
use crate::file_header::FILE_HEADER_LENGTH;
use crate::key_index::{KEY_INDEX_ENTRY_LENGTH, KEY_INDEX_HEADER_LENGTH, NO_LINK};
use crate::key_name_entry::KEY_NAME_ENTRY_HEADER_LENGTH;
use crate::value_entry::VALUE_ENTRY_HEADER_LENGTH;

pub(crate) const NAMELESS: (u16, u16) = (0xFFFF, 0xFFFF);

#[derive(Clone, Debug)]
pub(crate) struct HiveValue {
    pub name: String,
    pub value_type: u32,
    pub data: Vec<u8>,
}

impl HiveValue {
    pub(crate) fn new(name: &str, value_type: u32, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            value_type,
            data: data.to_vec(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct HiveKey {
    pub name: String,
    /// `(rgdb_index, key_id)`
    pub identity: (u16, u16),
    pub values: Vec<HiveValue>,
    pub children: Vec<HiveKey>,
    /// When false the RGKN entry is emitted without a backing name record.
    pub record: bool,
}

impl HiveKey {
    pub(crate) fn new(name: &str, identity: (u16, u16)) -> Self {
        Self {
            name: name.to_string(),
            identity,
            values: Vec::new(),
            children: Vec::new(),
            record: true,
        }
    }

    /// The way Windows writes roots: an entry with the all-bits identity and
    /// no name record.
    pub(crate) fn nameless_root() -> Self {
        let mut key = Self::new("", NAMELESS);
        key.record = false;
        key
    }

    pub(crate) fn with_value(mut self, value: HiveValue) -> Self {
        self.values.push(value);
        self
    }

    pub(crate) fn with_child(mut self, child: HiveKey) -> Self {
        self.children.push(child);
        self
    }

    pub(crate) fn without_record(mut self) -> Self {
        self.record = false;
        self
    }
}

/// Absolute file offset of RGKN entry `index` (flatten order is pre-order).
pub(crate) fn key_index_entry_offset(index: usize) -> usize {
    FILE_HEADER_LENGTH + KEY_INDEX_HEADER_LENGTH as usize + index * KEY_INDEX_ENTRY_LENGTH as usize
}

/// Absolute file offset of the first RGDB page for a tree with `key_count`
/// RGKN entries.
pub(crate) fn first_page_offset(key_count: usize) -> usize {
    FILE_HEADER_LENGTH + KEY_INDEX_HEADER_LENGTH as usize + key_count * KEY_INDEX_ENTRY_LENGTH as usize
}

struct FlatKey<'a> {
    key: &'a HiveKey,
    parent: Option<usize>,
    first_child: Option<usize>,
    next_sibling: Option<usize>,
}

fn flatten<'a>(key: &'a HiveKey, parent: Option<usize>, out: &mut Vec<FlatKey<'a>>) -> usize {
    let index = out.len();
    out.push(FlatKey {
        key,
        parent,
        first_child: None,
        next_sibling: None,
    });
    let mut previous_child: Option<usize> = None;
    for child in &key.children {
        let child_index = flatten(child, Some(index), out);
        match previous_child {
            None => out[index].first_child = Some(child_index),
            Some(previous) => out[previous].next_sibling = Some(child_index),
        }
        previous_child = Some(child_index);
    }
    index
}

fn entry_link(index: Option<usize>) -> u32 {
    match index {
        Some(index) => KEY_INDEX_HEADER_LENGTH + index as u32 * KEY_INDEX_ENTRY_LENGTH,
        None => NO_LINK,
    }
}

fn name_bytes(name: &str) -> Vec<u8> {
    Codepage::Windows1252
        .encode(name, ConversionPolicy::Substitute)
        .unwrap_or_default()
}

fn value_record(value: &HiveValue) -> Vec<u8> {
    let name = name_bytes(&value.name);
    let size = VALUE_ENTRY_HEADER_LENGTH + name.len() + value.data.len();
    let mut buf = Vec::new();
    buf.extend_from_slice(&(size as u32).to_le_bytes());
    buf.extend_from_slice(&value.value_type.to_le_bytes());
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(value.data.len() as u32).to_le_bytes());
    buf.extend_from_slice(&name);
    buf.extend_from_slice(&value.data);
    buf
}

fn key_record(key: &HiveKey) -> Vec<u8> {
    let name = name_bytes(&key.name);
    let values: Vec<Vec<u8>> = key.values.iter().map(value_record).collect();
    let values_size: usize = values.iter().map(Vec::len).sum();
    let size = KEY_NAME_ENTRY_HEADER_LENGTH + name.len() + values_size;
    let mut buf = Vec::new();
    buf.extend_from_slice(&(size as u32).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags
    buf.extend_from_slice(&key.identity.1.to_le_bytes());
    buf.extend_from_slice(&key.identity.0.to_le_bytes());
    buf.extend_from_slice(&(key.values.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(size as u32).to_le_bytes()); // used size
    buf.extend_from_slice(&name);
    for value in values {
        buf.extend_from_slice(&value);
    }
    buf
}

fn build_page(records: &[Vec<u8>], page_index: u16) -> Vec<u8> {
    let records_length: usize = records.iter().map(Vec::len).sum();
    let used = DATA_PAGE_HEADER_LENGTH + records_length;
    let size = (used as u32).div_ceil(DATA_PAGE_SIZE_UNIT) * DATA_PAGE_SIZE_UNIT;
    let mut buf = Vec::new();
    buf.extend_from_slice(b"RGDB");
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags
    buf.extend_from_slice(&page_index.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&(used as u32).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // checksum, patched below
    for record in records {
        buf.extend_from_slice(record);
    }
    buf.resize(size as usize, 0);
    let checksum = DataPage::calculate_checksum(&buf);
    buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
    buf
}

/// Assembles a complete CREG image from a key tree.
pub(crate) fn build_hive(root: &HiveKey) -> Vec<u8> {
    let mut flat = Vec::new();
    flatten(root, None, &mut flat);

    // RGKN region
    let index_size =
        KEY_INDEX_HEADER_LENGTH + flat.len() as u32 * KEY_INDEX_ENTRY_LENGTH;
    let mut index = Vec::new();
    index.extend_from_slice(b"RGKN");
    index.extend_from_slice(&index_size.to_le_bytes());
    index.extend_from_slice(&KEY_INDEX_HEADER_LENGTH.to_le_bytes()); // root entry
    index.extend_from_slice(&NO_LINK.to_le_bytes()); // free list
    index.extend_from_slice(&(flat.len() as u32).to_le_bytes());
    for flat_key in &flat {
        index.extend_from_slice(&0u32.to_le_bytes()); // hash: hint only, never trusted
        index.extend_from_slice(&entry_link(flat_key.parent).to_le_bytes());
        index.extend_from_slice(&entry_link(flat_key.first_child).to_le_bytes());
        index.extend_from_slice(&entry_link(flat_key.next_sibling).to_le_bytes());
        index.extend_from_slice(&flat_key.key.identity.1.to_le_bytes());
        index.extend_from_slice(&flat_key.key.identity.0.to_le_bytes());
        index.extend_from_slice(&[0u8; 8]);
    }

    // RGDB pages, grouped by declared rgdb index
    let page_count = flat
        .iter()
        .filter(|flat_key| flat_key.key.record)
        .map(|flat_key| flat_key.key.identity.0 as u32 + 1)
        .max()
        .unwrap_or(0);
    let mut pages = Vec::new();
    for page_index in 0..page_count {
        let records: Vec<Vec<u8>> = flat
            .iter()
            .filter(|flat_key| {
                flat_key.key.record && flat_key.key.identity.0 as u32 == page_index
            })
            .map(|flat_key| key_record(flat_key.key))
            .collect();
        pages.push(build_page(&records, page_index as u16));
    }

    let first_page = FILE_HEADER_LENGTH + index.len();
    let total = first_page + pages.iter().map(Vec::len).sum::<usize>();

    let mut hive = Vec::with_capacity(total);
    hive.extend_from_slice(b"CREG");
    hive.extend_from_slice(&4u16.to_le_bytes());
    hive.extend_from_slice(&0u16.to_le_bytes());
    hive.extend_from_slice(&(total as u32).to_le_bytes());
    hive.extend_from_slice(&page_count.to_le_bytes());
    hive.extend_from_slice(&(first_page as u32).to_le_bytes());
    let root_descriptor = ((root.identity.0 as u32) << 16) | root.identity.1 as u32;
    hive.extend_from_slice(&root_descriptor.to_le_bytes());
    hive.extend_from_slice(&[0u8; 8]);
    hive.extend_from_slice(&index);
    for page in pages {
        hive.extend_from_slice(&page);
    }
    hive
}

/// A small tree most scenario tests share:
/// root → Software → Microsoft → Windows, plus root → System.
pub(crate) fn standard_tree() -> HiveKey {
    HiveKey::nameless_root()
        .with_child(
            HiveKey::new("Software", (0, 0)).with_child(
                HiveKey::new("Microsoft", (0, 1))
                    .with_child(HiveKey::new("Windows", (0, 2))),
            ),
        )
        .with_child(HiveKey::new("System", (0, 3)))
}
