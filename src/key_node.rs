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

use crate::log::Logs;
use crate::value_entry::ValueEntry;
use serde::Serialize;

/// A key materialized by joining its RGKN entry with the key-name record the
/// entry points to. Owned by the parser's key cache; tree navigation goes
/// through the parser (`sub_keys`, `parent_key`), never through owning links.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyNode {
    /// Key name decoded with the file's codepage (or UTF-16 when flagged).
    pub key_name: String,
    /// Backslash-joined path from the root. The root itself is the empty
    /// string.
    pub path: String,
    pub key_id: u16,
    pub rgdb_index: u16,
    /// Offset of the backing RGKN entry, relative to the region base. Stable
    /// for the life of the file.
    pub index_offset: u32,
    /// Name hash from the RGKN entry; surfaced but never trusted for
    /// comparisons.
    pub hash: u32,
    pub(crate) parent_offset: u32,
    pub(crate) first_sub_key_offset: u32,
    pub(crate) next_sibling_offset: u32,
    /// Values in on-page order.
    pub sub_values: Vec<ValueEntry>,
    /// Set when this key's name record was missing or unreadable; the name is
    /// empty in that case.
    pub is_corrupted: bool,
    pub logs: Logs,
}

impl KeyNode {
    pub fn name(&self) -> &str {
        &self.key_name
    }

    /// Offset of the RGKN entry backing this key.
    pub fn offset(&self) -> u32 {
        self.index_offset
    }

    pub fn number_of_values(&self) -> usize {
        self.sub_values.len()
    }

    pub fn get_value_by_index(&self, index: usize) -> Option<&ValueEntry> {
        self.sub_values.get(index)
    }

    /// First value whose name matches, ASCII case-insensitively.
    pub fn get_value(&self, name: &str) -> Option<&ValueEntry> {
        self.sub_values
            .iter()
            .find(|value| value.value_name.eq_ignore_ascii_case(name))
    }

    /// Restartable iterator over the values in on-page order.
    pub fn value_iter(&self) -> ValueIterator<'_> {
        ValueIterator {
            key: self,
            index: 0,
        }
    }

    pub(crate) fn lowercase_path(&self) -> String {
        self.path.to_ascii_lowercase()
    }
}

/// Lazy, finite, restartable walk over a key's values.
pub struct ValueIterator<'a> {
    key: &'a KeyNode,
    index: usize,
}

impl<'a> ValueIterator<'a> {
    /// Re-seeks to the first value.
    pub fn reset(&mut self) {
        self.index = 0;
    }
}

impl<'a> Iterator for ValueIterator<'a> {
    type Item = &'a ValueEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.key.sub_values.get(self.index)?;
        self.index += 1;
        Some(value)
    }
}
