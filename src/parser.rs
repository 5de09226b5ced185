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
use crate::data_page::{DataPage, DataPageHeader, DATA_PAGE_HEADER_LENGTH};
use crate::err::Error;
use crate::file_header::{FileHeader, FILE_HEADER_LENGTH, FILE_SIZE_TOLERANCE};
use crate::file_io::FileSource;
use crate::filter::{Filter, FilterFlags};
use crate::key_index::{KeyIndex, KEY_INDEX_HEADER_LENGTH, NO_LINK};
use crate::key_node::KeyNode;
use crate::log::{LogCode, Logs};
use crate::parser_builder::ParserBuilder;
use nom::Finish;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

fn poisoned() -> Error {
    Error::Io {
        detail: "parser lock poisoned".to_string(),
    }
}

/// Read-only handle over one CREG file.
///
/// The RGKN key index is decoded once at open; RGDB pages are fetched lazily
/// and cached by index. Keys materialize on first access and are cached by
/// their `(rgdb_index, key_id)` identity, so repeated lookups hand back the
/// same `Arc`. All interior state is lock-protected; a `Parser` can be shared
/// across threads.
#[derive(Debug)]
pub struct Parser {
    source: FileSource,
    header: FileHeader,
    key_index: KeyIndex,
    codepage: RwLock<Codepage>,
    pages: RwLock<HashMap<u16, Arc<DataPage>>>,
    page_offsets: RwLock<Vec<u64>>,
    key_cache: RwLock<HashMap<(u16, u16), Arc<KeyNode>>>,
    corrupted: AtomicBool,
    aborted: AtomicBool,
    logs: Mutex<Logs>,
}

impl Parser {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        ParserBuilder::from_path(path).build()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        ParserBuilder::from_bytes(bytes).build()
    }

    pub(crate) fn new(source: FileSource, codepage: Codepage) -> Result<Self, Error> {
        let header_bytes = source.read_range(0, FILE_HEADER_LENGTH)?;
        if header_bytes.len() < 4 || &header_bytes[0..4] != b"CREG" {
            return Err(Error::SignatureMismatch);
        }
        let (_, header) = FileHeader::from_bytes(&header_bytes)
            .finish()
            .map_err(|error| Error::InvalidData {
                detail: format!("file header: {:?}", error.code),
            })?;

        let mut logs = Logs::default();
        logs.extend(&header.logs);
        let mut corrupted = !header.is_supported_version();

        let source_length = source.length();
        let declared = header.file_size as u64;
        if declared < source_length.saturating_sub(FILE_SIZE_TOLERANCE) || declared > source_length
        {
            corrupted = true;
            logs.add(
                LogCode::WarningCorrupt,
                &format!(
                    "Header declares {:#x} bytes, the source holds {:#x}",
                    declared, source_length
                ),
            );
        }

        let index_offset = FILE_HEADER_LENGTH as u64;
        let index_header_bytes =
            source.read_range(index_offset, KEY_INDEX_HEADER_LENGTH as usize)?;
        let (_, index_header) = crate::key_index::KeyIndexHeader::from_bytes(&index_header_bytes)
            .finish()
            .map_err(|error| Error::InvalidData {
                detail: format!("key index header: {:?}", error.code),
            })?;
        let region_size = (index_header.size as u64)
            .min(source_length.saturating_sub(index_offset))
            .max(KEY_INDEX_HEADER_LENGTH as u64);
        let region = source.read_range(index_offset, region_size as usize)?;
        let (_, key_index) =
            KeyIndex::from_bytes(&region)
                .finish()
                .map_err(|error| Error::InvalidData {
                    detail: format!("key index: {:?}", error.code),
                })?;
        if key_index.is_truncated() {
            corrupted = true;
        }
        logs.extend(&key_index.logs);

        Ok(Self {
            source,
            header,
            key_index,
            codepage: RwLock::new(codepage),
            pages: RwLock::new(HashMap::new()),
            page_offsets: RwLock::new(Vec::new()),
            key_cache: RwLock::new(HashMap::new()),
            corrupted: AtomicBool::new(corrupted),
            aborted: AtomicBool::new(false),
            logs: Mutex::new(logs),
        })
    }

    /// Releases the handle. Dropping does the same; this exists so callers
    /// can close explicitly.
    pub fn close(self) {}

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// True once any decoder skipped or substituted data because of an
    /// internal inconsistency. Sticky for the life of the handle.
    pub fn is_corrupted(&self) -> bool {
        self.corrupted.load(Ordering::Acquire)
    }

    pub(crate) fn set_corrupted(&self) {
        self.corrupted.store(true, Ordering::Release);
    }

    /// Requests cancellation of the in-flight operation. The next page load
    /// or tree hop fails with `AbortRequested`; the handle stays usable.
    pub fn signal_abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// One-shot: observing the flag clears it, so exactly one operation fails
    /// per signal.
    pub(crate) fn check_abort(&self) -> Result<(), Error> {
        if self.aborted.swap(false, Ordering::AcqRel) {
            Err(Error::AbortRequested)
        } else {
            Ok(())
        }
    }

    pub fn get_codepage(&self) -> Codepage {
        self.codepage.read().map(|guard| *guard).unwrap_or_default()
    }

    /// Switches the 8-bit codepage used for names and string payloads.
    /// Already-decoded pages and keys are discarded since their strings were
    /// produced under the old codepage.
    pub fn set_codepage(&self, name: &str) -> Result<(), Error> {
        let codepage = Codepage::from_name(name)?;
        *self.codepage.write().map_err(|_| poisoned())? = codepage;
        self.pages.write().map_err(|_| poisoned())?.clear();
        self.key_cache.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    /// Everything the decoders logged so far, aggregated.
    pub fn get_logs(&self) -> Logs {
        self.logs
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub(crate) fn add_logs(&self, other: &Logs) {
        if let Ok(mut guard) = self.logs.lock() {
            guard.extend(other);
        }
    }

    pub(crate) fn log_warning(&self, code: LogCode, text: &str) {
        if let Ok(mut guard) = self.logs.lock() {
            guard.add(code, text);
        }
    }

    /// The root key, or `None` for a file with an empty index.
    pub fn get_root_key(&self) -> Result<Option<Arc<KeyNode>>, Error> {
        let root_offset = self.key_index.header.root_entry_offset;
        if root_offset == NO_LINK {
            return Ok(None);
        }
        self.materialize_key(root_offset, None)
    }

    /// Resolves a `\`- or `/`-separated path from the root. Empty components
    /// are ignored; comparison folds ASCII case only.
    pub fn get_key_by_path(&self, path: &str) -> Result<Option<Arc<KeyNode>>, Error> {
        let root = match self.get_root_key()? {
            Some(root) => root,
            None => return Ok(None),
        };
        self.descend(root, path)
    }

    /// Resolves a path relative to `key`. A leading separator restarts from
    /// the root instead.
    pub fn get_sub_key_by_path(
        &self,
        key: &Arc<KeyNode>,
        path: &str,
    ) -> Result<Option<Arc<KeyNode>>, Error> {
        if path.starts_with(['\\', '/']) {
            self.get_key_by_path(path)
        } else {
            self.descend(Arc::clone(key), path)
        }
    }

    fn descend(&self, start: Arc<KeyNode>, path: &str) -> Result<Option<Arc<KeyNode>>, Error> {
        let mut current = start;
        for component in path.split(['\\', '/']).filter(|c| !c.is_empty()) {
            self.check_abort()?;
            let mut found = None;
            for sub_key in self.sub_keys(&current) {
                let sub_key = sub_key?;
                if sub_key.key_name.eq_ignore_ascii_case(component) {
                    found = Some(sub_key);
                    break;
                }
            }
            current = match found {
                Some(key) => key,
                None => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    pub fn get_sub_key_by_name(
        &self,
        key: &KeyNode,
        name: &str,
    ) -> Result<Option<Arc<KeyNode>>, Error> {
        for sub_key in self.sub_keys(key) {
            let sub_key = sub_key?;
            if sub_key.key_name.eq_ignore_ascii_case(name) {
                return Ok(Some(sub_key));
            }
        }
        Ok(None)
    }

    pub fn get_sub_key_by_index(
        &self,
        key: &KeyNode,
        index: usize,
    ) -> Result<Option<Arc<KeyNode>>, Error> {
        for (position, sub_key) in self.sub_keys(key).enumerate() {
            let sub_key = sub_key?;
            if position == index {
                return Ok(Some(sub_key));
            }
        }
        Ok(None)
    }

    pub fn number_of_sub_keys(&self, key: &KeyNode) -> Result<usize, Error> {
        let mut count = 0;
        for sub_key in self.sub_keys(key) {
            sub_key?;
            count += 1;
        }
        Ok(count)
    }

    /// The key's parent, `None` for the root.
    pub fn parent_key(&self, key: &KeyNode) -> Result<Option<Arc<KeyNode>>, Error> {
        if key.parent_offset == NO_LINK {
            return Ok(None);
        }
        // ancestors were materialized on the way down, so this is normally a
        // cache hit; the derived path only matters on a cold cache
        let parent_path = key.path.rsplit_once('\\').map(|(p, _)| p).unwrap_or("");
        let grandparent_path = parent_path.rsplit_once('\\').map(|(p, _)| p).unwrap_or("");
        self.materialize_key(key.parent_offset, Some(grandparent_path))
    }

    /// Lazy iterator over the key's children in first-child/next-sibling
    /// order.
    pub fn sub_keys<'a>(&'a self, key: &KeyNode) -> SubKeyIterator<'a> {
        SubKeyIterator {
            parser: self,
            first: key.first_sub_key_offset,
            parent_path: key.path.clone(),
            current: key.first_sub_key_offset,
            visited: HashSet::new(),
            done: false,
        }
    }

    /// Depth-first pre-order iterator over the whole tree.
    pub fn iter(&self) -> ParserIterator<'_> {
        ParserIterator::new(self)
    }

    /// Loads (or fetches from cache) the RGDB page at `rgdb_index`.
    pub(crate) fn load_page(&self, rgdb_index: u16) -> Result<Arc<DataPage>, Error> {
        self.check_abort()?;
        if (rgdb_index as u32) >= self.header.data_block_count {
            return Err(Error::InvalidData {
                detail: format!(
                    "rgdb index {} out of range ({} declared)",
                    rgdb_index, self.header.data_block_count
                ),
            });
        }
        if let Some(page) = self
            .pages
            .read()
            .map_err(|_| poisoned())?
            .get(&rgdb_index)
        {
            return Ok(Arc::clone(page));
        }

        let offset = self.page_offset(rgdb_index)?;
        let header_bytes = self.source.read_range(offset, DATA_PAGE_HEADER_LENGTH)?;
        let (_, page_header) =
            DataPageHeader::from_bytes(&header_bytes)
                .finish()
                .map_err(|error| Error::InvalidData {
                    detail: format!("rgdb page {} header: {:?}", rgdb_index, error.code),
                })?;
        let size = (page_header.size as u64).min(self.source.length().saturating_sub(offset));
        let page_bytes = self.source.read_range(offset, size as usize)?;

        let page = DataPage::from_bytes(&page_bytes, rgdb_index, self.get_codepage())?;
        if page.is_corrupted {
            self.set_corrupted();
        }
        self.add_logs(&page.logs);

        let mut pages = self.pages.write().map_err(|_| poisoned())?;
        let page = pages.entry(rgdb_index).or_insert_with(|| Arc::new(page));
        Ok(Arc::clone(page))
    }

    /// Start offset of the page, discovered by walking the chain of page
    /// headers from `first_data_block_offset`.
    fn page_offset(&self, rgdb_index: u16) -> Result<u64, Error> {
        let mut offsets = self.page_offsets.write().map_err(|_| poisoned())?;
        if offsets.is_empty() {
            offsets.push(self.header.first_data_block_offset as u64);
        }
        while offsets.len() <= rgdb_index as usize {
            self.check_abort()?;
            let current = offsets[offsets.len() - 1];
            let header_bytes = self.source.read_range(current, DATA_PAGE_HEADER_LENGTH)?;
            let (_, page_header) = DataPageHeader::from_bytes(&header_bytes)
                .finish()
                .map_err(|error| Error::InvalidData {
                    detail: format!("rgdb page at {:#x}: {:?}", current, error.code),
                })?;
            if page_header.size == 0 {
                return Err(Error::InvalidData {
                    detail: format!("rgdb page at {:#x} declares zero size", current),
                });
            }
            offsets.push(current + page_header.size as u64);
        }
        Ok(offsets[rgdb_index as usize])
    }

    /// Joins a key-index entry with its key-name record. Unresolvable links
    /// are a local error: the file is flagged and `None` comes back. A
    /// missing or unreadable name record yields an empty-named key flagged
    /// corrupted, except for the nameless identity real roots carry.
    pub(crate) fn materialize_key(
        &self,
        index_offset: u32,
        parent_path: Option<&str>,
    ) -> Result<Option<Arc<KeyNode>>, Error> {
        self.check_abort()?;
        let entry = match self.key_index.entry_at(index_offset) {
            Some(entry) => *entry,
            None => {
                self.set_corrupted();
                self.log_warning(
                    LogCode::WarningCorrupt,
                    &format!("Link {:#x} does not resolve to a key index entry", index_offset),
                );
                return Ok(None);
            }
        };

        let identity = (entry.rgdb_index, entry.key_id);
        if let Some(key) = self.key_cache.read().map_err(|_| poisoned())?.get(&identity) {
            return Ok(Some(Arc::clone(key)));
        }

        let mut logs = Logs::default();
        let mut is_corrupted = false;
        let (key_name, sub_values) = if entry.is_nameless() {
            (String::new(), Vec::new())
        } else {
            match self.load_page(entry.rgdb_index) {
                Ok(page) => match page.find_key_entry(entry.key_id) {
                    Some(record) => {
                        logs.extend(&record.logs);
                        (record.key_name.clone(), record.sub_values.clone())
                    }
                    None => {
                        is_corrupted = true;
                        logs.add(
                            LogCode::WarningCorrupt,
                            &format!(
                                "No key name record with id {} in rgdb page {}",
                                entry.key_id, entry.rgdb_index
                            ),
                        );
                        (String::new(), Vec::new())
                    }
                },
                Err(Error::AbortRequested) => return Err(Error::AbortRequested),
                Err(Error::Io { detail }) => return Err(Error::Io { detail }),
                Err(error) => {
                    is_corrupted = true;
                    logs.add(
                        LogCode::WarningCorrupt,
                        &format!(
                            "Key entry at {:#x} has no readable name record: {}",
                            index_offset, error
                        ),
                    );
                    (String::new(), Vec::new())
                }
            }
        };

        let path = if entry.parent_offset == NO_LINK {
            String::new()
        } else {
            match parent_path {
                Some(parent) => format!("{}\\{}", parent, key_name),
                None => key_name.clone(),
            }
        };

        if is_corrupted {
            self.set_corrupted();
        }
        self.add_logs(&logs);

        let node = Arc::new(KeyNode {
            key_name,
            path,
            key_id: entry.key_id,
            rgdb_index: entry.rgdb_index,
            index_offset,
            hash: entry.hash,
            parent_offset: entry.parent_offset,
            first_sub_key_offset: entry.first_sub_key_offset,
            next_sibling_offset: entry.next_sibling_offset,
            sub_values,
            is_corrupted,
            logs,
        });

        let mut cache = self.key_cache.write().map_err(|_| poisoned())?;
        let node = cache.entry(identity).or_insert(node);
        Ok(Some(Arc::clone(node)))
    }

    pub(crate) fn key_index_entry_count(&self) -> usize {
        self.key_index.entry_count()
    }

    pub(crate) fn root_entry_offset(&self) -> u32 {
        self.key_index.header.root_entry_offset
    }
}

/// Lazy, finite, restartable walk over one key's children. A link that
/// revisits an entry truncates the walk and flags the file; it is not an
/// error to the caller.
pub struct SubKeyIterator<'a> {
    parser: &'a Parser,
    first: u32,
    parent_path: String,
    current: u32,
    visited: HashSet<u32>,
    done: bool,
}

impl<'a> SubKeyIterator<'a> {
    /// Re-seeks to the first child.
    pub fn reset(&mut self) {
        self.current = self.first;
        self.visited.clear();
        self.done = false;
    }
}

impl<'a> Iterator for SubKeyIterator<'a> {
    type Item = Result<Arc<KeyNode>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.current == NO_LINK {
            self.done = true;
            return None;
        }
        if let Err(error) = self.parser.check_abort() {
            self.done = true;
            return Some(Err(error));
        }
        if !self.visited.insert(self.current)
            || self.visited.len() > self.parser.key_index_entry_count()
        {
            self.parser.set_corrupted();
            self.parser.log_warning(
                LogCode::WarningCorrupt,
                &format!("Sibling chain revisits entry {:#x}", self.current),
            );
            self.done = true;
            return None;
        }
        match self.parser.materialize_key(self.current, Some(&self.parent_path)) {
            Ok(Some(node)) => {
                self.current = node.next_sibling_offset;
                Some(Ok(node))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

struct IterationFrame {
    offset: u32,
    parent_path: String,
    under_match: bool,
}

/// Depth-first pre-order iterator over every key, optionally pruned by a
/// [`Filter`].
pub struct ParserIterator<'a> {
    parser: &'a Parser,
    filter: Option<Filter>,
    stack: Vec<IterationFrame>,
    visited: HashSet<u32>,
    started: bool,
    done: bool,
}

impl<'a> ParserIterator<'a> {
    pub fn new(parser: &'a Parser) -> Self {
        Self {
            parser,
            filter: None,
            stack: Vec::new(),
            visited: HashSet::new(),
            started: false,
            done: false,
        }
    }

    pub fn with_filter(&mut self, filter: Filter) -> &mut Self {
        self.filter = Some(filter);
        self
    }

    /// Restarts the traversal from the root.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.visited.clear();
        self.started = false;
        self.done = false;
    }
}

impl<'a> Iterator for ParserIterator<'a> {
    type Item = Result<Arc<KeyNode>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            let root_offset = self.parser.root_entry_offset();
            if root_offset != NO_LINK {
                self.stack.push(IterationFrame {
                    offset: root_offset,
                    parent_path: String::new(),
                    under_match: false,
                });
            }
        }
        while let Some(frame) = self.stack.pop() {
            if let Err(error) = self.parser.check_abort() {
                self.done = true;
                return Some(Err(error));
            }
            if !self.visited.insert(frame.offset) {
                self.parser.set_corrupted();
                self.parser.log_warning(
                    LogCode::WarningCorrupt,
                    &format!("Traversal revisits entry {:#x}", frame.offset),
                );
                continue;
            }
            let node = match self
                .parser
                .materialize_key(frame.offset, Some(&frame.parent_path))
            {
                Ok(Some(node)) => node,
                Ok(None) => continue,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            };

            if node.next_sibling_offset != NO_LINK {
                self.stack.push(IterationFrame {
                    offset: node.next_sibling_offset,
                    parent_path: frame.parent_path.clone(),
                    under_match: frame.under_match,
                });
            }

            let (yield_key, descend, child_under_match) = match &self.filter {
                None => (true, true, false),
                Some(filter) => {
                    if frame.under_match && filter.return_sub_keys() {
                        (true, true, true)
                    } else {
                        let flags = filter.check_key(&node);
                        if flags.contains(FilterFlags::FILTER_KEY_MATCH) {
                            (true, filter.return_sub_keys(), true)
                        } else if flags.contains(FilterFlags::FILTER_ITERATE_KEYS) {
                            (false, true, false)
                        } else {
                            (false, false, false)
                        }
                    }
                }
            };

            if descend && node.first_sub_key_offset != NO_LINK {
                self.stack.push(IterationFrame {
                    offset: node.first_sub_key_offset,
                    parent_path: node.path.clone(),
                    under_match: child_under_match,
                });
            }
            if yield_key {
                return Some(Ok(node));
            }
        }
        self.done = true;
        None
    }
}
