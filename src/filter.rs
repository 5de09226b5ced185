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
use crate::impl_serialize_for_bitflags;
use crate::key_node::KeyNode;
use bitflags::bitflags;
use regex::Regex;

/// Filter allows specification of a condition to be met when iterating the
/// key tree. Traversal prunes branches that can no longer match.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub(crate) reg_query: Option<RegQuery>,
}

impl Filter {
    pub fn new() -> Self {
        Filter { reg_query: None }
    }

    pub fn from_query(reg_query: RegQuery) -> Self {
        Filter {
            reg_query: Some(reg_query),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.reg_query.is_some()
    }

    pub(crate) fn check_key(&self, key: &KeyNode) -> FilterFlags {
        match &self.reg_query {
            Some(reg_query) => reg_query.check_key_match(&key.lowercase_path()),
            None => FilterFlags::FILTER_ITERATE_KEYS,
        }
    }

    pub(crate) fn return_sub_keys(&self) -> bool {
        match &self.reg_query {
            Some(reg_query) => reg_query.children,
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub enum RegQueryComponent {
    ComponentString(String),
    ComponentRegex(Regex),
}

/// A structured key-path query; components may be literal strings (matched
/// ASCII case-insensitively) or regular expressions over the lowercased name.
#[derive(Clone, Debug, Default)]
pub struct RegQuery {
    pub(crate) key_path: Vec<RegQueryComponent>,
    /// Determines if subkeys of a matched key are returned during iteration.
    pub(crate) children: bool,
}

impl RegQuery {
    /// Compares a key's full lowercased path against the query. Paths shorter
    /// than the query iterate onward; a full match is flagged as such.
    fn check_key_match(&self, key_path: &str) -> FilterFlags {
        let key_path_iterator = key_path
            .split(['\\', '/'])
            .filter(|segment| !segment.is_empty());
        let mut filter_iterator = self.key_path.iter();
        let mut filter_path_segment = filter_iterator.next();

        for key_path_segment in key_path_iterator {
            match filter_path_segment {
                Some(fps) => match fps {
                    RegQueryComponent::ComponentString(s) => {
                        if s != key_path_segment {
                            return FilterFlags::FILTER_NO_MATCH;
                        }
                        filter_path_segment = filter_iterator.next();
                    }
                    RegQueryComponent::ComponentRegex(r) => {
                        if r.is_match(key_path_segment) {
                            filter_path_segment = filter_iterator.next();
                        } else {
                            return FilterFlags::FILTER_NO_MATCH;
                        }
                    }
                },
                None => return FilterFlags::FILTER_NO_MATCH,
            }
        }
        if filter_path_segment.is_none() {
            FilterFlags::FILTER_ITERATE_KEYS | FilterFlags::FILTER_KEY_MATCH
        } else {
            FilterFlags::FILTER_ITERATE_KEYS
        }
    }
}

/// Builds a [`Filter`] from path components.
#[derive(Clone, Debug, Default)]
pub struct FilterBuilder {
    key_path: Vec<RegQueryComponent>,
    children: bool,
    regex_error: Option<String>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds literal components, splitting on `\` or `/`.
    pub fn add_key_path(mut self, key_path: &str) -> Self {
        for segment in key_path
            .to_ascii_lowercase()
            .split(['\\', '/'])
            .filter(|segment| !segment.is_empty())
        {
            self.key_path
                .push(RegQueryComponent::ComponentString(segment.to_string()));
        }
        self
    }

    /// Adds one regex component, matched against lowercased key names.
    pub fn add_regex(mut self, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(regex) => self
                .key_path
                .push(RegQueryComponent::ComponentRegex(regex)),
            Err(error) => self.regex_error = Some(error.to_string()),
        }
        self
    }

    pub fn return_child_keys(mut self, children: bool) -> Self {
        self.children = children;
        self
    }

    pub fn build(self) -> Result<Filter, Error> {
        match self.regex_error {
            Some(detail) => Err(Error::InvalidArgument { detail }),
            None => Ok(Filter::from_query(RegQuery {
                key_path: self.key_path,
                children: self.children,
            })),
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct FilterFlags: u16 {
        const FILTER_NO_MATCH     = 0x0001;
        const FILTER_ITERATE_KEYS = 0x0002;
        const FILTER_KEY_MATCH    = 0x0004;
    }
}
impl_serialize_for_bitflags! {FilterFlags}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_index::NO_LINK;
    use crate::log::Logs;

    fn key_with_path(path: &str) -> KeyNode {
        KeyNode {
            key_name: path.rsplit('\\').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            key_id: 0,
            rgdb_index: 0,
            index_offset: 20,
            hash: 0,
            parent_offset: NO_LINK,
            first_sub_key_offset: NO_LINK,
            next_sibling_offset: NO_LINK,
            sub_values: Vec::new(),
            is_corrupted: false,
            logs: Logs::default(),
        }
    }

    #[test]
    fn test_check_key_literal_match() {
        let filter = FilterBuilder::new()
            .add_key_path("Software\\Microsoft")
            .build()
            .unwrap();

        assert_eq!(
            FilterFlags::FILTER_ITERATE_KEYS | FilterFlags::FILTER_KEY_MATCH,
            filter.check_key(&key_with_path("\\SOFTWARE\\microsoft")),
            "Different case key match failed"
        );
        assert_eq!(
            FilterFlags::FILTER_ITERATE_KEYS,
            filter.check_key(&key_with_path("\\Software")),
            "Ancestor should iterate onward"
        );
        assert_eq!(
            FilterFlags::FILTER_NO_MATCH,
            filter.check_key(&key_with_path("\\Software\\Classes")),
            "Sibling branch should prune"
        );
        assert_eq!(
            FilterFlags::FILTER_NO_MATCH,
            filter.check_key(&key_with_path("\\Software\\Microsoft\\Windows")),
            "Deeper than the query without return_child_keys"
        );
    }

    #[test]
    fn test_check_key_regex_match() {
        let filter = FilterBuilder::new()
            .add_key_path("Software")
            .add_regex("^micro.*$")
            .build()
            .unwrap();
        assert_eq!(
            FilterFlags::FILTER_ITERATE_KEYS | FilterFlags::FILTER_KEY_MATCH,
            filter.check_key(&key_with_path("\\Software\\Microsoft"))
        );
        assert_eq!(
            FilterFlags::FILTER_NO_MATCH,
            filter.check_key(&key_with_path("\\Software\\Classes"))
        );
    }

    #[test]
    fn test_root_iterates() {
        let filter = FilterBuilder::new().add_key_path("Software").build().unwrap();
        // the root's path is empty; nothing has been compared yet
        assert_eq!(
            FilterFlags::FILTER_ITERATE_KEYS,
            filter.check_key(&key_with_path(""))
        );
    }

    #[test]
    fn test_bad_regex_reports() {
        assert!(matches!(
            FilterBuilder::new().add_regex("[").build(),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_no_query_iterates_everything() {
        let filter = Filter::new();
        assert!(!filter.is_valid());
        assert_eq!(
            FilterFlags::FILTER_ITERATE_KEYS,
            filter.check_key(&key_with_path("\\anything"))
        );
    }
}
