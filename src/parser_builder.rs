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
use crate::file_io::FileSource;
use crate::parser::Parser;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
enum BuilderSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Entry point for opening a CREG file.
///
/// ```no_run
/// use creg::parser_builder::ParserBuilder;
///
/// # fn main() -> Result<(), creg::err::Error> {
/// let mut builder = ParserBuilder::from_path("USER.DAT");
/// builder.with_codepage(creg::codepage::Codepage::Windows1251);
/// let parser = builder.build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ParserBuilder {
    source: BuilderSource,
    codepage: Codepage,
}

impl ParserBuilder {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            source: BuilderSource::Path(path.as_ref().to_path_buf()),
            codepage: Codepage::default(),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            source: BuilderSource::Bytes(bytes),
            codepage: Codepage::default(),
        }
    }

    /// Selects the 8-bit codepage for names and string payloads; defaults to
    /// windows-1252.
    pub fn with_codepage(&mut self, codepage: Codepage) -> &mut Self {
        self.codepage = codepage;
        self
    }

    pub fn build(self) -> Result<Parser, Error> {
        let source = match self.source {
            BuilderSource::Path(path) => FileSource::from_path(path)?,
            BuilderSource::Bytes(bytes) => FileSource::from_vec(bytes),
        };
        Parser::new(source, self.codepage)
    }
}
