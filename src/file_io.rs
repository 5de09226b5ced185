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
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

/// Byte-addressable random-access source for a registry file: either an open
/// file handle or an in-memory buffer. Positioned reads are serialized under
/// the internal lock so concurrent key materializations never interleave a
/// seek with another reader's read.
#[derive(Debug)]
pub(crate) enum FileSource {
    File { file: Mutex<File>, length: u64 },
    Buffer(Vec<u8>),
}

impl FileSource {
    pub(crate) fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        let length = file.metadata()?.len();
        Ok(FileSource::File {
            file: Mutex::new(file),
            length,
        })
    }

    pub(crate) fn from_vec(buffer: Vec<u8>) -> Self {
        FileSource::Buffer(buffer)
    }

    pub(crate) fn length(&self) -> u64 {
        match self {
            FileSource::File { length, .. } => *length,
            FileSource::Buffer(buffer) => buffer.len() as u64,
        }
    }

    /// Reads up to `buf.len()` bytes starting at `offset` and returns the
    /// count actually read. Short reads at EOF are not an error; an offset
    /// range that overflows is.
    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        if offset.checked_add(buf.len() as u64).is_none() {
            return Err(Error::InvalidArgument {
                detail: format!("read range overflows at offset {:#x}", offset),
            });
        }
        match self {
            FileSource::Buffer(buffer) => {
                let start = (offset.min(buffer.len() as u64)) as usize;
                let end = (start + buf.len()).min(buffer.len());
                let count = end - start;
                buf[..count].copy_from_slice(&buffer[start..end]);
                Ok(count)
            }
            FileSource::File { file, .. } => {
                let mut file = file.lock().map_err(|_| Error::Io {
                    detail: "file lock poisoned".to_string(),
                })?;
                file.seek(SeekFrom::Start(offset))?;
                let mut count = 0;
                while count < buf.len() {
                    let read = file.read(&mut buf[count..])?;
                    if read == 0 {
                        break;
                    }
                    count += read;
                }
                Ok(count)
            }
        }
    }

    /// Reads `size` bytes at `offset`, truncated to whatever the source still
    /// holds past `offset`.
    pub(crate) fn read_range(&self, offset: u64, size: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0; size];
        let count = self.read_at(offset, &mut buf)?;
        buf.truncate(count);
        Ok(buf)
    }
}
