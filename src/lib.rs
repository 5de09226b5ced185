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

//! Creg is a read-only parser for Windows 9x/Me registry files (USER.DAT,
//! SYSTEM.DAT). It decodes the `CREG` on-disk format — the RGKN key index and
//! the RGDB name pages — and exposes the result as a lazily materialized
//! key/value tree.
//!
//! ```no_run
//! use creg::parser::Parser;
//!
//! # fn main() -> Result<(), creg::err::Error> {
//! let parser = Parser::from_path("USER.DAT")?;
//! if let Some(key) = parser.get_key_by_path("Software\\Microsoft\\Windows")? {
//!     for value in key.value_iter() {
//!         println!("{}: {:?}", value.name(), value.get_content());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod codepage;
pub mod data_page;
pub mod err;
pub mod file_header;
pub mod filter;
pub mod key_index;
pub mod key_name_entry;
pub mod key_node;
pub mod log;
pub mod macros;
pub mod parser;
pub mod parser_builder;
pub mod util;
pub mod value_entry;

mod file_io;

#[cfg(test)]
mod test_util;
