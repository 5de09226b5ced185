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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("An I/O error has occurred: {}", detail)]
    Io { detail: String },

    /// The file does not start with the `CREG` signature. Fatal; nothing is parsed.
    #[error("The file signature does not match 'CREG'")]
    SignatureMismatch,

    /// An internal inconsistency in the file. Usually handled locally by
    /// flagging the handle corrupted; surfaces only when no usable data remains.
    #[error("Invalid data was encountered: {}", detail)]
    InvalidData { detail: String },

    #[error("An invalid argument was supplied: {}", detail)]
    InvalidArgument { detail: String },

    /// A codepage conversion failed under the strict policy.
    #[error("A string conversion failed: {}", detail)]
    Conversion { detail: String },

    /// The caller asked for an interpretation incompatible with the value's type,
    /// or named a codepage this library does not recognize.
    #[error("Unsupported value: {}", detail)]
    UnsupportedValue { detail: String },

    /// The operation observed the abort flag set via `Parser::signal_abort`.
    #[error("The operation was aborted by the caller")]
    AbortRequested,

    #[error("An error has occurred while parsing: {}", detail)]
    Nom { detail: String },
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io {
            detail: format!("{:?}", error),
        }
    }
}

impl<T: std::fmt::Debug> From<nom::Err<T>> for Error {
    fn from(error: nom::Err<T>) -> Self {
        Error::Nom {
            detail: format!("{:#?}", error),
        }
    }
}

impl<T: std::fmt::Debug> From<nom::error::Error<T>> for Error {
    fn from(error: nom::error::Error<T>) -> Self {
        Error::Nom {
            detail: format!("{:#?}", error),
        }
    }
}
