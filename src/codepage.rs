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
use crate::log::{LogCode, Logs};
use encoding_rs::Encoding;
use serde::Serialize;

/// The 8-bit codepages key and value names may be stored in. Win9x writes
/// names in the system ANSI codepage and records no tag in the file, so the
/// caller picks; `Windows1252` is the default.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum Codepage {
    Ascii,
    Windows1250,
    Windows1251,
    #[default]
    Windows1252,
    Windows1253,
    Windows1254,
    Windows1255,
    Windows1256,
    Windows1257,
    Windows1258,
    Koi8R,
    Koi8U,
}

/// What to do when input bytes have no mapping in the selected codepage.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConversionPolicy {
    /// Emit U+FFFD and keep going; the failure is reported through `Logs`.
    #[default]
    Substitute,
    Strict,
}

impl Codepage {
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name.to_ascii_lowercase().as_str() {
            "ascii" => Ok(Self::Ascii),
            "windows-1250" => Ok(Self::Windows1250),
            "windows-1251" => Ok(Self::Windows1251),
            "windows-1252" => Ok(Self::Windows1252),
            "windows-1253" => Ok(Self::Windows1253),
            "windows-1254" => Ok(Self::Windows1254),
            "windows-1255" => Ok(Self::Windows1255),
            "windows-1256" => Ok(Self::Windows1256),
            "windows-1257" => Ok(Self::Windows1257),
            "windows-1258" => Ok(Self::Windows1258),
            "koi8-r" => Ok(Self::Koi8R),
            "koi8-u" => Ok(Self::Koi8U),
            _ => Err(Error::UnsupportedValue {
                detail: format!("Unrecognized codepage '{}'", name),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Windows1250 => "windows-1250",
            Self::Windows1251 => "windows-1251",
            Self::Windows1252 => "windows-1252",
            Self::Windows1253 => "windows-1253",
            Self::Windows1254 => "windows-1254",
            Self::Windows1255 => "windows-1255",
            Self::Windows1256 => "windows-1256",
            Self::Windows1257 => "windows-1257",
            Self::Windows1258 => "windows-1258",
            Self::Koi8R => "koi8-r",
            Self::Koi8U => "koi8-u",
        }
    }

    fn encoding(&self) -> &'static Encoding {
        match self {
            // Ascii is handled before this is consulted
            Self::Ascii | Self::Windows1252 => encoding_rs::WINDOWS_1252,
            Self::Windows1250 => encoding_rs::WINDOWS_1250,
            Self::Windows1251 => encoding_rs::WINDOWS_1251,
            Self::Windows1253 => encoding_rs::WINDOWS_1253,
            Self::Windows1254 => encoding_rs::WINDOWS_1254,
            Self::Windows1255 => encoding_rs::WINDOWS_1255,
            Self::Windows1256 => encoding_rs::WINDOWS_1256,
            Self::Windows1257 => encoding_rs::WINDOWS_1257,
            Self::Windows1258 => encoding_rs::WINDOWS_1258,
            Self::Koi8R => encoding_rs::KOI8_R,
            Self::Koi8U => encoding_rs::KOI8_U,
        }
    }

    /// Decodes codepage bytes to a `String`. Under `Substitute` this always
    /// succeeds; unmappable bytes become U+FFFD and are logged.
    pub fn decode(
        &self,
        bytes: &[u8],
        policy: ConversionPolicy,
        logs: &mut Logs,
    ) -> Result<String, Error> {
        if *self == Self::Ascii {
            return self.decode_ascii(bytes, policy, logs);
        }
        let (decoded, had_errors) = self.encoding().decode_without_bom_handling(bytes);
        if had_errors {
            match policy {
                ConversionPolicy::Strict => {
                    return Err(Error::Conversion {
                        detail: format!("bytes are not valid {}", self.name()),
                    })
                }
                ConversionPolicy::Substitute => logs.add(
                    LogCode::WarningConversion,
                    &format!("substituted unmappable {} bytes", self.name()),
                ),
            }
        }
        Ok(decoded.into_owned())
    }

    fn decode_ascii(
        &self,
        bytes: &[u8],
        policy: ConversionPolicy,
        logs: &mut Logs,
    ) -> Result<String, Error> {
        if bytes.is_ascii() {
            // always valid UTF-8
            return Ok(String::from_utf8_lossy(bytes).into_owned());
        }
        match policy {
            ConversionPolicy::Strict => Err(Error::Conversion {
                detail: "bytes are not valid ascii".to_string(),
            }),
            ConversionPolicy::Substitute => {
                logs.add(LogCode::WarningConversion, "substituted non-ascii bytes");
                Ok(bytes
                    .iter()
                    .map(|b| {
                        if b.is_ascii() {
                            *b as char
                        } else {
                            char::REPLACEMENT_CHARACTER
                        }
                    })
                    .collect())
            }
        }
    }

    /// Size probe: the exact number of UTF-8 bytes `decode` would produce
    /// under the substitute policy, without handing back the string.
    pub fn decoded_size(&self, bytes: &[u8]) -> usize {
        let mut logs = Logs::default();
        self.decode(bytes, ConversionPolicy::Substitute, &mut logs)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Encodes a string back into this codepage. Used to round-trip decoded
    /// names against on-disk bytes.
    pub fn encode(&self, text: &str, policy: ConversionPolicy) -> Result<Vec<u8>, Error> {
        if *self == Self::Ascii {
            if !text.is_ascii() && policy == ConversionPolicy::Strict {
                return Err(Error::Conversion {
                    detail: "string is not representable in ascii".to_string(),
                });
            }
            return Ok(text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect());
        }
        let (encoded, _, had_errors) = self.encoding().encode(text);
        if had_errors && policy == ConversionPolicy::Strict {
            return Err(Error::Conversion {
                detail: format!("string is not representable in {}", self.name()),
            });
        }
        Ok(encoded.into_owned())
    }
}
