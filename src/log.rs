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

use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum LogCode {
    Info,
    WarningConversion,
    WarningCorrupt,
    WarningParse,
    WarningUnrecognizedBitflag,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Log {
    pub code: LogCode,
    pub text: String,
}

/// Accumulates warnings hit during parsing. Decoders don't write to a global
/// stream; each structure collects its own logs and the parser aggregates them
/// for the caller.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Logs {
    logs: Option<Vec<Log>>,
}

impl Logs {
    pub fn add(&mut self, code: LogCode, text: &str) {
        let log = Log {
            code,
            text: text.to_string(),
        };
        match &mut self.logs {
            Some(logs) => logs.push(log),
            None => self.logs = Some(vec![log]),
        }
    }

    pub fn get(&self) -> Option<&Vec<Log>> {
        self.logs.as_ref()
    }

    pub fn has_logs(&self) -> bool {
        self.logs.is_some()
    }

    pub fn extend(&mut self, other: &Logs) {
        if let Some(other_logs) = &other.logs {
            match &mut self.logs {
                Some(logs) => logs.extend(other_logs.iter().cloned()),
                None => self.logs = Some(other_logs.clone()),
            }
        }
    }

    pub fn clear(&mut self) {
        self.logs = None;
    }
}
