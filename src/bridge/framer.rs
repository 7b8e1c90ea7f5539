// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Terminator-delimited command framing.

use tracing::{debug, warn};

/// Splits a client byte stream into terminator-delimited commands.
///
/// Works on raw bytes: the terminator is located as a byte sequence, so
/// payloads that are not valid text survive untouched.
pub struct CommandFramer {
    terminator: Vec<u8>,
    buffer: Vec<u8>,
}

impl CommandFramer {
    /// Create a framer for the given terminator.
    pub fn new(terminator: impl Into<Vec<u8>>) -> Self {
        let terminator = terminator.into();
        if terminator.is_empty() {
            warn!("Empty command terminator, no command will ever complete");
        }
        Self {
            terminator,
            buffer: Vec::with_capacity(256),
        }
    }

    /// Append received bytes and extract every completed command.
    ///
    /// Each returned command includes its terminator. Bytes after the last
    /// terminator stay buffered for the next call.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);

        let mut commands = Vec::new();
        if self.terminator.is_empty() {
            return commands;
        }

        let mut consumed = 0;
        while let Some(pos) = find(&self.buffer[consumed..], &self.terminator) {
            let end = consumed + pos + self.terminator.len();
            commands.push(self.buffer[consumed..end].to_vec());
            consumed = end;
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
            debug!(
                "Framed {} commands, {} bytes pending",
                commands.len(),
                self.buffer.len()
            );
        }

        commands
    }

    /// Bytes received but not yet part of a complete command.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any buffered partial command.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
