//! Streaming inference support
//!
//! Messages passed from a generation worker to the stream consumer, plus the
//! helpers the llama.cpp loop uses to turn raw token bytes into clean text.

use crate::inference::resource::{Delta, GenerationError};

/// Represents an item emitted by a generation worker.
#[derive(Debug, Clone)]
pub enum StreamToken {
    /// A delta produced by the model
    Delta(Delta),
    /// Generation completed successfully
    Done,
    /// An error occurred during generation
    Error(GenerationError),
}

/// Outcome of feeding text through a [`StopMatcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopScan {
    /// Safe to emit; generation continues
    Continue(String),
    /// A stop sequence matched; emit this and end generation
    Stop(String),
}

/// Detects stop sequences across token boundaries
///
/// Text that could still turn into a stop sequence is held back until the
/// next fragment decides it, so a stop string never leaks to the client.
#[derive(Debug, Clone)]
pub struct StopMatcher {
    stops: Vec<String>,
    pending: String,
}

impl StopMatcher {
    pub fn new(stops: &[String]) -> Self {
        Self {
            stops: stops.iter().filter(|s| !s.is_empty()).cloned().collect(),
            pending: String::new(),
        }
    }

    pub fn push(&mut self, fragment: &str) -> StopScan {
        self.pending.push_str(fragment);

        let hit = self
            .stops
            .iter()
            .filter_map(|stop| self.pending.find(stop.as_str()))
            .min();
        if let Some(idx) = hit {
            let emitted = self.pending[..idx].to_string();
            self.pending.clear();
            return StopScan::Stop(emitted);
        }

        let hold = self.longest_partial_match();
        let split = self.pending.len() - hold;
        let tail = self.pending.split_off(split);
        let emitted = std::mem::replace(&mut self.pending, tail);
        StopScan::Continue(emitted)
    }

    /// Returns whatever is still held back once generation ends
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Length of the longest suffix of `pending` that is a proper prefix of a stop
    fn longest_partial_match(&self) -> usize {
        self.stops
            .iter()
            .flat_map(|stop| stop.char_indices().skip(1).map(move |(i, _)| &stop[..i]))
            .filter(|prefix| self.pending.ends_with(prefix))
            .map(str::len)
            .max()
            .unwrap_or(0)
    }
}

/// Drains the longest valid UTF-8 prefix out of `buffer`
///
/// Incomplete trailing sequences stay in the buffer for the next token;
/// bytes that can never become valid are replaced with U+FFFD.
pub fn take_utf8(buffer: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(buffer) {
            Ok(s) => {
                out.push_str(s);
                buffer.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buffer[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        buffer.drain(..valid + bad);
                    }
                    None => {
                        buffer.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}
