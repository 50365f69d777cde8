use std::collections::VecDeque;

use serde_json::Value;

use super::{ChannelError, RawChannel, Received};

/// Scripted channel for deterministic tests.
///
/// Yields the supplied input values in order and then reports the input as
/// closed. Every value sent is recorded for later inspection.
#[derive(Debug, Default)]
pub struct ArrayChannel {
    input: VecDeque<Value>,
    output: Vec<Value>,
}

impl ArrayChannel {
    /// Creates a channel that will deliver `input` in order.
    #[must_use]
    pub fn new(input: impl IntoIterator<Item = Value>) -> Self {
        Self {
            input: input.into_iter().collect(),
            output: Vec::new(),
        }
    }

    /// Values sent so far.
    #[must_use]
    pub fn output(&self) -> &[Value] {
        &self.output
    }

    /// Number of scripted inputs not yet received.
    #[must_use]
    pub fn remaining_input(&self) -> usize {
        self.input.len()
    }
}

impl RawChannel for ArrayChannel {
    fn send(&mut self, value: &Value) -> Result<(), ChannelError> {
        self.output.push(value.clone());
        Ok(())
    }

    fn try_recv(&mut self) -> Received {
        self.input
            .pop_front()
            .map_or(Received::Closed, Received::Value)
    }

    fn recv(&mut self) -> Result<Value, ChannelError> {
        self.input.pop_front().ok_or(ChannelError::Closed)
    }
}
