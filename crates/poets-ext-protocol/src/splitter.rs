//! Incremental splitting of a JSON byte stream into top-level values.
//!
//! Peers concatenate JSON documents on the wire with optional whitespace in
//! between and no length prefix. [`JsonSplitter`] tracks just enough lexical
//! state (nesting depth, whether the cursor sits inside a string or escape)
//! to recognise where each top-level object or array ends, so bytes can be
//! fed in chunks of any size, including one byte at a time, and every value is
//! released as soon as its closing bracket arrives.

use serde_json::Value;
use thiserror::Error;

/// Errors raised while splitting a JSON stream.
#[derive(Debug, Error)]
pub enum SplitError {
    /// A byte other than whitespace, `{` or `[` appeared between values.
    #[error("unexpected character {character:?} at offset {offset} between JSON values")]
    UnexpectedCharacter {
        /// The offending character (lossy for non-ASCII bytes).
        character: char,
        /// Byte offset from the start of the stream.
        offset: usize,
    },
    /// A bracket-balanced fragment was not valid JSON.
    #[error("malformed JSON value ending at offset {offset}: {source}")]
    Malformed {
        /// Byte offset just past the fragment.
        offset: usize,
        /// Parser error reported by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexical {
    Between,
    Normal,
    String,
    Escape,
}

/// Splits a byte stream into complete top-level JSON objects and arrays.
///
/// Values completed ahead of a bad byte in the same chunk are still released;
/// the error is held back until the next call to [`JsonSplitter::push`] or
/// [`JsonSplitter::take_error`]. After an error the splitter is left in an
/// unspecified state and should be discarded along with the stream.
#[derive(Debug)]
pub struct JsonSplitter {
    state: Lexical,
    level: usize,
    pending: Vec<u8>,
    consumed: usize,
    failure: Option<SplitError>,
}

impl Default for JsonSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonSplitter {
    /// Creates a splitter positioned between values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Lexical::Between,
            level: 0,
            pending: Vec::new(),
            consumed: 0,
            failure: None,
        }
    }

    /// Whether a value has been started but not yet completed.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.state != Lexical::Between
    }

    /// Takes the error held back by an earlier [`JsonSplitter::push`], if
    /// any.
    pub fn take_error(&mut self) -> Option<SplitError> {
        self.failure.take()
    }

    /// Feeds a chunk and returns every value completed by it, in order.
    ///
    /// When the chunk completes values before hitting a bad byte, those values
    /// are returned and the error is held for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::UnexpectedCharacter`] when a non-whitespace byte
    /// other than `{` or `[` appears between values, and
    /// [`SplitError::Malformed`] when a balanced fragment fails to parse.
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) -> Result<Vec<Value>, SplitError> {
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        let mut completed = Vec::new();
        for &byte in chunk.as_ref() {
            self.consumed += 1;
            if let Err(error) = self.consume(byte, &mut completed) {
                if completed.is_empty() {
                    return Err(error);
                }
                self.failure = Some(error);
                break;
            }
        }
        Ok(completed)
    }

    fn consume(&mut self, byte: u8, completed: &mut Vec<Value>) -> Result<(), SplitError> {
        if self.advance(byte)? {
            let fragment = std::mem::take(&mut self.pending);
            let value =
                serde_json::from_slice(&fragment).map_err(|source| SplitError::Malformed {
                    offset: self.consumed,
                    source,
                })?;
            completed.push(value);
        }
        Ok(())
    }

    /// Consumes one byte; returns `true` when it closed a top-level value.
    fn advance(&mut self, byte: u8) -> Result<bool, SplitError> {
        match self.state {
            Lexical::Between => {
                if byte == b'{' || byte == b'[' {
                    self.level = 1;
                    self.state = Lexical::Normal;
                    self.pending.push(byte);
                } else if !byte.is_ascii_whitespace() {
                    return Err(SplitError::UnexpectedCharacter {
                        character: char::from(byte),
                        offset: self.consumed - 1,
                    });
                }
                Ok(false)
            }
            Lexical::Normal => {
                self.pending.push(byte);
                match byte {
                    b'{' | b'[' => self.level += 1,
                    b'}' | b']' => {
                        self.level -= 1;
                        if self.level == 0 {
                            self.state = Lexical::Between;
                            return Ok(true);
                        }
                    }
                    b'"' => self.state = Lexical::String,
                    _ => {}
                }
                Ok(false)
            }
            Lexical::String => {
                self.pending.push(byte);
                match byte {
                    b'"' => self.state = Lexical::Normal,
                    b'\\' => self.state = Lexical::Escape,
                    _ => {}
                }
                Ok(false)
            }
            Lexical::Escape => {
                // Escaped characters are not validated here; the JSON parser
                // rejects bad escapes once the value completes.
                self.pending.push(byte);
                self.state = Lexical::String;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    const STREAM: &str = r#"{ }[] {"x":10}["\""]{"x":{}, "Y":[10]} ["}{", "a\\"]"#;

    fn expected() -> Vec<Value> {
        vec![
            json!({}),
            json!([]),
            json!({"x": 10}),
            json!(["\""]),
            json!({"x": {}, "Y": [10]}),
            json!(["}{", "a\\"]),
        ]
    }

    #[rstest]
    fn splits_whole_stream_in_one_push() {
        let mut splitter = JsonSplitter::new();
        let values = splitter.push(STREAM).expect("split stream");
        assert_eq!(values, expected());
        assert!(!splitter.in_progress());
    }

    #[rstest]
    fn holds_partial_values_across_pushes() {
        let mut splitter = JsonSplitter::new();
        assert!(splitter.push("{").expect("open").is_empty());
        assert!(splitter.in_progress());
        assert!(splitter.push(r#""x":10"#).expect("body").is_empty());
        assert_eq!(splitter.push("}").expect("close"), vec![json!({"x": 10})]);
    }

    #[rstest]
    fn every_two_way_split_yields_the_same_values() {
        let bytes = STREAM.as_bytes();
        for cut in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(cut);
            let mut splitter = JsonSplitter::new();
            let mut values = splitter.push(head).expect("head");
            values.extend(splitter.push(tail).expect("tail"));
            assert_eq!(values, expected(), "split at byte {cut}");
        }
    }

    #[rstest]
    fn byte_at_a_time_yields_the_same_values() {
        let mut splitter = JsonSplitter::new();
        let mut values = Vec::new();
        for byte in STREAM.bytes() {
            values.extend(splitter.push([byte]).expect("byte"));
        }
        assert_eq!(values, expected());
    }

    #[rstest]
    fn multibyte_characters_survive_arbitrary_cuts() {
        let text = r#"{"name":"dévice→π"}"#.as_bytes();
        for cut in 0..=text.len() {
            let (head, tail) = text.split_at(cut);
            let mut splitter = JsonSplitter::new();
            let mut values = splitter.push(head).expect("head");
            values.extend(splitter.push(tail).expect("tail"));
            assert_eq!(values, vec![json!({"name": "dévice→π"})]);
        }
    }

    #[rstest]
    #[case("x{}", 0)]
    #[case("\n\"str\"", 1)]
    fn rejects_scalars_between_values(#[case] input: &str, #[case] offset: usize) {
        let mut splitter = JsonSplitter::new();
        let error = splitter.push(input).expect_err("scalar must be rejected");
        assert!(
            matches!(error, SplitError::UnexpectedCharacter { offset: got, .. } if got == offset),
            "unexpected error: {error:?}"
        );
    }

    #[rstest]
    fn reports_malformed_balanced_fragment() {
        let mut splitter = JsonSplitter::new();
        let error = splitter.push("{x}").expect_err("fragment must fail");
        assert!(matches!(error, SplitError::Malformed { offset: 3, .. }));
    }

    #[rstest]
    fn values_before_a_bad_byte_in_the_same_chunk_are_kept() {
        let mut splitter = JsonSplitter::new();
        let values = splitter.push(r#"{"a":1} 17"#).expect("leading value");
        assert_eq!(values, vec![json!({"a": 1})]);

        let error = splitter.push("{}").expect_err("held error");
        assert!(
            matches!(error, SplitError::UnexpectedCharacter { character: '1', offset: 8 }),
            "unexpected error: {error:?}"
        );
    }

    #[rstest]
    fn held_error_can_be_taken_without_more_input() {
        let mut splitter = JsonSplitter::new();
        assert_eq!(splitter.push("{} 42").expect("leading value"), vec![json!({})]);
        let error = splitter.take_error().expect("held error");
        assert!(matches!(error, SplitError::UnexpectedCharacter { offset: 3, .. }));
        assert!(splitter.take_error().is_none());
    }

    #[rstest]
    fn chunking_does_not_change_what_precedes_an_error() {
        let bytes = br#"{"a":1} [2] 17 {"b":2}"#;
        for cut in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(cut);
            let mut splitter = JsonSplitter::new();
            let mut values = Vec::new();
            for chunk in [head, tail] {
                match splitter.push(chunk) {
                    Ok(more) => values.extend(more),
                    Err(_) => break,
                }
                if splitter.take_error().is_some() {
                    break;
                }
            }
            assert_eq!(values, vec![json!({"a": 1}), json!([2])], "split at byte {cut}");
        }
    }
}
