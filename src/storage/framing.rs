//! Incremental framing for REST server-streaming responses.
//!
//! `readRows` over REST delivers a single JSON array whose elements are the
//! streamed messages. The body arrives in arbitrary chunk boundaries, so this
//! splitter tracks brace depth (string- and escape-aware) and emits each
//! top-level object as soon as its closing brace has been seen, without ever
//! buffering more than one in-flight frame.

use crate::error::BqStreamError;
use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the opening `[`.
    AwaitArray,
    /// Between frames: expecting `{`, `,`, `]`, or whitespace.
    BetweenFrames,
    /// Inside a frame object.
    InFrame,
    /// After the closing `]`.
    Finished,
}

#[derive(Debug)]
pub struct JsonArrayFrames {
    state: State,
    buf: BytesMut,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonArrayFrames {
    pub fn new() -> Self {
        Self {
            state: State::AwaitArray,
            buf: BytesMut::new(),
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Feed one body chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, BqStreamError> {
        let mut frames = Vec::new();

        for &b in chunk {
            match self.state {
                State::AwaitArray => match b {
                    b'[' => self.state = State::BetweenFrames,
                    b if b.is_ascii_whitespace() => {}
                    other => {
                        return Err(BqStreamError::Framing(format!(
                            "expected '[' to open response array, got {:?}",
                            other as char
                        )));
                    }
                },
                State::BetweenFrames => match b {
                    b'{' => {
                        self.state = State::InFrame;
                        self.depth = 1;
                        self.in_string = false;
                        self.escaped = false;
                        self.buf.clear();
                        self.buf.extend_from_slice(&[b]);
                    }
                    b',' => {}
                    b']' => self.state = State::Finished,
                    b if b.is_ascii_whitespace() => {}
                    other => {
                        return Err(BqStreamError::Framing(format!(
                            "expected object frame, got {:?}",
                            other as char
                        )));
                    }
                },
                State::InFrame => {
                    self.buf.extend_from_slice(&[b]);
                    if self.in_string {
                        if self.escaped {
                            self.escaped = false;
                        } else if b == b'\\' {
                            self.escaped = true;
                        } else if b == b'"' {
                            self.in_string = false;
                        }
                    } else {
                        match b {
                            b'"' => self.in_string = true,
                            b'{' => self.depth += 1,
                            b'}' => {
                                self.depth -= 1;
                                if self.depth == 0 {
                                    frames.push(self.buf.split().freeze());
                                    self.state = State::BetweenFrames;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                State::Finished => {
                    if !b.is_ascii_whitespace() {
                        return Err(BqStreamError::Framing(format!(
                            "trailing byte {:?} after response array",
                            b as char
                        )));
                    }
                }
            }
        }

        Ok(frames)
    }

    /// Check that the body ended cleanly. An empty array (`[]`) and a bare
    /// empty body are both fine; a truncated frame is not.
    pub fn finish(&self) -> Result<(), BqStreamError> {
        match self.state {
            State::Finished | State::AwaitArray => Ok(()),
            State::BetweenFrames => Err(BqStreamError::Framing(
                "response body ended before closing ']'".into(),
            )),
            State::InFrame => Err(BqStreamError::Framing(
                "response body ended mid-frame".into(),
            )),
        }
    }
}

impl Default for JsonArrayFrames {
    fn default() -> Self {
        Self::new()
    }
}
