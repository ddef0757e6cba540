// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use thiserror::Error;

/// The result type of aggregate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type of aggregate operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("state too large to encode: {field} = {value} exceeds i32::MAX")]
    StateTooLarge { field: &'static str, value: usize },
    #[error("{op} called on {state} aggregate")]
    InvalidSequence {
        op: &'static str,
        state: &'static str,
    },
}

impl Error {
    pub fn invalid_sequence(op: &'static str, state: &'static str) -> Self {
        Error::InvalidSequence { op, state }
    }

    pub fn state_too_large(field: &'static str, value: usize) -> Self {
        Error::StateTooLarge { field, value }
    }
}

/// Raised when a serialized partial state cannot be reconstructed.
///
/// The first structural problem aborts the whole call, so decoding never
/// yields a partially-populated state.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unexpected end of input: {field} needs {expected} bytes, {remaining} remaining")]
    UnexpectedEof {
        field: &'static str,
        expected: usize,
        remaining: usize,
    },
    #[error("negative {field}: {value}")]
    Negative { field: &'static str, value: i32 },
    #[error("length sum mismatch: header says {header}, fragments sum to {actual}")]
    LengthMismatch { header: usize, actual: usize },
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 {
        field: &'static str,
        source: std::string::FromUtf8Error,
    },
    #[error("{0} trailing bytes after the last fragment")]
    TrailingBytes(usize),
}
