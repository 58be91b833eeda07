//! Code generation error type (C11).
//!
//! Mirrors the teacher's `codegen/error.rs::CodeGenError`: a logic variant
//! for compiler-internal invariant violations (should never surface to a
//! well-typed program that passed C9) plus a formatting variant so `write!`
//! failures propagate through `?` instead of panicking.

use std::fmt;

#[derive(Debug)]
pub enum CodeGenError {
    /// An invariant the semantic analyzer was supposed to guarantee didn't
    /// hold — a compiler bug, not a user-facing diagnostic.
    Logic(String),
    Format(fmt::Error),
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Logic(s) => write!(f, "internal compiler error: {s}"),
            CodeGenError::Format(e) => write!(f, "IR emission error: {e}"),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<fmt::Error> for CodeGenError {
    fn from(e: fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Logic(s)
    }
}
