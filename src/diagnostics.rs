//! Diagnostic taxonomy (spec.md §7)
//!
//! Manual `Display` + `std::error::Error` impls, matching the teacher's
//! `codegen/error.rs::CodeGenError` rather than pulling in `thiserror`.
//! Every phase returns its partial result alongside `Vec<CompileError>` and
//! `Vec<Warning>` — never a bare `Result` that discards everything collected
//! so far on the first failure.
//!
//! Both types also derive `serde::Serialize` so the CLI's `--format json`
//! mode (see `main.rs`) can emit them as machine-readable diagnostics,
//! the same shape the teacher's lint subcommand uses `serde_json` for.

use std::fmt;

use serde::Serialize;

use crate::token::Location;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CompileError {
    /// Lexer produced an unrecognized byte sequence.
    LexError { location: Location, text: String },
    /// Parser could not continue after resync; one entry per failed
    /// statement, not one for every skipped token.
    SyntaxError { location: Location, message: String },
    /// Variable used without `DIM` under `OPTION EXPLICIT`.
    UndeclaredVariable { location: Location, name: String },
    /// Coercion lattice returned `ExplicitRequired` or `Incompatible`.
    TypeMismatch {
        location: Location,
        expected: String,
        found: String,
    },
    /// `GOTO`/`GOSUB`/`RESTORE` target not found among line numbers/labels.
    UnknownTarget { location: Location, target: String },
    /// Call to an undeclared `SUB`/`FUNCTION`.
    UnknownRoutine { location: Location, name: String },
    /// Argument count/type mismatch against a routine signature.
    ArgumentMismatch {
        location: Location,
        routine: String,
        message: String,
    },
    /// Duplicate declaration of a name already bound in the same scope.
    DuplicateDeclaration { location: Location, name: String },
    /// Class hierarchy error: unknown parent, cycle, duplicate override
    /// signature, etc.
    ClassError { location: Location, message: String },
    /// `EXIT`/`NEXT`/`WEND`/... outside the construct it terminates.
    InvalidControlFlow { location: Location, message: String },
    /// `CATCH` clauses out of order, or catch-all not last.
    InvalidTryCatch { location: Location, message: String },
    /// Internal compiler error: a phase invariant was violated. Reported
    /// instead of letting a panic escape to the CLI.
    Internal { message: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::LexError { location, text } => {
                write!(f, "{location}: unrecognized token `{text}`")
            }
            CompileError::SyntaxError { location, message } => {
                write!(f, "{location}: syntax error: {message}")
            }
            CompileError::UndeclaredVariable { location, name } => {
                write!(f, "{location}: `{name}` used without DIM under OPTION EXPLICIT")
            }
            CompileError::TypeMismatch {
                location,
                expected,
                found,
            } => write!(f, "{location}: expected {expected}, found {found}"),
            CompileError::UnknownTarget { location, target } => {
                write!(f, "{location}: unknown line/label `{target}`")
            }
            CompileError::UnknownRoutine { location, name } => {
                write!(f, "{location}: call to undeclared routine `{name}`")
            }
            CompileError::ArgumentMismatch {
                location,
                routine,
                message,
            } => write!(f, "{location}: call to `{routine}`: {message}"),
            CompileError::DuplicateDeclaration { location, name } => {
                write!(f, "{location}: `{name}` is already declared")
            }
            CompileError::ClassError { location, message } => {
                write!(f, "{location}: {message}")
            }
            CompileError::InvalidControlFlow { location, message } => {
                write!(f, "{location}: {message}")
            }
            CompileError::InvalidTryCatch { location, message } => {
                write!(f, "{location}: {message}")
            }
            CompileError::Internal { message } => write!(f, "internal compiler error: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub location: Location,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: warning: {}", self.location, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mismatch_formats_with_location() {
        let err = CompileError::TypeMismatch {
            location: Location::new(3, 1),
            expected: "INTEGER".to_string(),
            found: "STRING".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("3:1"));
        assert!(rendered.contains("INTEGER"));
    }

    #[test]
    fn internal_error_has_no_location() {
        let err = CompileError::Internal {
            message: "symbol table desync".to_string(),
        };
        assert!(err.to_string().starts_with("internal compiler error"));
    }
}
