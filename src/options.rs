//! Compile-time options collector (C4)
//!
//! Scans the token stream for `OPTION ...` directives and folds them into a
//! single `CompileOptions` record. Runs after the lexer but before the
//! parser proper, mirroring the teacher's `Resolver` pass — a lightweight
//! token-level sweep that the real parser doesn't need to know about.
//!
//! `OPTION` statements may appear anywhere a statement can, but by
//! convention sit at the top of the program; this scan doesn't enforce
//! placement, it just folds every occurrence left-to-right so a later
//! `OPTION` overrides an earlier one of the same kind.

use crate::token::{Keyword, Punct, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMode {
    Unicode,
    Ascii,
    DetectString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowMode {
    Bitwise,
    Logical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForIntegerWidth {
    Integer,
    Long,
}

/// Compile-time options derived from `OPTION` directives (spec.md §4.2).
/// Immutable once built; shared by reference into every later phase.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// `OPTION BASE 0|1` — default lower array bound.
    pub base: i32,
    /// `OPTION EXPLICIT` — variables must be `DIM`'d before use.
    pub explicit: bool,
    /// `OPTION BOUNDS_CHECK ON|OFF` — array/string index checking.
    pub bounds_check: bool,
    pub string_mode: StringMode,
    /// `OPTION CANCELLABLE` — cooperative cancellation checks are inserted.
    pub cancellable: bool,
    /// `OPTION FORCE_YIELD n` — insert a yield point every `n` basic blocks.
    pub force_yield: Option<u32>,
    /// `OPTION SAMM` — scope-aware memory management (refcounted retain
    /// /release) instead of manual `DELETE`.
    pub samm: bool,
    pub overflow_mode: OverflowMode,
    /// `OPTION ERROR` — runtime errors raise `BASIC_ERROR` exceptions
    /// instead of halting.
    pub error_as_exception: bool,
    pub for_integer_width: ForIntegerWidth,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            base: 0,
            explicit: false,
            bounds_check: true,
            string_mode: StringMode::Ascii,
            cancellable: false,
            force_yield: None,
            samm: false,
            overflow_mode: OverflowMode::Logical,
            error_as_exception: false,
            for_integer_width: ForIntegerWidth::Integer,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionError {
    pub message: String,
    pub location: crate::token::Location,
}

/// Scan `tokens` for `OPTION` directives and fold them into a
/// `CompileOptions`, starting from `CompileOptions::default()`.
pub fn collect_options(tokens: &[Token]) -> (CompileOptions, Vec<OptionError>) {
    let mut opts = CompileOptions::default();
    let mut errors = Vec::new();
    let mut i = 0usize;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::Keyword(Keyword::Option) {
            i = apply_directive(tokens, i + 1, &mut opts, &mut errors);
        } else {
            i += 1;
        }
    }
    (opts, errors)
}

/// Remove every `OPTION ...` directive's tokens from the stream once their
/// effect has been folded into a `CompileOptions` by `collect_options`, so
/// the parser proper never has to recognise the directive keywords as
/// statements. An `OPTION` run ends at the next `:` or end of line; when it
/// swallows a trailing `:` it leaves none behind, and when it's the tail of
/// a colon-joined line it instead drops the separator before it, so
/// `X = 1 : OPTION BASE 0 : Y = 2` collapses to `X = 1 : Y = 2` rather than
/// leaving an empty statement between two colons.
pub fn strip_option_directives(tokens: &[Token]) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0usize;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::Keyword(Keyword::Option) {
            let mut j = i + 1;
            while j < tokens.len()
                && tokens[j].kind != TokenKind::Punct(Punct::Colon)
                && tokens[j].kind != TokenKind::EndOfLine
                && tokens[j].kind != TokenKind::EndOfFile
            {
                j += 1;
            }
            if j < tokens.len() && tokens[j].kind == TokenKind::Punct(Punct::Colon) {
                j += 1;
            } else if matches!(out.last(), Some(t) if t.kind == TokenKind::Punct(Punct::Colon)) {
                out.pop();
            }
            i = j;
            continue;
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn apply_directive(
    tokens: &[Token],
    mut i: usize,
    opts: &mut CompileOptions,
    errors: &mut Vec<OptionError>,
) -> usize {
    let directive_loc = tokens.get(i.saturating_sub(1)).map(|t| t.location).unwrap_or_default();
    let Some(tok) = tokens.get(i) else {
        errors.push(OptionError {
            message: "OPTION directive missing keyword".to_string(),
            location: directive_loc,
        });
        return i;
    };

    match &tok.kind {
        TokenKind::Keyword(Keyword::Base) => {
            i += 1;
            match tokens.get(i) {
                Some(Token {
                    kind: TokenKind::Number { value, .. },
                    ..
                }) if *value == 0.0 || *value == 1.0 => {
                    opts.base = *value as i32;
                    i += 1;
                }
                other => {
                    errors.push(OptionError {
                        message: "OPTION BASE requires 0 or 1".to_string(),
                        location: other.map(|t| t.location).unwrap_or(directive_loc),
                    });
                }
            }
        }
        TokenKind::Keyword(Keyword::Explicit) => {
            opts.explicit = true;
            i += 1;
        }
        TokenKind::Keyword(Keyword::BoundsCheck) => {
            i += 1;
            i = read_on_off(tokens, i, &mut opts.bounds_check, errors, directive_loc);
        }
        TokenKind::Keyword(Keyword::Unicode) => {
            opts.string_mode = StringMode::Unicode;
            i += 1;
        }
        TokenKind::Keyword(Keyword::Ascii) => {
            opts.string_mode = StringMode::Ascii;
            i += 1;
        }
        TokenKind::Keyword(Keyword::Detectstring) => {
            opts.string_mode = StringMode::DetectString;
            i += 1;
        }
        TokenKind::Keyword(Keyword::Cancellable) => {
            opts.cancellable = true;
            i += 1;
        }
        TokenKind::Keyword(Keyword::ForceYield) => {
            i += 1;
            match tokens.get(i) {
                Some(Token {
                    kind: TokenKind::Number { value, .. },
                    ..
                }) if *value >= 1.0 => {
                    opts.force_yield = Some(*value as u32);
                    i += 1;
                }
                other => {
                    errors.push(OptionError {
                        message: "OPTION FORCE_YIELD requires a positive integer".to_string(),
                        location: other.map(|t| t.location).unwrap_or(directive_loc),
                    });
                }
            }
        }
        TokenKind::Keyword(Keyword::Samm) => {
            opts.samm = true;
            i += 1;
        }
        TokenKind::Keyword(Keyword::Bitwise) => {
            opts.overflow_mode = OverflowMode::Bitwise;
            i += 1;
        }
        TokenKind::Keyword(Keyword::Logical) => {
            opts.overflow_mode = OverflowMode::Logical;
            i += 1;
        }
        TokenKind::Keyword(Keyword::Error) => {
            opts.error_as_exception = true;
            i += 1;
        }
        TokenKind::Keyword(Keyword::For) => {
            i += 1;
            match tokens.get(i).map(|t| &t.kind) {
                Some(TokenKind::Keyword(Keyword::Long)) => {
                    opts.for_integer_width = ForIntegerWidth::Long;
                    i += 1;
                }
                Some(TokenKind::Keyword(Keyword::Integer)) => {
                    opts.for_integer_width = ForIntegerWidth::Integer;
                    i += 1;
                }
                other => {
                    errors.push(OptionError {
                        message: "OPTION FOR requires INTEGER or LONG".to_string(),
                        location: other
                            .and(tokens.get(i))
                            .map(|t| t.location)
                            .unwrap_or(directive_loc),
                    });
                }
            }
        }
        _ => {
            errors.push(OptionError {
                message: format!("unrecognized OPTION directive {:?}", tok.kind),
                location: tok.location,
            });
            i += 1;
        }
    }
    i
}

fn read_on_off(
    tokens: &[Token],
    i: usize,
    target: &mut bool,
    errors: &mut Vec<OptionError>,
    directive_loc: crate::token::Location,
) -> usize {
    match tokens.get(i).map(|t| &t.kind) {
        Some(TokenKind::Keyword(Keyword::On)) => {
            *target = true;
            i + 1
        }
        Some(TokenKind::Keyword(Keyword::Off)) => {
            *target = false;
            i + 1
        }
        other => {
            errors.push(OptionError {
                message: "expected ON or OFF".to_string(),
                location: other.and(tokens.get(i)).map(|t| t.location).unwrap_or(directive_loc),
            });
            i
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn toks(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize()
    }

    #[test]
    fn defaults_match_spec() {
        let opts = CompileOptions::default();
        assert_eq!(opts.base, 0);
        assert!(!opts.explicit);
        assert!(opts.bounds_check);
    }

    #[test]
    fn collects_option_base_1() {
        let (opts, errs) = collect_options(&toks("OPTION BASE 1\n"));
        assert!(errs.is_empty());
        assert_eq!(opts.base, 1);
    }

    #[test]
    fn collects_option_explicit_and_bounds_check_off() {
        let (opts, errs) =
            collect_options(&toks("OPTION EXPLICIT\nOPTION BOUNDS_CHECK OFF\n"));
        assert!(errs.is_empty());
        assert!(opts.explicit);
        assert!(!opts.bounds_check);
    }

    #[test]
    fn collects_force_yield_count() {
        let (opts, errs) = collect_options(&toks("OPTION FORCE_YIELD 64\n"));
        assert!(errs.is_empty());
        assert_eq!(opts.force_yield, Some(64));
    }

    #[test]
    fn collects_for_long() {
        let (opts, errs) = collect_options(&toks("OPTION FOR LONG\n"));
        assert!(errs.is_empty());
        assert_eq!(opts.for_integer_width, ForIntegerWidth::Long);
    }

    #[test]
    fn later_option_overrides_earlier() {
        let (opts, _) = collect_options(&toks("OPTION BASE 0\nOPTION BASE 1\n"));
        assert_eq!(opts.base, 1);
    }

    #[test]
    fn invalid_base_value_is_reported() {
        let (_, errs) = collect_options(&toks("OPTION BASE 2\n"));
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn unrecognized_directive_is_an_error_not_a_panic() {
        let (_, errs) = collect_options(&toks("OPTION SAMM\nOPTION GLOBAL\n"));
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn strip_removes_a_whole_directive_line() {
        let stripped = strip_option_directives(&toks("OPTION FOR LONG\nX = 1\n"));
        assert!(!stripped
            .iter()
            .any(|t| t.kind == TokenKind::Keyword(Keyword::Option)));
        assert!(stripped
            .iter()
            .any(|t| matches!(&t.kind, TokenKind::Identifier { name, .. } if name == "X")));
    }

    #[test]
    fn strip_collapses_colon_after_leading_directive() {
        let stripped = strip_option_directives(&toks("OPTION BASE 0 : Y = 2\n"));
        let colons = stripped
            .iter()
            .filter(|t| t.kind == TokenKind::Punct(Punct::Colon))
            .count();
        assert_eq!(colons, 0);
    }

    #[test]
    fn strip_collapses_colon_before_trailing_directive() {
        let stripped = strip_option_directives(&toks("X = 1 : OPTION BASE 0\n"));
        let colons = stripped
            .iter()
            .filter(|t| t.kind == TokenKind::Punct(Punct::Colon))
            .count();
        assert_eq!(colons, 0);
    }

    #[test]
    fn strip_keeps_single_colon_for_directive_sandwiched_between_statements() {
        let stripped = strip_option_directives(&toks("X = 1 : OPTION BASE 0 : Y = 2\n"));
        let colons = stripped
            .iter()
            .filter(|t| t.kind == TokenKind::Punct(Punct::Colon))
            .count();
        assert_eq!(colons, 1);
    }
}
