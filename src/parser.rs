//! Parser (C6)
//!
//! Recursive-descent with precedence climbing for expressions. Unlike the
//! teacher's `parser.rs::parse() -> Result<Program, String>`, which returns
//! on the first error, this parser accumulates `CompileError`s and
//! resynchronizes to the next end-of-line so a single typo doesn't hide
//! every other diagnostic in the file (spec.md §7's accumulation design).
//!
//! The lexer never merges `END` with the keyword that follows it — `"END"`
//! alone lexes as a plain identifier (see `lexer.rs::classify_keyword`) —
//! so every `END TYPE`/`END IF`/`END SUB`/... terminator here is matched as
//! two tokens: an identifier literally spelled `END`, then the following
//! keyword. `Term::End(k)` below encodes that pairing; `Term::Plain(k)` is
//! for terminators that are a single keyword on their own (`NEXT`, `LOOP`,
//! `CASE`, ...). Likewise `CASE IS > 5` is just `Keyword::Case` (already
//! consumed by the caller) followed by the ordinary `Keyword::Is` token,
//! not a combined token.
//!
//! `name(args)` in expression position is ambiguous between an array read
//! and a function call until the symbol table exists. The parser resolves
//! it optimistically: a small fixed set of reserved builtin-function names
//! (`ABS`, `LEFT$`, ...) always parses as `Expr::Call`; everything else
//! parses as `Expr::ArrayAccess`, and the semantic analyzer reclassifies an
//! `ArrayAccess` into a routine call when the name resolves to a `SUB` or
//! `FUNCTION` rather than a variable.

use crate::ast::*;
use crate::data_prep::DataSegment;
use crate::diagnostics::CompileError;
use crate::token::{Keyword, Location, Punct, Token, TokenKind, TypeSuffix};

const BUILTIN_FUNCTIONS: &[&str] = &[
    "ABS", "SIN", "COS", "TAN", "ATN", "SQR", "INT", "SGN", "LOG", "EXP", "FIX", "CINT", "LEN",
    "LEFT$", "RIGHT$", "MID$", "CHR$", "STR$", "VAL", "MIN", "MAX",
];

pub struct ParseOutput {
    pub program: Program,
    pub errors: Vec<CompileError>,
}

pub fn parse(tokens: Vec<Token>, segment: &DataSegment) -> ParseOutput {
    let mut parser = Parser {
        tokens,
        pos: 0,
        errors: Vec::new(),
        program: Program::new(),
        segment,
    };
    parser.parse_program();
    ParseOutput {
        program: parser.program,
        errors: parser.errors,
    }
}

/// A block terminator: either a standalone keyword, or an `END <keyword>`
/// pair (see module docs).
#[derive(Clone, Copy)]
enum Term {
    Plain(Keyword),
    End(Keyword),
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<CompileError>,
    program: Program,
    segment: &'a DataSegment,
}

type PResult<T> = Result<T, ()>;

impl<'a> Parser<'a> {
    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn cur_loc(&self) -> Location {
        self.cur().location
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at_eof(&self) -> bool {
        matches!(self.cur().kind, TokenKind::EndOfFile)
    }

    fn at_eol(&self) -> bool {
        matches!(self.cur().kind, TokenKind::EndOfLine) || self.at_eof()
    }

    fn check_kw(&self, k: Keyword) -> bool {
        self.cur().kind == TokenKind::Keyword(k)
    }

    fn check_punct(&self, p: Punct) -> bool {
        self.cur().kind == TokenKind::Punct(p)
    }

    fn match_kw(&mut self, k: Keyword) -> bool {
        if self.check_kw(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_punct(&mut self, p: Punct) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Is the current token the identifier `END`, immediately followed by
    /// `follow`? (`END` itself never lexes as a keyword.)
    fn at_end_kw(&self, follow: Keyword) -> bool {
        let is_end = matches!(
            &self.cur().kind,
            TokenKind::Identifier { name, suffix: None } if name.eq_ignore_ascii_case("END")
        );
        is_end
            && self
                .tokens
                .get(self.pos + 1)
                .map(|t| t.kind == TokenKind::Keyword(follow))
                .unwrap_or(false)
    }

    fn match_end_kw(&mut self, follow: Keyword) -> bool {
        if self.at_end_kw(follow) {
            self.advance();
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_term(&self, term: &Term) -> bool {
        match term {
            Term::Plain(k) => self.check_kw(*k),
            Term::End(k) => self.at_end_kw(*k),
        }
    }

    fn at_any_term(&self, terms: &[Term]) -> bool {
        terms.iter().any(|t| self.matches_term(t))
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(CompileError::SyntaxError {
            location: self.cur_loc(),
            message: message.into(),
        });
    }

    fn expect_punct(&mut self, p: Punct, what: &str) -> PResult<()> {
        if self.match_punct(p) {
            Ok(())
        } else {
            self.error(format!("expected {what}"));
            Err(())
        }
    }

    fn expect_kw(&mut self, k: Keyword, what: &str) -> PResult<()> {
        if self.match_kw(k) {
            Ok(())
        } else {
            self.error(format!("expected {what}"));
            Err(())
        }
    }

    /// Consume end-of-line style whitespace: one or more `EndOfLine`
    /// tokens, or EOF.
    fn skip_blank_lines(&mut self) {
        while matches!(self.cur().kind, TokenKind::EndOfLine) {
            self.advance();
        }
    }

    fn expect_eol(&mut self) {
        if matches!(self.cur().kind, TokenKind::EndOfLine) {
            self.advance();
        } else if !self.at_eof() {
            self.error("expected end of line");
            self.synchronize();
        }
    }

    /// Skip tokens until the next `EndOfLine`/EOF, used after a statement
    /// fails to parse.
    fn synchronize(&mut self) {
        while !matches!(self.cur().kind, TokenKind::EndOfLine | TokenKind::EndOfFile) {
            self.advance();
        }
    }

    fn expect_identifier_name(&mut self) -> PResult<String> {
        match self.cur().kind.clone() {
            TokenKind::Identifier { name, .. } => {
                self.advance();
                Ok(name)
            }
            _ => {
                self.error("expected identifier");
                Err(())
            }
        }
    }

    fn mangled_identifier(&mut self) -> PResult<(String, Option<TypeSuffix>)> {
        match self.cur().kind.clone() {
            TokenKind::Identifier { name, suffix } => {
                self.advance();
                Ok((name, suffix))
            }
            _ => {
                self.error("expected identifier");
                Err(())
            }
        }
    }

    fn mangle(name: &str, suffix: Option<TypeSuffix>) -> String {
        match suffix {
            Some(s) => format!("{name}{}", s.mangle_suffix()),
            None => name.to_string(),
        }
    }

    // ---- top level -------------------------------------------------

    fn parse_program(&mut self) {
        self.skip_blank_lines();
        while !self.at_eof() {
            self.parse_top_level_item();
            self.skip_blank_lines();
        }
    }

    fn next_is_kw(&self, k: Keyword) -> bool {
        self.tokens
            .get(self.pos + 1)
            .map(|t| t.kind == TokenKind::Keyword(k))
            .unwrap_or(false)
    }

    fn parse_top_level_item(&mut self) {
        let loc = self.cur_loc();
        let mut number = None;
        if let TokenKind::LineNumber(n) = self.cur().kind {
            number = Some(n);
            self.advance();
        }

        let mut label = None;
        if let TokenKind::Identifier { name, suffix: None } = self.cur().kind.clone() {
            if self.peek_ahead_is_colon() {
                label = Some(name);
                self.advance();
                self.advance(); // colon
            }
        }

        if self.check_kw(Keyword::Type) {
            self.parse_type_decl();
            return;
        }
        if self.check_kw(Keyword::Class) {
            self.parse_class_decl();
            return;
        }
        if self.check_kw(Keyword::Sub) {
            self.parse_routine_decl(RoutineKind::Sub);
            return;
        }
        if self.check_kw(Keyword::Function) {
            self.parse_routine_decl(RoutineKind::Function);
            return;
        }
        if self.check_kw(Keyword::DefFn) {
            self.parse_routine_decl(RoutineKind::DefFn);
            return;
        }
        // `GLOBAL` also introduces plain `GLOBAL DIM ...` statements, so
        // only treat it as a constant decl when `CONSTANT` immediately
        // follows — otherwise fall through to normal statement parsing.
        if self.check_kw(Keyword::Constant)
            || (self.check_kw(Keyword::Global) && self.next_is_kw(Keyword::Constant))
        {
            self.parse_constant_decl();
            return;
        }

        let line = self.parse_statement_line(number, label, loc);
        self.program.lines.push(line);
    }

    fn peek_ahead_is_colon(&self) -> bool {
        self.tokens
            .get(self.pos + 1)
            .map(|t| t.kind == TokenKind::Punct(Punct::Colon))
            .unwrap_or(false)
    }

    /// Parse one physical line's colon-separated statements, folding in
    /// any `DATA` markers (already stripped of their payload by C3) as
    /// top-level `DataStatement` entries rather than inline statements.
    /// A line with no statements at all (just a label or line number)
    /// still gets one `Statement::Label` placeholder so the CFG builder
    /// has an anchor for every physical line.
    fn parse_statement_line(
        &mut self,
        number: Option<u32>,
        label: Option<String>,
        location: Location,
    ) -> Line {
        let mut statements = Vec::new();
        loop {
            if self.at_eol() {
                break;
            }
            if self.check_kw(Keyword::Data) {
                self.advance();
                let phys_line = location.line;
                let values = self
                    .segment
                    .line_value_ranges
                    .get(&phys_line)
                    .map(|&(s, e)| self.segment.values[s..e].to_vec())
                    .unwrap_or_default();
                self.program
                    .data_statements
                    .push(DataStatement { values, location });
            } else {
                match self.parse_statement() {
                    Ok(stmt) => statements.push(stmt),
                    Err(()) => {
                        self.synchronize();
                        break;
                    }
                }
            }
            if !self.match_punct(Punct::Colon) {
                break;
            }
        }
        if statements.is_empty() {
            statements.push(Statement::Label { location });
        }
        self.expect_eol();
        Line {
            number,
            label,
            statements,
            location,
        }
    }

    // ---- declarations ------------------------------------------------

    fn parse_type_decl(&mut self) {
        let loc = self.cur_loc();
        self.advance(); // TYPE
        let Ok(name) = self.expect_identifier_name() else {
            self.synchronize();
            return;
        };
        self.expect_eol();
        let mut fields = Vec::new();
        while !self.at_end_kw(Keyword::Type) && !self.at_eof() {
            self.skip_blank_lines();
            if self.at_end_kw(Keyword::Type) || self.at_eof() {
                break;
            }
            if let Ok(field) = self.parse_field_decl() {
                fields.push(field);
            } else {
                self.synchronize();
            }
            self.expect_eol();
        }
        if !self.match_end_kw(Keyword::Type) {
            self.error("expected END TYPE");
        }
        self.expect_eol();
        self.program.types.push(TypeDecl {
            name,
            fields,
            location: loc,
        });
    }

    fn parse_field_decl(&mut self) -> PResult<Field> {
        let (name, suffix) = self.mangled_identifier()?;
        let ty = if self.match_kw(Keyword::As) {
            self.parse_type_descriptor()?
        } else {
            self.type_from_suffix(suffix)
        };
        Ok(Field {
            name: Self::mangle(&name, suffix),
            ty,
        })
    }

    fn type_from_suffix(&self, suffix: Option<TypeSuffix>) -> crate::types::TypeDescriptor {
        use crate::types::{BaseType, TypeDescriptor};
        let base = match suffix {
            Some(TypeSuffix::Percent) => BaseType::Integer,
            Some(TypeSuffix::Amp) => BaseType::Long,
            Some(TypeSuffix::Bang) => BaseType::Single,
            Some(TypeSuffix::Hash) => BaseType::Double,
            Some(TypeSuffix::Dollar) => BaseType::String,
            Some(TypeSuffix::Caret) => BaseType::Short,
            Some(TypeSuffix::At) => BaseType::Byte,
            None => BaseType::Integer,
        };
        TypeDescriptor::simple(base)
    }

    fn parse_type_descriptor(&mut self) -> PResult<crate::types::TypeDescriptor> {
        use crate::types::{BaseType, TypeDescriptor};
        if self.match_kw(Keyword::List) {
            self.expect_kw(Keyword::Of, "OF")?;
            if self.match_kw(Keyword::Any) {
                return Ok(TypeDescriptor::list_of_any());
            }
            let elem = self.parse_type_descriptor()?;
            return Ok(TypeDescriptor::list_of(elem));
        }
        if self.match_kw(Keyword::HashMap) {
            return Ok(TypeDescriptor::hashmap());
        }
        if self.match_kw(Keyword::Object) {
            return Ok(TypeDescriptor::simple(BaseType::Object));
        }
        if self.match_kw(Keyword::Byte) {
            return Ok(TypeDescriptor::simple(BaseType::Byte));
        }
        if self.match_kw(Keyword::Short) {
            return Ok(TypeDescriptor::simple(BaseType::Short));
        }
        if self.match_kw(Keyword::Integer) {
            return Ok(TypeDescriptor::simple(BaseType::Integer));
        }
        if self.match_kw(Keyword::Long) {
            return Ok(TypeDescriptor::simple(BaseType::Long));
        }
        if self.match_kw(Keyword::Single) {
            return Ok(TypeDescriptor::simple(BaseType::Single));
        }
        if self.match_kw(Keyword::Double) {
            return Ok(TypeDescriptor::simple(BaseType::Double));
        }
        if self.match_kw(Keyword::StringType) {
            return Ok(TypeDescriptor::simple(BaseType::String));
        }
        if self.match_kw(Keyword::Unicode) {
            return Ok(TypeDescriptor::simple(BaseType::Unicode));
        }
        let name = self.expect_identifier_name()?;
        // An unqualified name names either a UDT or a class; disambiguated
        // later by the semantic analyzer, which knows which namespace it's
        // in. Default to UDT syntax; the analyzer promotes it to a class
        // descriptor when the name resolves to a `CLASS` instead.
        Ok(TypeDescriptor::udt(name))
    }

    fn parse_class_decl(&mut self) {
        let loc = self.cur_loc();
        self.advance(); // CLASS
        let Ok(name) = self.expect_identifier_name() else {
            self.synchronize();
            return;
        };
        let parent = if self.match_kw(Keyword::Extends) {
            self.expect_identifier_name().ok()
        } else {
            None
        };
        self.expect_eol();

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut constructor = None;
        let mut destructor = None;

        while !self.at_end_kw(Keyword::Class) && !self.at_eof() {
            self.skip_blank_lines();
            if self.at_end_kw(Keyword::Class) || self.at_eof() {
                break;
            }
            if self.check_kw(Keyword::Method) {
                let m = self.parse_method_decl();
                if m.name.eq_ignore_ascii_case("NEW") {
                    constructor = Some(m);
                } else if m.name.eq_ignore_ascii_case("DELETE") {
                    destructor = Some(m);
                } else {
                    methods.push(m);
                }
            } else if let Ok(field) = self.parse_field_decl() {
                fields.push(field);
                self.expect_eol();
            } else {
                self.synchronize();
                self.expect_eol();
            }
        }
        if !self.match_end_kw(Keyword::Class) {
            self.error("expected END CLASS");
        }
        self.expect_eol();

        self.program.classes.push(ClassDecl {
            name,
            parent,
            fields,
            methods,
            constructor,
            destructor,
            location: loc,
        });
    }

    fn parse_method_decl(&mut self) -> MethodDecl {
        let loc = self.cur_loc();
        self.advance(); // METHOD
        let name = self.expect_identifier_name().unwrap_or_default();
        let params = self.parse_param_list();
        let return_type = if self.match_kw(Keyword::As) {
            self.parse_type_descriptor().ok()
        } else {
            None
        };
        self.expect_eol();
        let body = self.parse_block(&[Term::End(Keyword::Method)]);
        self.match_end_kw(Keyword::Method);
        self.expect_eol();
        MethodDecl {
            name,
            params,
            return_type,
            body,
            // The dialect has no `OVERRIDE` keyword, so there's nothing
            // for the parser to detect here; `semantic.rs` recomputes
            // override status structurally, by matching this method's
            // name against the parent class's vtable (DESIGN.md
            // decision 3).
            is_override: false,
            location: loc,
        }
    }

    fn parse_param_list(&mut self) -> Vec<Param> {
        let mut params = Vec::new();
        if !self.match_punct(Punct::LParen) {
            return params;
        }
        if self.match_punct(Punct::RParen) {
            return params;
        }
        loop {
            let by_ref = self.match_kw(Keyword::ByRef);
            let _ = self.match_kw(Keyword::ByVal);
            let Ok((name, suffix)) = self.mangled_identifier() else {
                break;
            };
            let ty = if self.match_kw(Keyword::As) {
                self.parse_type_descriptor().unwrap_or_else(|_| self.type_from_suffix(suffix))
            } else {
                self.type_from_suffix(suffix)
            };
            params.push(Param {
                name: Self::mangle(&name, suffix),
                ty,
                by_ref,
            });
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        let _ = self.expect_punct(Punct::RParen, ")");
        params
    }

    fn parse_routine_decl(&mut self, kind: RoutineKind) {
        let loc = self.cur_loc();
        self.advance();
        let Ok(name) = self.expect_identifier_name() else {
            self.synchronize();
            return;
        };
        let params = self.parse_param_list();
        let return_type = if self.match_kw(Keyword::As) {
            self.parse_type_descriptor().ok()
        } else {
            None
        };
        if kind == RoutineKind::DefFn {
            // single-expression form: DEF FN NAME(...) = expr
            let _ = self.expect_punct(Punct::Equal, "=");
            let expr = self.parse_expr();
            self.expect_eol();
            self.program.routines.push(RoutineDecl {
                kind,
                name,
                params,
                return_type,
                body: vec![Statement::Return {
                    value: Some(expr),
                    location: loc,
                }],
                location: loc,
            });
            return;
        }
        self.expect_eol();
        let end_follow = match kind {
            RoutineKind::Sub => Keyword::Sub,
            RoutineKind::Function => Keyword::Function,
            _ => Keyword::Sub,
        };
        let body = self.parse_block(&[Term::End(end_follow)]);
        self.match_end_kw(end_follow);
        self.expect_eol();
        self.program.routines.push(RoutineDecl {
            kind,
            name,
            params,
            return_type,
            body,
            location: loc,
        });
    }

    fn parse_constant_decl(&mut self) {
        let loc = self.cur_loc();
        self.match_kw(Keyword::Global);
        if !self.match_kw(Keyword::Constant) {
            self.error("expected CONSTANT");
            self.synchronize();
            self.expect_eol();
            return;
        }
        let Ok(name) = self.expect_identifier_name() else {
            self.synchronize();
            self.expect_eol();
            return;
        };
        if self.expect_punct(Punct::Equal, "=").is_err() {
            self.synchronize();
            self.expect_eol();
            return;
        }
        let value = self.parse_expr();
        self.expect_eol();
        self.program.constants.push(ConstantDecl {
            name,
            value,
            location: loc,
        });
    }

    /// Parse statements until one of `terminators` is reached (without
    /// consuming it) or EOF.
    fn parse_block(&mut self, terminators: &[Term]) -> Vec<Statement> {
        let mut stmts = Vec::new();
        loop {
            self.skip_blank_lines();
            if self.at_eof() || self.at_any_term(terminators) {
                break;
            }
            if let TokenKind::LineNumber(_) = self.cur().kind {
                self.advance();
            }
            if let TokenKind::Identifier { suffix: None, .. } = self.cur().kind.clone() {
                if self.peek_ahead_is_colon() {
                    self.advance();
                    self.advance();
                }
            }
            loop {
                if self.at_eol() || self.at_any_term(terminators) {
                    break;
                }
                match self.parse_statement() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(()) => {
                        self.synchronize();
                        break;
                    }
                }
                if !self.match_punct(Punct::Colon) {
                    break;
                }
            }
            if self.at_any_term(terminators) {
                break;
            }
            self.expect_eol();
        }
        stmts
    }

    // ---- statements ----------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Statement> {
        let loc = self.cur_loc();
        match self.cur().kind.clone() {
            TokenKind::Keyword(Keyword::Dim) | TokenKind::Keyword(Keyword::Global) => {
                self.parse_dim(loc)
            }
            TokenKind::Keyword(Keyword::Redim) => self.parse_redim(loc),
            TokenKind::Keyword(Keyword::Print) => self.parse_print(loc),
            TokenKind::Keyword(Keyword::Input) | TokenKind::Keyword(Keyword::InputAt) => {
                self.parse_input(loc)
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(loc),
            TokenKind::Keyword(Keyword::For) => self.parse_for(loc),
            TokenKind::Keyword(Keyword::While) => self.parse_while(loc),
            TokenKind::Keyword(Keyword::Do) => self.parse_do(loc),
            TokenKind::Keyword(Keyword::Repeat) => self.parse_repeat(loc),
            TokenKind::Keyword(Keyword::SelectCase) => self.parse_select_case(loc),
            TokenKind::Keyword(Keyword::MatchType) => self.parse_match_type(loc),
            TokenKind::Keyword(Keyword::Try) => self.parse_try(loc),
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                let code = self.parse_expr();
                Ok(Statement::Throw { code, location: loc })
            }
            TokenKind::Keyword(Keyword::Exit) => self.parse_exit(loc),
            TokenKind::Keyword(Keyword::Goto) => {
                self.advance();
                let target = self.parse_goto_target()?;
                Ok(Statement::Goto { target, location: loc })
            }
            TokenKind::Keyword(Keyword::Gosub) => {
                self.advance();
                let target = self.parse_goto_target()?;
                Ok(Statement::Gosub { target, location: loc })
            }
            TokenKind::Keyword(Keyword::On) => self.parse_on(loc),
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.at_eol() || self.check_punct(Punct::Colon) {
                    None
                } else {
                    Some(self.parse_expr())
                };
                Ok(Statement::Return { value, location: loc })
            }
            TokenKind::Keyword(Keyword::Restore) => {
                self.advance();
                let target = if self.at_eol() || self.check_punct(Punct::Colon) {
                    None
                } else {
                    Some(self.parse_goto_target()?)
                };
                Ok(Statement::Restore { target, location: loc })
            }
            TokenKind::Keyword(Keyword::Read) => {
                self.advance();
                let mut targets = vec![self.parse_lvalue()?];
                while self.match_punct(Punct::Comma) {
                    targets.push(self.parse_lvalue()?);
                }
                Ok(Statement::Read { targets, location: loc })
            }
            TokenKind::Keyword(Keyword::Delete) => {
                self.advance();
                let target = self.parse_lvalue()?;
                Ok(Statement::Delete { target, location: loc })
            }
            TokenKind::Keyword(
                k @ (Keyword::After | Keyword::Every | Keyword::AfterFrames | Keyword::EveryFrame),
            ) => self.parse_timer(loc, k),
            _ => self.parse_assign_or_call(loc),
        }
    }

    fn parse_dim(&mut self, loc: Location) -> PResult<Statement> {
        let is_global = self.match_kw(Keyword::Global);
        if is_global {
            self.expect_kw(Keyword::Dim, "DIM")?;
        } else {
            self.advance(); // DIM
        }
        let mut specs = Vec::new();
        loop {
            specs.push(self.parse_dim_spec()?);
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Statement::Dim {
            specs,
            is_global,
            location: loc,
        })
    }

    fn parse_dim_spec(&mut self) -> PResult<DimSpec> {
        let (name, suffix) = self.mangled_identifier()?;
        let mut dimensions = Vec::new();
        if self.match_punct(Punct::LParen) {
            if !self.check_punct(Punct::RParen) {
                loop {
                    if self.check_punct(Punct::Comma) || self.check_punct(Punct::RParen) {
                        dimensions.push(None);
                    } else {
                        dimensions.push(Some(self.parse_expr()));
                    }
                    if !self.match_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RParen, ")")?;
        }
        let ty = if self.match_kw(Keyword::As) {
            self.parse_type_descriptor()?
        } else {
            self.type_from_suffix(suffix)
        };
        Ok(DimSpec {
            name: Self::mangle(&name, suffix),
            ty,
            dimensions,
        })
    }

    fn parse_redim(&mut self, loc: Location) -> PResult<Statement> {
        self.advance(); // REDIM
        let preserve = self.match_kw(Keyword::Preserve);
        let (name, suffix) = self.mangled_identifier()?;
        self.expect_punct(Punct::LParen, "(")?;
        let mut dimensions = Vec::new();
        loop {
            dimensions.push(self.parse_expr());
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen, ")")?;
        Ok(Statement::Redim {
            name: Self::mangle(&name, suffix),
            dimensions,
            preserve,
            location: loc,
        })
    }

    fn parse_print(&mut self, loc: Location) -> PResult<Statement> {
        self.advance(); // PRINT
        let mut items = Vec::new();
        while !self.at_eol() && !self.check_punct(Punct::Colon) {
            if self.match_punct(Punct::Semicolon) {
                items.push(PrintItem::Semicolon);
                continue;
            }
            if self.match_punct(Punct::Comma) {
                items.push(PrintItem::Comma);
                continue;
            }
            items.push(PrintItem::Expr(self.parse_expr()));
        }
        Ok(Statement::Print { items, location: loc })
    }

    fn parse_input(&mut self, loc: Location) -> PResult<Statement> {
        let at_form = self.check_kw(Keyword::InputAt);
        self.advance(); // INPUT or INPUT_AT
        let at = if at_form {
            self.expect_punct(Punct::LParen, "(")?;
            let row = self.parse_expr();
            self.expect_punct(Punct::Comma, ",")?;
            let col = self.parse_expr();
            self.expect_punct(Punct::RParen, ")")?;
            Some((row, col))
        } else {
            None
        };
        let prompt = if let TokenKind::String { .. } = self.cur().kind.clone() {
            let e = self.parse_primary()?;
            self.expect_punct(Punct::Semicolon, ";")?;
            Some(e)
        } else {
            None
        };
        let target = self.parse_lvalue()?;
        Ok(Statement::Input {
            prompt,
            target,
            at,
            location: loc,
        })
    }

    fn parse_if(&mut self, loc: Location) -> PResult<Statement> {
        self.advance(); // IF
        let condition = self.parse_expr();
        self.expect_kw(Keyword::Then, "THEN")?;

        // single-line form: IF c THEN stmt [: stmt]* [ELSE stmt [: stmt]*]
        if !self.at_eol() && !matches!(self.cur().kind, TokenKind::LineNumber(_)) {
            let mut then_branch = Vec::new();
            loop {
                if self.at_eol() || self.check_kw(Keyword::Else) {
                    break;
                }
                match self.parse_statement() {
                    Ok(s) => then_branch.push(s),
                    Err(()) => break,
                }
                if !self.match_punct(Punct::Colon) {
                    break;
                }
            }
            let else_branch = if self.match_kw(Keyword::Else) {
                let mut stmts = Vec::new();
                loop {
                    if self.at_eol() {
                        break;
                    }
                    match self.parse_statement() {
                        Ok(s) => stmts.push(s),
                        Err(()) => break,
                    }
                    if !self.match_punct(Punct::Colon) {
                        break;
                    }
                }
                Some(stmts)
            } else {
                None
            };
            return Ok(Statement::If {
                condition,
                then_branch,
                else_ifs: Vec::new(),
                else_branch,
                location: loc,
            });
        }

        self.expect_eol();
        let terms = [
            Term::Plain(Keyword::ElseIf),
            Term::Plain(Keyword::Else),
            Term::End(Keyword::If),
        ];
        let then_branch = self.parse_block(&terms);
        let mut else_ifs = Vec::new();
        while self.match_kw(Keyword::ElseIf) {
            let cond = self.parse_expr();
            self.expect_kw(Keyword::Then, "THEN")?;
            self.expect_eol();
            let body = self.parse_block(&terms);
            else_ifs.push((cond, body));
        }
        let else_branch = if self.match_kw(Keyword::Else) {
            self.expect_eol();
            Some(self.parse_block(&[Term::End(Keyword::If)]))
        } else {
            None
        };
        if !self.match_end_kw(Keyword::If) {
            self.error("expected END IF");
        }
        Ok(Statement::If {
            condition,
            then_branch,
            else_ifs,
            else_branch,
            location: loc,
        })
    }

    /// `NEXT` may optionally repeat the loop variable's name; consume it
    /// when present but don't treat a bare `NEXT` as an error.
    fn match_trailing_next_var(&mut self) {
        if matches!(self.cur().kind, TokenKind::Identifier { .. }) {
            self.advance();
        }
    }

    fn parse_for(&mut self, loc: Location) -> PResult<Statement> {
        self.advance(); // FOR
        if self.match_kw(Keyword::Each) {
            // "FOR EACH X IN list" binds just the element. "FOR EACH T, E IN
            // list" follows the type-then-element order its own name
            // suggests: the first identifier is the type tag, the second is
            // the element MATCH TYPE actually dispatches on.
            let (first, _) = self.mangled_identifier()?;
            let (var, type_tag_var) = if self.match_punct(Punct::Comma) {
                let (second, _) = self.mangled_identifier()?;
                (second, Some(first))
            } else {
                (first, None)
            };
            self.expect_kw(Keyword::In, "IN")?;
            let collection = self.parse_expr();
            self.expect_eol();
            let body = self.parse_block(&[Term::Plain(Keyword::Next)]);
            self.match_kw(Keyword::Next);
            self.match_trailing_next_var();
            return Ok(Statement::ForEach {
                var,
                type_tag_var,
                collection,
                body,
                location: loc,
            });
        }
        let (name, suffix) = self.mangled_identifier()?;
        let var = Self::mangle(&name, suffix);
        self.expect_punct(Punct::Equal, "=")?;
        let start = self.parse_expr();
        self.expect_kw(Keyword::To, "TO")?;
        let end = self.parse_expr();
        let step = if self.match_kw(Keyword::Step) {
            Some(self.parse_expr())
        } else {
            None
        };
        self.expect_eol();
        let body = self.parse_block(&[Term::Plain(Keyword::Next)]);
        self.match_kw(Keyword::Next);
        self.match_trailing_next_var();
        Ok(Statement::For {
            var,
            start,
            end,
            step,
            body,
            location: loc,
        })
    }

    fn parse_while(&mut self, loc: Location) -> PResult<Statement> {
        self.advance();
        let condition = self.parse_expr();
        self.expect_eol();
        let body = self.parse_block(&[Term::Plain(Keyword::Wend)]);
        self.match_kw(Keyword::Wend);
        Ok(Statement::While { condition, body, location: loc })
    }

    fn parse_do(&mut self, loc: Location) -> PResult<Statement> {
        self.advance();
        let pre_test = if self.match_kw(Keyword::While) {
            Some((false, self.parse_expr()))
        } else if self.match_kw(Keyword::Until) {
            Some((true, self.parse_expr()))
        } else {
            None
        };
        self.expect_eol();
        let body = self.parse_block(&[Term::Plain(Keyword::Loop)]);
        self.match_kw(Keyword::Loop);
        let post_test = if self.match_kw(Keyword::While) {
            Some((false, self.parse_expr()))
        } else if self.match_kw(Keyword::Until) {
            Some((true, self.parse_expr()))
        } else {
            None
        };
        Ok(Statement::DoLoop {
            body,
            pre_test,
            post_test,
            location: loc,
        })
    }

    fn parse_repeat(&mut self, loc: Location) -> PResult<Statement> {
        self.advance();
        self.expect_eol();
        let body = self.parse_block(&[Term::Plain(Keyword::Until)]);
        self.expect_kw(Keyword::Until, "UNTIL")?;
        let until = self.parse_expr();
        Ok(Statement::Repeat { body, until, location: loc })
    }

    fn parse_select_case(&mut self, loc: Location) -> PResult<Statement> {
        self.advance(); // SELECT
        self.expect_kw(Keyword::Case, "CASE")?;
        let discriminant = self.parse_expr();
        self.expect_eol();
        let terms = [Term::Plain(Keyword::Case), Term::End(Keyword::SelectCase)];
        let mut arms = Vec::new();
        let mut otherwise = None;
        while self.match_kw(Keyword::Case) {
            if self.match_kw(Keyword::Otherwise) {
                self.expect_eol();
                otherwise = Some(self.parse_block(&terms));
                continue;
            }
            let mut matches = Vec::new();
            loop {
                matches.push(self.parse_case_match()?);
                if !self.match_punct(Punct::Comma) {
                    break;
                }
            }
            self.expect_eol();
            let body = self.parse_block(&terms);
            arms.push(CaseArm { matches, body });
        }
        if !self.match_end_kw(Keyword::SelectCase) {
            self.error("expected END SELECT");
        }
        Ok(Statement::SelectCase {
            discriminant,
            arms,
            otherwise,
            location: loc,
        })
    }

    fn parse_case_match(&mut self) -> PResult<CaseMatch> {
        // `CASE IS > expr`: `IS` is its own keyword token (there's no
        // dedicated combined `CASE IS` token).
        if self.match_kw(Keyword::Is) {
            let op = self.parse_compare_op_required()?;
            return Ok(CaseMatch::RelOp(op, self.parse_expr()));
        }
        let first = self.parse_expr();
        if self.match_kw(Keyword::To) {
            let second = self.parse_expr();
            return Ok(CaseMatch::Range(first, second));
        }
        Ok(CaseMatch::Value(first))
    }

    fn parse_compare_op_required(&mut self) -> PResult<CompareOp> {
        let op = match self.cur().kind.clone() {
            TokenKind::Punct(Punct::Equal) => CompareOp::Eq,
            TokenKind::Punct(Punct::NotEqual) => CompareOp::Ne,
            TokenKind::Punct(Punct::Less) => CompareOp::Lt,
            TokenKind::Punct(Punct::LessEqual) => CompareOp::Le,
            TokenKind::Punct(Punct::Greater) => CompareOp::Gt,
            TokenKind::Punct(Punct::GreaterEqual) => CompareOp::Ge,
            _ => {
                self.error("expected comparison operator");
                return Err(());
            }
        };
        self.advance();
        Ok(op)
    }

    fn parse_match_type(&mut self, loc: Location) -> PResult<Statement> {
        // "MATCH" lexes directly to the single token `Keyword::MatchType`;
        // "TYPE" follows as its own, separate keyword token.
        self.advance();
        self.expect_kw(Keyword::Type, "TYPE")?;
        let discriminant = self.parse_expr();
        self.expect_eol();
        let terms = [Term::Plain(Keyword::Case), Term::End(Keyword::MatchType)];
        let mut arms = Vec::new();
        while self.match_kw(Keyword::Case) {
            let bound_type = self.parse_type_descriptor()?.to_string();
            // `AS` is optional: `CASE INTEGER n` binds just as `CASE
            // INTEGER AS n` does.
            let _ = self.match_kw(Keyword::As);
            let binding = if matches!(self.cur().kind, TokenKind::Identifier { .. }) {
                self.expect_identifier_name()?
            } else {
                "IT".to_string()
            };
            self.expect_eol();
            let body = self.parse_block(&terms);
            arms.push(MatchTypeArm {
                bound_type,
                binding,
                body,
            });
        }
        if !self.match_end_kw(Keyword::MatchType) {
            self.error("expected END MATCH");
        }
        Ok(Statement::MatchType {
            discriminant,
            arms,
            location: loc,
        })
    }

    fn parse_try(&mut self, loc: Location) -> PResult<Statement> {
        self.advance();
        self.expect_eol();
        let terms = [
            Term::Plain(Keyword::Catch),
            Term::Plain(Keyword::Finally),
            Term::End(Keyword::Try),
        ];
        let try_body = self.parse_block(&terms);
        let mut catches = Vec::new();
        while self.match_kw(Keyword::Catch) {
            let mut codes = Vec::new();
            if !self.at_eol() && !self.check_kw(Keyword::Otherwise) {
                loop {
                    match self.cur().kind.clone() {
                        TokenKind::Number { value, .. } => {
                            self.advance();
                            codes.push(value as i64);
                        }
                        _ => break,
                    }
                    if !self.match_punct(Punct::Comma) {
                        break;
                    }
                }
            } else {
                self.match_kw(Keyword::Otherwise);
            }
            self.expect_eol();
            let body = self.parse_block(&terms);
            catches.push(CatchClause { codes, body });
        }
        let finally = if self.match_kw(Keyword::Finally) {
            self.expect_eol();
            Some(self.parse_block(&[Term::End(Keyword::Try)]))
        } else {
            None
        };
        if !self.match_end_kw(Keyword::Try) {
            self.error("expected END TRY");
        }
        Ok(Statement::TryCatchFinally {
            try_body,
            catches,
            finally,
            location: loc,
        })
    }

    fn parse_exit(&mut self, loc: Location) -> PResult<Statement> {
        self.advance();
        let kind = match self.cur().kind.clone() {
            TokenKind::Keyword(Keyword::For) => ExitKind::For,
            TokenKind::Keyword(Keyword::Sub) => ExitKind::Sub,
            TokenKind::Keyword(Keyword::Function) => ExitKind::Function,
            TokenKind::Keyword(Keyword::Do) => ExitKind::Do,
            TokenKind::Keyword(Keyword::While) => ExitKind::While,
            TokenKind::Keyword(Keyword::Repeat) => ExitKind::Repeat,
            _ => {
                self.error("expected FOR, SUB, FUNCTION, DO, WHILE, or REPEAT after EXIT");
                return Err(());
            }
        };
        self.advance();
        Ok(Statement::Exit { kind, location: loc })
    }

    fn parse_goto_target(&mut self) -> PResult<GotoTarget> {
        match self.cur().kind.clone() {
            TokenKind::Number { value, .. } => {
                self.advance();
                Ok(GotoTarget::Number(value as u32))
            }
            TokenKind::Identifier { name, suffix: None } => {
                self.advance();
                Ok(GotoTarget::Label(name))
            }
            _ => {
                self.error("expected a line number or label");
                Err(())
            }
        }
    }

    fn parse_on(&mut self, loc: Location) -> PResult<Statement> {
        self.advance(); // ON
        let selector = self.parse_expr();
        let is_gosub = if self.match_kw(Keyword::Gosub) {
            true
        } else {
            self.expect_kw(Keyword::Goto, "GOTO or GOSUB")?;
            false
        };
        let mut targets = Vec::new();
        loop {
            targets.push(self.parse_goto_target()?);
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Statement::OnGoto {
            selector,
            targets,
            is_gosub,
            location: loc,
        })
    }

    fn parse_timer(&mut self, loc: Location, kw: Keyword) -> PResult<Statement> {
        self.advance();
        let kind = match kw {
            Keyword::After => TimerKind::After,
            Keyword::Every => TimerKind::Every,
            Keyword::AfterFrames => TimerKind::AfterFrames,
            Keyword::EveryFrame => TimerKind::EveryFrame,
            _ => unreachable!(),
        };
        let duration = self.parse_expr();
        // `AFTER 3.0 Handler` registers the named sub as the handler; the
        // fuller `AFTER ... DO ... DONE` inline-body form is not supported
        // here (named-handler registration covers the same cases with a
        // simpler grammar).
        let handler = self.expect_identifier_name()?;
        Ok(Statement::Timer {
            kind,
            duration,
            handler,
            location: loc,
        })
    }

    fn parse_assign_or_call(&mut self, loc: Location) -> PResult<Statement> {
        if let TokenKind::Identifier { name, suffix } = self.cur().kind.clone() {
            let save = self.pos;
            self.advance();
            let mangled = Self::mangle(&name, suffix);

            // bare statement call: `Name arg1, arg2` (no parens, no '=').
            if !self.check_punct(Punct::LParen)
                && !self.check_punct(Punct::Equal)
                && !self.check_punct(Punct::Assign)
                && !self.check_punct(Punct::Dot)
                && !self.at_eol()
                && !self.check_punct(Punct::Colon)
            {
                let mut args = Vec::new();
                loop {
                    args.push(self.parse_expr());
                    if !self.match_punct(Punct::Comma) {
                        break;
                    }
                }
                return Ok(Statement::CallStatement {
                    name: mangled,
                    args,
                    location: loc,
                });
            }

            self.pos = save;
        }

        let restart = self.pos;
        if let Ok(target) = self.parse_lvalue() {
            if self.match_punct(Punct::Equal) || self.match_punct(Punct::Assign) {
                let value = self.parse_expr();
                return Ok(Statement::Assign {
                    target,
                    value,
                    location: loc,
                });
            }
        }
        self.pos = restart;
        let expr = self.parse_expr();
        Ok(Statement::ExprStatement { expr, location: loc })
    }

    fn parse_lvalue(&mut self) -> PResult<LValue> {
        let (name, suffix) = self.mangled_identifier()?;
        let mangled = Self::mangle(&name, suffix);
        let mut lv = if self.match_punct(Punct::LParen) {
            let mut indices = Vec::new();
            if !self.check_punct(Punct::RParen) {
                loop {
                    indices.push(self.parse_expr());
                    if !self.match_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RParen, ")")?;
            LValue::ArrayElement {
                name: mangled,
                indices,
            }
        } else {
            LValue::Variable(mangled)
        };
        while self.match_punct(Punct::Dot) {
            let field = self.expect_identifier_name()?;
            lv = LValue::Field {
                base: Box::new(lv),
                field,
            };
        }
        Ok(lv)
    }

    // ---- expressions -----------------------------------------------

    fn parse_expr(&mut self) -> Expr {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Expr {
        let mut lhs = self.parse_and();
        loop {
            let op = if self.match_kw(Keyword::Or) {
                BinOp::Or
            } else if self.match_kw(Keyword::Xor) {
                BinOp::Xor
            } else if self.match_kw(Keyword::Imp) {
                BinOp::Imp
            } else if self.match_kw(Keyword::Eqv) {
                BinOp::Eqv
            } else {
                break;
            };
            let rhs = self.parse_and();
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        lhs
    }

    fn parse_and(&mut self) -> Expr {
        let mut lhs = self.parse_not();
        while self.match_kw(Keyword::And) {
            let rhs = self.parse_not();
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        lhs
    }

    fn parse_not(&mut self) -> Expr {
        if self.match_kw(Keyword::Not) {
            let e = self.parse_not();
            return Expr::Unary { op: UnaryOp::Not, expr: Box::new(e) };
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Expr {
        let lhs = self.parse_add();
        let op = match self.cur().kind {
            TokenKind::Punct(Punct::Equal) => Some(CompareOp::Eq),
            TokenKind::Punct(Punct::NotEqual) => Some(CompareOp::Ne),
            TokenKind::Punct(Punct::Less) => Some(CompareOp::Lt),
            TokenKind::Punct(Punct::LessEqual) => Some(CompareOp::Le),
            TokenKind::Punct(Punct::Greater) => Some(CompareOp::Gt),
            TokenKind::Punct(Punct::GreaterEqual) => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_add();
            return Expr::Compare { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        if self.match_kw(Keyword::Is) {
            if self.match_kw(Keyword::Nothing) {
                return Expr::IsNothing(Box::new(lhs));
            }
            if let Ok(class_name) = self.expect_identifier_name() {
                return Expr::IsClass { expr: Box::new(lhs), class_name };
            }
        }
        lhs
    }

    fn parse_add(&mut self) -> Expr {
        let mut lhs = self.parse_mul();
        loop {
            let op = if self.match_punct(Punct::Plus) {
                BinOp::Add
            } else if self.match_punct(Punct::Minus) {
                BinOp::Sub
            } else if self.match_punct(Punct::Ampersand) {
                // `&` string concatenation lowers to Add; codegen
                // dispatches on operand type.
                BinOp::Add
            } else {
                break;
            };
            let rhs = self.parse_mul();
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        lhs
    }

    fn parse_mul(&mut self) -> Expr {
        let mut lhs = self.parse_unary();
        loop {
            let op = if self.match_punct(Punct::Star) {
                BinOp::Mul
            } else if self.match_punct(Punct::Slash) {
                BinOp::Div
            } else if self.match_punct(Punct::Backslash) {
                BinOp::IntDiv
            } else if self.match_kw(Keyword::ModKw) {
                BinOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary();
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        lhs
    }

    fn parse_unary(&mut self) -> Expr {
        if self.match_punct(Punct::Minus) {
            return Expr::Unary { op: UnaryOp::Neg, expr: Box::new(self.parse_unary()) };
        }
        if self.match_punct(Punct::Plus) {
            return Expr::Unary { op: UnaryOp::Plus, expr: Box::new(self.parse_unary()) };
        }
        self.parse_pow()
    }

    fn parse_pow(&mut self) -> Expr {
        let base = self.parse_postfix();
        if self.match_punct(Punct::Caret) {
            let exp = self.parse_unary();
            return Expr::Binary { op: BinOp::Pow, lhs: Box::new(base), rhs: Box::new(exp) };
        }
        base
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut e = match self.parse_primary() {
            Ok(e) => e,
            Err(()) => {
                self.synchronize();
                return Expr::Nothing;
            }
        };
        loop {
            if self.match_punct(Punct::Dot) {
                let Ok(name) = self.expect_identifier_name() else {
                    break;
                };
                if self.match_punct(Punct::LParen) {
                    let args = self.parse_arg_list();
                    e = Expr::MethodCall { base: Box::new(e), method: name, args };
                } else {
                    e = Expr::FieldAccess { base: Box::new(e), field: name };
                }
                continue;
            }
            break;
        }
        e
    }

    fn parse_arg_list(&mut self) -> Vec<Expr> {
        let mut args = Vec::new();
        if self.match_punct(Punct::RParen) {
            return args;
        }
        loop {
            args.push(self.parse_expr());
            if !self.match_punct(Punct::Comma) {
                break;
            }
        }
        let _ = self.expect_punct(Punct::RParen, ")");
        args
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        match self.cur().kind.clone() {
            TokenKind::Number { value, .. } => {
                self.advance();
                Ok(Expr::NumberLiteral(value))
            }
            TokenKind::String { value, .. } => {
                self.advance();
                Ok(Expr::StringLiteral(value))
            }
            TokenKind::Keyword(Keyword::Nothing) => {
                self.advance();
                Ok(Expr::Nothing)
            }
            TokenKind::Keyword(Keyword::New) => {
                self.advance();
                let class_name = self.expect_identifier_name()?;
                let args = if self.match_punct(Punct::LParen) {
                    self.parse_arg_list()
                } else {
                    Vec::new()
                };
                Ok(Expr::New { class_name, args })
            }
            TokenKind::Keyword(Keyword::Super) => {
                self.advance();
                self.expect_punct(Punct::Dot, ".")?;
                let method = self.expect_identifier_name()?;
                self.expect_punct(Punct::LParen, "(")?;
                let args = self.parse_arg_list();
                Ok(Expr::SuperCall { method, args })
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.parse_expr();
                self.expect_punct(Punct::RParen, ")")?;
                Ok(inner)
            }
            TokenKind::Identifier { name, suffix } => {
                self.advance();
                let mangled = Self::mangle(&name, suffix);
                if self.match_punct(Punct::LParen) {
                    let args = self.parse_arg_list();
                    let upper = name.to_ascii_uppercase();
                    if BUILTIN_FUNCTIONS.contains(&upper.as_str()) {
                        Ok(Expr::Call { name: mangled, args })
                    } else {
                        Ok(Expr::ArrayAccess { name: mangled, indices: args })
                    }
                } else {
                    Ok(Expr::Variable(mangled))
                }
            }
            _ => {
                self.error("expected an expression");
                Err(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_prep;
    use crate::lexer::Lexer;

    fn parse_src(src: &str) -> ParseOutput {
        let prep = data_prep::preprocess(src);
        let tokens = Lexer::new(&prep.stripped_source).tokenize();
        parse(tokens, &prep.segment)
    }

    #[test]
    fn parses_simple_assignment() {
        let out = parse_src("10 X = 1 + 2\n");
        assert!(out.errors.is_empty());
        assert_eq!(out.program.lines.len(), 1);
        match &out.program.lines[0].statements[0] {
            Statement::Assign { target: LValue::Variable(name), .. } => assert_eq!(name, "X"),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn parses_for_loop_with_typed_variable() {
        let out = parse_src("FOR I% = 1 TO 10\nPRINT I%\nNEXT I%\n");
        assert!(out.errors.is_empty());
        assert!(matches!(out.program.lines[0].statements[0], Statement::For { .. }));
    }

    #[test]
    fn parses_class_with_method() {
        let src = "CLASS Animal\nMETHOD Speak()\nEND METHOD\nEND CLASS\n";
        let out = parse_src(src);
        assert!(out.errors.is_empty());
        assert_eq!(out.program.classes.len(), 1);
        assert_eq!(out.program.classes[0].methods.len(), 1);
    }

    #[test]
    fn parses_try_catch_finally() {
        let src = "TRY\nX = 1 / 0\nCATCH 11\nPRINT \"div by zero\"\nFINALLY\nPRINT \"done\"\nEND TRY\n";
        let out = parse_src(src);
        assert!(out.errors.is_empty());
        assert!(matches!(
            out.program.lines[0].statements[0],
            Statement::TryCatchFinally { .. }
        ));
    }

    #[test]
    fn parses_select_case_with_end_select_and_case_is() {
        let src = "SELECT CASE X\nCASE IS > 5\nPRINT 1\nCASE 2 TO 4\nPRINT 2\nEND SELECT\n";
        let out = parse_src(src);
        assert!(out.errors.is_empty());
        match &out.program.lines[0].statements[0] {
            Statement::SelectCase { arms, .. } => {
                assert_eq!(arms.len(), 2);
                assert!(matches!(arms[0].matches[0], CaseMatch::RelOp(CompareOp::Gt, _)));
            }
            other => panic!("expected select case, got {:?}", other),
        }
    }

    #[test]
    fn parses_match_type_with_end_match() {
        let src = "MATCH TYPE X\nCASE INTEGER AS N\nPRINT N\nEND MATCH\n";
        let out = parse_src(src);
        assert!(out.errors.is_empty());
        assert!(matches!(out.program.lines[0].statements[0], Statement::MatchType { .. }));
    }

    #[test]
    fn data_statement_is_lifted_to_program_level() {
        let out = parse_src("10 DATA 1, 2, 3\n20 READ X\n");
        assert_eq!(out.program.data_statements.len(), 1);
        assert_eq!(out.program.data_statements[0].values.len(), 3);
    }

    #[test]
    fn invalid_statement_is_reported_and_parsing_continues() {
        let out = parse_src("10 X = \n20 Y = 5\n");
        assert!(!out.errors.is_empty());
        assert_eq!(out.program.lines.len(), 2);
    }

    #[test]
    fn builtin_call_is_a_call_non_builtin_is_array_access() {
        let out = parse_src("10 X = ABS(Y)\n20 Z = SOMEARR(1)\n");
        assert!(out.errors.is_empty());
        match &out.program.lines[0].statements[0] {
            Statement::Assign { value: Expr::Call { name, .. }, .. } => assert_eq!(name, "ABS"),
            other => panic!("expected call, got {:?}", other),
        }
        match &out.program.lines[1].statements[0] {
            Statement::Assign { value: Expr::ArrayAccess { name, .. }, .. } => {
                assert_eq!(name, "SOMEARR")
            }
            other => panic!("expected array access, got {:?}", other),
        }
    }

    #[test]
    fn nested_if_inside_if_block_parses() {
        let src = "IF A > 1 THEN\nIF B > 2 THEN\nPRINT 1\nEND IF\nEND IF\n";
        let out = parse_src(src);
        assert!(out.errors.is_empty());
        match &out.program.lines[0].statements[0] {
            Statement::If { then_branch, .. } => {
                assert_eq!(then_branch.len(), 1);
                assert!(matches!(then_branch[0], Statement::If { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn global_dim_is_not_mistaken_for_global_constant() {
        let out = parse_src("GLOBAL DIM Scores(10) AS INTEGER\n");
        assert!(out.errors.is_empty());
        assert!(matches!(
            out.program.lines[0].statements[0],
            Statement::Dim { is_global: true, .. }
        ));
    }

    #[test]
    fn global_constant_is_recognized() {
        let out = parse_src("GLOBAL CONSTANT MAX = 100\n");
        assert!(out.errors.is_empty());
        assert_eq!(out.program.constants.len(), 1);
        assert_eq!(out.program.constants[0].name, "MAX");
    }
}
