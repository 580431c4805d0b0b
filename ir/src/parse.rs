//! Kernel body syntax.
//!
//! One statement per line:
//!
//! ```text
//! [%result =] mnemonic [item {, item}] [to <type>]
//! item    := operand | key=operand
//! operand := %value | ParamName | integer | float | true | false | 'symbol'
//! ```
//!
//! `#` and `//` start a comment. The parser is purely syntactic: it knows nothing
//! about mnemonics, which are checked by the backend when lowering.

use std::fmt;

use kiln_dtype::DType;
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::{Result, SyntaxSnafu};
use crate::types::ConstValue;

/// Words that cannot name a parameter.
pub const RESERVED: &[&str] = &["true", "false", "to", "inf", "nan"];

/// 1-based source position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// SSA value defined by an earlier statement (`%x`).
    Value(String),
    /// Reference to a kernel parameter.
    Param(String),
    Lit(ConstValue),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(name) => write!(f, "%{name}"),
            Self::Param(name) => f.write_str(name),
            Self::Lit(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arg {
    pub operand: Operand,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stmt {
    pub result: Option<String>,
    pub mnemonic: String,
    pub args: SmallVec<[Arg; 3]>,
    /// `key=operand` items in source order.
    pub options: SmallVec<[(String, Arg); 2]>,
    /// Type after `to`.
    pub ty: Option<DType>,
    pub span: Span,
}

impl Stmt {
    pub fn option(&self, key: &str) -> Option<&Arg> {
        self.options.iter().find(|(k, _)| k == key).map(|(_, arg)| arg)
    }

    /// Every operand, positional first.
    pub fn operands(&self) -> impl Iterator<Item = &Arg> {
        self.args.iter().chain(self.options.iter().map(|(_, arg)| arg))
    }

    pub(crate) fn operands_mut(&mut self) -> impl Iterator<Item = &mut Arg> {
        self.args.iter_mut().chain(self.options.iter_mut().map(|(_, arg)| arg))
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = &self.result {
            write!(f, "%{result} = ")?;
        }
        f.write_str(&self.mnemonic)?;
        let items = self
            .args
            .iter()
            .map(|arg| arg.operand.to_string())
            .chain(self.options.iter().map(|(key, arg)| format!("{key}={}", arg.operand)));
        for (i, item) in items.enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            f.write_str(&item)?;
        }
        if let Some(ty) = &self.ty {
            write!(f, " to {ty}")?;
        }
        Ok(())
    }
}

/// Parsed kernel body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Body {
    pub stmts: Vec<Stmt>,
}

impl Body {
    pub fn parse(text: &str) -> Result<Self> {
        let mut stmts = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let tokens = lex_line(line, line_no)?;
            if tokens.is_empty() {
                continue;
            }
            stmts.push(LineParser { tokens: &tokens, pos: 0, line: line_no }.statement()?);
        }
        Ok(Self { stmts })
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.stmts {
            writeln!(f, "{stmt}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Value(String),
    Ident(String),
    Int(i64),
    Float(f64),
    Symbol(String),
    Eq,
    Comma,
    Star,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Value(v) => write!(f, "%{v}"),
            Tok::Ident(v) => write!(f, "`{v}`"),
            Tok::Int(v) => write!(f, "{v}"),
            Tok::Float(v) => write!(f, "{v}"),
            Tok::Symbol(v) => write!(f, "'{v}'"),
            Tok::Eq => f.write_str("`=`"),
            Tok::Comma => f.write_str("`,`"),
            Tok::Star => f.write_str("`*`"),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn lex_line(line: &str, line_no: u32) -> Result<Vec<(Tok, Span)>> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let span = Span::new(line_no, i as u32 + 1);
        let fail = |message: String| SyntaxSnafu { line: span.line, col: span.col, message }.fail();

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' || (c == '/' && chars.get(i + 1) == Some(&'/')) {
            break;
        }

        match c {
            '=' => {
                tokens.push((Tok::Eq, span));
                i += 1;
            }
            ',' => {
                tokens.push((Tok::Comma, span));
                i += 1;
            }
            '*' => {
                tokens.push((Tok::Star, span));
                i += 1;
            }
            '%' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                if end == start {
                    return fail("expected value name after `%`".into());
                }
                tokens.push((Tok::Value(chars[start..end].iter().collect()), span));
                i = end;
            }
            '\'' => {
                let start = i + 1;
                let Some(len) = chars[start..].iter().position(|&c| c == '\'') else {
                    return fail("unterminated symbol".into());
                };
                tokens.push((Tok::Symbol(chars[start..start + len].iter().collect()), span));
                i = start + len + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit() || *n == 'i')) => {
                let start = i;
                let mut end = i + 1;
                while end < chars.len() && (is_ident_char(chars[end]) || matches!(chars[end], '+' | '-') && matches!(chars[end - 1], 'e' | 'E')) {
                    end += 1;
                }
                let text: String = chars[start..end].iter().collect();
                match parse_number(&text) {
                    Some(tok) => tokens.push((tok, span)),
                    None => return fail(format!("invalid number `{text}`")),
                }
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let word: String = chars[start..end].iter().collect();
                let tok = match word.as_str() {
                    "inf" => Tok::Float(f64::INFINITY),
                    "nan" => Tok::Float(f64::NAN),
                    _ => Tok::Ident(word),
                };
                tokens.push((tok, span));
                i = end;
            }
            other => return fail(format!("unexpected character `{other}`")),
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> Option<Tok> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits == "inf" {
        return Some(Tok::Float(if negative { f64::NEG_INFINITY } else { f64::INFINITY }));
    }
    if let Some(hex) = digits.strip_prefix("0x") {
        let value = i64::from_str_radix(hex, 16).ok()?;
        return Some(Tok::Int(if negative { -value } else { value }));
    }
    if digits.contains(['.', 'e', 'E']) {
        return text.parse::<f64>().ok().map(Tok::Float);
    }
    text.parse::<i64>().ok().map(Tok::Int)
}

struct LineParser<'a> {
    tokens: &'a [(Tok, Span)],
    pos: usize,
    line: u32,
}

impl LineParser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => *span,
            None => {
                let col = self.tokens.last().map_or(1, |(_, span)| span.col + 1);
                Span::new(self.line, col)
            }
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        let span = self.span();
        SyntaxSnafu { line: span.line, col: span.col, message }.fail()
    }

    fn next(&mut self) -> Option<(Tok, Span)> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn statement(mut self) -> Result<Stmt> {
        let span = self.span();

        let result = match (self.peek(), self.tokens.get(self.pos + 1).map(|(t, _)| t)) {
            (Some(Tok::Value(name)), Some(Tok::Eq)) => {
                let name = name.clone();
                self.pos += 2;
                Some(name)
            }
            _ => None,
        };

        let mnemonic = match self.next() {
            Some((Tok::Ident(m), _)) if !RESERVED.contains(&m.as_str()) => m,
            Some((tok, _)) => {
                self.pos -= 1;
                return self.error(format!("expected mnemonic, found {tok}"));
            }
            None => return self.error("expected mnemonic"),
        };

        let mut args = SmallVec::new();
        let mut options: SmallVec<[(String, Arg); 2]> = SmallVec::new();
        let mut ty = None;

        let mut first = true;
        loop {
            match self.peek() {
                None => break,
                Some(Tok::Ident(word)) if word == "to" => {
                    self.pos += 1;
                    ty = Some(self.dtype()?);
                    break;
                }
                Some(Tok::Comma) if !first => {
                    self.pos += 1;
                }
                Some(_) if first => {}
                Some(tok) => return self.error(format!("expected `,` or `to`, found {tok}")),
            }
            first = false;

            let option_key = match (self.peek(), self.tokens.get(self.pos + 1).map(|(t, _)| t)) {
                (Some(Tok::Ident(key)), Some(Tok::Eq)) => Some(key.clone()),
                _ => None,
            };
            if let Some(key) = option_key {
                let key_span = self.span();
                self.pos += 2;
                if options.iter().any(|(k, _)| *k == key) {
                    return SyntaxSnafu { line: key_span.line, col: key_span.col, message: format!("duplicate option `{key}`") }
                        .fail();
                }
                let arg = self.operand()?;
                options.push((key, arg));
            } else {
                ensure!(
                    options.is_empty(),
                    SyntaxSnafu { line: self.span().line, col: self.span().col, message: "positional operand after option" }
                );
                args.push(self.operand()?);
            }
        }

        if self.pos < self.tokens.len() {
            return self.error("trailing tokens after type");
        }

        Ok(Stmt { result, mnemonic, args, options, ty, span })
    }

    fn operand(&mut self) -> Result<Arg> {
        let span = self.span();
        let operand = match self.next() {
            Some((Tok::Value(name), _)) => Operand::Value(name),
            Some((Tok::Ident(word), _)) => match word.as_str() {
                "true" => Operand::Lit(ConstValue::Bool(true)),
                "false" => Operand::Lit(ConstValue::Bool(false)),
                "to" => {
                    self.pos -= 1;
                    return self.error("expected operand before `to`");
                }
                _ => Operand::Param(word),
            },
            Some((Tok::Int(v), _)) => Operand::Lit(ConstValue::Int(v)),
            Some((Tok::Float(v), _)) => Operand::Lit(ConstValue::Float(v)),
            Some((Tok::Symbol(s), _)) => Operand::Lit(ConstValue::Symbol(s)),
            Some((tok, _)) => {
                self.pos -= 1;
                return self.error(format!("expected operand, found {tok}"));
            }
            None => return self.error("expected operand"),
        };
        Ok(Arg { operand, span })
    }

    fn dtype(&mut self) -> Result<DType> {
        let pointer = matches!(self.peek(), Some(Tok::Star));
        if pointer {
            self.pos += 1;
        }
        match self.peek() {
            Some(Tok::Ident(word)) => {
                let token = if pointer { format!("*{word}") } else { word.clone() };
                let Ok(dtype) = token.parse::<DType>() else {
                    return self.error(format!("unknown type `{token}`"));
                };
                self.pos += 1;
                Ok(dtype)
            }
            _ => self.error("expected type after `to`"),
        }
    }
}
