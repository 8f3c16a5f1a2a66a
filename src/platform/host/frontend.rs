//! Kernel source front end for the host driver.
//!
//! This is not a compiler. It lexes the program text, runs a small
//! preprocessor (object-like `#define`, conditionals, `#pragma`), checks
//! bracket nesting, and extracts the signature of every `__kernel`
//! definition. Bodies are linked separately from the [`KernelLibrary`].
//!
//! [`KernelLibrary`]: super::KernelLibrary

use crate::dispatch::ScalarType;
use crate::program::{AddressSpace, ArgKind, BuildOptions, KernelSignature, ParamDecl};
use std::collections::{HashMap, HashSet};
use std::fmt;

const MAX_EXPANSION_DEPTH: usize = 32;
const VECTOR_WIDTHS: [&str; 5] = ["2", "3", "4", "8", "16"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Pos {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    pub pos: Pos,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}:{}: {}: {}", self.pos.line, self.pos.col, severity, self.message)
    }
}

/// A kernel definition found in the source.
#[derive(Debug, Clone)]
pub(crate) struct ScannedKernel {
    pub signature: KernelSignature,
    pub pos: Pos,
}

#[derive(Debug, Default)]
pub(crate) struct Scan {
    pub kernels: Vec<ScannedKernel>,
    pub diagnostics: Vec<Diagnostic>,
    /// First use of a double-precision type.
    pub double_use: Option<Pos>,
    pub fp64_pragma: bool,
}

impl Scan {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Scan `source` as seen by a device with (or without) fp64 support.
pub(crate) fn scan(source: &str, options: &BuildOptions, fp64_supported: bool) -> Scan {
    let mut diagnostics = Vec::new();
    let items = Lexer::new(source, &mut diagnostics).run();

    let mut pp = Preprocessor::new(options, fp64_supported, &mut diagnostics);
    let tokens = pp.run(items);
    let fp64_pragma = pp.fp64_pragma;

    let double_use = tokens.iter().find(|t| is_double_type(&t.tok)).map(|t| t.pos);

    let mut kernels = Vec::new();
    if check_brackets(&tokens, &mut diagnostics) {
        kernels = Parser::new(&tokens, &mut diagnostics).kernels();
    }

    Scan {
        kernels,
        diagnostics,
        double_use,
        fp64_pragma,
    }
}

/// Render diagnostics as a build log, sorted by position.
pub(crate) fn render_log(diagnostics: &[Diagnostic]) -> String {
    let mut sorted: Vec<&Diagnostic> = diagnostics.iter().collect();
    sorted.sort_by_key(|d| d.pos);
    let mut log: Vec<String> = sorted.iter().map(|d| d.to_string()).collect();
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    if errors > 0 {
        log.push(format!("{errors} error(s) generated."));
    }
    log.join("\n")
}

fn is_double_type(tok: &Tok) -> bool {
    match tok {
        Tok::Ident(s) => match s.strip_prefix("double") {
            Some("") => true,
            Some(width) => VECTOR_WIDTHS.contains(&width),
            None => false,
        },
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Lexing

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Number(String),
    Literal,
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: Pos,
}

#[derive(Debug)]
enum Item {
    Token(Token),
    Directive { text: String, pos: Pos },
}

struct Lexer<'a> {
    chars: Vec<char>,
    i: usize,
    line: usize,
    col: usize,
    at_line_start: bool,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    fn new(source: &str, diagnostics: &'a mut Vec<Diagnostic>) -> Self {
        Self {
            chars: source.chars().collect(),
            i: 0,
            line: 1,
            col: 1,
            at_line_start: true,
            diagnostics,
        }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.i + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.i += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
        }
    }

    fn run(mut self) -> Vec<Item> {
        let mut items = Vec::new();
        while let Some(c) = self.peek(0) {
            let pos = self.pos();
            match c {
                '\n' => {
                    self.bump();
                    self.at_line_start = true;
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek(1) == Some('*') => self.skip_block_comment(pos),
                '#' if self.at_line_start => {
                    self.bump();
                    let text = self.directive_text();
                    items.push(Item::Directive { text, pos });
                }
                '"' | '\'' => {
                    self.literal(c, pos);
                    items.push(self.token(Tok::Literal, pos));
                }
                c if c.is_ascii_digit() || (c == '.' && self.peek(1).map_or(false, |n| n.is_ascii_digit())) => {
                    let text = self.take_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
                    items.push(self.token(Tok::Number(text), pos));
                }
                c if c == '_' || c.is_ascii_alphabetic() => {
                    let text = self.take_while(|c| c == '_' || c.is_ascii_alphanumeric());
                    items.push(self.token(Tok::Ident(text), pos));
                }
                c => {
                    self.bump();
                    items.push(self.token(Tok::Punct(c), pos));
                }
            }
        }
        items
    }

    fn token(&mut self, tok: Tok, pos: Pos) -> Item {
        self.at_line_start = false;
        Item::Token(Token { tok, pos })
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek(0).filter(|&c| pred(c)) {
            text.push(c);
            self.bump();
        }
        text
    }

    fn skip_line_comment(&mut self) {
        while self.peek(0).map_or(false, |c| c != '\n') {
            self.bump();
        }
    }

    fn skip_block_comment(&mut self, start: Pos) {
        self.bump();
        self.bump();
        loop {
            match self.bump() {
                None => {
                    self.diagnostics
                        .push(Diagnostic::error(start, "unterminated /* comment"));
                    return;
                }
                Some('*') if self.peek(0) == Some('/') => {
                    self.bump();
                    return;
                }
                Some(_) => {}
            }
        }
    }

    fn literal(&mut self, quote: char, start: Pos) {
        self.bump();
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    let what = if quote == '"' { "string" } else { "character" };
                    self.diagnostics
                        .push(Diagnostic::error(start, format!("missing terminating {quote} in {what} literal")));
                    return;
                }
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some(c) if c == quote => {
                    self.bump();
                    return;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    /// Rest of a directive line, honouring `\` continuations and dropping comments.
    fn directive_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => break,
                '\\' if self.peek(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                    text.push(' ');
                }
                '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek(1) == Some('*') => {
                    let pos = self.pos();
                    self.skip_block_comment(pos);
                    text.push(' ');
                }
                c => {
                    text.push(c);
                    self.bump();
                }
            }
        }
        text.trim().to_string()
    }
}

fn lex_fragment(text: &str) -> Vec<Tok> {
    let mut scratch = Vec::new();
    Lexer::new(text, &mut scratch)
        .run()
        .into_iter()
        .filter_map(|item| match item {
            Item::Token(t) => Some(t.tok),
            Item::Directive { .. } => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Preprocessing

#[derive(Debug)]
struct Conditional {
    pos: Pos,
    parent_active: bool,
    active: bool,
    taken: bool,
    else_seen: bool,
}

struct Preprocessor<'a> {
    macros: HashMap<String, Vec<Tok>>,
    function_like: HashSet<String>,
    conditionals: Vec<Conditional>,
    fp64_pragma: bool,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl<'a> Preprocessor<'a> {
    fn new(options: &BuildOptions, fp64_supported: bool, diagnostics: &'a mut Vec<Diagnostic>) -> Self {
        let mut macros = HashMap::new();
        let mut define = |name: &str, value: &str| {
            macros.insert(name.to_string(), lex_fragment(value));
        };

        define("__OPENCL_VERSION__", "120");
        define("CL_VERSION_1_0", "100");
        define("CL_VERSION_1_1", "110");
        define("CL_VERSION_1_2", "120");
        define("CL_VERSION_2_0", "200");
        define(
            "__OPENCL_C_VERSION__",
            &options.language_version_or_default().macro_value().to_string(),
        );
        define("__ENDIAN_LITTLE__", "1");
        if fp64_supported {
            define("cl_khr_fp64", "1");
        }
        if options.fast_relaxed_math {
            define("__FAST_RELAXED_MATH__", "1");
        }
        for (name, value) in &options.defines {
            define(name, value);
        }

        Self {
            macros,
            function_like: HashSet::new(),
            conditionals: Vec::new(),
            fp64_pragma: false,
            diagnostics,
        }
    }

    fn active(&self) -> bool {
        self.conditionals.last().map_or(true, |c| c.active)
    }

    fn run(&mut self, items: Vec<Item>) -> Vec<Token> {
        let mut out = Vec::new();
        for item in items {
            match item {
                Item::Directive { text, pos } => self.directive(&text, pos),
                Item::Token(token) if self.active() => {
                    let mut hidden = Vec::new();
                    self.expand(token.tok, token.pos, &mut hidden, &mut out);
                }
                Item::Token(_) => {}
            }
        }
        for cond in std::mem::take(&mut self.conditionals) {
            self.diagnostics
                .push(Diagnostic::error(cond.pos, "unterminated conditional directive"));
        }
        out
    }

    fn expand(&self, tok: Tok, pos: Pos, hidden: &mut Vec<String>, out: &mut Vec<Token>) {
        if let Tok::Ident(name) = &tok {
            if hidden.len() < MAX_EXPANSION_DEPTH && !hidden.contains(name) {
                if let Some(body) = self.macros.get(name) {
                    hidden.push(name.clone());
                    for t in body {
                        self.expand(t.clone(), pos, hidden, out);
                    }
                    hidden.pop();
                    return;
                }
            }
        }
        out.push(Token { tok, pos });
    }

    fn directive(&mut self, text: &str, pos: Pos) {
        let (name, rest) = match text.find(|c: char| c.is_whitespace()) {
            Some(i) => (&text[..i], text[i..].trim()),
            None => (text, ""),
        };

        match name {
            "ifdef" | "ifndef" => {
                let defined = self.is_defined(rest);
                self.push_conditional(pos, defined == (name == "ifdef"));
            }
            "if" => {
                let value = self.condition(rest, pos);
                self.push_conditional(pos, value);
            }
            "elif" => {
                let value = self.condition(rest, pos);
                match self.conditionals.last_mut() {
                    Some(c) if c.else_seen => {
                        self.diagnostics.push(Diagnostic::error(pos, "#elif after #else"));
                    }
                    Some(c) => {
                        c.active = c.parent_active && !c.taken && value;
                        c.taken |= c.active;
                    }
                    None => self.diagnostics.push(Diagnostic::error(pos, "#elif without #if")),
                }
            }
            "else" => match self.conditionals.last_mut() {
                Some(c) if c.else_seen => {
                    self.diagnostics.push(Diagnostic::error(pos, "#else after #else"));
                }
                Some(c) => {
                    c.else_seen = true;
                    c.active = c.parent_active && !c.taken;
                    c.taken = true;
                }
                None => self.diagnostics.push(Diagnostic::error(pos, "#else without #if")),
            },
            "endif" => {
                if self.conditionals.pop().is_none() {
                    self.diagnostics.push(Diagnostic::error(pos, "#endif without #if"));
                }
            }
            _ if !self.active() => {}
            "define" => self.define(rest, pos),
            "undef" => {
                self.macros.remove(rest);
                self.function_like.remove(rest);
            }
            "pragma" => self.pragma(rest, pos),
            "include" => self.diagnostics.push(Diagnostic::warning(
                pos,
                format!("#include {rest} ignored; the host compiler only sees the program source"),
            )),
            "error" => self.diagnostics.push(Diagnostic::error(pos, format!("#error {rest}"))),
            "warning" => self
                .diagnostics
                .push(Diagnostic::warning(pos, format!("#warning {rest}"))),
            "" | "line" => {}
            other => self
                .diagnostics
                .push(Diagnostic::error(pos, format!("invalid preprocessing directive '#{other}'"))),
        }
    }

    fn push_conditional(&mut self, pos: Pos, value: bool) {
        let parent_active = self.active();
        let active = parent_active && value;
        self.conditionals.push(Conditional {
            pos,
            parent_active,
            active,
            taken: active,
            else_seen: false,
        });
    }

    fn define(&mut self, rest: &str, pos: Pos) {
        let name_end = rest
            .find(|c: char| !(c == '_' || c.is_ascii_alphanumeric()))
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            self.diagnostics
                .push(Diagnostic::error(pos, "macro name must be an identifier"));
            return;
        }
        if rest[name_end..].starts_with('(') {
            self.macros.remove(name);
            self.function_like.insert(name.to_string());
            return;
        }

        let body = lex_fragment(&rest[name_end..]);
        if let Some(previous) = self.macros.get(name) {
            if *previous != body {
                self.diagnostics
                    .push(Diagnostic::warning(pos, format!("'{name}' macro redefined")));
            }
        }
        self.function_like.remove(name);
        self.macros.insert(name.to_string(), body);
    }

    fn pragma(&mut self, rest: &str, pos: Pos) {
        let spaced = rest.replace(':', " : ");
        let words: Vec<&str> = spaced.split_whitespace().collect();
        match words.as_slice() {
            ["OPENCL", "EXTENSION", extension, ":", behavior @ ("enable" | "disable")] => {
                if *extension == "cl_khr_fp64" {
                    self.fp64_pragma = *behavior == "enable";
                }
            }
            ["OPENCL", "FP_CONTRACT", ..] | ["unroll", ..] => {}
            _ => self
                .diagnostics
                .push(Diagnostic::warning(pos, format!("ignoring unknown pragma '{rest}'"))),
        }
    }

    fn is_defined(&self, name: &str) -> bool {
        let name = name.trim();
        self.macros.contains_key(name) || self.function_like.contains(name)
    }

    fn condition(&mut self, expr: &str, pos: Pos) -> bool {
        match self.eval(expr) {
            Some(value) => value,
            None => {
                if self.active() {
                    self.diagnostics.push(Diagnostic::warning(
                        pos,
                        format!("unsupported #if expression '{expr}' treated as false"),
                    ));
                }
                false
            }
        }
    }

    /// Evaluates `||` of `&&` of optionally negated `defined(X)`, integers
    /// and object-like macro names.
    fn eval(&self, expr: &str) -> Option<bool> {
        let mut any = false;
        for disjunct in expr.split("||") {
            let mut all = true;
            for term in disjunct.split("&&") {
                all &= self.eval_term(term.trim())?;
            }
            any |= all;
        }
        Some(any)
    }

    fn eval_term(&self, term: &str) -> Option<bool> {
        let term = strip_parens(term);
        if let Some(inner) = term.strip_prefix('!') {
            return self.eval_term(inner.trim()).map(|v| !v);
        }
        if let Some(arg) = term.strip_prefix("defined") {
            let arg = strip_parens(arg.trim());
            return Some(self.is_defined(arg));
        }
        if let Some(value) = parse_int(term) {
            return Some(value != 0);
        }
        if term.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()) {
            return match self.macros.get(term).map(Vec::as_slice) {
                None => Some(false),
                Some([Tok::Number(n)]) => parse_int(n).map(|v| v != 0),
                Some(_) => None,
            };
        }
        None
    }
}

fn strip_parens(s: &str) -> &str {
    let s = s.trim();
    match s.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => strip_parens(inner),
        None => s,
    }
}

fn parse_int(text: &str) -> Option<i64> {
    let digits = text.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));
    match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}

// ---------------------------------------------------------------------------
// Parsing

/// Reports unbalanced brackets. Returns true when nesting is sound.
fn check_brackets(tokens: &[Token], diagnostics: &mut Vec<Diagnostic>) -> bool {
    let mut stack: Vec<(char, Pos)> = Vec::new();
    let mut ok = true;
    for token in tokens {
        let Tok::Punct(c) = token.tok else { continue };
        match c {
            '(' | '[' | '{' => stack.push((c, token.pos)),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((o, _)) if o == open => {}
                    Some((o, at)) => {
                        ok = false;
                        diagnostics.push(Diagnostic::error(
                            token.pos,
                            format!("unexpected '{c}'; '{o}' opened at {}:{} is still open", at.line, at.col),
                        ));
                    }
                    None => {
                        ok = false;
                        diagnostics.push(Diagnostic::error(token.pos, format!("unmatched '{c}'")));
                    }
                }
            }
            _ => {}
        }
    }
    for (open, pos) in stack {
        ok = false;
        diagnostics.push(Diagnostic::error(pos, format!("'{open}' is never closed")));
    }
    ok
}

struct Parser<'a> {
    tokens: &'a [Token],
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], diagnostics: &'a mut Vec<Diagnostic>) -> Self {
        Self { tokens, diagnostics }
    }

    fn ident(&self, i: usize) -> Option<&'a str> {
        match self.tokens.get(i).map(|t| &t.tok) {
            Some(Tok::Ident(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn punct(&self, i: usize, c: char) -> bool {
        matches!(self.tokens.get(i).map(|t| &t.tok), Some(Tok::Punct(p)) if *p == c)
    }

    fn pos(&self, i: usize) -> Pos {
        self.tokens
            .get(i)
            .or_else(|| self.tokens.last())
            .map_or(Pos { line: 1, col: 1 }, |t| t.pos)
    }

    /// Index just past the bracket group opening at `open`.
    fn skip_group(&self, open: usize) -> usize {
        let mut depth = 0usize;
        for i in open..self.tokens.len() {
            match self.tokens[i].tok {
                Tok::Punct('(' | '[' | '{') => depth += 1,
                Tok::Punct(')' | ']' | '}') => {
                    depth -= 1;
                    if depth == 0 {
                        return i + 1;
                    }
                }
                _ => {}
            }
        }
        self.tokens.len()
    }

    fn skip_attributes(&self, mut i: usize) -> usize {
        while self.ident(i) == Some("__attribute__") && self.punct(i + 1, '(') {
            i = self.skip_group(i + 1);
        }
        i
    }

    fn report(&mut self, pos: Pos, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(pos, message));
    }

    fn kernels(mut self) -> Vec<ScannedKernel> {
        let tokens = self.tokens;
        let mut kernels: Vec<ScannedKernel> = Vec::new();
        let mut depth = 0usize;
        let mut i = 0;
        while i < tokens.len() {
            match &tokens[i].tok {
                Tok::Punct('{') => depth += 1,
                Tok::Punct('}') => depth = depth.saturating_sub(1),
                Tok::Ident(kw) if depth == 0 && (kw == "__kernel" || kw == "kernel") => {
                    let (next, kernel) = self.kernel(i);
                    if let Some(kernel) = kernel {
                        if kernels.iter().any(|k| k.signature.name == kernel.signature.name) {
                            self.report(
                                kernel.pos,
                                format!("redefinition of kernel '{}'", kernel.signature.name),
                            );
                        } else {
                            kernels.push(kernel);
                        }
                    }
                    i = next;
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
        kernels
    }

    /// Parse a kernel declaration whose qualifier is at `at`. Returns where
    /// scanning resumes and the kernel if this was a valid definition.
    fn kernel(&mut self, at: usize) -> (usize, Option<ScannedKernel>) {
        let kernel_pos = self.pos(at);
        let mut i = self.skip_attributes(at + 1);

        let mut return_type = Vec::new();
        let name_at = loop {
            match self.ident(i) {
                Some("__attribute__") => i = self.skip_attributes(i),
                Some(_) if self.punct(i + 1, '(') => break i,
                Some(word) => {
                    return_type.push(word);
                    i += 1;
                }
                None if self.punct(i, '*') => {
                    return_type.push("*");
                    i += 1;
                }
                None => {
                    let pos = self.pos(i);
                    self.report(pos, "expected kernel function declarator");
                    return (i.max(at + 1), None);
                }
            }
        };
        let name = self.ident(name_at).unwrap_or_default().to_string();
        let pos = self.pos(name_at);
        let close = self.skip_group(name_at + 1) - 1;
        let params = self.params(&name, name_at + 2, close);

        let body = self.skip_attributes(close + 1);
        if self.punct(body, ';') {
            return (body + 1, None);
        }
        if !self.punct(body, '{') {
            let at = self.pos(body);
            self.report(at, format!("expected function body after declarator of kernel '{name}'"));
            return (body, None);
        }

        if return_type != ["void"] {
            self.report(kernel_pos, format!("kernel '{name}' must have void return type"));
            return (body, None);
        }

        let params = match params {
            Some(params) => params,
            None => return (body, None),
        };
        (
            body,
            Some(ScannedKernel {
                signature: KernelSignature { name, params },
                pos,
            }),
        )
    }

    fn params(&mut self, kernel: &str, start: usize, end: usize) -> Option<Vec<ParamDecl>> {
        let tokens = self.tokens;
        let list = &tokens[start..end];
        if list.is_empty() || matches!(list, [Token { tok: Tok::Ident(v), .. }] if v == "void") {
            return Some(Vec::new());
        }

        let mut groups: Vec<(usize, usize)> = Vec::new();
        let mut depth = 0usize;
        let mut from = start;
        for (i, token) in list.iter().enumerate() {
            let i = start + i;
            match token.tok {
                Tok::Punct('(' | '[') => depth += 1,
                Tok::Punct(')' | ']') => depth = depth.saturating_sub(1),
                Tok::Punct(',') if depth == 0 => {
                    groups.push((from, i));
                    from = i + 1;
                }
                _ => {}
            }
        }
        groups.push((from, end));

        let mut params: Vec<ParamDecl> = Vec::new();
        let mut ok = true;
        for (index, (from, to)) in groups.into_iter().enumerate() {
            match self.param(kernel, index, from, to) {
                Some(param) => {
                    if params.iter().any(|p| p.name == param.name) {
                        let pos = self.pos(from);
                        self.report(pos, format!("redefinition of parameter '{}'", param.name));
                        ok = false;
                    }
                    params.push(param);
                }
                None => ok = false,
            }
        }
        ok.then_some(params)
    }

    fn param(&mut self, kernel: &str, index: usize, from: usize, to: usize) -> Option<ParamDecl> {
        let tokens = self.tokens;
        let pos = self.pos(from);
        if from == to {
            self.report(pos, "expected parameter declaration");
            return None;
        }

        let mut space: Option<AddressSpace> = None;
        let mut is_const = false;
        let mut unsigned = false;
        let mut signed = false;
        let mut stars = 0usize;
        let mut words: Vec<&str> = Vec::new();

        let mut i = from;
        while i < to {
            let token = &tokens[i];
            match &token.tok {
                Tok::Ident(w) if w == "__attribute__" => {
                    i = self.skip_attributes(i);
                    continue;
                }
                Tok::Ident(w) => match w.as_str() {
                    "__global" | "global" | "__constant" | "constant" | "__local" | "local" | "__private"
                    | "private" => {
                        let qualifier = match w.trim_start_matches("__") {
                            "global" => AddressSpace::Global,
                            "constant" => AddressSpace::Constant,
                            "local" => AddressSpace::Local,
                            _ => AddressSpace::Private,
                        };
                        if space.map_or(false, |s| s != qualifier) {
                            self.diagnostics.push(Diagnostic::error(
                                token.pos,
                                "conflicting address space qualifiers",
                            ));
                            return None;
                        }
                        space = Some(qualifier);
                    }
                    "const" => is_const = true,
                    "volatile" | "restrict" | "__restrict" | "read_only" | "__read_only" | "write_only"
                    | "__write_only" | "read_write" | "__read_write" => {}
                    "unsigned" => unsigned = true,
                    "signed" => signed = true,
                    "struct" | "union" | "enum" => {
                        self.diagnostics.push(Diagnostic::error(
                            token.pos,
                            format!("{w} parameters are not supported by the host compiler"),
                        ));
                        return None;
                    }
                    _ => words.push(w.as_str()),
                },
                Tok::Punct('*') => stars += 1,
                Tok::Punct('[') => {
                    self.diagnostics.push(Diagnostic::error(
                        token.pos,
                        "array parameters are not allowed; use a pointer",
                    ));
                    return None;
                }
                _ => {
                    self.diagnostics
                        .push(Diagnostic::error(token.pos, "unexpected token in parameter declaration"));
                    return None;
                }
            }
            i += 1;
        }

        let (type_words, name) = match words.split_last() {
            Some((name, rest)) if !rest.is_empty() || unsigned || signed => (rest, *name),
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    pos,
                    format!("parameter {index} of kernel '{kernel}' has no name"),
                ));
                return None;
            }
        };
        if unsigned && signed {
            self.diagnostics
                .push(Diagnostic::error(pos, "'signed' and 'unsigned' cannot be combined"));
            return None;
        }
        let ty = match type_words {
            [] => "int",
            [ty] => *ty,
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    pos,
                    format!("unknown type name '{}'", type_words.join(" ")),
                ));
                return None;
            }
        };

        let kind = match stars {
            0 => self.value_kind(ty, unsigned, space, name, pos)?,
            1 => self.pointer_kind(ty, unsigned, space, name, pos)?,
            _ => {
                self.diagnostics.push(Diagnostic::error(
                    pos,
                    format!("kernel parameter '{name}' cannot be a pointer to a pointer"),
                ));
                return None;
            }
        };

        Some(ParamDecl {
            name: name.to_string(),
            kind,
            is_const,
        })
    }

    fn pointer_kind(
        &mut self,
        ty: &str,
        unsigned: bool,
        space: Option<AddressSpace>,
        name: &str,
        pos: Pos,
    ) -> Option<ArgKind> {
        let element = match element_type(ty, unsigned) {
            Some(element) => element,
            None => {
                self.diagnostics
                    .push(Diagnostic::error(pos, format!("unknown type name '{ty}'")));
                return None;
            }
        };
        match space {
            Some(address_space @ (AddressSpace::Global | AddressSpace::Constant)) => Some(ArgKind::Memory {
                address_space,
                element,
            }),
            Some(AddressSpace::Local) => Some(ArgKind::Local { element }),
            Some(AddressSpace::Private) | None => {
                self.diagnostics.push(Diagnostic::error(
                    pos,
                    format!("pointer parameter '{name}' must point to __global, __constant or __local memory"),
                ));
                None
            }
        }
    }

    fn value_kind(
        &mut self,
        ty: &str,
        unsigned: bool,
        space: Option<AddressSpace>,
        name: &str,
        pos: Pos,
    ) -> Option<ArgKind> {
        if let Some(s @ (AddressSpace::Global | AddressSpace::Constant | AddressSpace::Local)) = space {
            self.diagnostics.push(Diagnostic::error(
                pos,
                format!("parameter '{name}' is not a pointer and cannot be declared {s:?}"),
            ));
            return None;
        }
        if let Some(scalar) = scalar_type(ty, unsigned) {
            return Some(ArgKind::Scalar(scalar));
        }

        let message = if ty == "bool" {
            format!("kernel parameter '{name}' cannot be declared bool")
        } else if unsigned && matches!(ty, "float" | "double" | "half") {
            format!("'unsigned' is not valid with '{ty}'")
        } else if element_type(ty, false).is_some() {
            format!("parameter '{name}' of type '{ty}' cannot be passed by value; use a pointer")
        } else if ty.ends_with("_t") && (ty.starts_with("image") || ty == "sampler_t" || ty == "event_t") {
            format!("'{ty}' parameters are not supported by the host compiler")
        } else {
            format!("unknown type name '{ty}'")
        };
        self.diagnostics.push(Diagnostic::error(pos, message));
        None
    }
}

fn scalar_type(ty: &str, unsigned: bool) -> Option<ScalarType> {
    match ty {
        "size_t" | "uintptr_t" if !unsigned => Some(ScalarType::ULong),
        "ptrdiff_t" | "intptr_t" if !unsigned => Some(ScalarType::Long),
        _ => ScalarType::from_name(ty, unsigned),
    }
}

/// Canonical name of a pointee type, or `None` if it is not a known type.
fn element_type(ty: &str, unsigned: bool) -> Option<String> {
    if let Some(scalar) = scalar_type(ty, unsigned) {
        return Some(scalar.name().to_string());
    }
    if unsigned {
        return None;
    }
    if ty == "void" || ty == "half" {
        return Some(ty.to_string());
    }
    let base = ty.trim_end_matches(|c: char| c.is_ascii_digit());
    let width = &ty[base.len()..];
    let is_vector = VECTOR_WIDTHS.contains(&width) && (ScalarType::from_name(base, false).is_some() || base == "half");
    is_vector.then(|| ty.to_string())
}
