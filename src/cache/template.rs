//! Cache key templates
//!
//! A key template is plain text with embedded `{{ ... }}` actions, in the
//! style of Go's text/template:
//!
//! ```text
//! deps-{{ arch }}-{{ checksum "Cargo.lock" }}
//! build-{{ .Environment.CI_BRANCH }}-{{ epoch }}
//! {{- "Cargo.lock" | checksum -}}
//! ```
//!
//! The whole template is parsed before anything runs, so syntax errors
//! (unknown functions, bad fields, unclosed actions) are reported without
//! touching the filesystem.

use crate::error::{StowawayError, StowawayResult, TemplateError};
use chrono::Utc;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::debug;

/// Inputs a template may observe, captured up front
#[derive(Debug, Clone)]
pub struct TemplateContext {
    environment: HashMap<String, String>,
    working_dir: PathBuf,
    clock: fn() -> i64,
}

impl TemplateContext {
    /// Create a context from an explicit environment and working directory
    pub fn new(environment: HashMap<String, String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            environment,
            working_dir: working_dir.into(),
            clock: unix_now,
        }
    }

    /// Snapshot the current process environment and working directory
    pub fn from_process() -> StowawayResult<Self> {
        let working_dir = std::env::current_dir()
            .map_err(|e| StowawayError::io("getting current directory", e))?;
        let environment = std::env::vars_os()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.to_string_lossy().into_owned(),
                )
            })
            .collect();
        Ok(Self::new(environment, working_dir))
    }

    /// Replace the clock used by `epoch`
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Evaluates cache key templates against a [`TemplateContext`]
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    ctx: TemplateContext,
}

impl TemplateResolver {
    pub fn new(ctx: TemplateContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &TemplateContext {
        &self.ctx
    }

    /// Parse and evaluate a template into a concrete key
    pub fn resolve(&self, template: &str) -> Result<String, TemplateError> {
        let nodes = parse(template)?;
        let mut out = String::with_capacity(template.len());
        for node in &nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => out.push_str(&self.eval_pipeline(pipeline)?),
            }
        }
        debug!(template, key = %out, "Resolved cache key");
        Ok(out)
    }

    fn eval_pipeline(&self, pipeline: &Pipeline) -> Result<String, TemplateError> {
        let mut piped: Option<String> = None;
        for command in &pipeline.commands {
            let value = match command {
                Command::Value(operand) => self.eval_operand(operand)?,
                Command::Call { function, args } => {
                    let mut values = args
                        .iter()
                        .map(|arg| self.eval_operand(arg))
                        .collect::<Result<Vec<_>, _>>()?;
                    if let Some(prev) = piped.take() {
                        values.push(prev);
                    }
                    self.call(*function, &values)?
                }
            };
            piped = Some(value);
        }
        Ok(piped.unwrap_or_default())
    }

    fn eval_operand(&self, operand: &Operand) -> Result<String, TemplateError> {
        match operand {
            Operand::Literal(s) => Ok(s.clone()),
            Operand::Env(name) => Ok(self.ctx.environment.get(name).cloned().unwrap_or_default()),
            Operand::Sub(pipeline) => self.eval_pipeline(pipeline),
        }
    }

    fn call(&self, function: Function, args: &[String]) -> Result<String, TemplateError> {
        if args.len() != function.arity() {
            return Err(TemplateError::Arity {
                function: function.name().to_string(),
                expected: function.arity(),
                actual: args.len(),
            });
        }
        match function {
            Function::Checksum => checksum(&self.ctx.working_dir.join(&args[0])),
            Function::Arch => arch(),
            Function::Epoch => Ok((self.ctx.clock)().to_string()),
        }
    }
}

/// Hex MD5 digest of a file's bytes
pub fn checksum(path: &Path) -> Result<String, TemplateError> {
    let mut file = File::open(path).map_err(|e| {
        TemplateError::function("checksum", format!("failed to open {}: {}", path.display(), e))
    })?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher).map_err(|e| {
        TemplateError::function("checksum", format!("failed to read {}: {}", path.display(), e))
    })?;
    Ok(hex::encode(hasher.finalize()))
}

/// `{os}-{arch}-{cpu model}` for the current machine
pub fn arch() -> Result<String, TemplateError> {
    let sys = System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::everything()));
    let cpu = sys
        .cpus()
        .first()
        .ok_or_else(|| TemplateError::function("arch", "zero CPU info retrieved"))?;
    Ok(format!(
        "{}-{}-{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        cpu.brand().trim()
    ))
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Call { function: Function, args: Vec<Operand> },
    Value(Operand),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(String),
    Env(String),
    Sub(Pipeline),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Checksum,
    Arch,
    Epoch,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "checksum" => Some(Self::Checksum),
            "arch" => Some(Self::Arch),
            "epoch" => Some(Self::Epoch),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Checksum => "checksum",
            Self::Arch => "arch",
            Self::Epoch => "epoch",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Checksum => 1,
            Self::Arch | Self::Epoch => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Field(Vec<String>),
    Str(String),
    Pipe,
    LParen,
    RParen,
}

/// Lexed body of one `{{ ... }}` action
struct Action {
    tokens: Vec<(Token, usize)>,
    /// Byte offset just past the closing delimiter
    end: usize,
    trim_right: bool,
    comment: bool,
}

fn parse(src: &str) -> Result<Vec<Node>, TemplateError> {
    let mut nodes = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    while let Some(found) = src[pos..].find("{{") {
        let open = pos + found;
        let mut text = &src[pos..open];
        let mut body = open + 2;
        if has_trim_marker(&src[body..]) {
            text = text.trim_end();
            body += 1;
        }
        if trim_next {
            text = text.trim_start();
        }
        if !text.is_empty() {
            nodes.push(Node::Text(text.to_string()));
        }

        let action = lex_action(src, open, body)?;
        if action.comment {
            if let Some((_, offset)) = action.tokens.first() {
                return Err(TemplateError::syntax(*offset, "comment must be the whole action"));
            }
        } else {
            let mut parser = Parser {
                tokens: action.tokens,
                pos: 0,
                end: action.end,
            };
            if parser.tokens.is_empty() {
                return Err(TemplateError::syntax(open, "missing value for action"));
            }
            let pipeline = parser.pipeline()?;
            if let Some((token, offset)) = parser.tokens.get(parser.pos) {
                return Err(TemplateError::syntax(*offset, format!("unexpected {:?} in action", token)));
            }
            nodes.push(Node::Action(pipeline));
        }

        trim_next = action.trim_right;
        pos = action.end;
    }

    let mut tail = &src[pos..];
    if trim_next {
        tail = tail.trim_start();
    }
    if !tail.is_empty() {
        nodes.push(Node::Text(tail.to_string()));
    }
    Ok(nodes)
}

fn has_trim_marker(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().is_some_and(|c| c.is_ascii_whitespace())
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex_action(src: &str, open: usize, start: usize) -> Result<Action, TemplateError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut comment = false;
    let mut i = start;

    loop {
        let ws_start = i;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let rest = &src[i..];
        if rest.is_empty() {
            return Err(TemplateError::syntax(open, "unclosed action"));
        }
        if rest.starts_with("}}") {
            return Ok(Action { tokens, end: i + 2, trim_right: false, comment });
        }
        if rest.starts_with("-}}") && i > ws_start {
            return Ok(Action { tokens, end: i + 3, trim_right: true, comment });
        }
        if rest.starts_with("/*") {
            let close = rest[2..]
                .find("*/")
                .ok_or_else(|| TemplateError::syntax(i, "unclosed comment"))?;
            if !tokens.is_empty() {
                return Err(TemplateError::syntax(i, "comment must be the whole action"));
            }
            comment = true;
            i += close + 4;
            continue;
        }

        let offset = i;
        let c = rest.chars().next().unwrap_or_default();
        match c {
            '|' => {
                tokens.push((Token::Pipe, offset));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, offset));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, offset));
                i += 1;
            }
            '"' => {
                let (value, len) = lex_quoted(rest, offset)?;
                tokens.push((Token::Str(value), offset));
                i += len;
            }
            '`' => {
                let close = rest[1..]
                    .find('`')
                    .ok_or_else(|| TemplateError::syntax(offset, "unterminated raw string"))?;
                tokens.push((Token::Str(rest[1..1 + close].to_string()), offset));
                i += close + 2;
            }
            '.' => {
                let mut parts = Vec::new();
                let mut j = i;
                while j < bytes.len() && bytes[j] == b'.' {
                    let name_start = j + 1;
                    let mut k = name_start;
                    while k < bytes.len() && is_ident_char(bytes[k] as char) {
                        k += 1;
                    }
                    if k == name_start {
                        if parts.is_empty() && j == i {
                            j = k;
                            break;
                        }
                        return Err(TemplateError::syntax(j, "bad field name"));
                    }
                    parts.push(src[name_start..k].to_string());
                    j = k;
                }
                tokens.push((Token::Field(parts), offset));
                i = j;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
                tokens.push((Token::Ident(rest[..len].to_string()), offset));
                i += len;
            }
            other => {
                return Err(TemplateError::syntax(offset, format!("unexpected {:?} in action", other)));
            }
        }
    }
}

/// Lex a double-quoted string; returns the unescaped value and consumed length
fn lex_quoted(rest: &str, offset: usize) -> Result<(String, usize), TemplateError> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((value, idx + 1)),
            '\\' => {
                let (_, escaped) = chars
                    .next()
                    .ok_or_else(|| TemplateError::syntax(offset, "unterminated quoted string"))?;
                value.push(match escaped {
                    '\\' => '\\',
                    '"' => '"',
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => {
                        return Err(TemplateError::syntax(
                            offset + idx,
                            format!("unknown escape sequence \\{}", other),
                        ))
                    }
                });
            }
            '\n' => return Err(TemplateError::syntax(offset, "newline in quoted string")),
            c => value.push(c),
        }
    }
    Err(TemplateError::syntax(offset, "unterminated quoted string"))
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, o)| *o)
    }

    fn pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let mut commands = vec![self.command()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let offset = self.offset();
            let command = self.command()?;
            if matches!(command, Command::Value(_)) {
                return Err(TemplateError::syntax(offset, "non-function in pipeline stage"));
            }
            commands.push(command);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> Result<Command, TemplateError> {
        let offset = self.offset();
        if let Some(Token::Ident(name)) = self.peek() {
            let function = Function::lookup(name).ok_or_else(|| {
                TemplateError::syntax(offset, format!("function {:?} not defined", name))
            })?;
            self.pos += 1;
            let mut args = Vec::new();
            while let Some(arg) = self.operand()? {
                args.push(arg);
            }
            return Ok(Command::Call { function, args });
        }

        let value = self
            .operand()?
            .ok_or_else(|| TemplateError::syntax(offset, "missing value for command"))?;
        if !matches!(self.peek(), None | Some(Token::Pipe) | Some(Token::RParen)) {
            return Err(TemplateError::syntax(self.offset(), "can't give argument to non-function"));
        }
        Ok(Command::Value(value))
    }

    fn operand(&mut self) -> Result<Option<Operand>, TemplateError> {
        let offset = self.offset();
        let operand = match self.peek().cloned() {
            Some(Token::Str(s)) => Operand::Literal(s),
            Some(Token::Field(parts)) => field_operand(&parts, offset)?,
            Some(Token::Ident(name)) => {
                // A bare function name in argument position is a niladic call
                let function = Function::lookup(&name).ok_or_else(|| {
                    TemplateError::syntax(offset, format!("function {:?} not defined", name))
                })?;
                Operand::Sub(Pipeline {
                    commands: vec![Command::Call { function, args: Vec::new() }],
                })
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.pipeline()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(TemplateError::syntax(self.offset(), "unclosed left paren"));
                }
                Operand::Sub(inner)
            }
            Some(Token::Pipe) | Some(Token::RParen) | None => return Ok(None),
        };
        self.pos += 1;
        Ok(Some(operand))
    }
}

fn field_operand(parts: &[String], offset: usize) -> Result<Operand, TemplateError> {
    match parts {
        [scope, name] if scope == "Environment" => Ok(Operand::Env(name.clone())),
        [scope] if scope == "Environment" => Err(TemplateError::syntax(
            offset,
            ".Environment must name a variable, e.g. .Environment.HOME",
        )),
        [] => Err(TemplateError::syntax(offset, "can't evaluate '.' as a key component")),
        [first, ..] => Err(TemplateError::syntax(offset, format!("can't evaluate field {}", first))),
    }
}
