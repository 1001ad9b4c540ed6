//! Reader for the declarative Starlark subset used by the build manifests.
//!
//! Top-level `NAME = <expr>` assignments are collected in source order.
//! Expressions may be strings (with `+` concatenation and `%` formatting),
//! lists, `dict(k = v)` calls, `{k: v}` literals, bare scalars, references to
//! earlier assignments and a handful of string and dict methods.
//!
//! `def` blocks are kept aside and only interpreted when a top-level
//! statement calls them, which is how upstream adds generated records such as
//! the per-platform protoc archives. Bodies may contain `for` loops, local
//! assignments and item assignments. `load(...)` is skipped; any other call
//! that is handed a module variable is an error since it could change it.

use crate::error::{Error, Result};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    List(Vec<Value>),
    Dict(Vec<(String, Value)>),
    Raw(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Dict(entries) => entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Dict keys, or the string elements of a list.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Value::Dict(entries) => entries.iter().map(|(k, _)| k.as_str()).collect(),
            Value::List(items) => items.iter().filter_map(Value::as_str).collect(),
            Value::Str(s) => vec![s.as_str()],
            Value::Raw(_) => Vec::new(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Raw(_) => "scalar",
        }
    }
}

// Insert or overwrite in place, keeping the first-insertion position.
fn upsert(entries: &mut Vec<(String, Value)>, key: String, value: Value) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => entries.push((key, value)),
    }
}

/// Top-level assignments in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    bindings: Vec<(String, Value)>,
}

impl Module {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| Error::MissingVariable(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(n, _)| n.as_str())
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.bindings
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn bind(&mut self, name: String, value: Value) {
        upsert(&mut self.bindings, name, value);
    }
}

pub fn parse(source: &str) -> Result<Module> {
    let (source, functions) = split_def_blocks(source);
    let tokens = tokenize(&source, 1)?;
    Parser {
        tokens,
        pos: 0,
        module: Module::default(),
        functions,
        frames: Vec::new(),
    }
    .parse_module()
}

/// A `def` kept as source text until something calls it.
#[derive(Debug, Clone)]
struct Function {
    name: String,
    line: usize,
    header: String,
    body: Vec<(usize, String)>,
}

impl Function {
    fn params(&self) -> Result<Vec<String>> {
        let tokens = tokenize(&self.header, self.line)?;
        let open = tokens.iter().position(|t| t.tok == Tok::Punct('('));
        let close = tokens.iter().rposition(|t| t.tok == Tok::Punct(')'));
        let Some((open, close)) = open.zip(close).filter(|(o, c)| o < c) else {
            return Err(Error::ManifestParse {
                line: self.line,
                message: format!("malformed definition of '{}'", self.name),
            });
        };

        tokens[open + 1..close]
            .split(|t| t.tok == Tok::Punct(','))
            .filter(|param| !param.is_empty())
            .map(|param| match param {
                [Token {
                    tok: Tok::Ident(name),
                    ..
                }] => Ok(name.clone()),
                _ => Err(Error::UnsupportedValue(format!(
                    "parameters of '{}'",
                    self.name
                ))),
            })
            .collect()
    }
}

// Function bodies are indented under a column-0 `def`. They are blanked out
// of the module source, keeping line numbers intact, and returned separately.
fn split_def_blocks(source: &str) -> (String, Vec<Function>) {
    let mut out = String::with_capacity(source.len());
    let mut functions: Vec<Function> = Vec::new();
    let mut in_def = false;

    for (index, line) in source.split_inclusive('\n').enumerate() {
        let body = line.trim_end_matches(['\n', '\r']);
        let indented = body.starts_with([' ', '\t']) || body.trim().is_empty();

        if let Some(rest) = body.strip_prefix("def ") {
            in_def = true;
            let name = rest.split('(').next().unwrap_or_default().trim();
            functions.push(Function {
                name: name.to_string(),
                line: index + 1,
                header: body.to_string(),
                body: Vec::new(),
            });
        } else if in_def && !indented {
            in_def = false;
        } else if in_def {
            if let Some(function) = functions.last_mut() {
                function.body.push((index + 1, body.to_string()));
            }
        }

        if in_def {
            if line.ends_with('\n') {
                out.push('\n');
            }
        } else {
            out.push_str(line);
        }
    }

    (out, functions)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Scalar(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

fn tokenize(source: &str, first_line: usize) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = first_line;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() || c == '\\' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' | '\'' => {
                let start_line = line;
                let (text, next, lines) = lex_string(&chars, i, start_line)?;
                tokens.push(Token {
                    tok: Tok::Str(text),
                    line: start_line,
                });
                line += lines;
                i = next;
            }
            '(' | ')' | '[' | ']' | '{' | '}' | ',' | '=' | ':' | '+' | '.' | '%' | '-' => {
                tokens.push(Token {
                    tok: Tok::Punct(c),
                    line,
                });
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Ident(chars[start..i].iter().collect()),
                    line,
                });
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Scalar(chars[start..i].iter().collect()),
                    line,
                });
            }
            other => {
                return Err(Error::ManifestParse {
                    line,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
    }

    Ok(tokens)
}

/// Returns the unescaped text, the index after the closing quote and the
/// number of newlines consumed.
fn lex_string(chars: &[char], start: usize, line: usize) -> Result<(String, usize, usize)> {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };
    let mut text = String::new();
    let mut newlines = 0;

    loop {
        let Some(&c) = chars.get(i) else {
            return Err(Error::ManifestParse {
                line,
                message: "unterminated string".to_string(),
            });
        };

        if c == quote {
            if !triple {
                return Ok((text, i + 1, newlines));
            }
            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return Ok((text, i + 3, newlines));
            }
        }

        match c {
            '\\' => {
                let escaped = chars.get(i + 1).copied().unwrap_or('\\');
                match escaped {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    '\n' => newlines += 1,
                    other => text.push(other),
                }
                i += 2;
            }
            '\n' if !triple => {
                return Err(Error::ManifestParse {
                    line,
                    message: "newline in string".to_string(),
                })
            }
            _ => {
                if c == '\n' {
                    newlines += 1;
                }
                text.push(c);
                i += 1;
            }
        }
    }
}

fn bracket_depth(tokens: &[Token]) -> i32 {
    tokens
        .iter()
        .map(|t| match t.tok {
            Tok::Punct('(' | '[' | '{') => 1,
            Tok::Punct(')' | ']' | '}') => -1,
            _ => 0,
        })
        .sum()
}

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

/// One statement of a function body, joined across bracketed line breaks.
#[derive(Debug)]
struct LogicalLine {
    indent: usize,
    line: usize,
    tokens: Vec<Token>,
}

fn logical_lines(body: &[(usize, String)]) -> Result<Vec<LogicalLine>> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, usize, String)> = None;

    for (line, text) in body {
        let trimmed = text.trim();
        if pending.is_none() && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }

        let (indent, first, mut joined) = pending
            .take()
            .unwrap_or_else(|| (indent_of(text), *line, String::new()));
        joined.push_str(text);
        joined.push('\n');

        let tokens = tokenize(&joined, first)?;
        if bracket_depth(&tokens) > 0 || trimmed.ends_with('\\') {
            pending = Some((indent, first, joined));
            continue;
        }
        if !tokens.is_empty() {
            lines.push(LogicalLine {
                indent,
                line: first,
                tokens,
            });
        }
    }

    match pending {
        Some((_, line, _)) => Err(Error::ManifestParse {
            line,
            message: "unbalanced brackets".to_string(),
        }),
        None => Ok(lines),
    }
}

#[derive(Debug)]
enum Stmt {
    For {
        line: usize,
        targets: Vec<String>,
        iter: Vec<Token>,
        body: Vec<Stmt>,
    },
    Assign {
        line: usize,
        target: Vec<Token>,
        value: Vec<Token>,
    },
    Pass,
}

fn parse_block(lines: &[LogicalLine], idx: &mut usize, indent: usize) -> Result<Vec<Stmt>> {
    let mut stmts = Vec::new();
    while let Some(current) = lines.get(*idx) {
        if current.indent < indent {
            break;
        }
        if current.indent > indent {
            return Err(Error::ManifestParse {
                line: current.line,
                message: "unexpected indent".to_string(),
            });
        }
        *idx += 1;
        stmts.push(parse_stmt(current, lines, idx)?);
    }
    Ok(stmts)
}

fn parse_stmt(current: &LogicalLine, lines: &[LogicalLine], idx: &mut usize) -> Result<Stmt> {
    let err = |message: &str| Error::ManifestParse {
        line: current.line,
        message: message.to_string(),
    };

    match current.tokens.as_slice() {
        [Token {
            tok: Tok::Ident(word),
            ..
        }] if word == "pass" => Ok(Stmt::Pass),
        [Token {
            tok: Tok::Str(_), ..
        }] => Ok(Stmt::Pass),
        [Token {
            tok: Tok::Ident(word),
            ..
        }, rest @ ..]
            if word == "for" =>
        {
            let Some((
                Token {
                    tok: Tok::Punct(':'),
                    ..
                },
                header,
            )) = rest.split_last()
            else {
                return Err(err("expected ':' after for"));
            };
            let split = header
                .iter()
                .position(|t| matches!(&t.tok, Tok::Ident(w) if w == "in"))
                .ok_or_else(|| err("expected 'in'"))?;
            let targets = header[..split]
                .split(|t| t.tok == Tok::Punct(','))
                .map(|target| match target {
                    [Token {
                        tok: Tok::Ident(name),
                        ..
                    }] => Ok(name.clone()),
                    _ => Err(err("unsupported loop target")),
                })
                .collect::<Result<Vec<_>>>()?;

            let body_indent = match lines.get(*idx) {
                Some(next) if next.indent > current.indent => next.indent,
                _ => return Err(err("expected an indented block")),
            };
            let body = parse_block(lines, idx, body_indent)?;

            Ok(Stmt::For {
                line: current.line,
                targets,
                iter: header[split + 1..].to_vec(),
                body,
            })
        }
        tokens => {
            let mut depth = 0;
            let eq = tokens.iter().position(|t| {
                match t.tok {
                    Tok::Punct('(' | '[' | '{') => depth += 1,
                    Tok::Punct(')' | ']' | '}') => depth -= 1,
                    _ => {}
                }
                depth == 0 && t.tok == Tok::Punct('=')
            });
            match eq {
                Some(eq) if eq > 0 => Ok(Stmt::Assign {
                    line: current.line,
                    target: tokens[..eq].to_vec(),
                    value: tokens[eq + 1..].to_vec(),
                }),
                _ => Err(err("unsupported statement in function body")),
            }
        }
    }
}

/// A function parameter: either its own value or an alias of a module
/// variable, so item assignments reach the caller's dict.
#[derive(Debug, Clone)]
enum Local {
    Value(Value),
    Global(String),
}

fn format_percent(template: &str, args: Value) -> Result<String> {
    let args = match args {
        Value::List(items) => items,
        other => vec![other],
    };
    let mut args = args.into_iter();
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s' | 'd') => match args.next() {
                Some(Value::Str(s) | Value::Raw(s)) => out.push_str(&s),
                Some(other) => {
                    return Err(Error::UnsupportedValue(format!(
                        "formatting a {} into \"{}\"",
                        other.kind(),
                        template
                    )))
                }
                None => {
                    return Err(Error::UnsupportedValue(format!(
                        "too few arguments for \"{}\"",
                        template
                    )))
                }
            },
            _ => {
                return Err(Error::UnsupportedValue(format!(
                    "format directive in \"{}\"",
                    template
                )))
            }
        }
    }

    if args.next().is_some() {
        return Err(Error::UnsupportedValue(format!(
            "too many arguments for \"{}\"",
            template
        )));
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    module: Module,
    functions: Vec<Function>,
    frames: Vec<Vec<(String, Local)>>,
}

impl Parser {
    fn parse_module(mut self) -> Result<Module> {
        while let Some(token) = self.peek().cloned() {
            match token.tok {
                Tok::Ident(name) if self.peek_at(1) == Some(&Tok::Punct('=')) => {
                    self.pos += 2;
                    let value = self.parse_expr()?;
                    self.module.bind(name, value);
                }
                Tok::Ident(name) => {
                    self.pos += 1;
                    self.call_statement(name)?;
                }
                // Docstrings.
                Tok::Str(_) => self.pos += 1,
                _ => return Err(self.error("expected an assignment")),
            }
        }
        Ok(self.module)
    }

    fn call_statement(&mut self, name: String) -> Result<()> {
        if self.eat(&Tok::Punct('.')) {
            let method = match self.next_tok() {
                Some(Tok::Ident(method)) => method,
                _ => return Err(self.error("expected attribute name")),
            };
            self.expect('(')?;
            if self.module.get(&name).is_none() {
                return self.skip_call(&name);
            }
            if method != "update" {
                return Err(Error::UnsupportedValue(format!("{}.{}()", name, method)));
            }

            let update = self.parse_expr()?;
            self.eat(&Tok::Punct(','));
            self.expect(')')?;
            let (Some(Value::Dict(target)), Value::Dict(entries)) =
                (self.module.get_mut(&name), update)
            else {
                return Err(Error::UnsupportedValue(format!("{}.update()", name)));
            };
            for (key, value) in entries {
                upsert(target, key, value);
            }
            return Ok(());
        }

        if !self.eat(&Tok::Punct('(')) {
            return Err(self.error("unsupported statement"));
        }
        if name == "load" {
            return self.skip_call(&name);
        }

        match self.functions.iter().find(|f| f.name == name).cloned() {
            Some(function) => {
                let args = self.call_args()?;
                self.call(&function, args)
            }
            None => self.skip_call(&name),
        }
    }

    // Discard the arguments of a call whose effect is unknown. Handing it a
    // module variable could mutate that variable, so that is refused.
    fn skip_call(&mut self, callee: &str) -> Result<()> {
        let mut depth = 1;
        while depth > 0 {
            match self.next_tok() {
                Some(Tok::Punct('(')) => depth += 1,
                Some(Tok::Punct(')')) => depth -= 1,
                Some(Tok::Ident(arg))
                    if callee != "load"
                        && self.module.get(&arg).is_some()
                        && self.peek_tok() != Some(&Tok::Punct('=')) =>
                {
                    return Err(Error::UnsupportedValue(format!(
                        "call to '{}' with module variable '{}'",
                        callee, arg
                    )));
                }
                Some(_) => {}
                None => return Err(self.error("unbalanced parentheses")),
            }
        }
        Ok(())
    }

    fn call_args(&mut self) -> Result<Vec<(Option<String>, Local)>> {
        self.parse_sequence(')', |p| {
            let keyword = match (p.peek_tok(), p.peek_at(1)) {
                (Some(Tok::Ident(k)), Some(Tok::Punct('='))) => Some(k.clone()),
                _ => None,
            };
            if keyword.is_some() {
                p.pos += 2;
            }

            let global = match (p.peek_tok(), p.peek_at(1)) {
                (Some(Tok::Ident(n)), Some(Tok::Punct(',' | ')')))
                    if p.frames.is_empty() && p.module.get(n).is_some() =>
                {
                    Some(n.clone())
                }
                _ => None,
            };
            let arg = match global {
                Some(name) => {
                    p.pos += 1;
                    Local::Global(name)
                }
                None => Local::Value(p.parse_expr()?),
            };
            Ok((keyword, arg))
        })
    }

    fn call(&mut self, function: &Function, args: Vec<(Option<String>, Local)>) -> Result<()> {
        let params = function.params()?;
        if args.len() > params.len() {
            return Err(Error::UnsupportedValue(format!(
                "{} arguments to '{}'",
                args.len(),
                function.name
            )));
        }

        let mut frame = Vec::with_capacity(params.len());
        for (index, (keyword, arg)) in args.into_iter().enumerate() {
            let name = match keyword {
                Some(k) if params.contains(&k) => k,
                Some(k) => {
                    return Err(Error::UnsupportedValue(format!(
                        "keyword '{}' for '{}'",
                        k, function.name
                    )))
                }
                None => params[index].clone(),
            };
            frame.push((name, arg));
        }
        if let Some(missing) = params.iter().find(|p| !frame.iter().any(|(n, _)| n == *p)) {
            return Err(Error::MissingVariable(missing.clone()));
        }

        let lines = logical_lines(&function.body)?;
        let mut idx = 0;
        let indent = lines.first().map(|l| l.indent).unwrap_or(0);
        let body = parse_block(&lines, &mut idx, indent)?;
        if let Some(stray) = lines.get(idx) {
            return Err(Error::ManifestParse {
                line: stray.line,
                message: "inconsistent indentation".to_string(),
            });
        }

        debug!("Calling {} from line {}", function.name, function.line);
        self.frames.push(frame);
        let result = self.exec_block(&body);
        self.frames.pop();
        result
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            match stmt {
                Stmt::Pass => {}
                Stmt::Assign {
                    line,
                    target,
                    value,
                } => {
                    let value = self.eval_tokens(value, *line)?;
                    self.assign(target, value, *line)?;
                }
                Stmt::For {
                    line,
                    targets,
                    iter,
                    body,
                } => {
                    let items = match self.eval_tokens(iter, *line)? {
                        Value::List(items) => items,
                        Value::Dict(entries) => {
                            entries.into_iter().map(|(k, _)| Value::Str(k)).collect()
                        }
                        other => {
                            return Err(Error::ManifestParse {
                                line: *line,
                                message: format!("cannot iterate over a {}", other.kind()),
                            })
                        }
                    };
                    for item in items {
                        self.bind_targets(targets, item, *line)?;
                        self.exec_block(body)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn bind_targets(&mut self, targets: &[String], item: Value, line: usize) -> Result<()> {
        if let [target] = targets {
            self.set_local(target.clone(), item);
            return Ok(());
        }
        match item {
            Value::List(items) if items.len() == targets.len() => {
                for (target, value) in targets.iter().zip(items) {
                    self.set_local(target.clone(), value);
                }
                Ok(())
            }
            _ => Err(Error::ManifestParse {
                line,
                message: format!("cannot unpack into {} names", targets.len()),
            }),
        }
    }

    fn set_local(&mut self, name: String, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => match frame.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = Local::Value(value),
                None => frame.push((name, Local::Value(value))),
            },
            None => self.module.bind(name, value),
        }
    }

    fn assign(&mut self, target: &[Token], value: Value, line: usize) -> Result<()> {
        match target {
            [Token {
                tok: Tok::Ident(name),
                ..
            }] => {
                self.set_local(name.clone(), value);
                Ok(())
            }
            [Token {
                tok: Tok::Ident(name),
                ..
            }, Token {
                tok: Tok::Punct('['),
                ..
            }, key @ .., Token {
                tok: Tok::Punct(']'),
                ..
            }] => {
                let key = match self.eval_tokens(key, line)? {
                    Value::Str(key) => key,
                    other => {
                        return Err(Error::ManifestParse {
                            line,
                            message: format!("dict keys must be strings, not {}", other.kind()),
                        })
                    }
                };
                match self.resolve_mut(name) {
                    Some(Value::Dict(entries)) => {
                        upsert(entries, key, value);
                        Ok(())
                    }
                    Some(_) => Err(Error::UnsupportedValue(format!(
                        "item assignment to '{}'",
                        name
                    ))),
                    None => Err(Error::MissingVariable(name.clone())),
                }
            }
            _ => Err(Error::ManifestParse {
                line,
                message: "unsupported assignment target".to_string(),
            }),
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        let local = self
            .frames
            .last()
            .and_then(|frame| frame.iter().find(|(n, _)| n == name));
        match local {
            Some((_, Local::Value(value))) => Some(value.clone()),
            Some((_, Local::Global(global))) => self.module.get(global).cloned(),
            None => self.module.get(name).cloned(),
        }
    }

    fn resolve_mut(&mut self, name: &str) -> Option<&mut Value> {
        let local = self
            .frames
            .last_mut()
            .and_then(|frame| frame.iter_mut().find(|(n, _)| n == name));
        let global = match local {
            Some((_, Local::Value(value))) => return Some(value),
            Some((_, Local::Global(global))) => global.clone(),
            None => name.to_string(),
        };
        self.module.get_mut(&global)
    }

    /// Evaluate a stored token run as one expression.
    fn eval_tokens(&mut self, tokens: &[Token], line: usize) -> Result<Value> {
        if tokens.is_empty() {
            return Err(Error::ManifestParse {
                line,
                message: "expected an expression".to_string(),
            });
        }

        let saved_tokens = std::mem::replace(&mut self.tokens, tokens.to_vec());
        let saved_pos = std::mem::replace(&mut self.pos, 0);
        let result = self.parse_expr().and_then(|value| {
            if self.pos < self.tokens.len() {
                Err(self.error("unexpected trailing tokens"))
            } else {
                Ok(value)
            }
        });
        self.tokens = saved_tokens;
        self.pos = saved_pos;
        result
    }

    fn parse_expr(&mut self) -> Result<Value> {
        let mut value = self.parse_term()?;
        while self.eat(&Tok::Punct('+')) {
            let rhs = self.parse_term()?;
            value = match (value, rhs) {
                (Value::Str(a), Value::Str(b)) => Value::Str(a + &b),
                (Value::List(mut a), Value::List(b)) => {
                    a.extend(b);
                    Value::List(a)
                }
                _ => return Err(self.error("unsupported operands for '+'")),
            };
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<Value> {
        let mut value = self.parse_postfix()?;
        while self.eat(&Tok::Punct('%')) {
            let args = self.parse_postfix()?;
            value = match value {
                Value::Str(template) => Value::Str(format_percent(&template, args)?),
                _ => return Err(self.error("'%' needs a format string")),
            };
        }
        Ok(value)
    }

    fn parse_postfix(&mut self) -> Result<Value> {
        let mut value = self.parse_primary()?;
        loop {
            if self.eat(&Tok::Punct('.')) {
                let method = match self.next_tok() {
                    Some(Tok::Ident(method)) => method,
                    _ => return Err(self.error("expected method name")),
                };
                self.expect('(')?;
                let args = self.parse_sequence(')', |p| p.parse_expr())?;
                value = self.call_method(value, &method, args)?;
            } else if self.eat(&Tok::Punct('[')) {
                let key = self.parse_expr()?;
                self.expect(']')?;
                value = match (value, key) {
                    (Value::Dict(entries), Value::Str(key)) => entries
                        .into_iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| v)
                        .ok_or(Error::MissingVariable(key))?,
                    (Value::List(items), Value::Raw(index)) => index
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| items.into_iter().nth(i))
                        .ok_or_else(|| self.error("list index out of range"))?,
                    _ => return Err(self.error("unsupported subscript")),
                };
            } else {
                return Ok(value);
            }
        }
    }

    fn call_method(&self, receiver: Value, method: &str, args: Vec<Value>) -> Result<Value> {
        let value = match (receiver, method, args.as_slice()) {
            (Value::Dict(entries), "items", []) => Value::List(
                entries
                    .into_iter()
                    .map(|(k, v)| Value::List(vec![Value::Str(k), v]))
                    .collect(),
            ),
            (Value::Dict(entries), "keys", []) => {
                Value::List(entries.into_iter().map(|(k, _)| Value::Str(k)).collect())
            }
            (Value::Dict(entries), "values", []) => {
                Value::List(entries.into_iter().map(|(_, v)| v).collect())
            }
            (Value::Str(s), "replace", [Value::Str(from), Value::Str(to)]) => {
                Value::Str(s.replace(from.as_str(), to))
            }
            (Value::Str(s), "upper", []) => Value::Str(s.to_uppercase()),
            (Value::Str(s), "lower", []) => Value::Str(s.to_lowercase()),
            (receiver, method, _) => {
                return Err(self.error(&format!(
                    "unsupported method '{}' on a {}",
                    method,
                    receiver.kind()
                )))
            }
        };
        Ok(value)
    }

    fn parse_primary(&mut self) -> Result<Value> {
        match self.next_tok() {
            Some(Tok::Str(s)) => Ok(Value::Str(s)),
            Some(Tok::Scalar(s)) => Ok(Value::Raw(s)),
            Some(Tok::Punct('-')) => match self.next_tok() {
                Some(Tok::Scalar(s)) => Ok(Value::Raw(format!("-{}", s))),
                _ => Err(self.error("expected a number after '-'")),
            },
            Some(Tok::Punct('[')) => {
                let items = self.parse_sequence(']', |p| p.parse_expr())?;
                Ok(Value::List(items))
            }
            Some(Tok::Punct('{')) => {
                let entries = self.parse_sequence('}', |p| {
                    let key = match p.parse_expr()? {
                        Value::Str(k) | Value::Raw(k) => k,
                        _ => return Err(p.error("dict keys must be strings")),
                    };
                    p.expect(':')?;
                    Ok((key, p.parse_expr()?))
                })?;
                Ok(Value::Dict(entries))
            }
            Some(Tok::Punct('(')) => {
                let value = self.parse_expr()?;
                if !self.eat(&Tok::Punct(',')) {
                    self.expect(')')?;
                    return Ok(value);
                }
                // Tuples are only used as `%` operands; a list carries them.
                let mut items = vec![value];
                items.extend(self.parse_sequence(')', |p| p.parse_expr())?);
                Ok(Value::List(items))
            }
            Some(Tok::Ident(name)) if name == "dict" && self.eat(&Tok::Punct('(')) => {
                let entries = self.parse_sequence(')', |p| {
                    let key = match p.next_tok() {
                        Some(Tok::Ident(k)) => k,
                        _ => return Err(p.error("expected keyword argument")),
                    };
                    p.expect('=')?;
                    Ok((key, p.parse_expr()?))
                })?;
                Ok(Value::Dict(entries))
            }
            Some(Tok::Ident(name)) => {
                if matches!(name.as_str(), "True" | "False" | "None") {
                    return Ok(Value::Raw(name));
                }
                if self.peek_tok() == Some(&Tok::Punct('(')) {
                    return Err(self.error(&format!("unsupported call to '{}'", name)));
                }
                match self.lookup(&name) {
                    Some(value) => Ok(value),
                    None => Err(Error::MissingVariable(name)),
                }
            }
            Some(_) => Err(self.error("unexpected token")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_sequence<T>(
        &mut self,
        close: char,
        mut item: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        loop {
            if self.eat(&Tok::Punct(close)) {
                return Ok(items);
            }
            items.push(item(self)?);
            if !self.eat(&Tok::Punct(',')) {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_tok(&self) -> Option<&Tok> {
        self.peek().map(|t| &t.tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|t| &t.tok)
    }

    fn next_tok(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek_tok() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(&Tok::Punct(c)) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn error(&self, message: &str) -> Error {
        let line = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(1);
        Error::ManifestParse {
            line,
            message: message.to_string(),
        }
    }
}
