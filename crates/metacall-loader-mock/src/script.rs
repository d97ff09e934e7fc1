//! A deliberately tiny scripted-function language for the `mock`/`file`
//! adapter.
//!
//! A fixed set of hardcoded functions with fixed signatures would only
//! serve a test suite that already knows their names. Actually parsing
//! something from `load_from_file`/`load_from_memory` is more useful as a
//! *generic* deterministic adapter: one line per function, of the shape
//!
//! ```text
//! name(param, param, ...) = expr
//! ```
//!
//! where `expr` is one of:
//! - `a + b` — string/number addition of two sub-expressions
//! - `ident` — a parameter reference
//! - `"literal"` — a string literal
//! - `throw("message")` — produces a throwable-kind result
//! - `ident(arg, ...)` — invokes a parameter that must itself be a
//!   `Kind::Function` value (this is how the seed scenarios pass a host or
//!   foreign-loader callback into a mock script and have it call back out)
//!
//! Blank lines and lines starting with `#` are ignored.

use metacall::prelude::{Exception, Kind, MetacallError, Result, Throwable, Value};

#[derive(Debug, Clone)]
pub enum Expr {
    Ident(String),
    StringLit(String),
    Add(Box<Expr>, Box<Expr>),
    Throw(Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
}

/// Parses every function definition out of `source`, in textual order.
pub fn parse(source: &str) -> Result<Vec<FunctionDef>> {
    let mut defs = Vec::new();
    for (lineno, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        defs.push(parse_line(line).map_err(|reason| MetacallError::Load {
            tag: "mock".to_string(),
            name: format!("line {}", lineno + 1),
            reason,
        })?);
    }
    Ok(defs)
}

fn parse_line(line: &str) -> std::result::Result<FunctionDef, String> {
    let eq = line.find('=').ok_or_else(|| format!("missing `=` in `{line}`"))?;
    let (head, body) = line.split_at(eq);
    let body = &body[1..];

    let open = head.find('(').ok_or_else(|| format!("missing `(` in `{head}`"))?;
    let close = head.rfind(')').ok_or_else(|| format!("missing `)` in `{head}`"))?;
    let name = head[..open].trim().to_string();
    if name.is_empty() {
        return Err("function name cannot be empty".to_string());
    }
    let params: Vec<String> = head[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let mut parser = ExprParser::new(body.trim());
    let expr = parser.parse_expr()?;
    parser.expect_end()?;

    Ok(FunctionDef { name, params, body: expr })
}

struct ExprParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn new(src: &'a str) -> Self {
        ExprParser { src, pos: 0 }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect_end(&mut self) -> std::result::Result<(), String> {
        self.skip_ws();
        if self.pos != self.src.len() {
            return Err(format!("unexpected trailing input: `{}`", &self.src[self.pos..]));
        }
        Ok(())
    }

    /// `expr := term ('+' term)*`
    fn parse_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut lhs = self.parse_term()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('+') {
                self.bump();
                let rhs = self.parse_term()?;
                lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    /// `term := STRING | IDENT '(' arglist ')' | IDENT`
    fn parse_term(&mut self) -> std::result::Result<Expr, String> {
        self.skip_ws();
        match self.peek() {
            Some('"') => self.parse_string(),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_ident_or_call(),
            other => Err(format!("unexpected character {other:?} at position {}", self.pos)),
        }
    }

    fn parse_string(&mut self) -> std::result::Result<Expr, String> {
        self.bump(); // opening quote
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '"') {
            self.bump();
        }
        let text = self.src[start..self.pos].to_string();
        if self.bump() != Some('"') {
            return Err("unterminated string literal".to_string());
        }
        Ok(Expr::StringLit(text))
    }

    fn parse_ident(&mut self) -> std::result::Result<String, String> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        if start == self.pos {
            return Err("expected identifier".to_string());
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn parse_ident_or_call(&mut self) -> std::result::Result<Expr, String> {
        let ident = self.parse_ident()?;
        self.skip_ws();
        if self.peek() == Some('(') {
            self.bump();
            let mut args = Vec::new();
            self.skip_ws();
            if self.peek() != Some(')') {
                loop {
                    args.push(self.parse_expr()?);
                    self.skip_ws();
                    match self.peek() {
                        Some(',') => {
                            self.bump();
                        }
                        Some(')') => break,
                        other => return Err(format!("expected `,` or `)`, found {other:?}")),
                    }
                }
            }
            if self.bump() != Some(')') {
                return Err("expected closing `)`".to_string());
            }
            if ident == "throw" {
                if args.len() != 1 {
                    return Err("`throw` takes exactly one argument".to_string());
                }
                return Ok(Expr::Throw(Box::new(args.into_iter().next().unwrap())));
            }
            Ok(Expr::Call(ident, args))
        } else {
            Ok(Expr::Ident(ident))
        }
    }
}

/// Evaluates `expr` against `params`/`args`, where `args[i]` is the value
/// bound to `params[i]`.
pub fn eval(expr: &Expr, params: &[String], args: &[Value]) -> Result<Value> {
    match expr {
        Expr::Ident(name) => lookup(name, params, args),
        Expr::StringLit(s) => Ok(Value::string(s.clone())),
        Expr::Add(lhs, rhs) => {
            let lhs = eval(lhs, params, args)?;
            let rhs = eval(rhs, params, args)?;
            add(&lhs, &rhs)
        }
        Expr::Throw(msg) => {
            let msg = eval(msg, params, args)?;
            let text = msg.as_str().map(str::to_string).unwrap_or_else(|| format!("{msg:?}"));
            Ok(Value::throwable(Throwable::wrapping_exception(Exception::new(text))))
        }
        Expr::Call(name, call_args) => {
            let callee = lookup(name, params, args)?;
            let function = callee
                .as_function()
                .ok_or_else(|| MetacallError::TypeMismatch {
                    name: name.clone(),
                    index: 0,
                    expected: Kind::Function,
                    actual: callee.kind(),
                })?;
            let evaluated: Vec<Value> = call_args
                .iter()
                .map(|a| eval(a, params, args))
                .collect::<Result<_>>()?;
            function.call(&evaluated)
        }
    }
}

fn lookup(name: &str, params: &[String], args: &[Value]) -> Result<Value> {
    params
        .iter()
        .position(|p| p == name)
        .map(|i| args[i].copy())
        .ok_or_else(|| MetacallError::Adapter {
            tag: "mock".to_string(),
            source: Box::new(UnknownIdentifier(name.to_string())),
        })
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value> {
    if let (Some(a), Some(b)) = (lhs.as_str(), rhs.as_str()) {
        return Ok(Value::string(format!("{a}{b}")));
    }
    if let (Some(a), Some(b)) = (lhs.as_long(), rhs.as_long()) {
        return Ok(Value::long(a + b));
    }
    if let (Some(a), Some(b)) = (lhs.as_double(), rhs.as_double()) {
        return Ok(Value::double(a + b));
    }
    Err(MetacallError::TypeMismatch {
        name: "+".to_string(),
        index: 1,
        expected: lhs.kind(),
        actual: rhs.kind(),
    })
}

#[derive(Debug, thiserror::Error)]
#[error("unknown identifier `{0}`")]
struct UnknownIdentifier(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_concat_definition() {
        let defs = parse("concat(a, b) = a + b").unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "concat");
        assert_eq!(defs[0].params, vec!["a", "b"]);
    }

    #[test]
    fn evaluates_string_concatenation() {
        let defs = parse("concat(a, b) = a + b").unwrap();
        let result = eval(&defs[0].body, &defs[0].params, &[Value::string("hello "), Value::string("world")]).unwrap();
        assert_eq!(result.as_str(), Some("hello world"));
    }

    #[test]
    fn evaluates_throw() {
        let defs = parse(r#"boom() = throw("boom")"#).unwrap();
        let result = eval(&defs[0].body, &defs[0].params, &[]).unwrap();
        let throwable = result.as_throwable().unwrap();
        assert_eq!(throwable.value.as_exception().unwrap().message, "boom");
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let defs = parse("# a comment\n\nconcat(a, b) = a + b\n").unwrap();
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn rejects_unknown_identifier_at_eval_time() {
        let defs = parse("f(a) = a + b").unwrap();
        let err = eval(&defs[0].body, &defs[0].params, &[Value::int(1)]).unwrap_err();
        assert!(matches!(err, MetacallError::Adapter { .. }));
    }
}
