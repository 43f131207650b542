//! Pipeline text → operators.
//!
//! The text is split on `|` outside quotes and brackets. Each segment starts
//! with an operator name that selects a plugin; the plugin consumes its
//! arguments through [`ParserInterface`]. Every error carries the byte span
//! of the offending input, relative to the whole pipeline text.
//!
//! Argument syntax understood here:
//! - words and quoted strings (`"..."` with JSON escapes, `'...'` raw)
//! - flags: `--name`, `--name value`, `--name=value`
//! - comma-separated field lists
//! - one JSON value (for inline data)
//! - filter expressions: `or`/`and`/`not`, parentheses, and
//!   `field <op> value` with `== != < <= > >=`

use std::str::FromStr;
use std::time::Duration;

use sluice_core::diagnostic::{Diagnostic, Span};
use sluice_core::expr::{CmpOp, Expr};
use sluice_core::types::Value;

use crate::registry::Registry;
use crate::traits::Operator;

/// A parsed argument together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<T> {
    pub inner: T,
    pub span: Span,
}

impl<T> Located<T> {
    pub fn new(inner: T, span: Span) -> Self {
        Self { inner, span }
    }
}

/// Argument access handed to operator plugins.
pub trait ParserInterface {
    /// Next bare word or quoted string. Flags are not words.
    fn accept_word(&mut self) -> Option<Located<String>>;

    fn peek_word(&mut self) -> Option<String>;

    /// Consume `keyword` if it is the next word.
    fn accept_keyword(&mut self, keyword: &str) -> bool;

    /// Consume a value-less flag such as `--desc`.
    fn accept_flag(&mut self, name: &str) -> bool;

    /// Consume `--name value` or `--name=value`.
    fn accept_flag_value(&mut self, name: &str) -> Result<Option<Located<String>>, Diagnostic>;

    fn parse_json(&mut self) -> Result<Located<serde_json::Value>, Diagnostic>;

    fn parse_expression(&mut self) -> Result<Located<Expr>, Diagnostic>;

    /// One or more comma-separated field names.
    fn parse_field_list(&mut self) -> Result<Vec<Located<String>>, Diagnostic>;

    fn at_end(&mut self) -> bool;

    fn expect_end(&mut self) -> Result<(), Diagnostic>;

    /// Error located at the current position.
    fn error_here(&mut self, message: &str) -> Diagnostic;
}

/// Character cursor over one segment of pipeline text.
#[derive(Debug, Clone)]
pub struct ArgParser<'a> {
    text: &'a str,
    pos: usize,
    end: usize,
}

impl<'a> ArgParser<'a> {
    pub fn new(text: &'a str) -> Self {
        Self::segment(text, 0, text.len())
    }

    /// Parser over `text[begin..end]`; spans stay relative to `text`.
    pub fn segment(text: &'a str, begin: usize, end: usize) -> Self {
        Self {
            text,
            pos: begin,
            end,
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..self.end]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn span_from(&self, begin: usize) -> Span {
        Span::new(begin, self.pos)
    }

    fn error_at(&self, message: impl Into<String>, begin: usize, end: usize) -> Diagnostic {
        Diagnostic::error(message).with_location(Span::new(begin, end))
    }

    /// Quoted string at the cursor. Leaves the cursor untouched on failure.
    fn quoted(&mut self) -> Result<String, Diagnostic> {
        let begin = self.pos;
        let rest = self.rest();
        let Some(quote) = rest.chars().next() else {
            return Err(self.error_at("expected a string", begin, begin));
        };
        let mut escaped = false;
        for (i, c) in rest.char_indices().skip(1) {
            if quote == '"' && escaped {
                escaped = false;
                continue;
            }
            if quote == '"' && c == '\\' {
                escaped = true;
                continue;
            }
            if c == quote {
                let raw = &rest[..=i];
                let value = if quote == '"' {
                    serde_json::from_str::<String>(raw).map_err(|e| {
                        self.error_at(format!("invalid string literal: {e}"), begin, begin + i + 1)
                    })?
                } else {
                    raw[1..raw.len() - 1].to_string()
                };
                self.pos += i + 1;
                return Ok(value);
            }
        }
        Err(self.error_at("unterminated string", begin, self.end))
    }

    fn is_ident_start(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_'
    }

    fn is_ident_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == '.'
    }

    fn peek_ident(&self) -> Option<&'a str> {
        let rest = self.rest();
        let first = rest.chars().next()?;
        if !Self::is_ident_start(first) {
            return None;
        }
        let len = rest
            .char_indices()
            .find(|(_, c)| !Self::is_ident_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        Some(&rest[..len])
    }

    fn accept_ident_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        if self.peek_ident() == Some(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_and()?;
        while self.accept_ident_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_not()?;
        while self.accept_ident_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, Diagnostic> {
        if self.accept_ident_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        self.skip_ws();
        let begin = self.pos;
        if self.eat("(") {
            let inner = self.parse_or()?;
            self.skip_ws();
            if !self.eat(")") {
                return Err(self.error_at("expected ')'", begin, self.pos));
            }
            return Ok(inner);
        }
        if self.accept_ident_keyword("true") {
            return Ok(Expr::Literal(true));
        }
        if self.accept_ident_keyword("false") {
            return Ok(Expr::Literal(false));
        }
        let Some(field) = self.peek_ident() else {
            return Err(self.error_at("expected a field name", begin, begin));
        };
        self.pos += field.len();
        self.skip_ws();

        let op_begin = self.pos;
        let op = if self.eat("==") {
            CmpOp::Eq
        } else if self.eat("!=") {
            CmpOp::Ne
        } else if self.eat("<=") {
            CmpOp::Le
        } else if self.eat(">=") {
            CmpOp::Ge
        } else if self.eat("<") {
            CmpOp::Lt
        } else if self.eat(">") {
            CmpOp::Gt
        } else {
            return Err(self
                .error_at(format!("expected a comparison after '{field}'"), op_begin, op_begin)
                .with_note("valid operators are == != < <= > >="));
        };

        let value = self.parse_value()?;
        Ok(Expr::compare(field, op, value))
    }

    fn parse_value(&mut self) -> Result<Value, Diagnostic> {
        self.skip_ws();
        let begin = self.pos;
        match self.peek() {
            Some('"') | Some('\'') => return self.quoted().map(Value::String),
            None => return Err(self.error_at("expected a value", begin, begin)),
            _ => {}
        }
        if self.accept_ident_keyword("true") {
            return Ok(Value::Bool(true));
        }
        if self.accept_ident_keyword("false") {
            return Ok(Value::Bool(false));
        }
        if self.accept_ident_keyword("null") {
            return Ok(Value::Null);
        }

        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let token = &rest[..len];
        let value = parse_number(token)
            .ok_or_else(|| self.error_at(format!("invalid value '{token}'"), begin, begin + len))?;
        self.pos += len;
        Ok(value)
    }
}

fn parse_number(token: &str) -> Option<Value> {
    if token.is_empty() {
        return None;
    }
    if let Ok(i) = token.parse::<i64>() {
        return Some(Value::Int64(i));
    }
    if let Ok(u) = token.parse::<u64>() {
        return Some(Value::UInt64(u));
    }
    match token.parse::<f64>() {
        Ok(d) if d.is_finite() => Some(Value::Double(d)),
        _ => None,
    }
}

impl ParserInterface for ArgParser<'_> {
    fn accept_word(&mut self) -> Option<Located<String>> {
        self.skip_ws();
        let begin = self.pos;
        match self.peek()? {
            '"' | '\'' => {
                let value = self.quoted().ok()?;
                Some(Located::new(value, self.span_from(begin)))
            }
            _ if self.rest().starts_with("--") => None,
            _ => {
                let rest = self.rest();
                let len = rest
                    .char_indices()
                    .find(|(_, c)| c.is_whitespace() || *c == ',')
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                if len == 0 {
                    return None;
                }
                self.pos += len;
                Some(Located::new(rest[..len].to_string(), self.span_from(begin)))
            }
        }
    }

    fn peek_word(&mut self) -> Option<String> {
        let saved = self.pos;
        let word = self.accept_word().map(|w| w.inner);
        self.pos = saved;
        word
    }

    fn accept_keyword(&mut self, keyword: &str) -> bool {
        let saved = self.pos;
        match self.accept_word() {
            Some(w) if w.inner == keyword => true,
            _ => {
                self.pos = saved;
                false
            }
        }
    }

    fn accept_flag(&mut self, name: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        if !rest.starts_with(name) {
            return false;
        }
        match rest[name.len()..].chars().next() {
            None => {}
            Some(c) if c.is_whitespace() => {}
            Some(_) => return false,
        }
        self.pos += name.len();
        true
    }

    fn accept_flag_value(&mut self, name: &str) -> Result<Option<Located<String>>, Diagnostic> {
        self.skip_ws();
        let begin = self.pos;
        let rest = self.rest();
        if !rest.starts_with(name) {
            return Ok(None);
        }
        match rest[name.len()..].chars().next() {
            Some('=') => self.pos += name.len() + 1,
            None => self.pos += name.len(),
            Some(c) if c.is_whitespace() => self.pos += name.len(),
            Some(_) => return Ok(None),
        }
        // `--flag=` must be followed directly by the value.
        if self.text[..self.pos].ends_with('=') && self.peek().map_or(true, char::is_whitespace) {
            return Err(self.error_at(format!("flag '{name}' requires a value"), begin, self.pos));
        }
        match self.accept_word() {
            Some(value) => Ok(Some(value)),
            None => Err(self.error_at(format!("flag '{name}' requires a value"), begin, self.pos)),
        }
    }

    fn parse_json(&mut self) -> Result<Located<serde_json::Value>, Diagnostic> {
        self.skip_ws();
        let begin = self.pos;
        let mut stream =
            serde_json::Deserializer::from_str(self.rest()).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(value)) => {
                self.pos += stream.byte_offset();
                Ok(Located::new(value, self.span_from(begin)))
            }
            Some(Err(e)) => Err(self.error_at(format!("invalid JSON: {e}"), begin, self.end)),
            None => Err(self.error_at("expected a JSON value", begin, begin)),
        }
    }

    fn parse_expression(&mut self) -> Result<Located<Expr>, Diagnostic> {
        self.skip_ws();
        let begin = self.pos;
        let expr = self.parse_or()?;
        Ok(Located::new(expr, self.span_from(begin)))
    }

    fn parse_field_list(&mut self) -> Result<Vec<Located<String>>, Diagnostic> {
        let mut fields = Vec::new();
        loop {
            match self.accept_word() {
                Some(field) => fields.push(field),
                None => return Err(self.error_here("expected a field name")),
            }
            self.skip_ws();
            if !self.eat(",") {
                return Ok(fields);
            }
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.end
    }

    fn expect_end(&mut self) -> Result<(), Diagnostic> {
        if self.at_end() {
            return Ok(());
        }
        let begin = self.pos;
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        Err(self.error_at(
            format!("unexpected argument '{}'", &rest[..len]),
            begin,
            begin + len,
        ))
    }

    fn error_here(&mut self, message: &str) -> Diagnostic {
        self.skip_ws();
        self.error_at(message, self.pos, self.pos)
    }
}

/// Byte ranges of the `|`-separated segments of a pipeline.
pub fn split_pipeline(text: &str) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut begin = 0;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q == '"' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth = depth.saturating_sub(1),
            '|' if depth == 0 => {
                segments.push((begin, i));
                begin = i + 1;
            }
            _ => {}
        }
    }
    segments.push((begin, text.len()));
    segments
}

/// Parse a whole pipeline. All segments are parsed even after an error, so
/// the caller gets every diagnostic at once.
pub fn parse_pipeline(
    text: &str,
    registry: &Registry,
) -> Result<Vec<Box<dyn Operator>>, Vec<Diagnostic>> {
    let mut ops = Vec::new();
    let mut diagnostics = Vec::new();
    if text.trim().is_empty() {
        return Ok(ops);
    }

    for (begin, end) in split_pipeline(text) {
        let mut parser = ArgParser::segment(text, begin, end);
        let Some(name) = parser.accept_word() else {
            diagnostics.push(
                Diagnostic::error("expected an operator name").with_location(Span::new(begin, end)),
            );
            continue;
        };
        let Some(plugin) = registry.operator(&name.inner) else {
            diagnostics.push(
                Diagnostic::error(format!("unknown operator '{}'", name.inner))
                    .with_location(name.span)
                    .with_note(format!(
                        "available operators: {}",
                        registry.operator_names().join(", ")
                    )),
            );
            continue;
        };
        let parsed = plugin
            .parse_operator(&mut parser, registry)
            .and_then(|op| parser.expect_end().map(|()| op));
        match parsed {
            Ok(op) => ops.push(op),
            Err(diag) => diagnostics.push(diag),
        }
    }

    if diagnostics.is_empty() {
        Ok(ops)
    } else {
        Err(diagnostics)
    }
}

/// Parse a standalone filter expression.
pub fn parse_expression_str(text: &str) -> Result<Expr, Diagnostic> {
    let mut parser = ArgParser::new(text);
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expr.inner)
}

/// Parse a numeric argument, reporting errors at its location.
pub fn parse_arg<T: FromStr>(arg: &Located<String>, what: &str) -> Result<T, Diagnostic> {
    arg.inner.parse::<T>().map_err(|_| {
        Diagnostic::error(format!("invalid {what} '{}'", arg.inner)).with_location(arg.span)
    })
}

/// `500ms`, `2s`, `1m`, `1h`, or a bare number of milliseconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "" | "ms" => Some(Duration::from_millis(n)),
        "s" => Some(Duration::from_secs(n)),
        "m" | "min" => Some(Duration::from_secs(n.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(n.checked_mul(3600)?)),
        _ => None,
    }
}

/// Serde adapter that stores expressions as their text form.
pub mod expr_text {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use sluice_core::expr::Expr;

    pub fn serialize<S: Serializer>(expr: &Expr, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(expr)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Expr, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_expression_str(&text).map_err(|diag| D::Error::custom(diag.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_outside_quotes_and_brackets() {
        let text = r#"rows [{"a": "x|y"}] | where b == "p|q" | head"#;
        let parts: Vec<&str> = split_pipeline(text)
            .into_iter()
            .map(|(b, e)| text[b..e].trim())
            .collect();
        assert_eq!(
            parts,
            vec![r#"rows [{"a": "x|y"}]"#, r#"where b == "p|q""#, "head"]
        );
    }

    #[test]
    fn words_flags_and_lists() {
        let mut p = ArgParser::new("a, b.c 'x y' --distance 3 --limit=2 --desc");
        let fields: Vec<String> = p
            .parse_field_list()
            .unwrap()
            .into_iter()
            .map(|f| f.inner)
            .collect();
        assert_eq!(fields, vec!["a", "b.c"]);
        assert_eq!(p.accept_word().unwrap().inner, "x y");
        assert!(p.accept_word().is_none());
        assert_eq!(p.accept_flag_value("--distance").unwrap().unwrap().inner, "3");
        assert_eq!(p.accept_flag_value("--limit").unwrap().unwrap().inner, "2");
        assert!(!p.accept_flag("--de"));
        assert!(p.accept_flag("--desc"));
        p.expect_end().unwrap();
    }

    #[test]
    fn flag_without_value_is_located() {
        let mut p = ArgParser::new("--limit");
        let diag = p.accept_flag_value("--limit").unwrap_err();
        assert_eq!(diag.location, Some(Span::new(0, 7)));
    }

    #[test]
    fn expression_precedence_and_display_round_trip() {
        let e = parse_expression_str(r#"a > 1 and not b == "x" or c <= -2.5"#).unwrap();
        let expected = Expr::Or(
            Box::new(Expr::And(
                Box::new(Expr::compare("a", CmpOp::Gt, Value::Int64(1))),
                Box::new(Expr::Not(Box::new(Expr::compare(
                    "b",
                    CmpOp::Eq,
                    Value::String("x".into()),
                )))),
            )),
            Box::new(Expr::compare("c", CmpOp::Le, Value::Double(-2.5))),
        );
        assert_eq!(e, expected);
        assert_eq!(parse_expression_str(&e.to_string()).unwrap(), e);
    }

    #[test]
    fn keywords_need_word_boundaries() {
        let e = parse_expression_str("notes == 1 and order != null").unwrap();
        assert_eq!(
            e.fields().into_iter().collect::<Vec<_>>(),
            vec!["notes", "order"]
        );
    }

    #[test]
    fn expression_errors_point_at_input() {
        let diag = parse_expression_str("a ~ 1").unwrap_err();
        assert_eq!(diag.location, Some(Span::new(2, 2)));
        let diag = parse_expression_str("a == 1 b").unwrap_err();
        assert_eq!(diag.location, Some(Span::new(7, 8)));
    }

    #[test]
    fn json_argument_stops_at_value_end() {
        let mut p = ArgParser::new(r#"[{"a": 1}] --batch-size 2"#);
        let json = p.parse_json().unwrap();
        assert_eq!(json.inner, serde_json::json!([{"a": 1}]));
        assert_eq!(json.span, Span::new(0, 10));
        assert!(p.accept_flag_value("--batch-size").unwrap().is_some());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("3s"), Some(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("fast"), None);
    }
}
