//! Series selectors: `metric{label="value", ...}` joined with `or`.
//!
//! Only equality matchers are supported. That is the whole query surface the
//! pipeline builds, and the subset the fixture source can evaluate.

use super::{Labels, SourceError, METRIC_NAME_LABEL};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector {
    pub metric: Option<String>,
    pub matchers: Vec<(String, String)>,
}

impl Selector {
    pub fn metric(name: impl Into<String>) -> Self {
        Self {
            metric: Some(name.into()),
            matchers: Vec::new(),
        }
    }

    pub fn with(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.matchers.push((label.into(), value.into()));
        self
    }

    /// True when the metric name and every matcher agree with `labels`.
    pub fn matches(&self, labels: &Labels) -> bool {
        let metric_ok = self
            .metric
            .as_deref()
            .map_or(true, |m| labels.get(METRIC_NAME_LABEL).map(String::as_str) == Some(m));
        metric_ok
            && self
                .matchers
                .iter()
                .all(|(k, v)| labels.get(k).map(String::as_str) == Some(v.as_str()))
    }

    /// Parse `a{x="1"} or b or {y='2'}`.
    pub fn parse_union(query: &str) -> Result<Vec<Selector>, SourceError> {
        let mut cursor = Cursor::new(query);
        let mut selectors = vec![cursor.selector()?];
        loop {
            cursor.skip_ws();
            if cursor.at_end() {
                break;
            }
            match cursor.ident() {
                Some(kw) if kw == "or" => selectors.push(cursor.selector()?),
                _ => return Err(cursor.error("expected `or` between selectors")),
            }
        }
        Ok(selectors)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(metric) = &self.metric {
            f.write_str(metric)?;
        }
        if self.matchers.is_empty() && self.metric.is_some() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.matchers.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}=\"{}\"", k, escape(v))?;
        }
        f.write_str("}")
    }
}

/// Render selectors as one query, deduplicated and in sorted order.
pub fn union(selectors: impl IntoIterator<Item = Selector>) -> Option<String> {
    let rendered: std::collections::BTreeSet<String> =
        selectors.into_iter().map(|s| s.to_string()).collect();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered.into_iter().collect::<Vec<_>>().join(" or "))
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

struct Cursor<'a> {
    query: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(query: &'a str) -> Self {
        Self {
            query,
            chars: query.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: &str) -> SourceError {
        SourceError::Selector {
            query: self.query.to_string(),
            reason: format!("{} at offset {}", reason, self.pos),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| self.chars[start..self.pos].iter().collect())
    }

    fn quoted(&mut self) -> Result<String, SourceError> {
        let quote = match self.bump() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected quoted label value")),
        };
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated label value")),
                Some(c) if c == quote => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some(c) => value.push(c),
                    None => return Err(self.error("dangling escape")),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn selector(&mut self) -> Result<Selector, SourceError> {
        self.skip_ws();
        let metric = self.ident();
        let mut matchers = Vec::new();
        self.skip_ws();
        if self.peek() == Some('{') {
            self.bump();
            loop {
                self.skip_ws();
                if self.peek() == Some('}') {
                    self.bump();
                    break;
                }
                let label = self
                    .ident()
                    .ok_or_else(|| self.error("expected label name"))?;
                self.skip_ws();
                if self.bump() != Some('=') || matches!(self.peek(), Some('~' | '=')) {
                    return Err(self.error("only `=` matchers are supported"));
                }
                self.skip_ws();
                matchers.push((label, self.quoted()?));
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some('}') => break,
                    _ => return Err(self.error("expected `,` or `}`")),
                }
            }
        }
        if metric.is_none() && matchers.is_empty() {
            return Err(self.error("empty selector"));
        }
        Ok(Selector { metric, matchers })
    }
}
