//! InterpolatedField - templates with `${! ... }` segments
//!
//! Compiled once at connector start-up, resolved per message index at
//! dispatch time. Resolution only reads the batch.

use contracts::{Batch, ContractError};
use serde_json::Value;
use tracing::debug;

use crate::expr::{parse_expression, Expr};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

/// Result of resolving a field
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Plain string
    Text(String),
    /// Structured value from a template made of a single expression
    Structured(Value),
}

impl Resolved {
    /// Render as a string
    pub fn into_string(self) -> String {
        match self {
            Resolved::Text(text) => text,
            Resolved::Structured(value) => render(&value),
        }
    }
}

/// Compiled interpolated string field
#[derive(Debug, Clone)]
pub struct InterpolatedField {
    template: String,
    segments: Vec<Segment>,
}

impl InterpolatedField {
    /// Compile a template
    ///
    /// # Errors
    /// `ContractError::InvalidTemplate` when the template is malformed
    pub fn compile(template: &str) -> Result<Self, ContractError> {
        let segments = parse_segments(template)
            .map_err(|message| ContractError::invalid_template(template, message))?;
        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    /// Source template
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether the template contains no interpolations
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Text(_)))
    }

    /// Resolve to a string for message `index`
    ///
    /// Expressions that cannot be evaluated (missing path, unset metadata)
    /// render as nothing. An empty result is meaningful: callers use it to
    /// detect an unset optional parameter.
    pub fn resolve_string(&self, index: usize, batch: &Batch) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expr) => {
                    if let Some(value) = self.eval(expr, index, batch) {
                        out.push_str(&render(&value));
                    }
                }
            }
        }
        out
    }

    /// Resolve for message `index`, keeping structure when the template is a
    /// single expression
    pub fn resolve(&self, index: usize, batch: &Batch) -> Resolved {
        match self.segments.as_slice() {
            [Segment::Expr(expr)] => match self.eval(expr, index, batch) {
                Some(Value::String(text)) => Resolved::Text(text),
                Some(value) => Resolved::Structured(value),
                None => Resolved::Text(String::new()),
            },
            _ => Resolved::Text(self.resolve_string(index, batch)),
        }
    }

    fn eval(&self, expr: &Expr, index: usize, batch: &Batch) -> Option<Value> {
        expr.eval(index, batch)
            .inspect_err(|e| {
                debug!(template = %self.template, index, error = %e, "Interpolation resolved to empty");
            })
            .ok()
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn parse_segments(template: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find("${") {
        text.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];

        if let Some(inner) = after.strip_prefix("{!") {
            // `${{!x}}` is the escape for a literal `${!x}`
            let end = inner
                .find("}}")
                .ok_or_else(|| "unterminated escaped interpolation".to_string())?;
            text.push_str("${!");
            text.push_str(&inner[..end]);
            text.push('}');
            rest = &inner[end + 2..];
        } else if let Some(inner) = after.strip_prefix('!') {
            let end = find_closing_brace(inner)
                .ok_or_else(|| "unterminated interpolation, expected '}'".to_string())?;
            let source = &inner[..end];
            if source.trim().is_empty() {
                return Err("empty interpolation".to_string());
            }
            let expr = parse_expression(source)?;
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(Segment::Expr(expr));
            rest = &inner[end + 1..];
        } else {
            text.push_str("${");
            rest = after;
        }
    }

    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

/// Byte offset of the first `}` outside a string literal
fn find_closing_brace(s: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '}' if !in_string => return Some(i),
            _ => {}
        }
    }
    None
}
