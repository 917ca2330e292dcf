//! ArgsMapping - `root = <expr>` mappings producing structured values

use contracts::{Batch, ContractError};
use serde_json::Value;

use crate::expr::{parse_expression, Expr};

/// Compiled mapping
#[derive(Debug, Clone)]
pub struct ArgsMapping {
    source: String,
    expr: Expr,
}

impl ArgsMapping {
    /// Compile a mapping of the form `root = <expr>`
    ///
    /// # Errors
    /// `ContractError::InvalidTemplate` when the mapping is malformed
    pub fn compile(source: &str) -> Result<Self, ContractError> {
        let expr = parse_mapping(source)
            .map_err(|message| ContractError::invalid_template(source, message))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against message `index`
    ///
    /// Unlike field interpolation this is strict: missing paths, unset
    /// metadata and non-JSON payloads are errors.
    ///
    /// # Errors
    /// `ContractError::Resolution`
    pub fn evaluate(&self, index: usize, batch: &Batch) -> Result<Value, ContractError> {
        self.expr.eval(index, batch)
    }
}

fn parse_mapping(source: &str) -> Result<Expr, String> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err("empty mapping".to_string());
    }
    let body = trimmed
        .strip_prefix("root")
        .filter(|rest| rest.starts_with(|c: char| c.is_whitespace() || c == '='))
        .ok_or_else(|| "mapping must assign to root".to_string())?;
    let expr_src = body
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| "expected '=' after root".to_string())?;
    parse_expression(expr_src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Message;
    use serde_json::json;

    #[test]
    fn test_evaluate_args_array() {
        let mapping = ArgsMapping::compile("root = [ this.name, this.friends_visited ]").unwrap();
        let batch = Batch::new(vec![
            Message::new(r#"{"name":"ash","friends_visited":10}"#),
            Message::new(r#"{"name":"ash","friends_visited":-2}"#),
        ]);
        assert_eq!(mapping.evaluate(0, &batch).unwrap(), json!(["ash", 10]));
        assert_eq!(mapping.evaluate(1, &batch).unwrap(), json!(["ash", -2]));
    }

    #[test]
    fn test_evaluate_meta() {
        let mapping = ArgsMapping::compile(r#"root = [ meta("set_key") ]"#).unwrap();
        let batch = Batch::new(vec![Message::new("x").with_metadata("set_key", "s1")]);
        assert_eq!(mapping.evaluate(0, &batch).unwrap(), json!(["s1"]));

        let batch = Batch::new(vec![Message::new("x")]);
        assert!(matches!(
            mapping.evaluate(0, &batch),
            Err(ContractError::Resolution { .. })
        ));
    }

    #[test]
    fn test_scalar_root() {
        let mapping = ArgsMapping::compile("root = this.key").unwrap();
        let batch = Batch::new(vec![Message::new(r#"{"key":"k"}"#)]);
        assert_eq!(mapping.evaluate(0, &batch).unwrap(), json!("k"));
    }

    #[test]
    fn test_compile_errors() {
        for bad in ["", "this.key", "rooted = 1", "root [1]", "root = [1,"] {
            assert!(ArgsMapping::compile(bad).is_err(), "expected error for {bad:?}");
        }
    }
}
