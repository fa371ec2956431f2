use crate::types::Scalar;
use evalexpr::{build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value};

/// Identifier the raw decoded integer is bound to inside a formula.
pub const VALUE_IDENT: &str = "value";

/// Placeholder accepted in formulas as a shorthand for [`VALUE_IDENT`].
const PLACEHOLDER: &str = "%v";

/// A display formula compiled once when the field list is built,
/// e.g. `%v/10.0` or `value * 0.75 - 40`.
#[derive(Debug, Clone)]
pub struct Transform {
    source: String,
    compiled: Node,
}

impl Transform {
    pub fn parse(formula: &str) -> Result<Self, String> {
        let expression = formula.replace(PLACEHOLDER, VALUE_IDENT);
        let compiled = build_operator_tree(&expression).map_err(|e| e.to_string())?;
        if let Some(other) = compiled
            .iter_variable_identifiers()
            .find(|ident| *ident != VALUE_IDENT)
        {
            return Err(format!("unknown variable '{other}'"));
        }
        Ok(Self {
            source: formula.to_string(),
            compiled,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn apply(&self, raw: i64) -> Result<Scalar, String> {
        let mut context = HashMapContext::new();
        context
            .set_value(VALUE_IDENT.to_string(), Value::Int(raw))
            .map_err(|e| e.to_string())?;
        match self.compiled.eval_with_context(&context) {
            Ok(Value::Int(i)) => Ok(Scalar::Int(i)),
            Ok(Value::Float(f)) => Ok(Scalar::Float(f)),
            Ok(other) => Err(format!("formula produced a non-numeric value: {other}")),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divide_by_ten() {
        let t = Transform::parse("%v/10.0").unwrap();
        assert_eq!(t.apply(237).unwrap(), Scalar::Float(23.7));
        assert_eq!(t.apply(237).unwrap().to_string(), "23.7");
        assert_eq!(t.source(), "%v/10.0");
    }

    #[test]
    fn test_named_value_and_integer_result() {
        let t = Transform::parse("value - 40").unwrap();
        assert_eq!(t.apply(100).unwrap(), Scalar::Int(60));
    }

    #[test]
    fn test_rejects_bad_formulas() {
        assert!(Transform::parse("(%v / 10").is_err());
        assert!(Transform::parse("rpm * 2").is_err());
    }

    #[test]
    fn test_non_numeric_result_is_an_error() {
        let t = Transform::parse("%v > 10").unwrap();
        assert!(t.apply(11).is_err());
    }
}
