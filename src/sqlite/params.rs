use std::collections::HashSet;

use rusqlite::Statement;

use crate::error::DbError;
use crate::types::Value;

/// Parameters bound to a prepared statement for one execution.
///
/// Positional parameters fill `?`/`?NNN` slots in order; named parameters are
/// matched by their full placeholder text (`:name`, `@name` or `$name`).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Build named parameters from `(placeholder, value)` pairs.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Convert request arguments from the presentation layer.
    ///
    /// # Errors
    /// Returns `DbError::ParameterError` if a JSON number cannot be represented.
    pub fn from_json(args: &[serde_json::Value]) -> Result<Self, DbError> {
        if args.is_empty() {
            return Ok(Params::None);
        }
        args.iter()
            .map(Value::from_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Params::Positional)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(v) => v.len(),
            Params::Named(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Params::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Params::Positional(values.into())
    }
}

impl From<&[Value]> for Params {
    fn from(values: &[Value]) -> Self {
        Params::Positional(values.to_vec())
    }
}

/// Bind every parameter slot of `stmt`.
///
/// Every slot must be covered exactly once so values from a previous execution
/// can never leak into this one.
pub(crate) fn bind_params(stmt: &mut Statement<'_>, params: &Params) -> Result<(), DbError> {
    let expected = stmt.parameter_count();
    match params {
        Params::None if expected == 0 => Ok(()),
        Params::None => Err(DbError::BindError(format!(
            "statement expects {expected} parameters, got 0"
        ))),
        Params::Positional(values) => {
            if values.len() != expected {
                return Err(DbError::BindError(format!(
                    "statement expects {expected} parameters, got {}",
                    values.len()
                )));
            }
            for (idx, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(idx + 1, value)?;
            }
            Ok(())
        }
        Params::Named(pairs) => {
            let mut seen = HashSet::with_capacity(pairs.len());
            for (name, value) in pairs {
                let idx = stmt.parameter_index(name)?.ok_or_else(|| {
                    DbError::BindError(format!("statement has no parameter named {name}"))
                })?;
                if !seen.insert(idx) {
                    return Err(DbError::BindError(format!(
                        "parameter {name} was supplied more than once"
                    )));
                }
                stmt.raw_bind_parameter(idx, value)?;
            }
            if seen.len() != expected {
                return Err(DbError::BindError(format!(
                    "statement expects {expected} parameters, got {}",
                    seen.len()
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_count_mismatch_is_a_bind_error() -> Result<(), Box<dyn std::error::Error>> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let mut stmt = conn.prepare("SELECT ?1 + ?2")?;
        let err = bind_params(&mut stmt, &Params::from(vec![Value::Integer(1)])).unwrap_err();
        assert!(matches!(err, DbError::BindError(_)));
        Ok(())
    }

    #[test]
    fn named_parameters_bind_by_placeholder() -> Result<(), Box<dyn std::error::Error>> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let mut stmt = conn.prepare("SELECT :a * :b")?;
        bind_params(&mut stmt, &Params::named([(":a", 6_i64), (":b", 7_i64)]))?;
        let mut rows = stmt.raw_query();
        let row = rows.next()?.expect("one row");
        assert_eq!(row.get::<_, i64>(0)?, 42);
        Ok(())
    }

    #[test]
    fn unknown_named_parameter_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let mut stmt = conn.prepare("SELECT :a")?;
        let err = bind_params(&mut stmt, &Params::named([(":zzz", 1_i64)])).unwrap_err();
        assert!(matches!(err, DbError::BindError(_)));
        Ok(())
    }

    #[test]
    fn json_arguments_become_positional() -> Result<(), DbError> {
        let params = Params::from_json(&[serde_json::json!("x"), serde_json::json!(3)])?;
        assert_eq!(
            params,
            Params::Positional(vec![Value::Text("x".into()), Value::Integer(3)])
        );
        assert_eq!(Params::from_json(&[])?, Params::None);
        Ok(())
    }
}
