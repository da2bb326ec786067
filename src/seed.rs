//! Seed specification parsing.
//!
//! Two textual forms are accepted:
//! - equality: `table.column=literal` (literal: quoted string, integer,
//!   decimal, true/false, null)
//! - predicate: `table:<where-fragment>` where the fragment is raw SQL
//!   embedded verbatim; the caller accepts injection responsibility
//!
//! Both parse into a canonical [`SeedPredicate`]. Table and column
//! existence is checked later against the introspected schema.

use crate::db::{SqlDialect, SqlValue};
use crate::error::{Result, SubsetError};

/// Canonical seed: a WHERE fragment plus bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedPredicate {
    pub table: String,
    /// Goes directly after `WHERE`
    pub sql_fragment: String,
    pub parameters: Vec<SqlValue>,
    /// Original text, kept for error reporting
    pub source: String,
}

/// Parse one seed specification.
pub fn parse(spec: &str) -> Result<SeedPredicate> {
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return Err(SubsetError::invalid_seed(spec, "seed is empty"));
    }

    // `table:WHERE` wins when the colon comes before any '='.
    if let Some(colon) = trimmed.find(':') {
        if !trimmed[..colon].contains('=') {
            let table = trimmed[..colon].trim();
            let fragment = trimmed[colon + 1..].trim();
            validate_ident(spec, table, "table")?;
            if fragment.is_empty() {
                return Err(SubsetError::invalid_seed(spec, "predicate is empty"));
            }
            return Ok(SeedPredicate {
                table: table.to_string(),
                sql_fragment: format!("({})", fragment),
                parameters: Vec::new(),
                source: trimmed.to_string(),
            });
        }
    }

    let Some(eq) = trimmed.find('=') else {
        return Err(SubsetError::invalid_seed(
            spec,
            "expected 'table.column=value' or 'table:WHERE_CLAUSE'",
        ));
    };
    let left = &trimmed[..eq];
    let literal = trimmed[eq + 1..].trim();

    let Some(dot) = left.rfind('.') else {
        return Err(SubsetError::invalid_seed(
            spec,
            "expected 'table.column=value' or 'table:WHERE_CLAUSE'",
        ));
    };
    let table = left[..dot].trim();
    let column = left[dot + 1..].trim();
    validate_ident(spec, table, "table")?;
    validate_ident(spec, column, "column")?;

    let value = parse_literal(spec, literal)?;
    let quoted = SqlDialect::Postgres.quote_ident(column);

    let (fragment, parameters) = if value.is_null() {
        // `= NULL` never matches; seeds on null need IS NULL
        (format!("{} IS NULL", quoted), Vec::new())
    } else {
        (format!("{} = $1", quoted), vec![value])
    };

    Ok(SeedPredicate {
        table: table.to_string(),
        sql_fragment: fragment,
        parameters,
        source: trimmed.to_string(),
    })
}

/// Parse every seed, preserving order.
pub fn parse_all(specs: &[String]) -> Result<Vec<SeedPredicate>> {
    specs.iter().map(|s| parse(s)).collect()
}

fn parse_literal(spec: &str, text: &str) -> Result<SqlValue> {
    if text.is_empty() {
        return Err(SubsetError::invalid_seed(spec, "missing literal value"));
    }

    if let Some(inner) = text.strip_prefix('\'') {
        let Some(inner) = inner.strip_suffix('\'') else {
            return Err(SubsetError::invalid_seed(spec, "unterminated string literal"));
        };
        return Ok(SqlValue::Text(inner.replace("''", "'")));
    }

    match text {
        "null" | "NULL" => return Ok(SqlValue::Null),
        "true" | "TRUE" => return Ok(SqlValue::Bool(true)),
        "false" | "FALSE" => return Ok(SqlValue::Bool(false)),
        _ => {}
    }

    if let Ok(int) = text.parse::<i64>() {
        return Ok(SqlValue::Int(int));
    }
    if text.parse::<f64>().is_ok() && text.contains('.') {
        return Ok(SqlValue::Decimal(text.to_string()));
    }

    Err(SubsetError::invalid_seed(
        spec,
        format!(
            "'{}' is not a literal; strings must be single-quoted",
            text
        ),
    ))
}

fn validate_ident(spec: &str, ident: &str, what: &str) -> Result<()> {
    let ok = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if ok {
        Ok(())
    } else {
        Err(SubsetError::invalid_seed(
            spec,
            format!("invalid {} name '{}'", what, ident),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_equality() {
        let seed = parse("orders.id=10").unwrap();
        assert_eq!(seed.table, "orders");
        assert_eq!(seed.sql_fragment, "\"id\" = $1");
        assert_eq!(seed.parameters, vec![SqlValue::Int(10)]);
    }

    #[test]
    fn parses_quoted_string_equality() {
        let seed = parse("users.email='a@b.c'").unwrap();
        assert_eq!(seed.parameters, vec![SqlValue::Text("a@b.c".to_string())]);
    }

    #[test]
    fn doubled_quotes_unescape() {
        let seed = parse("users.name='O''Brien'").unwrap();
        assert_eq!(seed.parameters, vec![SqlValue::Text("O'Brien".to_string())]);
    }

    #[test]
    fn parses_bool_decimal_and_null() {
        assert_eq!(
            parse("t.active=true").unwrap().parameters,
            vec![SqlValue::Bool(true)]
        );
        assert_eq!(
            parse("t.price=19.99").unwrap().parameters,
            vec![SqlValue::Decimal("19.99".to_string())]
        );

        let null_seed = parse("t.deleted_at=null").unwrap();
        assert_eq!(null_seed.sql_fragment, "\"deleted_at\" IS NULL");
        assert!(null_seed.parameters.is_empty());
    }

    #[test]
    fn parses_where_predicate() {
        let seed = parse("orders:created_at > '2024-01-01' AND total > 100").unwrap();
        assert_eq!(seed.table, "orders");
        assert_eq!(
            seed.sql_fragment,
            "(created_at > '2024-01-01' AND total > 100)"
        );
        assert!(seed.parameters.is_empty());
    }

    #[test]
    fn predicate_wins_when_colon_precedes_equals() {
        let seed = parse("orders:status = 'open'").unwrap();
        assert_eq!(seed.table, "orders");
        assert_eq!(seed.sql_fragment, "(status = 'open')");
    }

    #[test]
    fn rejects_bare_word_values() {
        let err = parse("users.email=bob@example.com").unwrap_err();
        assert!(matches!(err, SubsetError::InvalidSeed { .. }));
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(parse("").is_err());
        assert!(parse("users").is_err());
        assert!(parse("users.id").is_err());
        assert!(parse(".id=1").is_err());
        assert!(parse("users:").is_err());
        assert!(parse("bad name.id=1").is_err());
    }

    #[test]
    fn parse_all_preserves_order() {
        let seeds = parse_all(&["a.id=1".to_string(), "b.id=2".to_string()]).unwrap();
        assert_eq!(seeds[0].table, "a");
        assert_eq!(seeds[1].table, "b");
    }
}
