//! Column naming and type inference for delimited loads

use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

/// Postgres identifiers are truncated past this length
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Double,
    Boolean,
    Date,
    Text,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Text => "TEXT",
        }
    }

    /// Map an `information_schema.columns.data_type` value
    pub fn from_data_type(data_type: &str) -> Option<Self> {
        match data_type {
            "bigint" => Some(ColumnType::BigInt),
            "double precision" => Some(ColumnType::Double),
            "boolean" => Some(ColumnType::Boolean),
            "date" => Some(ColumnType::Date),
            "text" | "character varying" => Some(ColumnType::Text),
            _ => None,
        }
    }

    fn accepts(&self, value: &str) -> bool {
        match self {
            ColumnType::BigInt => !has_leading_zero(value) && value.parse::<i64>().is_ok(),
            ColumnType::Double => {
                !has_leading_zero(value) && value.parse::<f64>().is_ok_and(f64::is_finite)
            },
            ColumnType::Boolean => matches!(value.to_lowercase().as_str(), "true" | "false"),
            ColumnType::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
            ColumnType::Text => true,
        }
    }
}

/// `007`, `-01.5`: codes whose zeros a numeric column would drop
fn has_leading_zero(value: &str) -> bool {
    let digits = value.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(value);
    let mut chars = digits.chars();
    chars.next() == Some('0') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Narrowest type accepting every non-empty value; all-empty columns are text
pub fn infer_type<'a>(values: impl IntoIterator<Item = &'a str>) -> ColumnType {
    let mut candidates = vec![
        ColumnType::BigInt,
        ColumnType::Double,
        ColumnType::Boolean,
        ColumnType::Date,
    ];
    let mut seen = false;

    for value in values.into_iter().map(str::trim).filter(|v| !v.is_empty()) {
        seen = true;
        candidates.retain(|c| c.accepts(value));
        if candidates.is_empty() {
            return ColumnType::Text;
        }
    }

    if !seen {
        return ColumnType::Text;
    }
    candidates.first().copied().unwrap_or(ColumnType::Text)
}

fn column_values(rows: &[Vec<String>], index: usize) -> impl Iterator<Item = &str> {
    rows.iter().filter_map(move |row| row.get(index).map(String::as_str))
}

/// Infer one type per column over all rows
pub fn infer_columns(rows: &[Vec<String>], column_count: usize) -> Vec<ColumnType> {
    (0..column_count)
        .map(|i| infer_type(column_values(rows, i)))
        .collect()
}

/// A file that does not fit the destination table's existing columns
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaMismatch {
    #[error("Column \"{column}\" is {existing} in the destination table; value \"{value}\" does not fit")]
    Incompatible {
        column: String,
        existing: &'static str,
        value: String,
    },

    #[error("Column \"{column}\" has unsupported destination type {data_type}")]
    Unsupported { column: String, data_type: String },
}

/// Final column types for inserting `rows` into a table that may already exist
///
/// `existing` maps column name to its `information_schema` data type. Existing
/// columns keep their type when every value fits it; new columns use the
/// inferred type.
pub fn reconcile_types(
    columns: &[String],
    inferred: &[ColumnType],
    existing: &HashMap<String, String>,
    rows: &[Vec<String>],
) -> Result<Vec<ColumnType>, SchemaMismatch> {
    columns
        .iter()
        .zip(inferred)
        .enumerate()
        .map(|(i, (column, inferred))| {
            let Some(data_type) = existing.get(column) else {
                return Ok(*inferred);
            };
            let ty = ColumnType::from_data_type(data_type).ok_or_else(|| {
                SchemaMismatch::Unsupported {
                    column: column.clone(),
                    data_type: data_type.clone(),
                }
            })?;

            let rejected = column_values(rows, i)
                .map(str::trim)
                .find(|v| !v.is_empty() && !ty.accepts(v));
            match rejected {
                Some(value) => Err(SchemaMismatch::Incompatible {
                    column: column.clone(),
                    existing: ty.sql_name(),
                    value: value.to_string(),
                }),
                None => Ok(ty),
            }
        })
        .collect()
}

/// Lowercase snake-case identifier, or `None` when nothing usable is left
pub fn sanitize_identifier(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }

    let mut out = out.trim_matches('_').to_string();
    if out.is_empty() {
        return None;
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out.truncate(MAX_IDENTIFIER_LEN);
    Some(out)
}

/// Column names for a header row: sanitized, unique, never empty
pub fn column_names(headers: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(headers.len());
    for (i, header) in headers.iter().enumerate() {
        let base = sanitize_identifier(header).unwrap_or_else(|| format!("column_{}", i + 1));
        let mut name = base.clone();
        let mut n = 2;
        while names.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        names.push(name);
    }
    names
}

/// Identifiers coming from configuration must already be clean
pub fn is_valid_identifier(name: &str) -> bool {
    sanitize_identifier(name).as_deref() == Some(name)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type(["1", "42", ""]), ColumnType::BigInt);
        assert_eq!(infer_type(["1", "4.5"]), ColumnType::Double);
        assert_eq!(infer_type(["true", "FALSE"]), ColumnType::Boolean);
        assert_eq!(infer_type(["2025-11-15", "2025-11-16"]), ColumnType::Date);
        assert_eq!(infer_type(["2025-11-15", "n/a"]), ColumnType::Text);
        assert_eq!(infer_type(["", " "]), ColumnType::Text);
        assert_eq!(infer_type(["NaN"]), ColumnType::Text);
    }

    #[test]
    fn test_leading_zeros_stay_text() {
        assert_eq!(infer_type(["007", "012"]), ColumnType::Text);
        assert_eq!(infer_type(["12", "007"]), ColumnType::Text);
        assert_eq!(infer_type(["-01.5"]), ColumnType::Text);
        assert_eq!(infer_type(["0", "-0", "10"]), ColumnType::BigInt);
        assert_eq!(infer_type(["0.5", "-0.25"]), ColumnType::Double);
    }

    #[test]
    fn test_reconcile_types_follows_existing_columns() {
        let columns = vec!["payment_id".to_string(), "amount".to_string(), "note".to_string()];
        let existing = HashMap::from([
            ("payment_id".to_string(), "bigint".to_string()),
            ("amount".to_string(), "double precision".to_string()),
        ]);

        // Integral amounts still go into the DOUBLE PRECISION column
        let rows = vec![vec!["3".to_string(), "12".to_string(), "ok".to_string()]];
        let inferred = infer_columns(&rows, 3);
        assert_eq!(inferred[1], ColumnType::BigInt);
        assert_eq!(
            reconcile_types(&columns, &inferred, &existing, &rows).unwrap(),
            vec![ColumnType::BigInt, ColumnType::Double, ColumnType::Text]
        );
    }

    #[test]
    fn test_reconcile_types_rejects_values_that_do_not_fit() {
        let columns = vec!["amount".to_string()];
        let existing = HashMap::from([("amount".to_string(), "bigint".to_string())]);
        let rows = vec![vec!["10".to_string()], vec!["10.5".to_string()]];

        let err = reconcile_types(&columns, &infer_columns(&rows, 1), &existing, &rows).unwrap_err();
        assert_eq!(
            err,
            SchemaMismatch::Incompatible {
                column: "amount".to_string(),
                existing: "BIGINT",
                value: "10.5".to_string(),
            }
        );
        assert!(err.to_string().contains("\"amount\""));

        let existing = HashMap::from([("amount".to_string(), "numeric".to_string())]);
        assert!(matches!(
            reconcile_types(&columns, &[ColumnType::Double], &existing, &rows),
            Err(SchemaMismatch::Unsupported { .. })
        ));
    }

    #[test]
    fn test_column_names() {
        let headers = vec![
            "Member ID".to_string(),
            "member-id".to_string(),
            "".to_string(),
            "2nd Amount ($)".to_string(),
        ];
        assert_eq!(
            column_names(&headers),
            vec!["member_id", "member_id_2", "column_3", "_2nd_amount"]
        );
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("payments_raw"));
        assert!(!is_valid_identifier("payments raw"));
        assert!(!is_valid_identifier("Payments"));
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
