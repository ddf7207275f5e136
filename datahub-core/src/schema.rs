//! Column schema inference for tabular rows.
//!
//! The first row is the header. Each column gets the narrowest type that every
//! non-empty value in it satisfies, tried in the order integer, number,
//! boolean, date; anything else is a string.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Number,
    Boolean,
    Date,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub format: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    /// Infer a schema from `rows`, where `rows[0]` is the header.
    pub fn infer(rows: &[Vec<String>]) -> Schema {
        let Some((header, data)) = rows.split_first() else {
            return Schema::default();
        };
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let fields = (0..width)
            .map(|col| {
                let name = header
                    .get(col)
                    .map(|h| h.trim())
                    .filter(|h| !h.is_empty())
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("field{}", col + 1));
                let values = data
                    .iter()
                    .filter_map(|row| row.get(col))
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty());
                Field {
                    name,
                    field_type: infer_type(values),
                    format: "default".to_string(),
                }
            })
            .collect();
        Schema { fields }
    }

    /// Spreadsheet numbers are floats, so an `integer` column is reported as `number`.
    pub fn numbers_as_floats(mut self) -> Schema {
        for field in &mut self.fields {
            if field.field_type == FieldType::Integer {
                field.field_type = FieldType::Number;
            }
        }
        self
    }
}

fn infer_type<'a>(values: impl Iterator<Item = &'a str> + Clone) -> FieldType {
    if values.clone().next().is_none() {
        return FieldType::String;
    }
    let all = |check: fn(&str) -> bool| values.clone().all(check);
    if all(is_integer) {
        FieldType::Integer
    } else if all(is_number) {
        FieldType::Number
    } else if all(is_boolean) {
        FieldType::Boolean
    } else if all(is_date) {
        FieldType::Date
    } else {
        FieldType::String
    }
}

fn is_integer(value: &str) -> bool {
    value.parse::<i64>().is_ok()
}

fn is_number(value: &str) -> bool {
    value
        .parse::<f64>()
        .map(|n| n.is_finite())
        .unwrap_or(false)
}

fn is_boolean(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no"
    )
}

fn is_date(value: &str) -> bool {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"))
        .is_match(value)
}
