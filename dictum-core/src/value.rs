//! Column values, logical types, and wire formatting

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

/// Column name to value map. This is the shape of every record on the wire.
pub type ValueMap = BTreeMap<String, Value>;

const NAIVE_DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Guid,
    Json,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::String => "string",
            LogicalType::Integer => "integer",
            LogicalType::Decimal => "decimal",
            LogicalType::Boolean => "boolean",
            LogicalType::Date => "date",
            LogicalType::DateTime => "datetime",
            LogicalType::Guid => "guid",
            LogicalType::Json => "json",
        };
        f.write_str(name)
    }
}

impl LogicalType {
    /// Coerce a scalar value into this logical type.
    ///
    /// Null always passes through. Empty strings become null for every type
    /// except `String`, which is how CSV cells arrive.
    pub fn coerce(&self, field: &str, value: &Value) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if let Value::String(s) = value {
            if s.trim().is_empty() && *self != LogicalType::String {
                return Ok(Value::Null);
            }
        }

        let invalid = |reason: String| ValidationError::InvalidValue {
            field: field.to_string(),
            reason,
        };

        match self {
            LogicalType::Json => Ok(value.clone()),
            LogicalType::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(invalid(format!("expected {}, got {}", self, value))),
            },
            LogicalType::Integer => match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(Value::from(i))
                    } else {
                        match n.as_f64() {
                            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                                Ok(Value::from(f as i64))
                            }
                            _ => Err(invalid(format!("{} is not an integer", n))),
                        }
                    }
                }
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| invalid(format!("'{}' is not an integer", s))),
                _ => Err(invalid(format!("expected {}, got {}", self, value))),
            },
            LogicalType::Decimal => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| invalid(format!("'{}' is not a decimal", s))),
                _ => Err(invalid(format!("expected {}, got {}", self, value))),
            },
            LogicalType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(invalid(format!("{} is not a boolean", n))),
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "y" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "n" => Ok(Value::Bool(false)),
                    _ => Err(invalid(format!("'{}' is not a boolean", s))),
                },
                _ => Err(invalid(format!("expected {}, got {}", self, value))),
            },
            LogicalType::Date => match value {
                Value::String(s) => {
                    let s = s.trim();
                    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                        return Ok(Value::String(date.format("%Y-%m-%d").to_string()));
                    }
                    DateTime::parse_from_rfc3339(s)
                        .map(|dt| Value::String(dt.date_naive().format("%Y-%m-%d").to_string()))
                        .map_err(|_| invalid(format!("'{}' is not a date", s)))
                }
                _ => Err(invalid(format!("expected {}, got {}", self, value))),
            },
            LogicalType::DateTime => match value {
                Value::String(s) => {
                    let s = s.trim();
                    if let Some(dt) = parse_wire_date(s) {
                        return Ok(date_value(&dt));
                    }
                    NAIVE_DATETIME_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                        .map(|naive| Value::String(naive.format("%Y-%m-%dT%H:%M:%S").to_string()))
                        .ok_or_else(|| invalid(format!("'{}' is not a datetime", s)))
                }
                _ => Err(invalid(format!("expected {}, got {}", self, value))),
            },
            LogicalType::Guid => match value {
                Value::String(s) => Uuid::parse_str(s.trim())
                    .map(|id| Value::String(id.hyphenated().to_string()))
                    .map_err(|e| invalid(format!("'{}' is not a guid: {}", s, e))),
                _ => Err(invalid(format!("expected {}, got {}", self, value))),
            },
        }
    }

    /// Parse a server-generated key carried in a status message.
    pub fn parse_key(&self, raw: &str) -> Value {
        let raw = raw.trim();
        match self {
            LogicalType::Integer => raw
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            LogicalType::Guid => Uuid::parse_str(raw)
                .map(|id| Value::String(id.hyphenated().to_string()))
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            _ => Value::String(raw.to_string()),
        }
    }
}

/// Format a timestamp for the wire, always with an explicit offset.
///
/// UTC values are written as `+00:00` rather than `Z` so the server can tell
/// a wall-clock-local value apart from a normalized one.
pub fn date_value<Tz: TimeZone>(dt: &DateTime<Tz>) -> Value
where
    Tz::Offset: fmt::Display,
{
    Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, false))
}

/// Parse an RFC 3339 timestamp, keeping the sender's offset.
pub fn parse_wire_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_date_value_keeps_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let dt = offset.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(date_value(&dt), json!("2024-03-01T09:30:00.000+02:00"));

        let utc = Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap();
        assert_eq!(date_value(&utc), json!("2024-03-01T07:30:00.000+00:00"));
    }

    #[test]
    fn test_parse_wire_date_roundtrip_offset() {
        let parsed = parse_wire_date("2024-03-01T09:30:00.000+02:00").unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_coerce_integer_from_csv_string() {
        let v = LogicalType::Integer.coerce("Qty", &json!(" 42 ")).unwrap();
        assert_eq!(v, json!(42));
        assert!(LogicalType::Integer.coerce("Qty", &json!("4.5")).is_err());
        assert_eq!(LogicalType::Integer.coerce("Qty", &json!(3.0)).unwrap(), json!(3));
    }

    #[test]
    fn test_coerce_empty_string_is_null_except_for_strings() {
        assert_eq!(LogicalType::Decimal.coerce("Price", &json!("")).unwrap(), Value::Null);
        assert_eq!(LogicalType::String.coerce("Name", &json!("")).unwrap(), json!(""));
    }

    #[test]
    fn test_coerce_boolean_variants() {
        assert_eq!(LogicalType::Boolean.coerce("Active", &json!("Yes")).unwrap(), json!(true));
        assert_eq!(LogicalType::Boolean.coerce("Active", &json!(0)).unwrap(), json!(false));
        assert!(LogicalType::Boolean.coerce("Active", &json!("maybe")).is_err());
    }

    #[test]
    fn test_coerce_date_and_datetime() {
        assert_eq!(
            LogicalType::Date.coerce("Born", &json!("2020-02-29")).unwrap(),
            json!("2020-02-29")
        );
        assert_eq!(
            LogicalType::DateTime.coerce("At", &json!("2024-01-01 10:00:00")).unwrap(),
            json!("2024-01-01T10:00:00")
        );
        assert_eq!(
            LogicalType::DateTime
                .coerce("At", &json!("2024-01-01T10:00:00-05:00"))
                .unwrap(),
            json!("2024-01-01T10:00:00.000-05:00")
        );
    }

    #[test]
    fn test_parse_key_by_type() {
        assert_eq!(LogicalType::Integer.parse_key("42"), json!(42));
        assert_eq!(LogicalType::String.parse_key("A-1"), json!("A-1"));
    }
}
