use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
    #[error("document is not an object")]
    NotAnObject,
    #[error("missing field `{field}`")]
    MissingField { field: String },
    #[error("field `{field}` is not {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
}

/// A raw document as returned by a collection query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(value: Value) -> Result<Self, ProjectionError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(ProjectionError::NotAnObject),
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let value = serde_json::from_str::<Value>(raw.trim())?;
        Ok(Self::from_value(value)?)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    // Null counts as absent, the same way a missing key does.
    fn present(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &str) -> Result<&Value, ProjectionError> {
        self.present(field)
            .ok_or_else(|| ProjectionError::MissingField {
                field: field.to_string(),
            })
    }

    pub fn str_field(&self, field: &str) -> Result<String, ProjectionError> {
        let value = self.required(field)?;
        as_text(value).ok_or_else(|| wrong_type(field, "a string"))
    }

    pub fn opt_str_field(&self, field: &str) -> Result<Option<String>, ProjectionError> {
        match self.present(field) {
            None => Ok(None),
            Some(value) => as_text(value)
                .map(Some)
                .ok_or_else(|| wrong_type(field, "a string")),
        }
    }

    pub fn f64_field(&self, field: &str) -> Result<f64, ProjectionError> {
        let value = self.required(field)?;
        as_f64(value).ok_or_else(|| wrong_type(field, "a number"))
    }

    pub fn opt_f64_field(&self, field: &str) -> Result<Option<f64>, ProjectionError> {
        match self.present(field) {
            None => Ok(None),
            Some(value) => as_f64(value)
                .map(Some)
                .ok_or_else(|| wrong_type(field, "a number")),
        }
    }

    pub fn datetime_field(&self, field: &str) -> Result<DateTime<Utc>, ProjectionError> {
        let value = self.required(field)?;
        as_datetime(value).ok_or_else(|| wrong_type(field, "a date"))
    }

    pub fn array_field(&self, field: &str) -> Result<Vec<Document>, ProjectionError> {
        let value = self.required(field)?;
        let items = value
            .as_array()
            .ok_or_else(|| wrong_type(field, "an array"))?;
        items
            .iter()
            .map(|item| match item {
                Value::Object(map) => Ok(Document(map.clone())),
                _ => Err(wrong_type(field, "an array of objects")),
            })
            .collect()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn wrong_type(field: &str, expected: &'static str) -> ProjectionError {
    ProjectionError::WrongType {
        field: field.to_string(),
        expected,
    }
}

/// Identifiers show up as strings, integers or `{"$oid": ..}` depending on the writer.
fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(|x| x.as_str()).map(str::to_string),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(map) => ["$numberDouble", "$numberInt", "$numberLong", "$numberDecimal"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(as_f64),
        _ => None,
    }
}

fn as_datetime(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => parse_datetime(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::Object(map) => {
            if let Some(inner) = map.get("$date") {
                return as_datetime(inner);
            }
            map.get("$numberLong")
                .and_then(as_f64)
                .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
        }
        _ => None,
    }
}

pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Document, ProjectionError, parse_datetime};

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).expect("object")
    }

    #[test]
    fn missing_and_null_fields_report_missing() {
        let d = doc(json!({"a": null}));
        assert_eq!(
            d.str_field("a"),
            Err(ProjectionError::MissingField {
                field: "a".to_string()
            })
        );
        assert!(matches!(
            d.f64_field("b"),
            Err(ProjectionError::MissingField { .. })
        ));
        assert_eq!(d.opt_f64_field("a"), Ok(None));
    }

    #[test]
    fn wrong_types_are_named() {
        let d = doc(json!({"starting": 3, "odds1": "abc"}));
        assert_eq!(
            d.array_field("starting"),
            Err(ProjectionError::WrongType {
                field: "starting".to_string(),
                expected: "an array"
            })
        );
        assert!(matches!(
            d.f64_field("odds1"),
            Err(ProjectionError::WrongType { .. })
        ));
    }

    #[test]
    fn numeric_ids_read_as_text() {
        let d = doc(json!({"gameId": 1234, "oid": {"$oid": "65ab"}}));
        assert_eq!(d.str_field("gameId").unwrap(), "1234");
        assert_eq!(d.str_field("oid").unwrap(), "65ab");
    }

    #[test]
    fn dates_accept_extended_json_and_plain_strings() {
        let d = doc(json!({
            "a": {"$date": "2023-08-12T14:00:00Z"},
            "b": {"$date": {"$numberLong": "1691848800000"}},
            "c": "2023-08-12 14:00:00",
            "d": 1691848800000i64
        }));
        let expected = parse_datetime("2023-08-12T14:00:00Z").unwrap();
        assert_eq!(d.datetime_field("a").unwrap(), expected);
        assert_eq!(d.datetime_field("b").unwrap(), expected);
        assert_eq!(d.datetime_field("c").unwrap(), expected);
        assert_eq!(d.datetime_field("d").unwrap(), expected);
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(
            Document::from_value(json!([1, 2])),
            Err(ProjectionError::NotAnObject)
        );
    }
}
