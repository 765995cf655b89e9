//! Column filter and sort models, plus their translation into catalog
//! `where` / `order` expressions.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::domain::Direction;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

const OPEN_RANGE_START: &str = "0000-01-01 00:00:00";
const OPEN_RANGE_END: &str = "9999-12-31 23:59:59";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    Includes,
    Exact,
}

impl TextMatch {
    fn persisted_name(&self) -> &'static str {
        match self {
            TextMatch::Includes => "include",
            TextMatch::Exact => "exact",
        }
    }

    fn from_persisted_name(value: &str) -> Option<Self> {
        match value {
            "include" | "includes" => Some(TextMatch::Includes),
            "exact" => Some(TextMatch::Exact),
            _ => None,
        }
    }
}

/// Filter applied to a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    Text {
        value: String,
        match_type: TextMatch,
    },
    DateRange {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    NumericRange {
        lower: Option<f64>,
        upper: Option<f64>,
    },
}

impl FilterSpec {
    pub fn includes(value: impl Into<String>) -> Self {
        FilterSpec::Text {
            value: value.into(),
            match_type: TextMatch::Includes,
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        FilterSpec::Text {
            value: value.into(),
            match_type: TextMatch::Exact,
        }
    }

    pub fn date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        FilterSpec::DateRange { start, end }
    }

    pub fn numeric_range(lower: Option<f64>, upper: Option<f64>) -> Self {
        FilterSpec::NumericRange { lower, upper }
    }

    /// Collapses filters that select everything to `None`.
    pub fn normalized(self) -> Option<Self> {
        match self {
            FilterSpec::Text { value, match_type } => {
                if value.trim().is_empty() {
                    None
                } else {
                    Some(FilterSpec::Text { value, match_type })
                }
            }
            FilterSpec::DateRange { start, end } => {
                if start.is_none() && end.is_none() {
                    None
                } else {
                    Some(FilterSpec::DateRange { start, end })
                }
            }
            FilterSpec::NumericRange { lower, upper } => {
                let lower = lower.filter(|value| value.is_finite());
                let upper = upper.filter(|value| value.is_finite());
                if lower.is_none() && upper.is_none() {
                    None
                } else {
                    Some(FilterSpec::NumericRange { lower, upper })
                }
            }
        }
    }

    /// JSON shape stored in the persisted query string.
    pub fn to_persisted(&self) -> Value {
        match self {
            FilterSpec::Text { value, match_type } => json!({
                "value": value,
                "type": match_type.persisted_name(),
            }),
            FilterSpec::DateRange { start, end } => {
                let mut object = Map::new();
                if let Some(start) = start {
                    object.insert(
                        "startDate".to_string(),
                        Value::String(start.format(DATE_FORMAT).to_string()),
                    );
                }
                if let Some(end) = end {
                    object.insert(
                        "endDate".to_string(),
                        Value::String(end.format(DATE_FORMAT).to_string()),
                    );
                }
                Value::Object(object)
            }
            FilterSpec::NumericRange { lower, upper } => {
                let mut object = Map::new();
                if let Some(lower) = lower {
                    object.insert("lower".to_string(), json!(lower));
                }
                if let Some(upper) = upper {
                    object.insert("upper".to_string(), json!(upper));
                }
                Value::Object(object)
            }
        }
    }

    /// Reads the persisted JSON shape; anything unrecognised yields `None`.
    pub fn from_persisted(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        if let Some(raw) = object.get("value") {
            let text = match raw {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                _ => return None,
            };
            let match_type = match object.get("type") {
                None => TextMatch::Includes,
                Some(Value::String(name)) => TextMatch::from_persisted_name(name)?,
                Some(_) => return None,
            };
            return FilterSpec::Text {
                value: text,
                match_type,
            }
            .normalized();
        }

        if object.contains_key("startDate") || object.contains_key("endDate") {
            let start = object.get("startDate").and_then(parse_date_value);
            let end = object.get("endDate").and_then(parse_date_value);
            return FilterSpec::DateRange { start, end }.normalized();
        }

        if object.contains_key("lower") || object.contains_key("upper") {
            let lower = object.get("lower").and_then(Value::as_f64);
            let upper = object.get("upper").and_then(Value::as_f64);
            return FilterSpec::NumericRange { lower, upper }.normalized();
        }

        None
    }

    /// Operand of the catalog `where` expression for this filter.
    pub fn to_condition(&self) -> Value {
        match self {
            FilterSpec::Text {
                value,
                match_type: TextMatch::Includes,
            } => json!({ "like": value }),
            FilterSpec::Text {
                value,
                match_type: TextMatch::Exact,
            } => json!({ "eq": value }),
            FilterSpec::DateRange { start, end } => {
                let start = start
                    .map(|date| format!("{} 00:00:00", date.format(DATE_FORMAT)))
                    .unwrap_or_else(|| OPEN_RANGE_START.to_string());
                let end = end
                    .map(|date| format!("{} 23:59:59", date.format(DATE_FORMAT)))
                    .unwrap_or_else(|| OPEN_RANGE_END.to_string());
                json!({ "between": [start, end] })
            }
            FilterSpec::NumericRange { lower, upper } => match (lower, upper) {
                (Some(lower), Some(upper)) => json!({ "between": [lower, upper] }),
                (Some(lower), None) => json!({ "gte": lower }),
                (None, Some(upper)) => json!({ "lte": upper }),
                (None, None) => json!({}),
            },
        }
    }
}

impl Serialize for FilterSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_persisted().serialize(serializer)
    }
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_date)
}

/// Ordered multi-column sort. The first entry is the primary sort key and
/// every column appears at most once.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SortOrder(Vec<(String, Direction)>);

impl SortOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an order from pairs; a repeated column keeps its first position.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Direction)>,
        S: Into<String>,
    {
        let mut order = SortOrder::new();
        for (column, direction) in pairs {
            let column = column.into();
            if column.is_empty() || order.get(&column).is_some() {
                continue;
            }
            order.0.push((column, direction));
        }
        order
    }

    pub fn get(&self, column: &str) -> Option<Direction> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, direction)| *direction)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Direction)> {
        self.0
            .iter()
            .map(|(column, direction)| (column.as_str(), *direction))
    }

    pub fn columns(&self) -> Vec<&str> {
        self.0.iter().map(|(column, _)| column.as_str()).collect()
    }

    /// Replaces the whole order with a single column, or clears it.
    pub fn set_only(&mut self, column: &str, direction: Option<Direction>) {
        self.0.clear();
        if let Some(direction) = direction {
            self.0.push((column.to_string(), direction));
        }
    }

    /// Updates one column without disturbing the relative order of the others.
    /// A changed direction moves the column to the end.
    pub fn set_additive(&mut self, column: &str, direction: Option<Direction>) {
        if self.get(column) == direction {
            return;
        }
        self.0.retain(|(name, _)| name != column);
        if let Some(direction) = direction {
            self.0.push((column.to_string(), direction));
        }
    }

    /// `order` expressions for the catalog, primary column first.
    pub fn order_clauses(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(column, direction)| format!("{column} {direction}"))
            .collect()
    }
}
