//! Runtime value model for template data.
//!
//! Data providers hand the engine [`Value`]s; dotted field paths like
//! `${emp.department.name}` resolve right-associatively, with map lookup
//! taking precedence over bean access.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;

/// Field access for opaque host objects exposed to templates.
///
/// Implement this for domain types that should be addressable from
/// `${item.field}` paths without being converted into a [`Value::Map`] first.
pub trait FieldAccess: Send + Sync {
    /// Return the named field, or `None` if the object has no such field.
    fn field(&self, name: &str) -> Option<Value>;
}

/// A runtime value yielded by a data provider.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDateTime),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, Value>),
    Seq(Vec<Value>),
    Bean(Arc<dyn FieldAccess>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Date(d) => write!(f, "Date({d})"),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Map(m) => f.debug_map().entries(m.iter()).finish(),
            Value::Seq(s) => f.debug_list().entries(s.iter()).finish(),
            Value::Bean(_) => write!(f, "Bean(..)"),
        }
    }
}

impl Value {
    /// Look up a single path segment: map lookup first, then bean access.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        match self {
            Value::Map(map) => map.get(name).cloned(),
            Value::Bean(bean) => bean.field(name),
            _ => None,
        }
    }

    /// Resolve a dotted path right-associatively: `a.b.c` looks up `a`, then
    /// `b` on the result, then `c` on that result.
    #[must_use]
    pub fn resolve_path(&self, path: &[String]) -> Option<Value> {
        let mut current = self.clone();
        for segment in path {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// The numeric interpretation of the value, if it has one.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => {
                #[allow(clippy::cast_precision_loss)]
                Some(*i as f64)
            }
            Value::Float(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Whether the numeric interpretation is a whole number.
    #[must_use]
    pub fn is_whole_number(&self) -> bool {
        match self {
            Value::Int(_) => true,
            Value::Float(v) => v.fract() == 0.0,
            _ => false,
        }
    }

    /// The textual rendering used when the value is substituted into a cell,
    /// a header/footer, or a chart label.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(v) => format_float(*v),
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Bytes(b) => format!("{} bytes", b.len()),
            Value::Seq(items) => items
                .iter()
                .map(Value::display_text)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Map(_) | Value::Bean(_) => String::new(),
        }
    }

    /// Serial-number representation of a date for spreadsheet storage.
    ///
    /// Day 0 of the 1900 system is 1899-12-30; the 1904 system starts at
    /// 1904-01-01.
    #[must_use]
    pub fn date_serial(date: &NaiveDateTime, date1904: bool) -> f64 {
        let epoch = if date1904 {
            chrono::NaiveDate::from_ymd_opt(1904, 1, 1)
        } else {
            chrono::NaiveDate::from_ymd_opt(1899, 12, 30)
        };
        let Some(epoch) = epoch.and_then(|d| d.and_hms_opt(0, 0, 0)) else {
            return 0.0;
        };
        let delta = *date - epoch;
        #[allow(clippy::cast_precision_loss)]
        let seconds = delta.num_seconds() as f64;
        seconds / 86_400.0
    }
}

/// Format a float without scientific notation surprises for typical data.
fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        return (v as i64).to_string();
    }
    v.to_string()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}
