use std::cmp::Ordering;
use std::collections::HashMap;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attribute_path::AttributePath;
use crate::feature_value::f64_to_i64_safe;

lazy_static! {
    static ref VERSION_NUMERIC_COMPONENTS_REGEX: Regex =
        Regex::new(r"^\d+(\.\d+)?(\.\d+)?").unwrap();
}

/// An attribute value represents possible values that can be stored in [Attributes], or used as
/// an operand inside a [crate::Condition].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Stores a string value.
    String(String),
    /// Stores an array of attribute values.
    Array(Vec<AttributeValue>),
    /// Stores a number.
    Number(f64),
    /// Stores a boolean.
    Bool(bool),
    /// Stores a map of attribute values.
    Object(HashMap<String, AttributeValue>),
    /// Stores a null value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> AttributeValue {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> AttributeValue {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Number(i as f64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Number(f)
    }
}

impl<T> From<Vec<T>> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from(v: Vec<T>) -> AttributeValue {
        v.into_iter().collect()
    }
}

impl<S, T> From<HashMap<S, T>> for AttributeValue
where
    String: From<S>,
    AttributeValue: From<T>,
{
    fn from(hashmap: HashMap<S, T>) -> AttributeValue {
        hashmap.into_iter().collect()
    }
}

impl<T> FromIterator<T> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        AttributeValue::Array(iter.into_iter().map(AttributeValue::from).collect())
    }
}

impl<S, T> FromIterator<(S, T)> for AttributeValue
where
    String: From<S>,
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        AttributeValue::Object(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&Value> for AttributeValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => match n.as_f64() {
                Some(float) => AttributeValue::Number(float),
                None => {
                    warn!("could not interpret '{:?}' as f64", n);
                    AttributeValue::String(n.to_string())
                }
            },
            Value::String(str) => AttributeValue::String(str.clone()),
            Value::Array(arr) => {
                AttributeValue::Array(arr.iter().map(AttributeValue::from).collect())
            }
            Value::Object(obj) => {
                AttributeValue::Object(obj.iter().map(|(k, v)| (k.into(), v.into())).collect())
            }
        }
    }
}

/// The type names understood by the `$type` condition operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
    Undefined,
}

impl ValueType {
    pub(crate) fn parse(name: &str) -> Option<ValueType> {
        Some(match name {
            "string" => ValueType::String,
            "number" => ValueType::Number,
            "boolean" => ValueType::Boolean,
            "array" => ValueType::Array,
            "object" => ValueType::Object,
            "null" => ValueType::Null,
            "undefined" => ValueType::Undefined,
            _ => return None,
        })
    }

    /// Returns the type of an attribute; a missing attribute is `Undefined`.
    pub fn of(value: Option<&AttributeValue>) -> ValueType {
        match value {
            None => ValueType::Undefined,
            Some(AttributeValue::String(_)) => ValueType::String,
            Some(AttributeValue::Number(_)) => ValueType::Number,
            Some(AttributeValue::Bool(_)) => ValueType::Boolean,
            Some(AttributeValue::Array(_)) => ValueType::Array,
            Some(AttributeValue::Object(_)) => ValueType::Object,
            Some(AttributeValue::Null) => ValueType::Null,
        }
    }
}

impl AttributeValue {
    /// Returns None unless self is a String. It will not convert.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the wrapped value as a float for numeric types, and None otherwise.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns None unless self is a bool. It will not convert.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Compares two values for the ordering operators.
    ///
    /// Numbers compare numerically and strings lexically. A numeric string compared against a
    /// number is converted first. Every other combination is unordered.
    pub(crate) fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (AttributeValue::Number(l), AttributeValue::Number(r)) => l.partial_cmp(r),
            (AttributeValue::String(l), AttributeValue::String(r)) => Some(l.cmp(r)),
            (AttributeValue::Number(l), AttributeValue::String(r)) => {
                l.partial_cmp(&r.trim().parse::<f64>().ok()?)
            }
            (AttributeValue::String(l), AttributeValue::Number(r)) => {
                l.trim().parse::<f64>().ok()?.partial_cmp(r)
            }
            _ => None,
        }
    }

    /// Attempt to parse a string attribute into a semver version.
    ///
    /// A leading `v` is ignored, missing minor and patch components are filled in with zeroes,
    /// and build metadata is dropped. It will return None if it cannot parse it, or for
    /// non-string attributes.
    pub fn as_semver(&self) -> Option<semver::Version> {
        let version_str = self.as_str()?.trim();
        let version_str = version_str.strip_prefix('v').unwrap_or(version_str);
        semver::Version::parse(version_str)
            .ok()
            .or_else(|| AttributeValue::parse_semver_loose(version_str))
            .map(|mut version| {
                version.build = semver::BuildMetadata::EMPTY;
                version
            })
    }

    fn parse_semver_loose(version_str: &str) -> Option<semver::Version> {
        let parts = VERSION_NUMERIC_COMPONENTS_REGEX.captures(version_str)?;

        let numeric_parts = parts.get(0)?;
        let mut transformed_version_str = numeric_parts.as_str().to_string();

        for i in 1..parts.len() {
            if parts.get(i).is_none() {
                transformed_version_str.push_str(".0");
            }
        }

        let rest = &version_str[numeric_parts.end()..];
        transformed_version_str.push_str(rest);

        semver::Version::parse(&transformed_version_str).ok()
    }

    /// Follows `path` into nested objects and arrays.
    pub fn get_path(&self, path: &AttributePath) -> Option<&AttributeValue> {
        match self {
            AttributeValue::Object(map) => path.resolve(map),
            _ => None,
        }
    }

    /// Returns the string an attribute contributes to a bucketing hash, or None when the value
    /// cannot identify a subject (empty strings, null, arrays and objects).
    #[allow(clippy::float_cmp)]
    pub(crate) fn as_hashable(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) if s.is_empty() => None,
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Number(f) => match f64_to_i64_safe(*f) {
                Some(i) if i as f64 == *f => Some(i.to_string()),
                _ if f.is_finite() => Some(format_number(*f)),
                _ => None,
            },
            AttributeValue::Bool(b) => Some(b.to_string()),
            AttributeValue::Array(_) | AttributeValue::Object(_) | AttributeValue::Null => None,
        }
    }
}

/// Formats a finite number the way ECMAScript's `Number.prototype.toString` does: shortest
/// round-trip digits, positional between 1e-7 and 1e21, exponent notation (`1e-7`, `1.5e+21`)
/// outside that range.
fn format_number(f: f64) -> String {
    let sign = if f < 0.0 { "-" } else { "" };
    let scientific = format!("{:e}", f.abs());
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    // Position of the decimal point relative to the start of `digits`.
    let n = exponent + 1;

    let body = if k <= n && n <= 21 {
        format!("{}{}", digits, "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int_part, fraction) = digits.split_at(n as usize);
        format!("{}.{}", int_part, fraction)
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat((-n) as usize), digits)
    } else {
        let (first, rest) = digits.split_at(1);
        let point = if rest.is_empty() { "" } else { "." };
        let exponent_sign = if n > 0 { "+" } else { "-" };
        format!("{}{}{}e{}{}", first, point, rest, exponent_sign, (n - 1).abs())
    };
    format!("{}{}", sign, body)
}

/// The attributes describing the subject of an evaluation.
///
/// Attributes are always replaced wholesale; the engine never merges two sets.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Attributes(HashMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value at `path`, if any.
    pub fn get_value(&self, path: &AttributePath) -> Option<&AttributeValue> {
        path.resolve(&self.0)
    }

    pub fn as_map(&self) -> &HashMap<String, AttributeValue> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, AttributeValue>> for Attributes {
    fn from(map: HashMap<String, AttributeValue>) -> Self {
        Attributes(map)
    }
}

impl<S, T> FromIterator<(S, T)> for Attributes
where
    String: From<S>,
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Attributes(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
