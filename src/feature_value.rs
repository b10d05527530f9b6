use log::warn;
use serde::{Deserialize, Serialize};

// Largest magnitude at which every integer is exactly representable as an f64.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_991.0;

/// Truncates `f` to an integer, refusing magnitudes beyond 2^53 - 1 where the conversion would
/// no longer be exact.
pub(crate) fn f64_to_i64_safe(f: f64) -> Option<i64> {
    if f.abs() <= MAX_EXACT_INT {
        Some(f as i64)
    } else {
        None
    }
}

/// A value a feature can resolve to, or a variation of an experiment.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    #[default]
    Null,
    Bool(bool),
    Str(String),
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl From<bool> for FeatureValue {
    fn from(b: bool) -> FeatureValue {
        FeatureValue::Bool(b)
    }
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> FeatureValue {
        FeatureValue::Str(s.to_owned())
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> FeatureValue {
        FeatureValue::Str(s)
    }
}

impl From<f64> for FeatureValue {
    fn from(f: f64) -> FeatureValue {
        FeatureValue::Float(f)
    }
}

impl From<i64> for FeatureValue {
    fn from(i: i64) -> FeatureValue {
        FeatureValue::Int(i)
    }
}

impl From<serde_json::Value> for FeatureValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => FeatureValue::Null,
            Value::Bool(b) => b.into(),
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    f.into()
                } else if let Some(i) = n.as_i64() {
                    i.into()
                } else {
                    warn!("unrepresentable number {}, converting to string", n);
                    FeatureValue::Json(format!("{}", n).into())
                }
            }
            Value::String(s) => s.into(),
            Value::Object(_) | Value::Array(_) => FeatureValue::Json(v),
        }
    }
}

impl FeatureValue {
    /// Whether the value counts as "on": everything except `false`, zero, the empty string and
    /// null.
    pub fn is_truthy(&self) -> bool {
        use serde_json::Value;
        match self {
            FeatureValue::Null => false,
            FeatureValue::Bool(b) => *b,
            FeatureValue::Str(s) => !s.is_empty(),
            FeatureValue::Float(f) => *f != 0.0 && !f.is_nan(),
            FeatureValue::Int(i) => *i != 0,
            FeatureValue::Json(v) => match v {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
                Value::String(s) => !s.is_empty(),
                Value::Array(_) | Value::Object(_) => true,
            },
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FeatureValue::Null | FeatureValue::Json(serde_json::Value::Null))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Bool(b) => Some(*b),
            _ => {
                warn!("value type is not bool but {:?}", self);
                None
            }
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            FeatureValue::Str(s) => Some(s.clone()),
            _ => {
                warn!("value type is not str but {:?}", self);
                None
            }
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(f) => Some(*f),
            FeatureValue::Int(i) => Some(*i as f64),
            _ => {
                warn!("value type is not float but {:?}", self);
                None
            }
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(i) => Some(*i),
            FeatureValue::Float(f) => f64_to_i64_safe(*f),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        match self {
            FeatureValue::Null => Some(Value::Null),
            FeatureValue::Bool(b) => Some(Value::from(*b)),
            FeatureValue::Str(s) => Some(Value::from(s.as_str())),
            FeatureValue::Float(f) => Some(Value::from(*f)),
            FeatureValue::Int(i) => Some(Value::from(*i)),
            FeatureValue::Json(v) => Some(v.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn float_bounds() {
        let test_cases = vec![
            (1.99, Some(1)),
            (9007199254740990.0, Some(9007199254740990)),
            (9007199254740991.0, Some(9007199254740991)),
            (9007199254740992.0, None),
            (-1.99, Some(-1)),
            (-9007199254740991.0, Some(-9007199254740991)),
            (-9007199254740992.0, None),
        ];
        for (have, expect) in test_cases {
            assert_that!(FeatureValue::Float(have).as_int()).is_equal_to(expect);
        }
    }

    #[test_case(json!(null), false; "null value")]
    #[test_case(json!(false), false; "false value")]
    #[test_case(json!(true), true; "true value")]
    #[test_case(json!(0), false; "zero")]
    #[test_case(json!(-0.0), false; "negative zero")]
    #[test_case(json!(1), true; "one")]
    #[test_case(json!(-3.5), true; "negative float")]
    #[test_case(json!(""), false; "empty string")]
    #[test_case(json!("0"), true; "string zero")]
    #[test_case(json!("false"), true; "string false")]
    #[test_case(json!([]), true; "empty array")]
    #[test_case(json!({}), true; "empty object")]
    fn truthiness(value: serde_json::Value, expected: bool) {
        assert_that!(FeatureValue::from(value).is_truthy()).is_equal_to(expected);
    }

    #[test]
    fn nan_is_falsy() {
        assert!(!FeatureValue::Float(f64::NAN).is_truthy());
    }

    #[test]
    fn deserialization() {
        let parse = |s: &str| serde_json::from_str::<FeatureValue>(s).unwrap();

        assert_that!(parse("null")).is_equal_to(FeatureValue::Null);
        assert_that!(parse("true")).is_equal_to(FeatureValue::Bool(true));
        assert_that!(parse(r#""blue""#)).is_equal_to(FeatureValue::from("blue"));
        assert_that!(parse("2")).is_equal_to(FeatureValue::Float(2.0));
        assert_that!(parse(r#"{"a":1}"#)).is_equal_to(FeatureValue::Json(json!({"a": 1})));
    }
}
