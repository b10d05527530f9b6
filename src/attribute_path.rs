use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize, Serializer};

use crate::attribute_value::AttributeValue;

#[derive(Clone, Hash, PartialEq, Eq, Debug, Serialize)]
enum Error {
    Empty,
    EmptyComponent,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Empty => write!(f, "Path cannot be empty"),
            Error::EmptyComponent => write!(f, "Path contains an empty or trailing component"),
        }
    }
}

/// Identifies a value within [crate::Attributes], possibly nested inside objects or arrays.
///
/// Paths are dot-delimited: the first component names a top-level attribute and each following
/// component is either the key of a nested object property or, when the value at that point is
/// an array, a zero-based element index.
///
/// This is represented as a separate type, rather than just a string, so that parsing happens
/// once when a condition or experiment is loaded, not on every evaluation.
///
/// # Example
/// ```
/// # use feature_evaluation::{Attributes, AttributePath, AttributeValue};
/// let attributes: Attributes = serde_json::from_str(
///     r#"{"id": "123", "company": {"address": {"city": "Westview"}}, "tags": ["a", "b"]}"#,
/// ).unwrap();
///
/// assert_eq!(attributes.get_value(&AttributePath::new("company.address.city")),
///     Some(&AttributeValue::String("Westview".to_owned())));
/// assert_eq!(attributes.get_value(&AttributePath::new("tags.1")),
///     Some(&AttributeValue::String("b".to_owned())));
/// assert_eq!(attributes.get_value(&AttributePath::new("company..city")), None);
/// ```
#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct AttributePath {
    variant: Variant,
    input: String,
}

#[derive(Clone, Hash, PartialEq, Eq, Debug)]
enum Variant {
    Components(Vec<String>),
    Error(Error),
}

impl Serialize for AttributePath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.input)
    }
}

impl<'de> Deserialize<'de> for AttributePath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(AttributePath::new(s))
    }
}

impl AttributePath {
    /// Construct a new attribute path.
    ///
    /// This constructor always returns a path that preserves the original string, even if
    /// validation fails, so that serializing it will produce the original string.
    pub fn new<S: AsRef<str>>(value: S) -> Self {
        let value = value.as_ref();

        if value.is_empty() {
            return Self {
                variant: Variant::Error(Error::Empty),
                input: value.to_owned(),
            };
        }

        let components = value.split('.').map(str::to_owned).collect::<Vec<_>>();
        let variant = if components.iter().any(String::is_empty) {
            Variant::Error(Error::EmptyComponent)
        } else {
            Variant::Components(components)
        };

        Self {
            variant,
            input: value.to_owned(),
        }
    }

    /// Returns true if the path is valid.
    pub fn is_valid(&self) -> bool {
        !matches!(&self.variant, Variant::Error(_))
    }

    /// If the path is invalid, this method returns an error description; otherwise, it
    /// returns an empty string.
    pub fn error(&self) -> String {
        match &self.variant {
            Variant::Error(e) => e.to_string(),
            _ => "".to_owned(),
        }
    }

    /// Returns the number of components in the path; zero for an invalid path.
    ///
    /// # Example
    /// ```
    /// # use feature_evaluation::AttributePath;
    /// assert_eq!(AttributePath::new("a").depth(), 1);
    /// assert_eq!(AttributePath::new("a.b").depth(), 2);
    /// assert_eq!(AttributePath::new("a.").depth(), 0);
    /// ```
    pub fn depth(&self) -> usize {
        match &self.variant {
            Variant::Components(components) => components.len(),
            Variant::Error(_) => 0,
        }
    }

    /// Retrieves a single component; None if the index is out of range or the path is invalid.
    pub fn component(&self, index: usize) -> Option<&str> {
        match &self.variant {
            Variant::Components(components) => components.get(index).map(|c| c.as_str()),
            Variant::Error(_) => None,
        }
    }

    /// Walks the path starting from a map of top-level attributes.
    pub(crate) fn resolve<'a>(
        &self,
        root: &'a HashMap<String, AttributeValue>,
    ) -> Option<&'a AttributeValue> {
        let components = match &self.variant {
            Variant::Components(components) => components,
            Variant::Error(_) => return None,
        };

        let (first, rest) = components.split_first()?;
        let mut value = root.get(first)?;
        for component in rest {
            value = match value {
                AttributeValue::Object(map) => map.get(component)?,
                AttributeValue::Array(items) => items.get(component.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }
}

impl Default for AttributePath {
    /// A default [AttributePath] is empty and invalid.
    fn default() -> Self {
        AttributePath::new("")
    }
}

/// Displays the input string used to construct the [AttributePath].
impl Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.input)
    }
}

impl<S> From<S> for AttributePath
where
    S: AsRef<str>,
{
    fn from(path: S) -> Self {
        AttributePath::new(path)
    }
}

impl From<AttributePath> for String {
    fn from(p: AttributePath) -> Self {
        p.input
    }
}
