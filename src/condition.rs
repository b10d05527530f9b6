use std::cmp::Ordering;
use std::collections::HashMap;

use itertools::Itertools;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::attribute_path::AttributePath;
use crate::attribute_value::{AttributeValue, Attributes, ValueType};

/// A declarative predicate over [Attributes].
///
/// Conditions are written as JSON documents in a MongoDB-like query language, for example
/// `{"country": {"$in": ["US", "CA"]}, "$or": [{"plan": "pro"}, {"age": {"$gte": 21}}]}`. The
/// document is compiled once, when the condition is constructed or deserialized; any part that is
/// malformed compiles to a predicate that never matches, so evaluation itself cannot fail.
#[derive(Clone, Debug)]
pub struct Condition {
    source: Value,
    root: Node,
}

impl Condition {
    /// Returns true if `attributes` satisfy the condition.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.root.eval(attributes.as_map())
    }

    /// The JSON document this condition was compiled from.
    pub fn source(&self) -> &Value {
        &self.source
    }
}

impl From<Value> for Condition {
    fn from(source: Value) -> Self {
        let root = Node::parse(&source);
        Condition { source, root }
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.source.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Condition::from)
    }
}

/// A regular expression that keeps its source text; an invalid expression never matches.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    regex: Option<Regex>,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let regex = match Regex::new(&source) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Invalid regex ({}): {}", e, source);
                None
            }
        };
        Pattern { source, regex }
    }

    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.as_ref().map_or(false, |re| re.is_match(text))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Pattern::new)
    }
}

#[derive(Clone, Debug)]
enum Node {
    All(Vec<Node>),
    Any(Vec<Node>),
    NoneOf(Vec<Node>),
    Not(Box<Node>),
    Field {
        path: AttributePath,
        predicate: Predicate,
    },
    Malformed,
}

/// What an attribute value is tested against: either a literal it must equal, or a set of
/// operators that must all hold.
#[derive(Clone, Debug)]
enum Predicate {
    Literal(AttributeValue),
    Operators(Vec<Op>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Comparison {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

#[derive(Clone, Debug)]
enum ElemMatch {
    Value(Box<Predicate>),
    Nested(Box<Node>),
}

#[derive(Clone, Debug)]
enum Op {
    Eq(AttributeValue),
    Ne(AttributeValue),
    Order(Comparison, AttributeValue),
    Version(Comparison, Option<semver::Version>),
    Regex(Pattern),
    In(Vec<AttributeValue>),
    Nin(Vec<AttributeValue>),
    All(Vec<Predicate>),
    ElemMatch(ElemMatch),
    Size(Box<Predicate>),
    Exists(bool),
    Type(Option<ValueType>),
    Not(Box<Predicate>),
    Unsupported,
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl Node {
    fn parse(value: &Value) -> Node {
        let map = match value {
            Value::Object(map) => map,
            other => {
                warn!("condition must be an object, got {}", other);
                return Node::Malformed;
            }
        };

        let mut nodes = map
            .iter()
            .map(|(key, value)| match key.as_str() {
                "$or" => Node::parse_list(value).map_or(Node::Malformed, Node::Any),
                "$nor" => Node::parse_list(value).map_or(Node::Malformed, Node::NoneOf),
                "$and" => Node::parse_list(value).map_or(Node::Malformed, Node::All),
                "$not" => Node::Not(Box::new(Node::parse(value))),
                path => match AttributePath::new(path) {
                    path if path.is_valid() => Node::Field {
                        path,
                        predicate: Predicate::parse(value),
                    },
                    path => {
                        warn!("invalid attribute path '{}': {}", path, path.error());
                        Node::Malformed
                    }
                },
            })
            .collect::<Vec<_>>();

        if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Node::All(nodes)
        }
    }

    fn parse_list(value: &Value) -> Option<Vec<Node>> {
        match value {
            Value::Array(items) => Some(items.iter().map(Node::parse).collect()),
            other => {
                warn!("logical operator expects an array of conditions, got {}", other);
                None
            }
        }
    }

    fn eval(&self, root: &HashMap<String, AttributeValue>) -> bool {
        match self {
            Node::All(nodes) => nodes.iter().all(|n| n.eval(root)),
            // an empty $or places no restriction
            Node::Any(nodes) => nodes.is_empty() || nodes.iter().any(|n| n.eval(root)),
            Node::NoneOf(nodes) => !(nodes.is_empty() || nodes.iter().any(|n| n.eval(root))),
            Node::Not(node) => !node.eval(root),
            Node::Field { path, predicate } => predicate.matches(path.resolve(root)),
            Node::Malformed => false,
        }
    }
}

impl Predicate {
    fn parse(value: &Value) -> Predicate {
        match value {
            Value::Object(map) if is_operator_object(value) => {
                let ops = map
                    .iter()
                    .map(|(name, operand)| (name, Op::parse(name, operand)))
                    .collect::<Vec<_>>();

                let unsupported = ops
                    .iter()
                    .filter(|(_, op)| matches!(op, Op::Unsupported))
                    .map(|(name, _)| name)
                    .join(", ");
                if !unsupported.is_empty() {
                    warn!("unsupported condition operator(s): {}", unsupported);
                }

                Predicate::Operators(ops.into_iter().map(|(_, op)| op).collect())
            }
            literal => Predicate::Literal(literal.into()),
        }
    }

    fn matches(&self, actual: Option<&AttributeValue>) -> bool {
        match self {
            Predicate::Literal(expected) => actual == Some(expected),
            Predicate::Operators(ops) => ops.iter().all(|op| op.matches(actual)),
        }
    }
}

impl Comparison {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Equal => ordering == Ordering::Equal,
            Comparison::NotEqual => ordering != Ordering::Equal,
            Comparison::LessThan => ordering == Ordering::Less,
            Comparison::LessThanOrEqual => ordering != Ordering::Greater,
            Comparison::GreaterThan => ordering == Ordering::Greater,
            Comparison::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

impl Op {
    fn parse(name: &str, operand: &Value) -> Op {
        let list = || match operand {
            Value::Array(items) => Some(items),
            _ => None,
        };

        match name {
            "$eq" => Op::Eq(operand.into()),
            "$ne" => Op::Ne(operand.into()),
            "$lt" => Op::Order(Comparison::LessThan, operand.into()),
            "$lte" => Op::Order(Comparison::LessThanOrEqual, operand.into()),
            "$gt" => Op::Order(Comparison::GreaterThan, operand.into()),
            "$gte" => Op::Order(Comparison::GreaterThanOrEqual, operand.into()),
            "$veq" => Op::version(Comparison::Equal, operand),
            "$vne" => Op::version(Comparison::NotEqual, operand),
            "$vlt" => Op::version(Comparison::LessThan, operand),
            "$vlte" => Op::version(Comparison::LessThanOrEqual, operand),
            "$vgt" => Op::version(Comparison::GreaterThan, operand),
            "$vgte" => Op::version(Comparison::GreaterThanOrEqual, operand),
            "$regex" => match operand.as_str() {
                Some(source) => Op::Regex(Pattern::new(source)),
                None => Op::Unsupported,
            },
            "$in" => list().map_or(Op::Unsupported, |items| {
                Op::In(items.iter().map(AttributeValue::from).collect())
            }),
            "$nin" => list().map_or(Op::Unsupported, |items| {
                Op::Nin(items.iter().map(AttributeValue::from).collect())
            }),
            "$all" => list().map_or(Op::Unsupported, |items| {
                Op::All(items.iter().map(Predicate::parse).collect())
            }),
            "$elemMatch" => Op::ElemMatch(if is_operator_object(operand) {
                ElemMatch::Value(Box::new(Predicate::parse(operand)))
            } else {
                ElemMatch::Nested(Box::new(Node::parse(operand)))
            }),
            "$size" => Op::Size(Box::new(Predicate::parse(operand))),
            "$exists" => Op::Exists(is_truthy(operand)),
            "$type" => Op::Type(operand.as_str().and_then(ValueType::parse)),
            "$not" => Op::Not(Box::new(Predicate::parse(operand))),
            _ => Op::Unsupported,
        }
    }

    fn version(comparison: Comparison, operand: &Value) -> Op {
        let version = AttributeValue::from(operand).as_semver();
        if version.is_none() {
            warn!("Invalid version operand: {}", operand);
        }
        Op::Version(comparison, version)
    }

    fn matches(&self, actual: Option<&AttributeValue>) -> bool {
        // these are the only operators with something to say about a missing attribute
        match self {
            Op::Exists(expected) => return actual.map_or(false, |v| !v.is_null()) == *expected,
            Op::Type(expected) => return Some(ValueType::of(actual)) == *expected,
            Op::Not(predicate) => return !predicate.matches(actual),
            _ => (),
        }

        let actual = match actual {
            Some(v) => v,
            None => return false,
        };

        match self {
            Op::Eq(expected) => actual == expected,
            Op::Ne(expected) => actual != expected,
            Op::Order(comparison, expected) => actual
                .compare(expected)
                .map_or(false, |ordering| comparison.holds(ordering)),
            Op::Version(comparison, expected) => match (actual.as_semver(), expected) {
                (Some(l), Some(r)) => comparison.holds(l.cmp(r)),
                _ => false,
            },
            Op::Regex(pattern) => actual.as_str().map_or(false, |s| pattern.is_match(s)),
            Op::In(set) => is_in(actual, set),
            Op::Nin(set) => !is_in(actual, set),
            Op::All(predicates) => match actual {
                AttributeValue::Array(items) => predicates
                    .iter()
                    .all(|p| items.iter().any(|item| p.matches(Some(item)))),
                _ => false,
            },
            Op::ElemMatch(elem_match) => match actual {
                AttributeValue::Array(items) => {
                    items.iter().any(|item| elem_match.matches(item))
                }
                _ => false,
            },
            Op::Size(predicate) => match actual {
                AttributeValue::Array(items) => {
                    predicate.matches(Some(&AttributeValue::Number(items.len() as f64)))
                }
                _ => false,
            },
            Op::Exists(_) | Op::Type(_) | Op::Not(_) | Op::Unsupported => false,
        }
    }
}

impl ElemMatch {
    fn matches(&self, item: &AttributeValue) -> bool {
        match (self, item) {
            (ElemMatch::Value(predicate), _) => predicate.matches(Some(item)),
            (ElemMatch::Nested(node), AttributeValue::Object(map)) => node.eval(map),
            (ElemMatch::Nested(node), _) => node.eval(&HashMap::new()),
        }
    }
}

// An array attribute is "in" the set if any of its elements is.
fn is_in(actual: &AttributeValue, set: &[AttributeValue]) -> bool {
    match actual {
        AttributeValue::Array(items) => items.iter().any(|item| set.contains(item)),
        single => set.contains(single),
    }
}
