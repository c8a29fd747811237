use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Debug},
};

use regex::Regex;
use serde_json::Value;

/// What an [`AssertionError`] was raised about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    Value,
    Body,
    Status,
    Header(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str("value"),
            Self::Body => f.write_str("response body"),
            Self::Status => f.write_str("response status code"),
            Self::Header(name) => write!(f, "response header {name}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AssertionError {
    subject: Subject,
    expected: String,
    actual: String,
    message: String,
}

impl AssertionError {
    pub fn new(
        subject: Subject,
        expected: impl Into<String>,
        actual: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            expected: expected.into(),
            actual: actual.into(),
            message: message.into(),
        }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    pub fn actual(&self) -> &str {
        &self.actual
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type AssertionResult = Result<(), AssertionError>;

fn check(
    passed: bool,
    expected: String,
    actual: String,
    msg: Option<&str>,
    default_msg: impl FnOnce() -> String,
) -> AssertionResult {
    if passed {
        return Ok(());
    }
    let message = msg.map(str::to_owned).unwrap_or_else(default_msg);
    Err(AssertionError::new(Subject::Value, expected, actual, message))
}

/// Deep equality.
pub fn eql<T>(actual: &T, expected: &T, msg: Option<&str>) -> AssertionResult
where
    T: PartialEq + Debug + ?Sized,
{
    let (e, a) = (format!("{expected:?}"), format!("{actual:?}"));
    check(actual == expected, e.clone(), a.clone(), msg, || {
        format!("{a} deepEqual {e}")
    })
}

pub fn is_null(value: &Value, msg: Option<&str>) -> AssertionResult {
    let actual = value.to_string();
    check(value.is_null(), "null".into(), actual.clone(), msg, || {
        format!("{actual} === null")
    })
}

pub fn is_not_null(value: &Value, msg: Option<&str>) -> AssertionResult {
    check(!value.is_null(), "not null".into(), "null".into(), msg, || {
        "null !== null".into()
    })
}

/// Succeeds only for the absent value, e.g. `json.get("missing")`.
pub fn is_undefined<T: Debug>(value: Option<T>, msg: Option<&str>) -> AssertionResult {
    let actual = render_option(&value);
    check(value.is_none(), "undefined".into(), actual.clone(), msg, || {
        format!("{actual} === undefined")
    })
}

pub fn is_defined<T: Debug>(value: Option<T>, msg: Option<&str>) -> AssertionResult {
    check(
        value.is_some(),
        "defined".into(),
        "undefined".into(),
        msg,
        || "undefined !== undefined".into(),
    )
}

/// Runtime type name of a JSON value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn has_type(value: &Value, expected: &str, msg: Option<&str>) -> AssertionResult {
    let real = type_name(value);
    check(real == expected, expected.into(), real.into(), msg, || {
        format!("typeof {value} is {real}, expected {expected}")
    })
}

pub fn matches(s: &str, pattern: &Regex, msg: Option<&str>) -> AssertionResult {
    check(
        pattern.is_match(s),
        format!("/{pattern}/"),
        format!("{s:?}"),
        msg,
        || format!("{s:?} does not match /{pattern}/"),
    )
}

/// Membership test backing [`includes`].
pub trait Includes<Item: ?Sized> {
    fn includes(&self, item: &Item) -> bool;
}

impl Includes<str> for str {
    fn includes(&self, item: &str) -> bool {
        self.contains(item)
    }
}

impl Includes<str> for String {
    fn includes(&self, item: &str) -> bool {
        self.contains(item)
    }
}

impl<T: PartialEq> Includes<T> for [T] {
    fn includes(&self, item: &T) -> bool {
        self.contains(item)
    }
}

impl<T: PartialEq, const N: usize> Includes<T> for [T; N] {
    fn includes(&self, item: &T) -> bool {
        self.contains(item)
    }
}

impl<T: PartialEq> Includes<T> for Vec<T> {
    fn includes(&self, item: &T) -> bool {
        self.contains(item)
    }
}

impl Includes<Value> for Value {
    fn includes(&self, item: &Value) -> bool {
        match (self, item) {
            (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
            (Value::Array(items), _) => items.contains(item),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        }
    }
}

pub fn includes<C, I>(container: &C, item: &I, msg: Option<&str>) -> AssertionResult
where
    C: Includes<I> + Debug + ?Sized,
    I: Debug + ?Sized,
{
    let (c, i) = (format!("{container:?}"), format!("{item:?}"));
    check(container.includes(item), i.clone(), c.clone(), msg, || {
        format!("{c} does not include {i}")
    })
}

/// Length backing [`has_length`]. `None` when the value has no length.
pub trait Length {
    fn length(&self) -> Option<usize>;
}

impl Length for str {
    fn length(&self) -> Option<usize> {
        Some(self.chars().count())
    }
}

impl Length for String {
    fn length(&self) -> Option<usize> {
        self.as_str().length()
    }
}

impl<T> Length for [T] {
    fn length(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T, const N: usize> Length for [T; N] {
    fn length(&self) -> Option<usize> {
        Some(N)
    }
}

impl<T> Length for Vec<T> {
    fn length(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V, S> Length for HashMap<K, V, S> {
    fn length(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V> Length for BTreeMap<K, V> {
    fn length(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl Length for Value {
    fn length(&self) -> Option<usize> {
        match self {
            Value::String(s) => s.length(),
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }
}

/// Any integer type is accepted for `n`; one that does not fit a `usize`
/// never matches.
pub fn has_length<V, N>(value: &V, n: N, msg: Option<&str>) -> AssertionResult
where
    V: Length + Debug + ?Sized,
    N: TryInto<usize> + Copy + fmt::Display,
{
    let len = value.length();
    let passed = match (len, n.try_into()) {
        (Some(len), Ok(n)) => len == n,
        _ => false,
    };
    let actual = render_option(&len);
    check(passed, n.to_string(), actual.clone(), msg, || {
        format!("{value:?} has length of {actual}, expected {n}")
    })
}

fn render_option<T: Debug>(value: &Option<T>) -> String {
    match value {
        Some(v) => format!("{v:?}"),
        None => "undefined".into(),
    }
}
