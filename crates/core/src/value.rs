//! Typed field values
//!
//! A document's contents are an [`ObjectValue`]: an immutable sorted map from
//! field name to [`FieldValue`]. Objects nest recursively.
//!
//! Values are totally ordered. Across kinds the order is
//! Null < Boolean < Number < String < Bytes < Array < Object. Integers and
//! doubles share the Number rank and compare numerically; when an integer and
//! a double are numerically equal the integer sorts first, so the two are
//! never equal to each other.

use docsync_immutable::SortedMap;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Field name → value map forming a document or nested object
pub type ObjectValue = SortedMap<String, FieldValue>;

/// A single typed value stored in a document field
#[derive(Clone)]
pub enum FieldValue {
    /// Explicit null
    Null,
    /// true / false
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// IEEE 754 double
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered list of values
    Array(Vec<FieldValue>),
    /// Nested map
    Object(ObjectValue),
}

impl FieldValue {
    fn type_rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Boolean(_) => 1,
            FieldValue::Integer(_) | FieldValue::Double(_) => 2,
            FieldValue::String(_) => 3,
            FieldValue::Bytes(_) => 4,
            FieldValue::Array(_) => 5,
            FieldValue::Object(_) => 6,
        }
    }

    /// Build an object from `(name, value)` pairs
    pub fn object<I, S>(fields: I) -> ObjectValue
    where
        I: IntoIterator<Item = (S, FieldValue)>,
        S: Into<String>,
    {
        fields
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect()
    }

    /// The nested map, if this is an object
    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            FieldValue::Object(map) => Some(map),
            _ => None,
        }
    }
}

/// 2^63, the first double above every `i64`
const I64_UPPER_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Exact numeric comparison of an integer with a double
///
/// NaNs sort by sign bit, as in `f64::total_cmp`.
fn compare_integer_to_double(i: i64, d: f64) -> Ordering {
    if d.is_nan() {
        return if d.is_sign_negative() { Ordering::Greater } else { Ordering::Less };
    }
    if d >= I64_UPPER_BOUND {
        return Ordering::Less;
    }
    if d < -I64_UPPER_BOUND {
        return Ordering::Greater;
    }
    let whole = d.trunc();
    // In range, so the cast is exact
    i.cmp(&(whole as i64)).then_with(|| {
        if d > whole {
            Ordering::Less
        } else if d < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

fn compare_numbers(a: &FieldValue, b: &FieldValue) -> Ordering {
    match (a, b) {
        (FieldValue::Integer(x), FieldValue::Integer(y)) => x.cmp(y),
        (FieldValue::Double(x), FieldValue::Double(y)) => x.total_cmp(y),
        (FieldValue::Integer(x), FieldValue::Double(y)) => {
            compare_integer_to_double(*x, *y).then(Ordering::Less)
        }
        (FieldValue::Double(x), FieldValue::Integer(y)) => {
            compare_integer_to_double(*y, *x).reverse().then(Ordering::Greater)
        }
        _ => unreachable!("compare_numbers called on non-numeric values"),
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => Ordering::Equal,
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a.cmp(b),
            (FieldValue::String(a), FieldValue::String(b)) => a.cmp(b),
            (FieldValue::Bytes(a), FieldValue::Bytes(b)) => a.cmp(b),
            (FieldValue::Array(a), FieldValue::Array(b)) => a.cmp(b),
            (FieldValue::Object(a), FieldValue::Object(b)) => a.cmp(b),
            _ => compare_numbers(self, other),
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            FieldValue::Null => {}
            FieldValue::Boolean(b) => b.hash(state),
            FieldValue::Integer(i) => i.hash(state),
            FieldValue::Double(d) => d.to_bits().hash(state),
            FieldValue::String(s) => s.hash(state),
            FieldValue::Bytes(b) => b.hash(state),
            FieldValue::Array(a) => a.hash(state),
            FieldValue::Object(o) => o.hash(state),
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Double(d) => write!(f, "{:?}", d),
            FieldValue::String(s) => write!(f, "{:?}", s),
            FieldValue::Bytes(b) => write!(f, "b{:?}", b),
            FieldValue::Array(a) => f.debug_list().entries(a).finish(),
            FieldValue::Object(o) => write!(f, "{:?}", o),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<ObjectValue> for FieldValue {
    fn from(v: ObjectValue) -> Self {
        FieldValue::Object(v)
    }
}

/// Dotted path into nested objects, e.g. `address.city`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Parse a dotted path; empty segments are dropped
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// Path from already split segments
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Path segments, outermost first
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Dotted form
    pub fn canonical_string(&self) -> String {
        self.0.join(".")
    }
}

/// Reads the value at `path`
pub fn get_field<'a>(object: &'a ObjectValue, path: &FieldPath) -> Option<&'a FieldValue> {
    let (last, parents) = path.segments().split_last()?;
    let mut current = object;
    for segment in parents {
        current = current.get(segment)?.as_object()?;
    }
    current.get(last)
}

/// Returns `object` with `value` stored at `path`, creating intermediate
/// objects (and replacing non-object intermediates) as needed
pub fn set_field(object: &ObjectValue, path: &[String], value: FieldValue) -> ObjectValue {
    match path {
        [] => object.clone(),
        [last] => object.insert(last.clone(), value),
        [first, rest @ ..] => {
            let child = object
                .get(first)
                .and_then(FieldValue::as_object)
                .cloned()
                .unwrap_or_default();
            let child = set_field(&child, rest, value);
            object.insert(first.clone(), FieldValue::Object(child))
        }
    }
}

/// Returns `object` without the value at `path`
pub fn delete_field(object: &ObjectValue, path: &[String]) -> ObjectValue {
    match path {
        [] => object.clone(),
        [last] => object.erase(last),
        [first, rest @ ..] => match object.get(first).and_then(FieldValue::as_object) {
            Some(child) => {
                let child = delete_field(child, rest);
                object.insert(first.clone(), FieldValue::Object(child))
            }
            None => object.clone(),
        },
    }
}
