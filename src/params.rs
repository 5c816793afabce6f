//! Request parameters and their coercion to the daemon's wire format.
//!
//! Parameters are a tagged [`ParamValue`] per name, kept in insertion order. Before a
//! request is sent, [`coerce`] turns every value into the string the server expects:
//!
//! | Value | Wire form |
//! |-------|-----------|
//! | `Bool` | [`BoolTokens`] entry (`true` / `false` by default) |
//! | `Int` | decimal integer |
//! | `Float` | integer form when integral, otherwise shortest round-trip form |
//! | `Str` | unchanged |

use std::borrow::Cow;

use serde_json::Value;

use crate::Result;
use crate::error::Error;

/// The strings sent for boolean parameters.
///
/// The accepted vocabulary is defined by the daemon, so it is configurable through
/// [`crate::config::ConnectionConfig`] rather than fixed in the coercer.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoolTokens {
    pub truthy: Cow<'static, str>,
    pub falsy: Cow<'static, str>,
}

impl BoolTokens {
    /// Lowercase `true` / `false`, as understood by forked-daapd.
    pub const DEFAULT: Self = Self {
        truthy: Cow::Borrowed("true"),
        falsy: Cow::Borrowed("false"),
    };

    #[must_use]
    pub fn new<T: Into<Cow<'static, str>>, F: Into<Cow<'static, str>>>(truthy: T, falsy: F) -> Self {
        Self {
            truthy: truthy.into(),
            falsy: falsy.into(),
        }
    }

    #[must_use]
    pub fn token(&self, value: bool) -> &str {
        if value { &*self.truthy } else { &*self.falsy }
    }
}

impl Default for BoolTokens {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A single parameter value.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! int_param {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ParamValue {
                fn from(value: $t) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )*
    };
}

int_param!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

/// An ordered set of named parameters. Inserting an existing name replaces its value
/// in place.
///
/// ```
/// use forked_daapd_client::params::{Params, ParamValue};
///
/// let params = Params::new()
///     .with("uris", "library:playlist:3")
///     .with("shuffle", true)
///     .with("position", 0);
///
/// assert_eq!(params.get("shuffle"), Some(&ParamValue::Bool(true)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<K: Into<String>, V: Into<ParamValue>>(mut self, name: K, value: V) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert<K: Into<String>, V: Into<ParamValue>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0
            .iter()
            .find_map(|(existing, value)| (existing == name).then_some(value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Builds parameters from a JSON object. Arrays, objects and `null` have no wire
/// form and are rejected with [`crate::error::Kind::InvalidParameter`] before any
/// request is made.
impl TryFrom<Value> for Params {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::validation("parameters must be a JSON object"));
        };

        let mut params = Self::new();
        for (name, value) in map {
            let value = match value {
                Value::Bool(b) => ParamValue::Bool(b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        ParamValue::Int(i)
                    } else if n.is_u64() {
                        ParamValue::Str(n.to_string())
                    } else if let Some(f) = n.as_f64() {
                        ParamValue::Float(f)
                    } else {
                        ParamValue::Str(n.to_string())
                    }
                }
                Value::String(s) => ParamValue::Str(s),
                Value::Null => return Err(Error::invalid_parameter(name, "null")),
                Value::Array(_) => return Err(Error::invalid_parameter(name, "array")),
                Value::Object(_) => return Err(Error::invalid_parameter(name, "object")),
            };
            params.insert(name, value);
        }

        Ok(params)
    }
}

/// Renders every parameter as the string the server expects, preserving order.
///
/// Non-finite floats have no wire form and fail with
/// [`crate::error::Kind::InvalidParameter`].
pub fn coerce(params: &Params, tokens: &BoolTokens) -> Result<Vec<(String, String)>> {
    params
        .iter()
        .map(|(name, value)| {
            let wire = match value {
                ParamValue::Bool(b) => tokens.token(*b).to_owned(),
                ParamValue::Int(i) => i.to_string(),
                ParamValue::Float(f) if !f.is_finite() => {
                    return Err(Error::invalid_parameter(name, "non-finite float"));
                }
                ParamValue::Float(f) => format_float(*f),
                ParamValue::Str(s) => s.clone(),
            };
            Ok((name.to_owned(), wire))
        })
        .collect()
}

// `Display` for f64 already drops the fractional part of integral values and prints
// the shortest representation that round-trips.
fn format_float(value: f64) -> String {
    let rendered = value.to_string();
    if rendered == "-0" {
        "0".to_owned()
    } else {
        rendered
    }
}
