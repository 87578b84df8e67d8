//! Startup parameters handed to the embedded content.
//!
//! Legacy plugins receive their startup arguments as `flashvars`-style
//! key/value pairs. The content can observe three distinct states for a name:
//! a value, an empty string, or no entry at all. [`ParamValue`] keeps those
//! apart all the way from the fixture file to the runtime.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use url::form_urlencoded;

/// One parameter as seen by the content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamValue {
    /// A non-empty value, passed through verbatim
    Present(String),
    /// Supplied with an empty value
    Empty,
    /// Declared by the test but never supplied to the runtime
    Absent,
}

impl ParamValue {
    /// Build from raw text, folding `""` into [`ParamValue::Empty`]
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            Self::Empty
        } else {
            Self::Present(text)
        }
    }

    /// Value the runtime receives, or `None` if the name is not passed at all
    #[must_use]
    pub fn runtime_value(&self) -> Option<&str> {
        match self {
            Self::Present(v) => Some(v),
            Self::Empty => Some(""),
            Self::Absent => None,
        }
    }

    /// Whether the runtime receives this parameter
    #[must_use]
    pub const fn is_supplied(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

impl From<Option<String>> for ParamValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Absent, Self::from_text)
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.runtime_value() {
            Some(v) => serializer.serialize_some(v),
            None => serializer.serialize_none(),
        }
    }
}

struct ParamValueVisitor;

impl<'de> Visitor<'de> for ParamValueVisitor {
    type Value = ParamValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a quoted string or null (quote numbers and booleans to keep them verbatim)")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(ParamValue::from_text(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(ParamValue::from_text(v))
    }

    // Numbers and booleans fall through to `invalid_type`: by the time they
    // get here `1.10` has become `1.1`, so the written text is already lost.

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(ParamValue::Absent)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(ParamValue::Absent)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(Self)
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ParamValueVisitor)
    }
}

/// Named startup parameters, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    /// Create an empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` flashvars string.
    ///
    /// Every name that appears is supplied; `c=` and a bare `c` both yield
    /// [`ParamValue::Empty`]. Later duplicates win.
    #[must_use]
    pub fn from_flashvars(flashvars: &str) -> Self {
        let map = form_urlencoded::parse(flashvars.as_bytes())
            .map(|(k, v)| (k.into_owned(), ParamValue::from_text(v.into_owned())))
            .collect();
        Self(map)
    }

    /// Encode the supplied parameters as a flashvars string; absent ones are skipped
    #[must_use]
    pub fn to_flashvars(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in self.runtime_pairs() {
            serializer.append_pair(name, value);
        }
        serializer.finish()
    }

    /// Set a parameter
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Set a present (or empty, if `value` is `""`) parameter
    #[must_use]
    pub fn with_value(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, ParamValue::from_text(value))
    }

    /// Declare a parameter the runtime must never receive
    #[must_use]
    pub fn with_absent(self, name: impl Into<String>) -> Self {
        self.with(name, ParamValue::Absent)
    }

    /// Look up a parameter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Iterate over every declared parameter
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate over the parameters the runtime actually receives
    pub fn runtime_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.runtime_value().map(|v| (k.as_str(), v)))
    }

    /// Supplied parameters as a JSON object (absent ones omitted)
    #[must_use]
    pub fn to_runtime_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .runtime_pairs()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Number of declared parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameters are declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
