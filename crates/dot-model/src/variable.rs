use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::VariableError;

/// Scalar value of a job variable.
///
/// Values keep their declared type so conditions can compare numbers as numbers.
/// For container environment injection every variant renders to its textual form.
/// A declared but empty value (`- KEY:`) is read as the empty string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "RawValue")]
pub enum VarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl From<RawValue> for VarValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Bool(b) => VarValue::Bool(b),
            RawValue::Int(i) => VarValue::Int(i),
            RawValue::Float(x) => VarValue::Float(x),
            RawValue::Str(s) => VarValue::Str(s),
            RawValue::Null => VarValue::Str(String::new()),
        }
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Bool(b) => write!(f, "{b}"),
            VarValue::Int(i) => write!(f, "{i}"),
            VarValue::Float(x) => write!(f, "{x}"),
            VarValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::Str(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        VarValue::Str(s)
    }
}

impl From<i64> for VarValue {
    fn from(i: i64) -> Self {
        VarValue::Int(i)
    }
}

impl From<bool> for VarValue {
    fn from(b: bool) -> Self {
        VarValue::Bool(b)
    }
}

impl From<f64> for VarValue {
    fn from(x: f64) -> Self {
        VarValue::Float(x)
    }
}

/// A single declared `KEY: value` entry.
///
/// The manifest represents each variable as a mapping, so the raw mapping is kept as written.
/// A well-formed variable has exactly one entry; [`Variable::pair`] enforces that.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variable(BTreeMap<String, VarValue>);

impl Variable {
    /// Create a well-formed single-entry variable.
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<VarValue>,
    {
        let mut map = BTreeMap::new();
        map.insert(key.into(), value.into());
        Self(map)
    }

    /// Build a variable from an arbitrary mapping, well-formed or not.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<VarValue>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Return the single key–value pair, or an error when the mapping is not exactly one entry.
    pub fn pair(&self) -> Result<(&str, &VarValue), VariableError> {
        let mut iter = self.0.iter();
        match (iter.next(), iter.next()) {
            (Some((k, v)), None) => Ok((k.as_str(), v)),
            (None, _) => Err(VariableError::Empty),
            (Some(_), Some(_)) => Err(VariableError::MultiKey(self.0.keys().cloned().collect())),
        }
    }

    /// Render as a `KEY=VALUE` environment entry.
    pub fn to_env(&self) -> Result<String, VariableError> {
        let (k, v) = self.pair()?;
        Ok(format!("{k}={v}"))
    }
}
