use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// A typed value in a flat parameter list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    RealList(Vec<f64>),
}

/// Error raised by typed parameter access.
///
/// Always names the offending key so a misconfigured element block can be
/// fixed without digging through the composition code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    Missing { key: String },
    WrongType { key: String, expected: &'static str },
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterError::Missing { key } => {
                write!(f, "Required parameter '{}' is missing", key)
            }
            ParameterError::WrongType { key, expected } => {
                write!(f, "Parameter '{}' is not of the expected type {}", key, expected)
            }
        }
    }
}

impl Error for ParameterError {}

/// The flat key → value configuration surface of one element block.
///
/// Parsed once at setup; kernels resolve every parameter they need in their
/// constructors so that missing or mistyped keys fail before any workset is
/// processed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters {
    values: FxHashMap<String, ParamValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_real(&self, key: &str) -> Result<f64, ParameterError> {
        match self.values.get(key) {
            Some(ParamValue::Real(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(_) => Err(ParameterError::WrongType {
                key: key.to_string(),
                expected: "real",
            }),
            None => Err(ParameterError::Missing {
                key: key.to_string(),
            }),
        }
    }

    pub fn get_real_or(&self, key: &str, default: f64) -> Result<f64, ParameterError> {
        if self.contains(key) {
            self.get_real(key)
        } else {
            Ok(default)
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64, ParameterError> {
        match self.values.get(key) {
            Some(ParamValue::Int(v)) => Ok(*v),
            Some(_) => Err(ParameterError::WrongType {
                key: key.to_string(),
                expected: "integer",
            }),
            None => Err(ParameterError::Missing {
                key: key.to_string(),
            }),
        }
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ParameterError> {
        match self.values.get(key) {
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(_) => Err(ParameterError::WrongType {
                key: key.to_string(),
                expected: "bool",
            }),
            None => Ok(default),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ParameterError> {
        match self.values.get(key) {
            Some(ParamValue::Str(v)) => Ok(v),
            Some(_) => Err(ParameterError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
            None => Err(ParameterError::Missing {
                key: key.to_string(),
            }),
        }
    }

    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, ParameterError> {
        if self.contains(key) {
            self.get_str(key)
        } else {
            Ok(default)
        }
    }

    pub fn get_real_list(&self, key: &str) -> Result<&[f64], ParameterError> {
        match self.values.get(key) {
            Some(ParamValue::RealList(v)) => Ok(v),
            Some(_) => Err(ParameterError::WrongType {
                key: key.to_string(),
                expected: "real list",
            }),
            None => Err(ParameterError::Missing {
                key: key.to_string(),
            }),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Real(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::RealList(v)
    }
}
