pub mod protocol;
pub mod types;

use serde::Serialize;

pub use protocol::{decode, encode};
pub use types::{split_address, Framing};

/// A single typed argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Double(f64),
    String(String),
    Bool(bool),
}

impl OscArg {
    /// Numeric view of the argument. Strings and booleans are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OscArg::Int(v) => Some(*v as f64),
            OscArg::Float(v) => Some(*v as f64),
            OscArg::Double(v) => Some(*v),
            OscArg::String(_) | OscArg::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::String(s) => Some(s),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            OscArg::Int(_) => types::TAG_INT,
            OscArg::Float(_) => types::TAG_FLOAT,
            OscArg::Double(_) => types::TAG_DOUBLE,
            OscArg::String(_) => types::TAG_STRING,
            OscArg::Bool(true) => types::TAG_TRUE,
            OscArg::Bool(false) => types::TAG_FALSE,
        }
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<f64> for OscArg {
    fn from(v: f64) -> Self {
        OscArg::Double(v)
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::String(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::String(v)
    }
}

/// An addressed message: a `/`-joined path plus zero or more arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Address segments with any leading separator removed.
    pub fn segments(&self) -> Vec<&str> {
        split_address(&self.address)
    }
}
