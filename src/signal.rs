use std::fmt;
use std::str::FromStr;

use crate::error::LookupError;

/// Parameters a participant streams. Only volume is tracked today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Volume,
}

impl Parameter {
    pub const ALL: [Parameter; 1] = [Parameter::Volume];

    pub fn as_str(self) -> &'static str {
        match self {
            Parameter::Volume => "volume",
        }
    }
}

impl FromStr for Parameter {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "volume" => Ok(Parameter::Volume),
            other => Err(LookupError::UnknownParameter(other.to_string())),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-channels of a parameter: the raw signal before and after the device's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subchannel {
    Pre,
    Post,
}

impl Subchannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Subchannel::Pre => "pre",
            Subchannel::Post => "post",
        }
    }
}

impl FromStr for Subchannel {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre" => Ok(Subchannel::Pre),
            "post" => Ok(Subchannel::Post),
            other => Err(LookupError::UnknownSubchannel(other.to_string())),
        }
    }
}

impl fmt::Display for Subchannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Means of both sub-channels taken at drain time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Means {
    pub pre: f64,
    pub post: f64,
}

/// Rolling buffer of raw samples for one parameter, plus the last value echoed out.
#[derive(Debug, Clone, Default)]
pub struct SignalBuffer {
    pre: Vec<f64>,
    post: Vec<f64>,
    last_pre: f64,
    last_post: f64,
}

impl SignalBuffer {
    pub fn record(&mut self, subchannel: Subchannel, value: f64) {
        match subchannel {
            Subchannel::Pre => {
                self.pre.push(value);
                self.last_pre = value;
            }
            Subchannel::Post => {
                self.post.push(value);
                self.last_post = value;
            }
        }
    }

    /// Mean of each sub-channel since the previous drain. Both buffers are emptied.
    pub fn drain(&mut self) -> Means {
        let means = Means {
            pre: average(&self.pre),
            post: average(&self.post),
        };
        self.clear();
        means
    }

    pub fn clear(&mut self) {
        self.pre.clear();
        self.post.clear();
    }

    /// Most recent value received on `subchannel`, 0 before the first sample.
    pub fn last(&self, subchannel: Subchannel) -> f64 {
        match subchannel {
            Subchannel::Pre => self.last_pre,
            Subchannel::Post => self.last_post,
        }
    }

    pub fn pending(&self) -> usize {
        self.pre.len() + self.post.len()
    }
}

/// Arithmetic mean, 0 for an empty slice.
pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
