//! Instance names partition the cache between tenants

use crate::constants::RESERVED_INSTANCE_SEGMENTS;
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::Deref;
use std::str::FromStr;

/// A validated instance name; the empty string is the default instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceName(String);

impl InstanceName {
    /// Create a new InstanceName with validation
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Ok(Self(name));
        }

        if name.starts_with('/') || name.ends_with('/') {
            return Err(Error::invalid_argument(format!(
                "instance name '{name}' must not start or end with '/'"
            )));
        }

        for segment in name.split('/') {
            if segment.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "instance name '{name}' contains an empty segment"
                )));
            }
            if segment == "." || segment == ".." {
                return Err(Error::invalid_argument(format!(
                    "instance name '{name}' contains a relative segment"
                )));
            }
            if RESERVED_INSTANCE_SEGMENTS.contains(&segment) {
                return Err(Error::invalid_argument(format!(
                    "instance name '{name}' contains reserved segment '{segment}'"
                )));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            {
                return Err(Error::invalid_argument(format!(
                    "instance name '{name}' contains characters outside [A-Za-z0-9_.-]"
                )));
            }
        }

        Ok(Self(name))
    }

    /// The default (unnamed) instance
    #[must_use]
    pub fn default_instance() -> Self {
        Self(String::new())
    }

    /// Create an InstanceName without validation (use only when input is already validated)
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    /// Prefix this instance onto a relative path, `instance/path` or just `path`
    pub fn join(&self, path: &str) -> String {
        if self.0.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.0)
        }
    }
}

impl Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for InstanceName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for InstanceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for InstanceName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for InstanceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<InstanceName> for String {
    fn from(name: InstanceName) -> Self {
        name.0
    }
}
