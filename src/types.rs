//! Core value types shared by the config, display and switcher layers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants;

/// Display mode: pixel dimensions plus refresh rate
///
/// A `frequency` of 0 means "any refresh rate", but only when checking whether
/// a monitor supports a mode. Equality is always an exact field match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub frequency: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Resolution {
    pub const fn new(width: u32, height: u32, frequency: u32) -> Self {
        Self { width, height, frequency }
    }

    /// True when `mode` can serve a request for `self`.
    /// Frequency 0 on the request side matches any refresh rate.
    pub fn satisfied_by(&self, mode: &Resolution) -> bool {
        self.width == mode.width
            && self.height == mode.height
            && (self.frequency == 0 || self.frequency == mode.frequency)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frequency == 0 {
            write!(f, "{}x{}", self.width, self.height)
        } else {
            write!(f, "{}x{}@{}Hz", self.width, self.height, self.frequency)
        }
    }
}

/// Identifier of a display output
///
/// The empty key is reserved for "the primary monitor".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorKey(String);

impl MonitorKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn primary() -> Self {
        Self(String::new())
    }

    pub fn is_primary(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_primary() {
            f.write_str(constants::display::PRIMARY_LABEL)
        } else {
            write!(f, "monitor {}", self.0)
        }
    }
}

/// A monitor as reported by the display backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    pub key: MonitorKey,
    pub display_name: String,
    pub is_primary: bool,
}
