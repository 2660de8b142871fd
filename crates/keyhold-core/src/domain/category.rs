//! Policy category: the coarse partition a policy list lives in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which family of input events a policy list applies to.
///
/// Each category owns its own store partition, its own ID counter, and its
/// own install call on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Category {
    Keyboard = 0x01,
    Pointer = 0x02,
}

impl Category {
    /// Every category, in partition order.
    pub const ALL: [Category; 2] = [Category::Keyboard, Category::Pointer];

    /// Zero-based partition index, used to address per-category arrays.
    pub fn index(self) -> usize {
        match self {
            Category::Keyboard => 0,
            Category::Pointer => 1,
        }
    }

    /// Lower-case name used in logs and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Keyboard => "keyboard",
            Category::Pointer => "pointer",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for Category {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Category::Keyboard),
            0x02 => Ok(Category::Pointer),
            _ => Err(()),
        }
    }
}
