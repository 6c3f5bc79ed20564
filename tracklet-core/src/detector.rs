//! Detector system codes.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tracking sub-detectors addressed by the `system` cell ID field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u32)]
pub enum DetectorSystem {
    /// Vertex detector barrel.
    VertexBarrel = 1,
    /// Vertex detector endcap.
    VertexEndcap = 2,
    /// Inner tracker barrel.
    InnerBarrel = 3,
    /// Inner tracker endcap.
    InnerEndcap = 4,
    /// Outer tracker barrel.
    OuterBarrel = 5,
    /// Outer tracker endcap.
    OuterEndcap = 6,
}

impl DetectorSystem {
    /// All known systems in code order.
    pub const ALL: [Self; 6] = [
        Self::VertexBarrel,
        Self::VertexEndcap,
        Self::InnerBarrel,
        Self::InnerEndcap,
        Self::OuterBarrel,
        Self::OuterEndcap,
    ];

    /// Looks up a system by its cell ID code.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] for codes that name no known system.
    pub fn from_code(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|system| system.code() == code)
            .ok_or_else(|| Error::config(format!("unknown detector system code {code}")))
    }

    /// Returns the cell ID code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Returns true for barrel (cylindrical) systems.
    #[must_use]
    pub const fn is_barrel(self) -> bool {
        matches!(
            self,
            Self::VertexBarrel | Self::InnerBarrel | Self::OuterBarrel
        )
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::VertexBarrel => "VXD Barrel",
            Self::VertexEndcap => "VXD Endcap",
            Self::InnerBarrel => "IT Barrel",
            Self::InnerEndcap => "IT Endcap",
            Self::OuterBarrel => "OT Barrel",
            Self::OuterEndcap => "OT Endcap",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        assert_eq!(DetectorSystem::from_code(5).unwrap(), DetectorSystem::OuterBarrel);
        assert!(DetectorSystem::from_code(3).unwrap().is_barrel());
        assert!(!DetectorSystem::from_code(4).unwrap().is_barrel());
    }

    #[test]
    fn test_unknown_code() {
        let err = DetectorSystem::from_code(9).unwrap_err();
        assert!(matches!(err, Error::ConfigError(msg) if msg.contains('9')));
    }
}
