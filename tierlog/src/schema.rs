//! Configuration types for the tierlog event-log storage engine.
//!
//! These types define the shape of a tier chain: how many tiers exist, how
//! much memory each one owns, and which importance band each one retains.
//! Configuration happens once at chain construction and is immutable for
//! the life of the chain — there is no runtime resizing.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Maximum number of tiers in a chain.
///
/// Keeping this small lets checkpoints live on the stack and bounds the
/// cascade depth of the eviction algorithm.
pub const MAX_TIERS: usize = 8;

/// Minimum backing capacity for a single tier, in bytes.
///
/// A tier must be able to hold at least a couple of small records,
/// otherwise the eviction loop can never make progress.
pub const MIN_TIER_CAPACITY: usize = 64;

/// How critical an event is to retain, most important first.
///
/// The numeric order is inverted relative to intuition (`Critical` is the
/// smallest discriminant), so comparisons go through the named methods
/// [`Importance::outranks`] and [`Importance::at_least`] rather than a
/// derived `Ord`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    /// Must survive as long as any tier has physical room.
    Critical = 0,
    /// Routine operational events.
    Info = 1,
    /// High-volume diagnostics, first to be dropped under pressure.
    Debug = 2,
}

impl Importance {
    /// Number of importance levels.
    pub const COUNT: usize = 3;

    /// Returns `true` if `self` is strictly more important than `other`.
    #[inline]
    pub fn outranks(self, other: Importance) -> bool {
        (self as u8) < (other as u8)
    }

    /// Returns `true` if `self` is at least as important as `other`.
    #[inline]
    pub fn at_least(self, other: Importance) -> bool {
        (self as u8) <= (other as u8)
    }

    /// Decodes a stored importance byte.
    pub(crate) fn from_u8(value: u8) -> Option<Importance> {
        match value {
            0 => Some(Importance::Critical),
            1 => Some(Importance::Info),
            2 => Some(Importance::Debug),
            _ => None,
        }
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Importance::Critical => "critical",
            Importance::Info => "info",
            Importance::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Identity of one event, supplied per [`crate::EventChain::log_event`] call.
///
/// The schema is copied into the encoded record and never retained beyond
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSchema {
    /// Identifier of the component that emitted the event.
    pub source_id: u16,
    /// Source-scoped event kind discriminator.
    pub event_kind: u16,
    /// How critical the event is to retain.
    pub importance: Importance,
}

/// Configuration for a single priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Bytes of backing storage, allocated once at chain construction.
    pub capacity: usize,

    /// The most important level this tier retains at rest.
    ///
    /// A tier is the final destination for every importance from its own
    /// ceiling up to, but excluding, the next tier's ceiling. The terminal
    /// tier retains its ceiling and everything above it.
    pub ceiling: Importance,
}

/// Configuration for a whole tier chain, ordered least- to most-important.
///
/// # Example
///
/// ```rust
/// use tierlog::{ChainSpec, Importance, TierSpec};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let spec = ChainSpec::new(
///     vec![
///         TierSpec { capacity: 4096, ceiling: Importance::Debug },
///         TierSpec { capacity: 2048, ceiling: Importance::Info },
///         TierSpec { capacity: 1024, ceiling: Importance::Critical },
///     ],
///     Importance::Debug,
/// )?;
/// assert_eq!(spec.tiers.len(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    /// Tier configurations; index 0 is the entry tier, the last entry is
    /// the terminal tier.
    pub tiers: Vec<TierSpec>,

    /// Global retention threshold.
    ///
    /// Events less important than this are silently discarded at intake
    /// (sequence number 0) without touching any tier.
    pub retention: Importance,
}

impl ChainSpec {
    /// Creates a validated chain configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid; see
    /// [`ChainSpec::validate`].
    pub fn new(tiers: Vec<TierSpec>, retention: Importance) -> Result<Self> {
        let spec = Self { tiers, retention };
        spec.validate()?;
        Ok(spec)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - no tiers are configured, or more than [`MAX_TIERS`],
    /// - any capacity is below [`MIN_TIER_CAPACITY`],
    /// - ceilings do not strictly increase in importance from the entry
    ///   tier to the terminal tier.
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(ConfigError::NoTiers.into());
        }
        if self.tiers.len() > MAX_TIERS {
            return Err(ConfigError::TooManyTiers {
                count: self.tiers.len(),
                max: MAX_TIERS,
            }
            .into());
        }

        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.capacity < MIN_TIER_CAPACITY {
                return Err(ConfigError::CapacityTooSmall {
                    tier: i,
                    capacity: tier.capacity,
                    min: MIN_TIER_CAPACITY,
                }
                .into());
            }
            if i > 0 && !tier.ceiling.outranks(self.tiers[i - 1].ceiling) {
                return Err(ConfigError::CeilingsNotAscending { tier: i }.into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EventLogError;

    fn three_tier_spec() -> ChainSpec {
        ChainSpec {
            tiers: vec![
                TierSpec { capacity: 256, ceiling: Importance::Debug },
                TierSpec { capacity: 256, ceiling: Importance::Info },
                TierSpec { capacity: 256, ceiling: Importance::Critical },
            ],
            retention: Importance::Debug,
        }
    }

    #[test]
    fn test_importance_order() {
        assert!(Importance::Critical.outranks(Importance::Info));
        assert!(Importance::Info.outranks(Importance::Debug));
        assert!(!Importance::Debug.outranks(Importance::Debug));

        assert!(Importance::Critical.at_least(Importance::Debug));
        assert!(Importance::Info.at_least(Importance::Info));
        assert!(!Importance::Debug.at_least(Importance::Info));
    }

    #[test]
    fn test_importance_decode() {
        for imp in [Importance::Critical, Importance::Info, Importance::Debug] {
            assert_eq!(Importance::from_u8(imp as u8), Some(imp));
        }
        assert_eq!(Importance::from_u8(3), None);
        assert_eq!(Importance::from_u8(0xff), None);
    }

    #[test]
    fn test_valid_spec() {
        assert!(three_tier_spec().validate().is_ok());
    }

    #[test]
    fn test_empty_spec_rejected() {
        let spec = ChainSpec { tiers: vec![], retention: Importance::Debug };
        assert!(matches!(
            spec.validate(),
            Err(EventLogError::Config(ConfigError::NoTiers))
        ));
    }

    #[test]
    fn test_too_many_tiers_rejected() {
        let tier = TierSpec { capacity: 256, ceiling: Importance::Debug };
        let spec = ChainSpec { tiers: vec![tier; MAX_TIERS + 1], retention: Importance::Debug };
        assert!(matches!(
            spec.validate(),
            Err(EventLogError::Config(ConfigError::TooManyTiers { .. }))
        ));
    }

    #[test]
    fn test_non_ascending_ceilings_rejected() {
        let mut spec = three_tier_spec();
        spec.tiers[2].ceiling = Importance::Info; // duplicate of tier 1
        assert!(matches!(
            spec.validate(),
            Err(EventLogError::Config(ConfigError::CeilingsNotAscending { tier: 2 }))
        ));
    }

    #[test]
    fn test_tiny_capacity_rejected() {
        let mut spec = three_tier_spec();
        spec.tiers[0].capacity = MIN_TIER_CAPACITY - 1;
        assert!(matches!(
            spec.validate(),
            Err(EventLogError::Config(ConfigError::CapacityTooSmall { tier: 0, .. }))
        ));
    }

    #[test]
    fn test_spec_serde_round_trip() {
        let spec = three_tier_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: ChainSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
