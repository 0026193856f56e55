use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Identifier of one physical fabric channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(usize);

impl ChannelId {
    /// Position of the channel in the allocation table.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl core::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// One of the `k` step parity classes, `step % k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParityClass(usize);

impl ParityClass {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Class index, `0..k`.
    pub fn index(&self) -> usize {
        self.0
    }

    /// Class of a step under `parity_classes` classes.
    pub fn of_step(step: usize, parity_classes: usize) -> Self {
        Self(step % parity_classes)
    }
}

impl core::fmt::Display for ParityClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "parity{}", self.0)
    }
}

/// The row and column channels owned by one parity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelPair {
    /// Channel carrying row-wide A broadcasts.
    pub row: ChannelId,
    /// Channel carrying column-wide B broadcasts.
    pub col: ChannelId,
}

/// The channel table of one grid, built once at configure time.
///
/// Steps map to channels by parity alone: `channel_for(step)` is a lookup
/// into this table, so no channel is ever reconfigured while a run is in
/// flight. Consecutive steps land on disjoint pairs, which is what lets a
/// broadcast for step `s + 1` overlap the compute of step `s`.
#[derive(Debug, Clone)]
pub struct ChannelBook {
    classes: Vec<ChannelPair>,
}

impl ChannelBook {
    /// Claim `2 * parity_classes` channels out of the requested budget.
    ///
    /// Fails eagerly when the budget or the fabric cap cannot cover the
    /// classes; nothing is allocated on failure.
    pub fn allocate(
        channel_count: usize,
        parity_classes: usize,
        max_channels: usize,
    ) -> Result<Self, ConfigurationError> {
        if parity_classes == 0 {
            return Err(ConfigurationError::InvalidParity);
        }
        let needed = 2 * parity_classes;
        let available = channel_count.min(max_channels);
        if needed > available {
            return Err(ConfigurationError::ChannelExhausted {
                parity_classes,
                needed,
                available,
            });
        }
        let classes = (0..parity_classes)
            .map(|p| ChannelPair {
                row: ChannelId(2 * p),
                col: ChannelId(2 * p + 1),
            })
            .collect();
        Ok(Self { classes })
    }

    /// Number of parity classes in the table.
    pub fn parity_classes(&self) -> usize {
        self.classes.len()
    }

    /// Number of channels the table claimed.
    pub fn channels_used(&self) -> usize {
        2 * self.classes.len()
    }

    /// Parity class of a step.
    pub fn class_for(&self, step: usize) -> ParityClass {
        ParityClass(step % self.classes.len())
    }

    /// Channel pair of a step.
    pub fn pair_for(&self, step: usize) -> ChannelPair {
        self.classes[step % self.classes.len()]
    }

    /// Channel pair of a parity class.
    pub fn pair(&self, class: ParityClass) -> ChannelPair {
        self.classes[class.index()]
    }

    /// All claimed channels, row channel before column channel per class.
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.classes.iter().flat_map(|pair| [pair.row, pair.col])
    }
}
