use std::sync::Arc;

use crate::channel::{ChannelId, ParityClass};
use crate::grid::NodeId;
use crate::id::TransferId;
use crate::scheduler::BroadcastAxis;
use crate::tile::Tile;

/// One staged broadcast: a shared source tile and the staging buffers of
/// every destination node, owned by the operation until it completes.
///
/// Holding the buffers by value is what serializes reuse: a staging buffer
/// can only be overwritten by an operation that owns it, and ownership only
/// comes back through the completion.
#[derive(Debug)]
pub struct BroadcastOp {
    pub id: TransferId,
    pub axis: BroadcastAxis,
    pub step: usize,
    pub class: ParityClass,
    pub channel: ChannelId,
    pub source: Arc<Tile>,
    pub dests: Vec<(NodeId, Tile)>,
}

impl BroadcastOp {
    /// Words the broadcast puts on its lane, independent of fan-out.
    pub fn words(&self) -> u64 {
        self.source.elems() as u64
    }

    /// Copies the source into every staging buffer.
    pub fn execute(self) -> BroadcastCompletion {
        let words = self.words();
        let mut filled = self.dests;
        for (_, tile) in &mut filled {
            tile.copy_from_slice(self.source.as_slice());
        }
        BroadcastCompletion {
            id: self.id,
            axis: self.axis,
            step: self.step,
            class: self.class,
            channel: self.channel,
            words,
            filled,
        }
    }
}

/// A finished broadcast, carrying the filled staging buffers home.
#[derive(Debug)]
pub struct BroadcastCompletion {
    pub id: TransferId,
    pub axis: BroadcastAxis,
    pub step: usize,
    pub class: ParityClass,
    pub channel: ChannelId,
    pub words: u64,
    pub filled: Vec<(NodeId, Tile)>,
}
