use crate::channel::ParityClass;

use super::Tile;

/// Where a receive slot's buffer currently is.
///
/// The buffer itself moves with the phase: it sits in the slot during
/// [`SlotPhase::Free`] and [`SlotPhase::Active`], travels inside a broadcast
/// operation during [`SlotPhase::InFlight`] and inside a compute task during
/// [`SlotPhase::InCompute`]. A slot therefore never aliases its buffer with
/// the fabric or a worker, which is what makes overwriting a tile that a
/// compute still reads impossible to express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Buffer parked in the slot, free to stage the next broadcast.
    Free,
    /// Buffer handed to a broadcast operation, being filled.
    InFlight,
    /// Buffer back in the slot holding received data, not yet consumed.
    Active,
    /// Buffer handed to a compute task.
    InCompute,
}

#[derive(Debug)]
struct RecvSlot {
    phase: SlotPhase,
    tile: Option<Tile>,
}

impl RecvSlot {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            phase: SlotPhase::Free,
            tile: Some(Tile::zeroed(rows, cols)),
        }
    }

    fn take(&mut self, expected: SlotPhase, next: SlotPhase) -> Tile {
        if self.phase != expected {
            panic!(
                "receive slot is {:?}, transition expects {expected:?}",
                self.phase
            );
        }
        self.phase = next;
        match self.tile.take() {
            Some(tile) => tile,
            None => panic!("receive slot in phase {expected:?} lost its buffer"),
        }
    }

    fn put(&mut self, expected: SlotPhase, next: SlotPhase, tile: Tile) {
        if self.phase != expected {
            panic!(
                "receive slot is {:?}, transition expects {expected:?}",
                self.phase
            );
        }
        self.phase = next;
        self.tile = Some(tile);
    }
}

/// Receive slots of one operand matrix on one node: a single staging buffer
/// per parity class.
///
/// Broadcasts of step `s` land in the slot of class `s mod k`, so two
/// consecutive steps stage through different buffers while the classes
/// further apart reuse a buffer only after its compute has returned it.
#[derive(Debug)]
pub struct RecvSlots {
    slots: Vec<RecvSlot>,
}

impl RecvSlots {
    pub fn new(parity_classes: usize, rows: usize, cols: usize) -> Self {
        Self {
            slots: (0..parity_classes)
                .map(|_| RecvSlot::new(rows, cols))
                .collect(),
        }
    }

    pub fn phase(&self, class: ParityClass) -> SlotPhase {
        self.slots[class.index()].phase
    }

    /// Takes the free buffer of `class` to stage an incoming broadcast.
    pub fn begin_transfer(&mut self, class: ParityClass) -> Tile {
        self.slots[class.index()].take(SlotPhase::Free, SlotPhase::InFlight)
    }

    /// Installs a filled buffer after its broadcast completed.
    pub fn finish_transfer(&mut self, class: ParityClass, tile: Tile) {
        self.slots[class.index()].put(SlotPhase::InFlight, SlotPhase::Active, tile);
    }

    /// Returns an in-flight buffer without installing it, for drain paths.
    pub fn abort_transfer(&mut self, class: ParityClass, tile: Tile) {
        self.slots[class.index()].put(SlotPhase::InFlight, SlotPhase::Free, tile);
    }

    /// Takes the received buffer of `class` for a compute task.
    pub fn begin_compute(&mut self, class: ParityClass) -> Tile {
        self.slots[class.index()].take(SlotPhase::Active, SlotPhase::InCompute)
    }

    /// Returns a consumed buffer, making the slot stageable again.
    pub fn finish_compute(&mut self, class: ParityClass, tile: Tile) {
        self.slots[class.index()].put(SlotPhase::InCompute, SlotPhase::Free, tile);
    }

    /// Frees every slot holding a received-but-unconsumed payload, so a
    /// fresh run can stage from a clean slate.
    ///
    /// Buffers still travelling with a broadcast or a compute task cannot
    /// be reclaimed here. The server drains those paths before relaunching,
    /// so finding one is a lifecycle bug.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            match slot.phase {
                SlotPhase::Free => {}
                SlotPhase::Active => slot.phase = SlotPhase::Free,
                SlotPhase::InFlight | SlotPhase::InCompute => panic!(
                    "cannot reset a receive slot in phase {:?}, its buffer is still out",
                    slot.phase
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(index: usize) -> ParityClass {
        ParityClass::new(index)
    }

    #[test]
    fn full_cycle_returns_to_free() {
        let mut slots = RecvSlots::new(2, 2, 3);
        assert_eq!(slots.phase(class(0)), SlotPhase::Free);

        let staged = slots.begin_transfer(class(0));
        assert_eq!(slots.phase(class(0)), SlotPhase::InFlight);

        slots.finish_transfer(class(0), staged);
        assert_eq!(slots.phase(class(0)), SlotPhase::Active);

        let consumed = slots.begin_compute(class(0));
        assert_eq!(slots.phase(class(0)), SlotPhase::InCompute);

        slots.finish_compute(class(0), consumed);
        assert_eq!(slots.phase(class(0)), SlotPhase::Free);
    }

    #[test]
    fn classes_cycle_independently() {
        let mut slots = RecvSlots::new(2, 2, 2);
        let first = slots.begin_transfer(class(0));
        let second = slots.begin_transfer(class(1));
        assert_eq!(slots.phase(class(0)), SlotPhase::InFlight);
        assert_eq!(slots.phase(class(1)), SlotPhase::InFlight);
        slots.finish_transfer(class(1), second);
        assert_eq!(slots.phase(class(0)), SlotPhase::InFlight);
        assert_eq!(slots.phase(class(1)), SlotPhase::Active);
        slots.finish_transfer(class(0), first);
        assert_eq!(slots.phase(class(0)), SlotPhase::Active);
    }

    #[test]
    #[should_panic(expected = "transition expects Free")]
    fn double_stage_of_one_class_is_rejected() {
        let mut slots = RecvSlots::new(2, 2, 2);
        let _first = slots.begin_transfer(class(0));
        let _second = slots.begin_transfer(class(0));
    }

    #[test]
    #[should_panic(expected = "transition expects Active")]
    fn compute_needs_an_installed_buffer() {
        let mut slots = RecvSlots::new(2, 2, 2);
        let _ = slots.begin_compute(class(0));
    }

    #[test]
    fn abort_restores_a_free_slot() {
        let mut slots = RecvSlots::new(2, 2, 2);
        let staged = slots.begin_transfer(class(1));
        slots.abort_transfer(class(1), staged);
        assert_eq!(slots.phase(class(1)), SlotPhase::Free);
        let _ = slots.begin_transfer(class(1));
    }

    #[test]
    fn reset_frees_installed_payloads() {
        let mut slots = RecvSlots::new(2, 2, 2);
        let staged = slots.begin_transfer(class(0));
        slots.finish_transfer(class(0), staged);
        assert_eq!(slots.phase(class(0)), SlotPhase::Active);

        slots.reset();
        assert_eq!(slots.phase(class(0)), SlotPhase::Free);
        assert_eq!(slots.phase(class(1)), SlotPhase::Free);
        let _ = slots.begin_transfer(class(0));
    }

    #[test]
    #[should_panic(expected = "buffer is still out")]
    fn reset_rejects_a_travelling_buffer() {
        let mut slots = RecvSlots::new(2, 2, 2);
        let _staged = slots.begin_transfer(class(0));
        slots.reset();
    }
}
