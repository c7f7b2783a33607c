// SPDX-License-Identifier: MPL-2.0

use bitvec::prelude::*;
use spin::Mutex;

use crate::line::HwIrq;

/// The set of lines that have fired but have not been delivered yet.
///
/// The set is a dense bitmap with one bit per line. All operations take a
/// spin lock for a few instructions, so marking a line never blocks for long
/// and the drain's final emptiness check is ordered against any racing mark.
#[derive(Debug)]
pub(crate) struct PendingSet {
    bits: Mutex<BitVec>,
}

impl PendingSet {
    pub(crate) fn new(nr_lines: usize) -> Self {
        Self {
            bits: Mutex::new(bitvec![0; nr_lines]),
        }
    }

    /// Marks a line as pending. Marking a pending line has no effect.
    ///
    /// # Panics
    ///
    /// Panics if `hwirq` is out of range.
    pub(crate) fn mark(&self, hwirq: HwIrq) {
        self.bits.lock().set(hwirq, true);
    }

    /// Clears and returns the lowest pending line.
    pub(crate) fn take_lowest(&self) -> Option<HwIrq> {
        let mut bits = self.bits.lock();
        let hwirq = bits.first_one()?;
        bits.set(hwirq, false);
        Some(hwirq)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bits.lock().not_any()
    }

    pub(crate) fn is_pending(&self, hwirq: HwIrq) -> bool {
        self.bits.lock().get(hwirq).is_some_and(|bit| *bit)
    }

    /// Discards every pending line.
    pub(crate) fn clear(&self) {
        self.bits.lock().fill(false);
    }
}
