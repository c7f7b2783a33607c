// SPDX-License-Identifier: MPL-2.0

//! Simulated IRQ lines and their trigger configuration.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use bitflags::bitflags;
use spin::Once;

use crate::{prelude::*, table::Virq};

/// The hardware number of a simulated line, i.e., its offset in the simulator.
pub type HwIrq = usize;

bitflags! {
    /// The raw trigger type requested for an IRQ line.
    ///
    /// The bit values follow the conventional `IRQ_TYPE_*` encoding.
    pub struct IrqType: u32 {
        /// Rising edge triggered.
        const EDGE_RISING  = 0x0000_0001;
        /// Falling edge triggered.
        const EDGE_FALLING = 0x0000_0002;
        /// Both edges triggered.
        const EDGE_BOTH    = Self::EDGE_RISING.bits | Self::EDGE_FALLING.bits;
        /// High level triggered.
        const LEVEL_HIGH   = 0x0000_0004;
        /// Low level triggered.
        const LEVEL_LOW    = 0x0000_0008;
    }
}

/// The edge polarity a simulated line is configured for.
///
/// Simulated lines are edge triggered only; level types are rejected.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TriggerType {
    /// Rising edge.
    Rising = 1,
    /// Falling edge.
    Falling = 2,
    /// Both edges.
    #[default]
    Both = 3,
}

impl TriggerType {
    /// Converts the trigger type to its raw `IrqType` form.
    pub fn to_irq_type(self) -> IrqType {
        IrqType::from_bits_truncate(self as u32)
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Rising,
            2 => Self::Falling,
            _ => Self::Both,
        }
    }
}

impl TryFrom<IrqType> for TriggerType {
    type Error = Error;

    fn try_from(ty: IrqType) -> Result<Self> {
        if ty == IrqType::EDGE_RISING {
            Ok(Self::Rising)
        } else if ty == IrqType::EDGE_FALLING {
            Ok(Self::Falling)
        } else if ty == IrqType::EDGE_BOTH {
            Ok(Self::Both)
        } else {
            Err(Error::with_msg(
                InvalidArgs,
                "only edge trigger types are supported",
            ))
        }
    }
}

/// The runtime state of one simulated line.
///
/// The fields are updated atomically; no lock is taken on any path.
#[derive(Debug)]
pub(crate) struct Line {
    hwirq: HwIrq,
    virq: Once<Virq>,
    enabled: AtomicBool,
    trigger: AtomicU8,
}

impl Line {
    /// Creates a masked line with the default trigger type.
    pub(crate) fn new(hwirq: HwIrq) -> Self {
        Self {
            hwirq,
            virq: Once::new(),
            enabled: AtomicBool::new(false),
            trigger: AtomicU8::new(TriggerType::default() as u8),
        }
    }

    pub(crate) fn hwirq(&self) -> HwIrq {
        self.hwirq
    }

    /// Returns the IRQ number assigned by the handler table, if mapped.
    pub(crate) fn virq(&self) -> Option<Virq> {
        self.virq.get().copied()
    }

    /// Records the IRQ number assigned by the handler table.
    ///
    /// The number is set at most once during the lifetime of the line.
    pub(crate) fn bind(&self, virq: Virq) {
        self.virq.call_once(|| virq);
    }

    pub(crate) fn mask(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub(crate) fn unmask(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn trigger_type(&self) -> TriggerType {
        TriggerType::from_raw(self.trigger.load(Ordering::Relaxed))
    }

    /// Validates and records a trigger type.
    ///
    /// An empty type leaves the configured trigger type unchanged.
    pub(crate) fn set_trigger_type(&self, ty: IrqType) -> Result<()> {
        if ty.is_empty() {
            return Ok(());
        }
        let trigger = TriggerType::try_from(ty)?;
        self.trigger.store(trigger as u8, Ordering::Relaxed);
        Ok(())
    }
}
