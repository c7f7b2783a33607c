// SPDX-License-Identifier: MPL-2.0

//! The IRQ handler table.
//!
//! An interrupt controller does not call interrupt handlers by itself. It
//! registers each of its lines with a handler table, which hands out an IRQ
//! number ([`Virq`]) per line. Consumers attach handlers to those numbers and
//! enable or disable the lines; the table forwards the latter to the
//! controller through the [`IrqChip`] callbacks. When the controller decides
//! that a line must be serviced, it asks the table to deliver the IRQ.
//!
//! [`HandlerTable`] is the interface the simulator consumes. [`IrqTable`] is a
//! self-contained implementation of it.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::RwLock;

use crate::{
    line::{HwIrq, IrqType},
    prelude::*,
};

/// An IRQ number handed out by a handler table.
pub type Virq = usize;

/// Type alias for the IRQ handler function.
pub type IrqHandlerFunction = dyn Fn(Virq) + Send + Sync + 'static;

/// The callbacks of an interrupt controller, keyed by hardware line number.
pub trait IrqChip: Send + Sync {
    /// Returns the name of the controller.
    fn name(&self) -> &'static str;

    /// Disables a line.
    fn mask(&self, hwirq: HwIrq);

    /// Enables a line.
    fn unmask(&self, hwirq: HwIrq);

    /// Configures the trigger type of a line.
    fn set_type(&self, hwirq: HwIrq, ty: IrqType) -> Result<()>;
}

/// The registration and dispatch services an interrupt controller relies on.
pub trait HandlerTable: Send + Sync {
    /// Registers the line `hwirq` of `chip` and returns its IRQ number.
    fn map(&self, hwirq: HwIrq, chip: Arc<dyn IrqChip>) -> Result<Virq>;

    /// Deregisters a line. Unknown numbers are ignored.
    fn unmap(&self, virq: Virq);

    /// Invokes the handler attached to `virq`.
    fn handle_irq(&self, virq: Virq) -> Result<()>;

    /// Returns whether the line behind `virq` is enabled.
    fn is_enabled(&self, virq: Virq) -> Result<bool>;
}

/// The first IRQ number handed out by an [`IrqTable`].
///
/// IRQ number zero is never valid.
pub const IRQ_BASE: Virq = 1;

/// An in-memory handler table with a bounded number of IRQ numbers.
///
/// # Example
///
/// ```rust
/// use irq_sim::{IrqSim, IrqTable, PolledQueue};
///
/// let table = IrqTable::new(32);
/// let queue = PolledQueue::new();
/// let sim = IrqSim::new(table.clone(), queue.clone(), 1).unwrap();
///
/// let virq = sim.virq(0).unwrap();
/// table.request_irq(virq, |virq| println!("IRQ {virq}")).unwrap();
/// table.enable_irq(virq).unwrap();
///
/// sim.fire(0).unwrap();
/// queue.poll();
/// assert_eq!(table.irq_count(virq), Some(1));
/// ```
pub struct IrqTable {
    descs: RwLock<Vec<Option<Arc<IrqDesc>>>>,
    capacity: usize,
}

/// The state the table keeps for one IRQ number.
struct IrqDesc {
    hwirq: HwIrq,
    chip: Arc<dyn IrqChip>,
    action: RwLock<Option<Arc<IrqHandlerFunction>>>,
    enabled: AtomicBool,
    count: AtomicUsize,
    unhandled: AtomicUsize,
}

impl IrqDesc {
    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        self.chip.unmask(self.hwirq);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.chip.mask(self.hwirq);
    }
}

impl IrqTable {
    /// Creates a table able to hold `capacity` IRQ numbers.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            descs: RwLock::new(Vec::new()),
            capacity,
        })
    }

    fn desc(&self, virq: Virq) -> Result<Arc<IrqDesc>> {
        virq.checked_sub(IRQ_BASE)
            .and_then(|index| self.descs.read().get(index).cloned().flatten())
            .ok_or(Error::with_msg(NotFound, "the IRQ number is not mapped"))
    }

    /// Attaches a handler to an IRQ number.
    ///
    /// The line is left disabled; call [`IrqTable::enable_irq`] to start
    /// receiving it.
    pub fn request_irq<F>(&self, virq: Virq, handler: F) -> Result<()>
    where
        F: Fn(Virq) + Send + Sync + 'static,
    {
        let desc = self.desc(virq)?;
        let mut action = desc.action.write();
        if action.is_some() {
            return_errno_with_msg!(Busy, "the IRQ already has a handler");
        }
        *action = Some(Arc::new(handler));
        Ok(())
    }

    /// Disables an IRQ number and detaches its handler.
    pub fn free_irq(&self, virq: Virq) -> Result<()> {
        let desc = self.desc(virq)?;
        desc.disable();
        desc.action.write().take();
        Ok(())
    }

    /// Enables the line behind an IRQ number.
    pub fn enable_irq(&self, virq: Virq) -> Result<()> {
        self.desc(virq)?.enable();
        Ok(())
    }

    /// Disables the line behind an IRQ number.
    pub fn disable_irq(&self, virq: Virq) -> Result<()> {
        self.desc(virq)?.disable();
        Ok(())
    }

    /// Configures the trigger type of the line behind an IRQ number.
    pub fn set_irq_type(&self, virq: Virq, ty: IrqType) -> Result<()> {
        let desc = self.desc(virq)?;
        desc.chip.set_type(desc.hwirq, ty)
    }

    /// Configures the trigger type from its raw encoding.
    ///
    /// Unknown bits are rejected.
    pub fn set_irq_type_raw(&self, virq: Virq, raw: u32) -> Result<()> {
        let Some(ty) = IrqType::from_bits(raw) else {
            return_errno_with_msg!(InvalidArgs, "unknown IRQ trigger type bits");
        };
        self.set_irq_type(virq, ty)
    }

    /// Returns the name of the controller that owns an IRQ number.
    pub fn chip_name(&self, virq: Virq) -> Result<&'static str> {
        Ok(self.desc(virq)?.chip.name())
    }

    /// Returns how many times the handler of an IRQ number has been invoked.
    pub fn irq_count(&self, virq: Virq) -> Option<usize> {
        self.desc(virq)
            .ok()
            .map(|desc| desc.count.load(Ordering::Relaxed))
    }

    /// Returns how many deliveries found no handler attached.
    pub fn unhandled_count(&self, virq: Virq) -> Option<usize> {
        self.desc(virq)
            .ok()
            .map(|desc| desc.unhandled.load(Ordering::Relaxed))
    }

    /// Returns the number of mapped IRQ numbers.
    pub fn mapped_count(&self) -> usize {
        self.descs.read().iter().filter(|desc| desc.is_some()).count()
    }
}

impl HandlerTable for IrqTable {
    fn map(&self, hwirq: HwIrq, chip: Arc<dyn IrqChip>) -> Result<Virq> {
        let desc = Arc::new(IrqDesc {
            hwirq,
            chip,
            action: RwLock::new(None),
            enabled: AtomicBool::new(false),
            count: AtomicUsize::new(0),
            unhandled: AtomicUsize::new(0),
        });

        let mut descs = self.descs.write();
        let index = match descs.iter().position(Option::is_none) {
            Some(index) => index,
            None if descs.len() < self.capacity => {
                descs.push(None);
                descs.len() - 1
            }
            None => return_errno_with_msg!(NoMemory, "no free IRQ number"),
        };
        descs[index] = Some(desc);
        Ok(index + IRQ_BASE)
    }

    fn unmap(&self, virq: Virq) {
        let Some(index) = virq.checked_sub(IRQ_BASE) else {
            return;
        };
        let desc = {
            let mut descs = self.descs.write();
            match descs.get_mut(index) {
                Some(slot) => slot.take(),
                None => None,
            }
        };
        if let Some(desc) = desc {
            desc.disable();
        }
    }

    fn handle_irq(&self, virq: Virq) -> Result<()> {
        let desc = self.desc(virq)?;
        let action = desc.action.read().clone();
        match action {
            Some(handler) => {
                desc.count.fetch_add(1, Ordering::Relaxed);
                handler(virq);
            }
            None => {
                desc.unhandled.fetch_add(1, Ordering::Relaxed);
                trace!("irq-sim: IRQ {} has no handler", virq);
            }
        }
        Ok(())
    }

    fn is_enabled(&self, virq: Virq) -> Result<bool> {
        Ok(self.desc(virq)?.enabled.load(Ordering::Acquire))
    }
}

impl core::fmt::Debug for IrqTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqTable")
            .field("capacity", &self.capacity)
            .field("mapped", &self.mapped_count())
            .finish()
    }
}
