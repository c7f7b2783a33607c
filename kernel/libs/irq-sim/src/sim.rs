// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    devres::Device,
    line::{HwIrq, IrqType, Line, TriggerType},
    pending::PendingSet,
    prelude::*,
    table::{HandlerTable, IrqChip, Virq},
    work::{WorkItem, WorkQueue},
};

/// A simulated interrupt controller.
///
/// The simulator owns a fixed number of IRQ lines, each registered with a
/// [`HandlerTable`] under its own IRQ number. Any thread may fire a line.
/// Firing an enabled line marks it as pending and schedules a single
/// deferred drain on a [`WorkQueue`]. The drain delivers every pending line
/// to the handler table in ascending line order.
///
/// Lines start disabled. A fired line that is disabled drops the edge, just
/// like a masked hardware line. Masking is only checked when a line fires, so
/// a line that is masked after it became pending is still delivered.
///
/// Firing a pending line again before the drain reaches it has no further
/// effect: a pending line is delivered once, however many edges it latched.
///
/// Dropping the simulator, or calling [`IrqSim::destroy`], waits for the
/// deferred drain to finish and deregisters every line.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
///
/// use irq_sim::{IrqSim, IrqTable, PolledQueue};
///
/// let table = IrqTable::new(16);
/// let queue = PolledQueue::new();
/// let sim = IrqSim::new(table.clone(), queue.clone(), 4).unwrap();
///
/// let delivered = Arc::new(Mutex::new(Vec::new()));
/// for offset in [1, 3] {
///     let virq = sim.virq(offset).unwrap();
///     let delivered = delivered.clone();
///     table
///         .request_irq(virq, move |_| delivered.lock().unwrap().push(offset))
///         .unwrap();
///     table.enable_irq(virq).unwrap();
/// }
///
/// for offset in 0..4 {
///     sim.fire(offset).unwrap();
/// }
/// queue.poll();
/// assert_eq!(*delivered.lock().unwrap(), [1, 3]);
///
/// sim.destroy();
/// assert_eq!(table.mapped_count(), 0);
/// ```
#[derive(Debug)]
#[must_use]
pub struct IrqSim {
    inner: Arc<SimInner>,
}

struct SimInner {
    lines: Vec<Line>,
    pending: PendingSet,
    work_item: Arc<WorkItem>,
    table: Arc<dyn HandlerTable>,
    queue: Arc<dyn WorkQueue>,
    is_dead: AtomicBool,
}

/// A handle to one line of a simulator.
///
/// Handles are cheap to clone and may be sent to any thread that needs to
/// fire the line.
#[derive(Clone)]
pub struct SimLine {
    sim: Arc<SimInner>,
    hwirq: HwIrq,
    virq: Virq,
}

impl IrqSim {
    /// The name under which the simulator registers its lines.
    pub const CHIP_NAME: &'static str = "irq_sim";

    /// Creates a simulator with `num_irqs` lines.
    ///
    /// Every line is registered with `table`. Drains are scheduled on `queue`.
    /// If a registration fails, the lines registered so far are deregistered
    /// and the error is returned.
    pub fn new(
        table: Arc<dyn HandlerTable>,
        queue: Arc<dyn WorkQueue>,
        num_irqs: usize,
    ) -> Result<Self> {
        if num_irqs == 0 {
            return_errno_with_msg!(InvalidArgs, "a simulator needs at least one line");
        }

        let mut lines = Vec::new();
        lines
            .try_reserve_exact(num_irqs)
            .map_err(|_| Error::with_msg(NoMemory, "cannot allocate the line table"))?;
        lines.extend((0..num_irqs).map(Line::new));

        let inner = Arc::new_cyclic(|weak: &Weak<SimInner>| {
            let weak = weak.clone();
            SimInner {
                lines,
                pending: PendingSet::new(num_irqs),
                work_item: WorkItem::new(Box::new(move || {
                    if let Some(sim) = weak.upgrade() {
                        sim.drain();
                    }
                })),
                table,
                queue,
                is_dead: AtomicBool::new(false),
            }
        });

        for line in inner.lines.iter() {
            let chip: Arc<dyn IrqChip> = inner.clone();
            match inner.table.map(line.hwirq(), chip) {
                Ok(virq) => line.bind(virq),
                Err(err) => {
                    warn!(
                        "irq-sim: failed to register line {}: {}",
                        line.hwirq(),
                        err
                    );
                    inner.unmap_lines();
                    inner.is_dead.store(true, Ordering::Release);
                    return Err(err);
                }
            }
        }

        debug!("irq-sim: created a simulator with {} lines", num_irqs);
        Ok(Self { inner })
    }

    /// Creates a simulator whose lifetime is bound to `dev`.
    ///
    /// The simulator is torn down when `dev` releases its resources. If the
    /// creation fails, nothing is registered on `dev`.
    pub fn new_managed(
        dev: &Device,
        table: Arc<dyn HandlerTable>,
        queue: Arc<dyn WorkQueue>,
        num_irqs: usize,
    ) -> Result<Arc<Self>> {
        let sim = Arc::new(Self::new(table, queue, num_irqs)?);
        let managed = sim.clone();
        dev.add_action(move || managed.teardown());
        Ok(sim)
    }

    /// Tears down the simulator.
    ///
    /// Blocks until the deferred drain, if any, has completed. Lines that are
    /// still pending afterwards are discarded.
    ///
    /// Must not be called from an IRQ handler of this simulator.
    pub fn destroy(self) {
        self.teardown();
    }

    fn teardown(&self) {
        self.inner.teardown();
    }

    /// Returns the number of lines.
    pub fn num_irqs(&self) -> usize {
        self.inner.lines.len()
    }

    /// Returns the handler table the lines are registered with.
    pub fn table(&self) -> &Arc<dyn HandlerTable> {
        &self.inner.table
    }

    /// Returns the IRQ number of the line at `offset`.
    pub fn virq(&self, offset: HwIrq) -> Option<Virq> {
        self.inner.lines.get(offset)?.virq()
    }

    /// Returns a handle to the line at `offset`.
    ///
    /// Fails with [`Errno::NotFound`] once the simulator has been torn down.
    ///
    /// [`Errno::NotFound`]: crate::Errno::NotFound
    pub fn line(&self, offset: HwIrq) -> Result<SimLine> {
        let line = self.inner.line(offset)?;
        self.inner.ensure_alive()?;
        let Some(virq) = line.virq() else {
            return_errno_with_msg!(NotFound, "the line is not registered");
        };
        // The table forgets the line when the simulator is torn down.
        self.inner.table.is_enabled(virq)?;
        Ok(SimLine {
            sim: self.inner.clone(),
            hwirq: offset,
            virq,
        })
    }

    /// Fires the line at `offset`.
    ///
    /// The edge is dropped if the line is disabled.
    pub fn fire(&self, offset: HwIrq) -> Result<()> {
        self.inner.line(offset)?;
        self.inner.fire(offset);
        Ok(())
    }

    /// Returns whether the line at `offset` is enabled.
    pub fn is_enabled(&self, offset: HwIrq) -> Result<bool> {
        Ok(self.inner.line(offset)?.is_enabled())
    }

    /// Returns whether the line at `offset` waits for delivery.
    pub fn is_pending(&self, offset: HwIrq) -> Result<bool> {
        self.inner.line(offset)?;
        Ok(self.inner.pending.is_pending(offset))
    }

    /// Returns the trigger type configured for the line at `offset`.
    pub fn trigger_type(&self, offset: HwIrq) -> Result<TriggerType> {
        Ok(self.inner.line(offset)?.trigger_type())
    }
}

impl Drop for IrqSim {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl SimInner {
    fn line(&self, hwirq: HwIrq) -> Result<&Line> {
        self.lines
            .get(hwirq)
            .ok_or(Error::with_msg(InvalidArgs, "the line offset is out of range"))
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_dead.load(Ordering::Acquire) {
            return_errno_with_msg!(NotFound, "the simulator has been torn down");
        }
        Ok(())
    }

    fn fire(&self, hwirq: HwIrq) {
        if self.is_dead.load(Ordering::Acquire) {
            trace!("irq-sim: line {} fired after teardown, edge dropped", hwirq);
            return;
        }
        if !self.lines[hwirq].is_enabled() {
            trace!("irq-sim: line {} is masked, edge dropped", hwirq);
            return;
        }
        self.pending.mark(hwirq);
        self.queue.enqueue(self.work_item.clone());
    }

    /// Delivers pending lines until none is left.
    ///
    /// Runs on the work queue. The work item is disarmed before this starts,
    /// so a line marked after the last check schedules another drain.
    fn drain(&self) {
        while let Some(hwirq) = self.pending.take_lowest() {
            let Some(virq) = self.lines[hwirq].virq() else {
                continue;
            };
            trace!("irq-sim: delivering line {} as IRQ {}", hwirq, virq);
            if let Err(err) = self.table.handle_irq(virq) {
                warn!("irq-sim: failed to deliver IRQ {}: {}", virq, err);
            }
        }
    }

    fn teardown(&self) {
        if self.is_dead.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.flush(&self.work_item);
        self.unmap_lines();
        if !self.pending.is_empty() {
            debug!("irq-sim: discarding undelivered lines");
            self.pending.clear();
        }
        debug!("irq-sim: destroyed a simulator with {} lines", self.lines.len());
    }

    fn unmap_lines(&self) {
        for virq in self.lines.iter().filter_map(Line::virq) {
            self.table.unmap(virq);
        }
    }
}

impl IrqChip for SimInner {
    fn name(&self) -> &'static str {
        IrqSim::CHIP_NAME
    }

    fn mask(&self, hwirq: HwIrq) {
        if let Some(line) = self.lines.get(hwirq) {
            line.mask();
        }
    }

    fn unmask(&self, hwirq: HwIrq) {
        if let Some(line) = self.lines.get(hwirq) {
            line.unmask();
        }
    }

    fn set_type(&self, hwirq: HwIrq, ty: IrqType) -> Result<()> {
        self.line(hwirq)?.set_trigger_type(ty)
    }
}

impl core::fmt::Debug for SimInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimInner")
            .field("num_irqs", &self.lines.len())
            .field("work_item", &self.work_item)
            .field("is_dead", &self.is_dead.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SimLine {
    /// Returns the offset of the line in its simulator.
    pub fn hwirq(&self) -> HwIrq {
        self.hwirq
    }

    /// Returns the IRQ number of the line.
    pub fn virq(&self) -> Virq {
        self.virq
    }

    /// Returns the line if it is still registered with the handler table.
    fn registered_line(&self) -> Result<&Line> {
        self.sim.ensure_alive()?;
        self.sim.table.is_enabled(self.virq)?;
        Ok(&self.sim.lines[self.hwirq])
    }

    /// Fires the line.
    ///
    /// The edge is dropped if the line is disabled or its simulator has been
    /// torn down.
    pub fn fire(&self) {
        self.sim.fire(self.hwirq);
    }

    /// Disables the line.
    pub fn mask(&self) -> Result<()> {
        self.registered_line()?.mask();
        Ok(())
    }

    /// Enables the line.
    pub fn unmask(&self) -> Result<()> {
        self.registered_line()?.unmask();
        Ok(())
    }

    /// Returns whether the line is enabled.
    pub fn is_enabled(&self) -> bool {
        self.sim.lines[self.hwirq].is_enabled()
    }

    /// Configures the trigger type of the line.
    ///
    /// Level types are rejected with [`Errno::InvalidArgs`] and leave the
    /// current configuration in place. A line whose simulator has been torn
    /// down fails with [`Errno::NotFound`].
    ///
    /// [`Errno::InvalidArgs`]: crate::Errno::InvalidArgs
    /// [`Errno::NotFound`]: crate::Errno::NotFound
    pub fn set_trigger_type(&self, ty: IrqType) -> Result<()> {
        self.registered_line()?.set_trigger_type(ty)
    }

    /// Returns the trigger type configured for the line.
    pub fn trigger_type(&self) -> TriggerType {
        self.sim.lines[self.hwirq].trigger_type()
    }
}

impl core::fmt::Debug for SimLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimLine")
            .field("hwirq", &self.hwirq)
            .field("virq", &self.virq)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use spin::Mutex;

    use super::*;
    use crate::{
        table::{IRQ_BASE, IrqTable},
        work::PolledQueue,
    };

    struct Fixture {
        table: Arc<IrqTable>,
        queue: Arc<PolledQueue>,
        sim: IrqSim,
        delivered: Arc<Mutex<Vec<HwIrq>>>,
    }

    /// Creates a simulator whose lines all record their deliveries.
    fn fixture(num_irqs: usize) -> Fixture {
        let table = IrqTable::new(64);
        let queue = PolledQueue::new();
        let sim = IrqSim::new(table.clone(), queue.clone(), num_irqs).unwrap();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        for offset in 0..num_irqs {
            let delivered = delivered.clone();
            table
                .request_irq(sim.virq(offset).unwrap(), move |_| {
                    delivered.lock().push(offset)
                })
                .unwrap();
        }
        Fixture {
            table,
            queue,
            sim,
            delivered,
        }
    }

    impl Fixture {
        fn enable(&self, offset: HwIrq) {
            self.table.enable_irq(self.sim.virq(offset).unwrap()).unwrap();
        }

        fn delivered(&self) -> Vec<HwIrq> {
            self.delivered.lock().clone()
        }
    }

    #[test]
    fn zero_lines_is_invalid() {
        let err = IrqSim::new(IrqTable::new(4), PolledQueue::new(), 0).unwrap_err();
        assert_eq!(err.errno(), InvalidArgs);
    }

    #[test]
    fn lines_are_registered_in_order() {
        let f = fixture(3);
        assert_eq!(f.sim.num_irqs(), 3);
        assert_eq!(f.table.mapped_count(), 3);
        for offset in 0..3 {
            let virq = f.sim.virq(offset).unwrap();
            assert_eq!(virq, IRQ_BASE + offset);
            assert_eq!(f.table.chip_name(virq).unwrap(), IrqSim::CHIP_NAME);
            assert!(!f.sim.is_enabled(offset).unwrap());
        }
        assert_eq!(f.sim.virq(3), None);
    }

    #[test]
    fn failed_registration_rolls_back() {
        let table = IrqTable::new(3);
        let err = IrqSim::new(table.clone(), PolledQueue::new(), 4).unwrap_err();
        assert_eq!(err.errno(), NoMemory);
        assert_eq!(table.mapped_count(), 0);
    }

    #[test]
    fn enabled_line_is_delivered_once() {
        let f = fixture(2);
        f.enable(0);
        f.sim.fire(0).unwrap();
        assert!(f.sim.is_pending(0).unwrap());
        assert!(f.delivered().is_empty());

        f.queue.poll();
        assert_eq!(f.delivered(), [0]);
        assert!(!f.sim.is_pending(0).unwrap());
    }

    #[test]
    fn masked_line_drops_the_edge() {
        let f = fixture(2);
        f.sim.fire(1).unwrap();
        assert!(!f.sim.is_pending(1).unwrap());
        assert!(f.queue.is_empty());
        f.queue.poll();
        assert!(f.delivered().is_empty());
    }

    #[test]
    fn repeated_fires_coalesce() {
        let f = fixture(2);
        f.enable(0);
        for _ in 0..3 {
            f.sim.fire(0).unwrap();
        }
        assert_eq!(f.queue.len(), 1);
        f.queue.poll();
        assert_eq!(f.delivered(), [0]);
    }

    #[test]
    fn drain_delivers_in_ascending_order() {
        let f = fixture(4);
        for offset in 0..4 {
            f.enable(offset);
        }
        for offset in [3, 0, 2, 1] {
            f.sim.fire(offset).unwrap();
        }
        assert_eq!(f.queue.poll(), 1);
        assert_eq!(f.delivered(), [0, 1, 2, 3]);
    }

    #[test]
    fn only_unmasked_lines_are_delivered() {
        let f = fixture(4);
        f.enable(1);
        f.enable(3);
        for offset in 0..4 {
            f.sim.fire(offset).unwrap();
        }
        f.queue.poll();
        assert_eq!(f.delivered(), [1, 3]);
    }

    #[test]
    fn latched_edge_survives_masking() {
        let f = fixture(1);
        f.enable(0);
        f.sim.fire(0).unwrap();
        f.table.disable_irq(f.sim.virq(0).unwrap()).unwrap();
        f.queue.poll();
        assert_eq!(f.delivered(), [0]);

        f.sim.fire(0).unwrap();
        f.queue.poll();
        assert_eq!(f.delivered(), [0]);
    }

    #[test]
    fn fire_from_a_handler_is_delivered() {
        let table = IrqTable::new(8);
        let queue = PolledQueue::new();
        let sim = IrqSim::new(table.clone(), queue.clone(), 2).unwrap();
        let line1 = {
            let virq = sim.virq(1).unwrap();
            table.request_irq(virq, |_| {}).unwrap();
            table.enable_irq(virq).unwrap();
            sim.line(1).unwrap()
        };
        let virq0 = sim.virq(0).unwrap();
        table.request_irq(virq0, move |_| line1.fire()).unwrap();
        table.enable_irq(virq0).unwrap();

        sim.fire(0).unwrap();
        // The running drain delivers line 1 as well; the re-armed drain finds nothing.
        assert_eq!(queue.poll(), 2);
        assert_eq!(table.irq_count(virq0), Some(1));
        assert_eq!(table.irq_count(sim.virq(1).unwrap()), Some(1));
    }

    #[test]
    fn refire_during_delivery_is_not_lost() {
        let table = IrqTable::new(8);
        let queue = PolledQueue::new();
        let sim = IrqSim::new(table.clone(), queue.clone(), 1).unwrap();
        let line = sim.line(0).unwrap();
        let refired = Arc::new(AtomicBool::new(false));
        {
            let line = line.clone();
            let refired = refired.clone();
            table
                .request_irq(line.virq(), move |_| {
                    if !refired.swap(true, Ordering::Relaxed) {
                        line.fire();
                    }
                })
                .unwrap();
        }
        table.enable_irq(line.virq()).unwrap();

        line.fire();
        assert_eq!(queue.poll(), 2);
        assert_eq!(table.irq_count(line.virq()), Some(2));
    }

    #[test]
    fn line_handles() {
        let f = fixture(2);
        let line = f.sim.line(1).unwrap();
        assert_eq!(line.hwirq(), 1);
        assert_eq!(line.virq(), f.sim.virq(1).unwrap());

        line.unmask().unwrap();
        assert!(line.is_enabled());
        assert!(f.sim.is_enabled(1).unwrap());
        line.fire();
        f.queue.poll();
        assert_eq!(f.delivered(), [1]);

        line.mask().unwrap();
        line.fire();
        f.queue.poll();
        assert_eq!(f.delivered(), [1]);
    }

    #[test]
    fn out_of_range_offsets_are_invalid() {
        let f = fixture(2);
        assert_eq!(f.sim.fire(2).unwrap_err().errno(), InvalidArgs);
        assert_eq!(f.sim.line(2).unwrap_err().errno(), InvalidArgs);
        assert_eq!(f.sim.is_enabled(9).unwrap_err().errno(), InvalidArgs);
        assert_eq!(f.sim.trigger_type(9).unwrap_err().errno(), InvalidArgs);
    }

    #[test]
    fn trigger_type_through_the_table() {
        let f = fixture(1);
        let virq = f.sim.virq(0).unwrap();
        f.table.set_irq_type(virq, IrqType::EDGE_RISING).unwrap();
        assert_eq!(f.sim.trigger_type(0).unwrap(), TriggerType::Rising);

        let err = f.table.set_irq_type(virq, IrqType::LEVEL_HIGH).unwrap_err();
        assert_eq!(err.errno(), InvalidArgs);
        assert_eq!(f.sim.trigger_type(0).unwrap(), TriggerType::Rising);

        let line = f.sim.line(0).unwrap();
        line.set_trigger_type(IrqType::EDGE_FALLING).unwrap();
        assert_eq!(line.trigger_type(), TriggerType::Falling);
    }

    #[test]
    fn destroy_deregisters_every_line() {
        let f = fixture(5);
        assert_eq!(f.table.mapped_count(), 5);
        f.sim.destroy();
        assert_eq!(f.table.mapped_count(), 0);
    }

    #[test]
    fn destroy_runs_the_queued_drain() {
        let f = fixture(2);
        f.enable(0);
        f.sim.fire(0).unwrap();
        f.sim.destroy();
        assert_eq!(*f.delivered.lock(), [0]);
        assert!(f.queue.is_empty());
    }

    #[test]
    fn drop_tears_down() {
        let table = IrqTable::new(8);
        {
            let _sim = IrqSim::new(table.clone(), PolledQueue::new(), 3).unwrap();
            assert_eq!(table.mapped_count(), 3);
        }
        assert_eq!(table.mapped_count(), 0);
    }

    #[test]
    fn stale_line_handles() {
        let f = fixture(1);
        let line = f.sim.line(0).unwrap();
        line.unmask().unwrap();
        f.sim.destroy();

        // The table masked the line when it was unmapped.
        assert!(!line.is_enabled());
        assert_eq!(line.unmask().unwrap_err().errno(), NotFound);
        assert_eq!(line.mask().unwrap_err().errno(), NotFound);
        let err = line.set_trigger_type(IrqType::EDGE_RISING).unwrap_err();
        assert_eq!(err.errno(), NotFound);
        assert!(!line.is_enabled());
        assert_eq!(line.trigger_type(), TriggerType::Both);

        line.fire();
        assert!(f.queue.is_empty());
        assert_eq!(f.queue.poll(), 0);
    }

    #[test]
    fn stale_line_does_not_reach_a_new_simulator() {
        let table = IrqTable::new(8);
        let queue = PolledQueue::new();
        let old = IrqSim::new(table.clone(), queue.clone(), 1).unwrap();
        let stale = old.line(0).unwrap();
        old.destroy();

        let new = IrqSim::new(table.clone(), queue.clone(), 1).unwrap();
        let virq = new.virq(0).unwrap();
        assert_eq!(virq, stale.virq());
        table.request_irq(virq, |_| {}).unwrap();
        table.enable_irq(virq).unwrap();

        assert_eq!(stale.unmask().unwrap_err().errno(), NotFound);
        let err = stale.set_trigger_type(IrqType::EDGE_FALLING).unwrap_err();
        assert_eq!(err.errno(), NotFound);
        stale.fire();
        assert_eq!(queue.poll(), 0);
        assert_eq!(table.irq_count(virq), Some(0));
        assert_eq!(new.trigger_type(0).unwrap(), TriggerType::Both);
    }

    #[test]
    fn managed_simulator_refuses_handles_after_release() {
        let table = IrqTable::new(8);
        let queue = PolledQueue::new();
        let dev = Device::new("dummy");
        let sim = IrqSim::new_managed(&dev, table.clone(), queue.clone(), 2).unwrap();
        let virq = sim.virq(0).unwrap();
        table.enable_irq(virq).unwrap();
        dev.release_all();

        assert_eq!(sim.line(0).unwrap_err().errno(), NotFound);
        sim.fire(0).unwrap();
        assert!(queue.is_empty());
    }
}
