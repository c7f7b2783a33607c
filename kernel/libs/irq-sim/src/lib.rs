// SPDX-License-Identifier: MPL-2.0

//! A simulated interrupt controller.
//!
//! The crate reproduces the behavior of edge-triggered hardware IRQ lines in
//! software, so that tests, emulated devices and virtual GPIO chips can raise
//! and service interrupts without real hardware.
//!
//! An [`IrqSim`] owns a fixed number of lines and registers each of them with
//! a [`HandlerTable`], the component that maps IRQ numbers to handlers.
//! Firing an enabled line latches it as pending. The pending lines are
//! delivered later, in ascending order, by a drain running on a [`WorkQueue`]
//! rather than on the stack of the thread that fired them.
//!
//! The crate ships [`IrqTable`], a self-contained handler table, and two work
//! queues: [`PolledQueue`], which runs deferred work when its owner polls it,
//! and [`WorkerThread`] (with the `std` feature), which runs it on a
//! dedicated thread.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod devres;
mod error;
mod line;
mod pending;
mod prelude;
mod sim;
pub mod table;
pub mod work;

#[cfg(feature = "std")]
pub use self::work::WorkerThread;
pub use self::{
    devres::Device,
    error::{Errno, Error},
    line::{HwIrq, IrqType, TriggerType},
    sim::{IrqSim, SimLine},
    table::{HandlerTable, IrqChip, IrqTable, Virq},
    work::{PolledQueue, WorkItem, WorkQueue},
};

/// The result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
