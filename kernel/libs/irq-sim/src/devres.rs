// SPDX-License-Identifier: MPL-2.0

//! Resources whose release is bound to the lifetime of an owner.

use alloc::string::String;

use spin::Mutex;

use crate::prelude::*;

type ReleaseAction = Box<dyn FnOnce() + Send>;

/// An owner of managed resources, such as a device being probed.
///
/// Release actions registered on the device run in reverse registration
/// order, either when [`Device::release_all`] is called or when the device is
/// dropped. The latter also covers unwinding out of a failed setup.
pub struct Device {
    name: String,
    actions: Mutex<Vec<ReleaseAction>>,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an action to run when the device releases its resources.
    pub fn add_action<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.actions.lock().push(Box::new(action));
    }

    /// Returns the number of resources not released yet.
    pub fn nr_resources(&self) -> usize {
        self.actions.lock().len()
    }

    /// Releases every resource, newest first.
    pub fn release_all(&self) {
        // Actions may register new resources, so the lock is not held while
        // an action runs.
        loop {
            let Some(action) = self.actions.lock().pop() else {
                break;
            };
            action();
        }
        trace!("irq-sim: device {} released its resources", self.name);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("nr_resources", &self.nr_resources())
            .finish()
    }
}
