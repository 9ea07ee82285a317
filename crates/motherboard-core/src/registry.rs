//! Ordered device registry. Tick order is registration order, matching
//! `device_manager.py`'s `self.devices` dict iteration (Python dicts
//! preserve insertion order; we make that explicit rather than relying
//! on incidental `HashMap` behavior).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::device::Device;
use crate::error::MotherboardError;
use crate::log_sink::{LogSink, NullLogSink};

/// Owns every registered device and the order they tick in.
pub struct DeviceRegistry {
    order: Vec<String>,
    devices: HashMap<String, Rc<RefCell<dyn Device>>>,
    log_sink: LogSink,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            devices: HashMap::new(),
            log_sink: Arc::new(NullLogSink),
        }
    }

    /// Registers `device` under `name`: installs the registry's current
    /// log sink and resets it, mirroring the source's
    /// `CommonDevModule.__init__` (install logger, then `module_reset`)
    /// before the device is ever ticked. Re-registering an existing name
    /// replaces the device but keeps its original tick-order position.
    pub fn add_device(&mut self, name: impl Into<String>, device: Rc<RefCell<dyn Device>>) {
        let name = name.into();
        if !self.devices.contains_key(&name) {
            self.order.push(name.clone());
        }
        {
            let mut dev = device.borrow_mut();
            dev.set_log_sink(self.log_sink.clone());
            dev.module_reset();
        }
        self.devices.insert(name, device);
    }

    /// Changes the sink every device logs to, applying it immediately to
    /// every device already registered and to any registered afterward.
    pub fn set_log_sink(&mut self, sink: LogSink) {
        for (_, device) in self.iter_in_order() {
            device.borrow_mut().set_log_sink(sink.clone());
        }
        self.log_sink = sink;
    }

    pub fn get(&self, name: &str) -> Option<Rc<RefCell<dyn Device>>> {
        self.devices.get(name).cloned()
    }

    pub fn try_get(&self, name: &str) -> Result<Rc<RefCell<dyn Device>>, MotherboardError> {
        self.get(name)
            .ok_or_else(|| MotherboardError::UnknownDevice(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates devices in registration order.
    pub fn iter_in_order(&self) -> impl Iterator<Item = (&str, &Rc<RefCell<dyn Device>>)> {
        self.order
            .iter()
            .map(move |name| (name.as_str(), self.devices.get(name).expect("registered name")))
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Resets every device, in registration order.
    pub fn reset_all(&self) {
        for (name, device) in self.iter_in_order() {
            log::debug!("resetting device '{name}'");
            device.borrow_mut().module_reset();
        }
    }
}
