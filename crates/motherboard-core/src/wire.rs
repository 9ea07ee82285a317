//! Wire/pin signal fabric.
//!
//! A [`Wire`] carries a single boolean level to every connected device
//! [`Pin`]. State changes propagate only on an edge (`set_state` is a
//! no-op if the wire is already at the requested level), which is what
//! keeps a device's own change callback from re-entering the same wire
//! forever. Each endpoint's callback runs with no borrow of the wire (or
//! of its own pin) held, so a callback that drives a *different* wire, or
//! even this same wire again, never trips `RefCell`'s runtime check.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Electrical character of one end of a wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    /// Only ever notified of the wire's level; cannot drive it.
    Input,
    /// May drive the wire to either level; last push-pull write wins.
    PushPull,
    /// May only pull the wire low. High is "not asserting", and the wire
    /// only reads high once every open-collector endpoint agrees (wired-AND).
    OpenCollector,
}

/// A device-owned connection point. Devices create these and hand out
/// clones of the `Rc` via [`crate::device::Device::pin`]; the wire fabric
/// installs a write-back closure into the pin when `Wire::connect` runs.
pub struct Pin {
    kind: PinKind,
    cached_state: bool,
    on_change: Option<Box<dyn FnMut(bool)>>,
    writer: Option<Box<dyn FnMut(bool)>>,
}

pub type PinHandle = Rc<RefCell<Pin>>;

impl Pin {
    /// Creates a new, unconnected pin. `on_change` is invoked by the wire
    /// fabric whenever the wire this pin ends up connected to transitions.
    pub fn new(kind: PinKind, on_change: Box<dyn FnMut(bool)>) -> PinHandle {
        Rc::new(RefCell::new(Self {
            kind,
            cached_state: false,
            on_change: Some(on_change),
            writer: None,
        }))
    }

    /// Creates a pin that ignores wire transitions (no-op callback). Handy
    /// for open-collector/push-pull outputs that never read their own wire.
    pub fn new_silent(kind: PinKind) -> PinHandle {
        Self::new(kind, Box::new(|_| {}))
    }

    pub fn kind(&self) -> PinKind {
        self.kind
    }

    pub fn state(&self) -> bool {
        self.cached_state
    }

    /// Device-initiated write: drive this pin's wire to `value`. A no-op
    /// on an unconnected pin, or on an `Input` pin (logged once by the
    /// fabric at connect time, not here).
    pub fn drive(handle: &PinHandle, value: bool) {
        let mut writer = handle.borrow_mut().writer.take();
        if let Some(w) = writer.as_mut() {
            w(value);
        }
        handle.borrow_mut().writer = writer;
    }
}

struct Endpoint {
    device: String,
    pin_name: String,
    handle: PinHandle,
    /// Last value this endpoint asserted, meaningful only when its kind is
    /// `OpenCollector` (true = not pulling low).
    oc_asserted_high: bool,
}

/// One shared signal line. Lives behind an `Rc<RefCell<_>>` so both the
/// wire fabric's owning collection and every connected pin's write-back
/// closure can reach it.
pub struct Wire {
    name: String,
    state: bool,
    pp_drive: Option<bool>,
    endpoints: Vec<Endpoint>,
    on_change: Option<Box<dyn FnMut(bool)>>,
}

impl Wire {
    /// Creates a new wire at `default_state`. The datasheet for each real
    /// wire dictates its idle level; there is no one sane default, so
    /// callers (the config loader) must supply it explicitly per wire.
    pub fn new(name: impl Into<String>, default_state: bool) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            name: name.into(),
            state: default_state,
            pp_drive: None,
            endpoints: Vec::new(),
            on_change: None,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> bool {
        self.state
    }

    /// Installs a fabric-level observer, e.g. for logging every transition
    /// of a wire that has no device endpoints of its own yet.
    pub fn on_change(&mut self, cb: Box<dyn FnMut(bool)>) {
        self.on_change = Some(cb);
    }

    /// Connects `pin` to this wire under `device`/`pin_name` (used for
    /// diagnostics only). Installs the pin's write-back closure so that
    /// later `Pin::drive` calls on this handle reach this wire.
    pub fn connect(wire_cell: &Rc<RefCell<Wire>>, device: &str, pin_name: &str, pin: PinHandle) {
        let index = {
            let mut wire = wire_cell.borrow_mut();
            wire.endpoints.push(Endpoint {
                device: device.to_string(),
                pin_name: pin_name.to_string(),
                handle: pin.clone(),
                oc_asserted_high: true,
            });
            wire.endpoints.len() - 1
        };

        let initial = wire_cell.borrow().state;
        {
            let mut p = pin.borrow_mut();
            p.cached_state = initial;
        }

        let weak: Weak<RefCell<Wire>> = Rc::downgrade(wire_cell);
        pin.borrow_mut().writer = Some(Box::new(move |value: bool| {
            if let Some(wire_cell) = weak.upgrade() {
                Wire::drive_from(&wire_cell, index, value);
            }
        }));
    }

    /// Recomputes the resolved level after endpoint `index` asserts
    /// `value`, then propagates if it changed.
    fn drive_from(wire_cell: &Rc<RefCell<Wire>>, index: usize, value: bool) {
        let resolved = {
            let mut wire = wire_cell.borrow_mut();
            let kind = wire.endpoints[index].handle.borrow().kind();
            match kind {
                PinKind::Input => {
                    log::warn!(
                        "wire '{}': input pin on device '{}' attempted a drive, ignored",
                        wire.name,
                        wire.endpoints[index].device
                    );
                    return;
                }
                PinKind::PushPull => wire.pp_drive = Some(value),
                PinKind::OpenCollector => wire.endpoints[index].oc_asserted_high = value,
            }
            wire.resolve()
        };
        Self::set_state(wire_cell, resolved);
    }

    /// Wired-AND resolution: a push-pull write is authoritative once made;
    /// otherwise the wire reads high only if every open-collector endpoint
    /// is not pulling it low.
    fn resolve(&self) -> bool {
        if let Some(pp) = self.pp_drive {
            return pp;
        }
        let mut saw_oc = false;
        let mut all_high = true;
        for ep in &self.endpoints {
            if ep.handle.borrow().kind() == PinKind::OpenCollector {
                saw_oc = true;
                all_high &= ep.oc_asserted_high;
            }
        }
        if saw_oc { all_high } else { self.state }
    }

    /// Sets the wire's resolved level directly. Used by config-time setup
    /// (establishing the initial topology) and internally by driven
    /// writes. A no-op if the wire is already at `new_state` — this
    /// equality guard is what keeps a callback that re-asserts the same
    /// level from recursing forever.
    pub fn set_state(wire_cell: &Rc<RefCell<Wire>>, new_state: bool) {
        let changed = {
            let mut wire = wire_cell.borrow_mut();
            if wire.state == new_state {
                false
            } else {
                wire.state = new_state;
                true
            }
        };
        if !changed {
            return;
        }

        let endpoint_count = wire_cell.borrow().endpoints.len();
        for i in 0..endpoint_count {
            let handle = wire_cell.borrow().endpoints[i].handle.clone();
            let should_notify = {
                let mut pin = handle.borrow_mut();
                if pin.cached_state == new_state {
                    false
                } else {
                    pin.cached_state = new_state;
                    true
                }
            };
            if should_notify {
                let cb = handle.borrow_mut().on_change.take();
                if let Some(mut cb) = cb {
                    cb(new_state);
                    handle.borrow_mut().on_change = Some(cb);
                }
            }
        }

        let cb = wire_cell.borrow_mut().on_change.take();
        if let Some(mut cb) = cb {
            cb(new_state);
            wire_cell.borrow_mut().on_change = Some(cb);
        }
    }
}
