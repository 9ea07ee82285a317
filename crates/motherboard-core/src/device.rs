//! The uniform module contract every device implements.
//!
//! A single `Device` trait covers all three roles (`device`, `address_space`,
//! `processor`) rather than a trait hierarchy: the roles differ only in
//! which of the bus-facing methods they meaningfully implement, and the
//! default bodies here make the inapplicable ones a clean no-op/error
//! instead of requiring callers to downcast a trait object. This mirrors
//! how the source's `CommonDevModule`/`ReadWriteModule`/`Processor` mixins
//! share one underlying ctypes binding surface.

use std::cell::RefCell;
use std::rc::Rc;

use crate::address::AddressRange;
use crate::error::MotherboardError;
use crate::log_sink::LogSink;
use crate::wire::PinHandle;

/// Which of the three module roles a device was registered as. Only
/// `AddressSpace` devices are valid `map_device` targets; only
/// `Processor` devices are valid `connect_address_space` callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Device,
    AddressSpace,
    Processor,
}

/// Which of a processor's two address spaces a connection refers to,
/// matching `system.py`'s `connect_address_space(0, ioc)` / `(1, memory)`
/// convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Io,
    Memory,
}

/// Outcome of one `module_tick` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ok,
    /// A non-zero fault code, reported the way the source's `module_tick`
    /// return value signals an unrecoverable device error.
    Fault(u32),
}

/// A live device, address space, or processor attached to the bus.
///
/// All methods have a default body so a device only overrides what its
/// role actually uses: a plain `device` overrides `data_write`/`data_read`
/// and ignores `map_device`; an `address_space` overrides `map_device`
/// and forwards bus calls to its own decoder; a `processor` overrides
/// `connect_address_space`/`set_code_read_func` and drives the CPU core
/// that lives outside this crate's scope.
pub trait Device {
    fn name(&self) -> &str;
    fn role(&self) -> Role;

    /// Installs the sink this device should send its own log lines to.
    /// Most devices simply forward to the shared sink; kept per-device so
    /// a scheduled `set_log_level_at` action can retarget one device
    /// without touching the rest.
    fn set_log_sink(&mut self, sink: LogSink) {
        let _ = sink;
    }

    /// Adjusts this device's own log verbosity (0 = errors only).
    fn set_log_level(&mut self, level: u8) {
        let _ = level;
    }

    /// Resets the device to its power-on state. Called once at startup
    /// (mirroring the source's constructor-time `module_reset` call) and
    /// again on every explicit reset request.
    fn module_reset(&mut self);

    /// Serializes this device's full internal state to an opaque blob.
    fn module_save(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restores state previously produced by `module_save`. Devices
    /// should validate the blob's shape and return
    /// `MotherboardError::RestoreRejected` rather than panicking on a
    /// malformed one.
    fn module_restore(&mut self, data: &[u8]) -> Result<(), MotherboardError> {
        let _ = data;
        Ok(())
    }

    /// Advances the device by one tick. `tick_no` is the scheduler's
    /// monotonically increasing tick counter, not a cycle count internal
    /// to the device.
    fn module_tick(&mut self, tick_no: u32) -> TickOutcome {
        let _ = tick_no;
        TickOutcome::Ok
    }

    /// Handles a bus write addressed to this device. The default is a
    /// silent no-op, appropriate for devices with no directly addressable
    /// registers (e.g. a pin-only glue device).
    fn data_write(&mut self, addr: u32, value: u16, width: u8) {
        let _ = (addr, value, width);
    }

    /// Handles a bus read addressed to this device. The default returns
    /// the open-bus value.
    fn data_read(&mut self, addr: u32, width: u8) -> u16 {
        let _ = (addr, width);
        0xFFFF
    }

    /// Handles an instruction-fetch read. Defaults to `data_read`, which
    /// is correct for any device that doesn't distinguish code fetches
    /// from data reads.
    fn code_read(&mut self, addr: u32, width: u8) -> u16 {
        self.data_read(addr, width)
    }

    /// The address ranges this device expects to be mapped at, if it
    /// tracks that itself (informational; the decoder is the source of
    /// truth for what's actually mapped).
    fn address_ranges(&self) -> &[AddressRange] {
        &[]
    }

    /// `address_space` role only: registers `target` to handle `[lo, hi]`.
    fn map_device(
        &mut self,
        lo: u32,
        hi: u32,
        target: Rc<RefCell<dyn Device>>,
    ) -> Result<u32, MotherboardError> {
        let _ = (lo, hi, target);
        Err(MotherboardError::UnsupportedOperation {
            device: self.name().to_string(),
            op: "map_device",
        })
    }

    /// `processor` role only: attaches one of this processor's two
    /// address spaces to `target` (an `address_space`-role device).
    fn connect_address_space(&mut self, space: SpaceKind, target: Rc<RefCell<dyn Device>>) {
        let _ = (space, target);
    }

    /// `processor` role only: sets the address space this processor
    /// fetches instructions through (usually, but not necessarily, the
    /// same as its memory space).
    fn set_code_read_func(&mut self, target: Rc<RefCell<dyn Device>>) {
        let _ = target;
    }

    /// `processor` role only: the processor's own tick/cycle counter,
    /// exposed for devices (like a PIT) that need to stay phase-locked
    /// to CPU cycles rather than scheduler ticks.
    fn cpu_get_ticks(&self) -> u32 {
        0
    }

    /// Returns a handle to one of this device's named pins, if it has
    /// one by that name. Used by the config loader to wire up the pin
    /// topology; devices with no pins (most `address_space` devices)
    /// leave the default.
    fn pin(&self, name: &str) -> Option<PinHandle> {
        let _ = name;
        None
    }
}
