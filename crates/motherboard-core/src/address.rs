//! Address-space decoder: a range-keyed dispatch table mapping addresses to
//! device handlers, with open-bus semantics on a miss.

use std::cell::RefCell;
use std::rc::Rc;

use crate::device::{Device, Role, TickOutcome};
use crate::error::MotherboardError;

/// An inclusive address range, `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub lo: u32,
    pub hi: u32,
}

impl AddressRange {
    pub fn new(lo: u32, hi: u32) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.lo && addr <= self.hi
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }
}

/// One entry in a decoder's dispatch table.
pub struct Mapping {
    id: u32,
    range: AddressRange,
    target: Rc<RefCell<dyn Device>>,
}

impl Mapping {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }
}

/// Linear-scan range decoder backing an `address_space`-role device
/// (e.g. the I/O controller or memory controller). Mappings are checked
/// in registration order; the first containing range wins, matching the
/// source's last-registered-overlap-shadows-none semantics (overlaps
/// across distinct devices are rejected outright rather than silently
/// shadowed).
#[derive(Default)]
pub struct AddressDecoder {
    mappings: Vec<Mapping>,
    next_id: u32,
}

impl AddressDecoder {
    pub fn new() -> Self {
        Self {
            mappings: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers `target` to handle `[lo, hi]`. Rejects the range if it
    /// overlaps an existing mapping owned by a *different* device;
    /// overlapping the same device again (address mirroring, e.g. an
    /// interrupt controller aliased onto two port ranges) is accepted.
    pub fn map_device(
        &mut self,
        lo: u32,
        hi: u32,
        target: Rc<RefCell<dyn Device>>,
    ) -> Result<u32, MotherboardError> {
        if lo > hi {
            return Err(MotherboardError::BadRange { lo, hi });
        }
        let range = AddressRange::new(lo, hi);
        for existing in &self.mappings {
            if existing.range.overlaps(&range) {
                if Rc::ptr_eq(&existing.target, &target) {
                    log::debug!(
                        "mapping [{lo:#x}, {hi:#x}] mirrors existing [{:#x}, {:#x}] on the same device",
                        existing.range.lo,
                        existing.range.hi
                    );
                } else {
                    return Err(MotherboardError::RangeOverlap {
                        lo,
                        hi,
                        existing_lo: existing.range.lo,
                        existing_hi: existing.range.hi,
                    });
                }
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.mappings.push(Mapping { id, range, target });
        Ok(id)
    }

    fn find(&self, addr: u32) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.range.contains(addr))
    }

    /// Dispatches a write. A miss is a silent no-op (open bus).
    pub fn data_write(&self, addr: u32, value: u16, width: u8) {
        match self.find(addr) {
            Some(m) => m.target.borrow_mut().data_write(addr, value, width),
            None => log::trace!("write to unmapped address {addr:#x} ignored"),
        }
    }

    /// Dispatches a read. A miss returns `0xFFFF` (open bus).
    pub fn data_read(&self, addr: u32, width: u8) -> u16 {
        match self.find(addr) {
            Some(m) => m.target.borrow_mut().data_read(addr, width),
            None => {
                log::trace!("read from unmapped address {addr:#x} returned open-bus value");
                0xFFFF
            }
        }
    }

    /// Dispatches a code (instruction-fetch) read. Mirrors `data_read`
    /// dispatch but routes through a target's `code_read`, so a device
    /// that distinguishes code fetches from data reads (bank-switched
    /// ROM, a write-protected region) still sees the difference.
    pub fn code_read(&self, addr: u32, width: u8) -> u16 {
        match self.find(addr) {
            Some(m) => m.target.borrow_mut().code_read(addr, width),
            None => 0xFFFF,
        }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }
}

/// A ready-made `address_space`-role device: nothing but a decoder and a
/// name. Suitable for devices like an I/O controller that only dispatch
/// to mapped peripherals and own no bulk storage of their own. A device
/// that also owns bulk memory (RAM) and needs its contents saved and
/// restored is expected to embed an `AddressDecoder` itself rather than
/// use this type, since that state is specific to the concrete device
/// and out of this crate's scope.
pub struct BasicAddressSpace {
    name: String,
    decoder: AddressDecoder,
}

impl BasicAddressSpace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decoder: AddressDecoder::new(),
        }
    }

    pub fn decoder(&self) -> &AddressDecoder {
        &self.decoder
    }
}

impl Device for BasicAddressSpace {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> Role {
        Role::AddressSpace
    }

    fn module_reset(&mut self) {}

    fn module_tick(&mut self, _tick_no: u32) -> TickOutcome {
        TickOutcome::Ok
    }

    fn data_write(&mut self, addr: u32, value: u16, width: u8) {
        self.decoder.data_write(addr, value, width);
    }

    fn data_read(&mut self, addr: u32, width: u8) -> u16 {
        self.decoder.data_read(addr, width)
    }

    fn code_read(&mut self, addr: u32, width: u8) -> u16 {
        self.decoder.code_read(addr, width)
    }

    fn map_device(
        &mut self,
        lo: u32,
        hi: u32,
        target: Rc<RefCell<dyn Device>>,
    ) -> Result<u32, MotherboardError> {
        self.decoder.map_device(lo, hi, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter {
        writes: Rc<Cell<u32>>,
        reads: Rc<Cell<u32>>,
    }

    impl crate::device::Device for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn role(&self) -> crate::device::Role {
            crate::device::Role::Device
        }
        fn module_reset(&mut self) {}
        fn data_write(&mut self, _addr: u32, _value: u16, _width: u8) {
            self.writes.set(self.writes.get() + 1);
        }
        fn data_read(&mut self, _addr: u32, _width: u8) -> u16 {
            self.reads.set(self.reads.get() + 1);
            0x42
        }
    }

    #[test]
    fn dispatches_to_the_mapping_containing_the_address() {
        let mut decoder = AddressDecoder::new();
        let writes = Rc::new(Cell::new(0));
        let reads = Rc::new(Cell::new(0));
        let dev: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Counter {
            writes: writes.clone(),
            reads: reads.clone(),
        }));
        decoder.map_device(0x20, 0x21, dev).unwrap();

        assert_eq!(decoder.data_read(0x20, 1), 0x42);
        decoder.data_write(0x21, 7, 1);
        assert_eq!(reads.get(), 1);
        assert_eq!(writes.get(), 1);
    }

    #[test]
    fn unmapped_address_reads_open_bus_and_ignores_writes() {
        let decoder = AddressDecoder::new();
        assert_eq!(decoder.data_read(0x9999, 1), 0xFFFF);
    }

    #[test]
    fn overlap_with_a_different_device_is_rejected() {
        let mut decoder = AddressDecoder::new();
        let a: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Counter {
            writes: Rc::new(Cell::new(0)),
            reads: Rc::new(Cell::new(0)),
        }));
        let b: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Counter {
            writes: Rc::new(Cell::new(0)),
            reads: Rc::new(Cell::new(0)),
        }));
        decoder.map_device(0x20, 0x2F, a).unwrap();
        let err = decoder.map_device(0x25, 0x30, b).unwrap_err();
        assert!(matches!(err, MotherboardError::RangeOverlap { .. }));
    }

    #[test]
    fn overlap_with_the_same_device_is_accepted_as_a_mirror() {
        let mut decoder = AddressDecoder::new();
        let dev: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Counter {
            writes: Rc::new(Cell::new(0)),
            reads: Rc::new(Cell::new(0)),
        }));
        decoder.map_device(0x20, 0x21, dev.clone()).unwrap();
        decoder.map_device(0x20, 0x21, dev).unwrap();
        assert_eq!(decoder.mappings().len(), 2);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut decoder = AddressDecoder::new();
        let dev: Rc<RefCell<dyn Device>> = Rc::new(RefCell::new(Counter {
            writes: Rc::new(Cell::new(0)),
            reads: Rc::new(Cell::new(0)),
        }));
        let err = decoder.map_device(0x30, 0x20, dev).unwrap_err();
        assert!(matches!(err, MotherboardError::BadRange { .. }));
    }
}
