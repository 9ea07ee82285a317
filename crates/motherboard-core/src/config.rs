//! TOML configuration loader.
//!
//! Recovers the wire-topology schema implicit in `system.py`'s
//! hand-written `system_init()`: a table of devices tagged with their
//! role, a list of wires each naming the device/pin endpoints connected
//! to it and its idle level, and a list of address-range mappings. The
//! loader only parses and applies wiring; constructing the devices
//! themselves (static or `dynamic`-feature dynamic-library backed) is the
//! embedding application's job, since the concrete chips are out of this
//! crate's scope.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Deserialize;

use crate::device::Device;
use crate::error::MotherboardError;
use crate::registry::DeviceRegistry;
use crate::scheduler::Scheduler;
use crate::wire::Wire;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoleConfig {
    Device,
    AddressSpace,
    Processor,
}

#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    pub role: RoleConfig,
    /// Device-specific construction parameters, opaque to the loader and
    /// the orchestrator; the embedding application interprets these when
    /// building the concrete device instance.
    #[serde(default)]
    pub params: toml::Table,
}

#[derive(Debug, Deserialize)]
pub struct WireConfig {
    pub name: String,
    pub default_state: bool,
    /// `(device_name, pin_name)` pairs, connected in the order listed.
    pub endpoints: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct MappingConfig {
    pub address_space: String,
    pub device: String,
    pub lo: u32,
    pub hi: u32,
}

/// `[schedule]`: actions queued before the first tick runs, recovered from
/// `system.py`'s startup-time `save_state_at`/`set_log_level_at` calls.
#[derive(Debug, Default, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub save_state_at: Option<u32>,
    /// `(device, tick, level)` triples.
    #[serde(default)]
    pub set_log_level_at: Vec<(String, u32, u8)>,
}

/// The parsed contents of a motherboard config file.
#[derive(Debug, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub devices: HashMap<String, DeviceConfig>,
    #[serde(default)]
    pub wires: Vec<WireConfig>,
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl TopologyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MotherboardError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| MotherboardError::ConfigIoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| MotherboardError::ConfigParseError {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
    }

    /// Connects every wire's endpoints to the matching device pins
    /// already present in `registry`, returning the constructed wires
    /// keyed by name.
    pub fn apply_wires(
        &self,
        registry: &DeviceRegistry,
    ) -> Result<HashMap<String, Rc<std::cell::RefCell<Wire>>>, MotherboardError> {
        let mut wires = HashMap::with_capacity(self.wires.len());
        for wire_cfg in &self.wires {
            if wires.contains_key(&wire_cfg.name) {
                return Err(MotherboardError::ConfigTopologyError(format!(
                    "duplicate wire name '{}'",
                    wire_cfg.name
                )));
            }
            let wire = Wire::new(&wire_cfg.name, wire_cfg.default_state);
            for (device_name, pin_name) in &wire_cfg.endpoints {
                let device = registry.try_get(device_name)?;
                let pin = device.borrow().pin(pin_name).ok_or_else(|| MotherboardError::UnknownPin {
                    device: device_name.clone(),
                    pin: pin_name.clone(),
                })?;
                Wire::connect(&wire, device_name, pin_name, pin);
            }
            wires.insert(wire_cfg.name.clone(), wire);
        }
        Ok(wires)
    }

    /// Applies every address-range mapping to its `address_space`
    /// device. Propagates `RangeOverlap`/`BadRange` from the decoder and
    /// `UnsupportedOperation` if `address_space` names a device that
    /// isn't actually address-space-rolled.
    pub fn apply_mappings(&self, registry: &DeviceRegistry) -> Result<(), MotherboardError> {
        for mapping in &self.mappings {
            let space = registry.try_get(&mapping.address_space)?;
            let target = registry.try_get(&mapping.device)?;
            space
                .borrow_mut()
                .map_device(mapping.lo, mapping.hi, target)?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Queues the `[schedule]` table's actions onto `scheduler`, so a
    /// config-driven run can schedule a snapshot or a log-level change
    /// without any CLI flag or embedding-application code.
    pub fn apply_schedule(&self, scheduler: &mut Scheduler) {
        if let Some(tick) = self.schedule.save_state_at {
            scheduler.save_state_at(tick);
        }
        for (device, tick, level) in &self.schedule.set_log_level_at {
            scheduler.set_log_level_at(device.clone(), *tick, *level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, Role};
    use crate::wire::{Pin, PinHandle, PinKind};
    use std::cell::RefCell;

    struct PinnedDevice {
        pin: PinHandle,
    }
    impl Device for PinnedDevice {
        fn name(&self) -> &str {
            "dev"
        }
        fn role(&self) -> Role {
            Role::Device
        }
        fn module_reset(&mut self) {}
        fn pin(&self, name: &str) -> Option<PinHandle> {
            if name == "irq" {
                Some(self.pin.clone())
            } else {
                None
            }
        }
    }

    #[test]
    fn parses_a_minimal_topology() {
        let toml_text = r#"
            data_dir = "state"

            [devices.ppi]
            role = "device"

            [devices.ioc]
            role = "address_space"

            [[wires]]
            name = "nmi_wire"
            default_state = false
            endpoints = [["ppi", "nmi_out"]]

            [[mappings]]
            address_space = "ioc"
            device = "ppi"
            lo = 96
            hi = 99
        "#;
        let cfg: TopologyConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.data_dir(), PathBuf::from("state"));
        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(cfg.wires[0].name, "nmi_wire");
        assert_eq!(cfg.mappings[0].lo, 96);
    }

    #[test]
    fn parses_and_applies_a_schedule_table() {
        let toml_text = r#"
            [schedule]
            save_state_at = 100
            set_log_level_at = [["cpu", 50, 2]]
        "#;
        let cfg: TopologyConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.schedule.save_state_at, Some(100));
        assert_eq!(
            cfg.schedule.set_log_level_at,
            vec![("cpu".to_string(), 50, 2)]
        );

        let mut scheduler = Scheduler::new();
        cfg.apply_schedule(&mut scheduler);
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new();
        let snapshots = crate::snapshot::SnapshotManager::new(dir.path());
        for _ in 0..99 {
            scheduler.tick_all(&registry, &snapshots, || "scheduled".to_string());
        }
        assert!(!dir.path().join("state_scheduled.zip").exists());
        scheduler.tick_all(&registry, &snapshots, || "scheduled".to_string());
        assert!(dir.path().join("state_scheduled.zip").exists());
    }

    #[test]
    fn apply_wires_reports_an_unknown_pin() {
        let toml_text = r#"
            [[wires]]
            name = "w"
            default_state = false
            endpoints = [["dev", "does_not_exist"]]
        "#;
        let cfg: TopologyConfig = toml::from_str(toml_text).unwrap();
        let mut registry = DeviceRegistry::new();
        let pin = Pin::new_silent(PinKind::Input);
        registry.add_device("dev", std::rc::Rc::new(RefCell::new(PinnedDevice { pin })));

        let err = cfg.apply_wires(&registry).unwrap_err();
        assert!(matches!(err, MotherboardError::UnknownPin { .. }));
    }
}
