//! Tick scheduler: advances every device once per tick, in registration
//! order, and applies scheduled actions (`save_state_at`,
//! `set_log_level_at`) the way `device_manager.py`'s `tick_devices` does.

use std::panic::{self, AssertUnwindSafe};

use crate::device::{Device, TickOutcome};
use crate::registry::DeviceRegistry;
use crate::snapshot::SnapshotManager;

enum ActionPayload {
    SetLogLevel(u8),
}

struct ScheduledAction {
    device: String,
    tick: u32,
    payload: ActionPayload,
}

/// What happened at the end of one `tick_all` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    Ok,
    /// A device returned a non-zero fault code. State was saved before
    /// returning, same as the source's fault path.
    Fault { device: String, tick: u32, code: u32 },
    /// A device panicked; caught at this boundary so one bad device
    /// doesn't take the whole process down mid-tick. State is *not*
    /// saved, since the device that panicked may have left shared state
    /// (its own, or another device's, via a wire callback) inconsistent.
    Exception { device: String, tick: u32 },
}

/// Orders device advancement and owns the queue of scheduled actions.
/// Does not own the devices or the snapshot manager; both are borrowed
/// for the duration of a `tick_all` call.
#[derive(Default)]
pub struct Scheduler {
    tick_counter: u32,
    save_state_at: Option<u32>,
    pending_actions: Vec<ScheduledAction>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tick_counter: 0,
            save_state_at: None,
            pending_actions: Vec::new(),
        }
    }

    pub fn tick_counter(&self) -> u32 {
        self.tick_counter
    }

    /// Arranges for every device's state to be saved once tick `tick` is
    /// reached. Only one target is pending at a time; a later call
    /// replaces an earlier one.
    pub fn save_state_at(&mut self, tick: u32) {
        self.save_state_at = Some(tick);
    }

    /// Arranges for `device`'s log level to change to `level` once tick
    /// `tick` is reached.
    pub fn set_log_level_at(&mut self, device: impl Into<String>, tick: u32, level: u8) {
        self.pending_actions.push(ScheduledAction {
            device: device.into(),
            tick,
            payload: ActionPayload::SetLogLevel(level),
        });
    }

    /// Advances every device by one tick, in registration order, then
    /// applies any action due at the resulting tick count.
    ///
    /// `timestamp` is only called (lazily) if a snapshot actually needs
    /// writing this tick, which keeps the scheduler itself free of any
    /// wall-clock dependency.
    pub fn tick_all(
        &mut self,
        registry: &DeviceRegistry,
        snapshots: &SnapshotManager,
        timestamp: impl Fn() -> String,
    ) -> TickResult {
        self.tick_counter += 1;
        let tick = self.tick_counter;

        for (name, device) in registry.iter_in_order() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| device.borrow_mut().module_tick(tick)));
            match outcome {
                Ok(TickOutcome::Ok) => {}
                Ok(TickOutcome::Fault(code)) => {
                    log::error!("device '{name}' faulted at tick {tick} with code {code}");
                    if let Err(e) = snapshots.save_all(registry, &timestamp()) {
                        log::error!("snapshot after fault failed: {e}");
                    }
                    return TickResult::Fault {
                        device: name.to_string(),
                        tick,
                        code,
                    };
                }
                Err(_) => {
                    log::error!("device '{name}' panicked at tick {tick}");
                    return TickResult::Exception {
                        device: name.to_string(),
                        tick,
                    };
                }
            }
        }

        if self.save_state_at == Some(tick) {
            self.save_state_at = None;
            match snapshots.save_all(registry, &timestamp()) {
                Ok(path) => log::info!("scheduled snapshot at tick {tick} written to {}", path.display()),
                Err(e) => log::error!("scheduled snapshot at tick {tick} failed: {e}"),
            }
        }

        let (due, pending): (Vec<_>, Vec<_>) =
            self.pending_actions.drain(..).partition(|a| a.tick == tick);
        self.pending_actions = pending;
        for action in due {
            match action.payload {
                ActionPayload::SetLogLevel(level) => {
                    if let Some(dev) = registry.get(&action.device) {
                        log::info!("tick {tick}: setting log level for '{}' to {level}", action.device);
                        dev.borrow_mut().set_log_level(level);
                    } else {
                        log::warn!(
                            "tick {tick}: scheduled log-level change for unknown device '{}'",
                            action.device
                        );
                    }
                }
            }
        }

        TickResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, Role};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Faulty {
        fault_at: u32,
    }
    impl Device for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }
        fn role(&self) -> Role {
            Role::Device
        }
        fn module_reset(&mut self) {}
        fn module_tick(&mut self, tick_no: u32) -> TickOutcome {
            if tick_no == self.fault_at {
                TickOutcome::Fault(7)
            } else {
                TickOutcome::Ok
            }
        }
    }

    struct Panicky;
    impl Device for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn role(&self) -> Role {
            Role::Device
        }
        fn module_reset(&mut self) {}
        fn module_tick(&mut self, _tick_no: u32) -> TickOutcome {
            panic!("boom");
        }
    }

    struct LevelTracker {
        level: Rc<RefCell<u8>>,
    }
    impl Device for LevelTracker {
        fn name(&self) -> &str {
            "tracker"
        }
        fn role(&self) -> Role {
            Role::Device
        }
        fn module_reset(&mut self) {}
        fn set_log_level(&mut self, level: u8) {
            *self.level.borrow_mut() = level;
        }
    }

    #[test]
    fn advances_the_tick_counter_and_reports_ok() {
        let mut scheduler = Scheduler::new();
        let mut registry = DeviceRegistry::new();
        registry.add_device("faulty", Rc::new(RefCell::new(Faulty { fault_at: 99 })));
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path());

        let result = scheduler.tick_all(&registry, &snapshots, || "ts".to_string());
        assert_eq!(result, TickResult::Ok);
        assert_eq!(scheduler.tick_counter(), 1);
    }

    #[test]
    fn a_fault_code_stops_the_run_and_saves_state() {
        let mut scheduler = Scheduler::new();
        let mut registry = DeviceRegistry::new();
        registry.add_device("faulty", Rc::new(RefCell::new(Faulty { fault_at: 1 })));
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path());

        let result = scheduler.tick_all(&registry, &snapshots, || "ts".to_string());
        assert_eq!(
            result,
            TickResult::Fault {
                device: "faulty".to_string(),
                tick: 1,
                code: 7
            }
        );
        assert!(dir.path().join("faulty.bin").exists());
    }

    #[test]
    fn a_panicking_device_is_caught_and_reported() {
        let mut scheduler = Scheduler::new();
        let mut registry = DeviceRegistry::new();
        registry.add_device("panicky", Rc::new(RefCell::new(Panicky)));
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path());

        let result = scheduler.tick_all(&registry, &snapshots, || "ts".to_string());
        assert_eq!(
            result,
            TickResult::Exception {
                device: "panicky".to_string(),
                tick: 1
            }
        );
    }

    #[test]
    fn set_log_level_at_fires_on_the_target_tick_only() {
        let mut scheduler = Scheduler::new();
        let mut registry = DeviceRegistry::new();
        let level = Rc::new(RefCell::new(0u8));
        registry.add_device(
            "tracker",
            Rc::new(RefCell::new(LevelTracker {
                level: level.clone(),
            })),
        );
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path());
        scheduler.set_log_level_at("tracker", 2, 5);

        scheduler.tick_all(&registry, &snapshots, || "ts".to_string());
        assert_eq!(*level.borrow(), 0);
        scheduler.tick_all(&registry, &snapshots, || "ts".to_string());
        assert_eq!(*level.borrow(), 5);
    }
}
