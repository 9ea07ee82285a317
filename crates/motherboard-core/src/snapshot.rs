//! Snapshot manager: per-device state blobs plus a zip-bundled archival
//! copy, mirroring `device_manager.py`'s `save_devices`/`restore_devices`
//! (loose `data/<name>.bin` files, globbed and zipped into
//! `data/state_<timestamp>.zip` on every save).

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::device::Device;
use crate::error::MotherboardError;
use crate::registry::DeviceRegistry;

const ENVELOPE_MAGIC: &[u8; 4] = b"MBS1";

/// Wraps a device's raw `module_save` payload with a magic, the device
/// name, and a length prefix, so `restore_all` can detect a blob that
/// was written for a different device instead of feeding it garbage.
fn wrap_envelope(device: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 2 + device.len() + 4 + payload.len());
    out.extend_from_slice(ENVELOPE_MAGIC);
    out.extend_from_slice(&(device.len() as u16).to_le_bytes());
    out.extend_from_slice(device.as_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn unwrap_envelope(device: &str, blob: &[u8]) -> Result<Vec<u8>, MotherboardError> {
    let bad = |reason: &str| MotherboardError::SnapshotEnvelope {
        device: device.to_string(),
        reason: reason.to_string(),
    };
    if blob.len() < 4 || &blob[0..4] != ENVELOPE_MAGIC {
        return Err(bad("missing or bad envelope magic"));
    }
    let mut pos = 4;
    let name_len = u16::from_le_bytes(blob.get(pos..pos + 2).ok_or_else(|| bad("truncated"))?.try_into().unwrap()) as usize;
    pos += 2;
    let name = std::str::from_utf8(blob.get(pos..pos + name_len).ok_or_else(|| bad("truncated"))?)
        .map_err(|_| bad("device name is not valid utf-8"))?;
    if name != device {
        return Err(bad(&format!("envelope addressed to '{name}', not '{device}'")));
    }
    pos += name_len;
    let payload_len = u32::from_le_bytes(blob.get(pos..pos + 4).ok_or_else(|| bad("truncated"))?.try_into().unwrap()) as usize;
    pos += 4;
    let payload = blob.get(pos..pos + payload_len).ok_or_else(|| bad("truncated payload"))?;
    Ok(payload.to_vec())
}

/// Bundles per-device save blobs under a data directory. Holds no
/// wall-clock dependency of its own: the timestamp that names each
/// archive is supplied by the caller, keeping save/restore deterministic
/// for a given sequence of calls.
pub struct SnapshotManager {
    data_dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn blob_path(&self, device: &str) -> PathBuf {
        self.data_dir.join(format!("{device}.bin"))
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> MotherboardError {
        MotherboardError::SnapshotIoError {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Saves every device's state to a loose `.bin` file, then bundles
    /// all of them into `data_dir/state_<timestamp>.zip`. Returns the
    /// archive's path.
    pub fn save_all(
        &self,
        registry: &DeviceRegistry,
        timestamp: &str,
    ) -> Result<PathBuf, MotherboardError> {
        fs::create_dir_all(&self.data_dir).map_err(|e| self.io_err(&self.data_dir, e))?;

        let mut blob_paths = Vec::with_capacity(registry.len());
        for (name, device) in registry.iter_in_order() {
            let payload = device.borrow().module_save();
            let envelope = wrap_envelope(name, &payload);
            let path = self.blob_path(name);
            fs::write(&path, &envelope).map_err(|e| self.io_err(&path, e))?;
            log::debug!("saved {} bytes of state for device '{name}'", envelope.len());
            blob_paths.push((name.to_string(), path));
        }

        let archive_path = self.data_dir.join(format!("state_{timestamp}.zip"));
        let file = fs::File::create(&archive_path).map_err(|e| self.io_err(&archive_path, e))?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, path) in &blob_paths {
            let data = fs::read(path).map_err(|e| self.io_err(path, e))?;
            zip.start_file(format!("{name}.bin"), options)?;
            zip.write_all(&data)
                .map_err(|e| self.io_err(&archive_path, e))?;
        }
        zip.finish()?;
        log::info!("wrote snapshot archive {}", archive_path.display());
        Ok(archive_path)
    }

    /// Restores every registered device from its loose `.bin` file.
    /// Devices with no blob on disk are left at whatever state they were
    /// already in (matching the source's best-effort restore, which
    /// simply skips a device whose file is missing).
    pub fn restore_all(&self, registry: &DeviceRegistry) -> Result<(), MotherboardError> {
        for (name, device) in registry.iter_in_order() {
            let path = self.blob_path(name);
            if !path.exists() {
                log::warn!("no saved state for device '{name}' at {}", path.display());
                continue;
            }
            let mut file = fs::File::open(&path).map_err(|e| self.io_err(&path, e))?;
            let mut envelope = Vec::new();
            file.read_to_end(&mut envelope)
                .map_err(|e| self.io_err(&path, e))?;
            let payload = unwrap_envelope(name, &envelope)?;
            device
                .borrow_mut()
                .module_restore(&payload)
                .map_err(|e| MotherboardError::RestoreRejected {
                    device: name.to_string(),
                    reason: e.to_string(),
                })?;
            log::debug!("restored device '{name}' from {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, Role, TickOutcome};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Counter {
        value: u32,
    }
    impl Device for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn role(&self) -> Role {
            Role::Device
        }
        fn module_reset(&mut self) {
            self.value = 0;
        }
        fn module_save(&self) -> Vec<u8> {
            self.value.to_le_bytes().to_vec()
        }
        fn module_restore(&mut self, data: &[u8]) -> Result<(), MotherboardError> {
            let bytes: [u8; 4] = data
                .try_into()
                .map_err(|_| MotherboardError::RestoreRejected {
                    device: "counter".into(),
                    reason: "expected 4 bytes".into(),
                })?;
            self.value = u32::from_le_bytes(bytes);
            Ok(())
        }
        fn module_tick(&mut self, _tick_no: u32) -> TickOutcome {
            TickOutcome::Ok
        }
    }

    #[test]
    fn save_reset_restore_round_trips_device_state() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(dir.path());
        let mut reg = DeviceRegistry::new();
        let dev = Rc::new(RefCell::new(Counter { value: 0 }));
        reg.add_device("counter", dev.clone());
        dev.borrow_mut().value = 19;

        mgr.save_all(&reg, "07-28-2026_00-00-00").unwrap();
        dev.borrow_mut().module_reset();
        assert_eq!(dev.borrow().value, 0);

        mgr.restore_all(&reg).unwrap();
        assert_eq!(dev.borrow().value, 19);
    }

    #[test]
    fn restore_rejects_an_envelope_addressed_to_another_device() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SnapshotManager::new(dir.path());
        fs::create_dir_all(dir.path()).unwrap();
        let bogus = wrap_envelope("someone_else", &[1, 2, 3]);
        fs::write(dir.path().join("counter.bin"), bogus).unwrap();

        let mut reg = DeviceRegistry::new();
        reg.add_device("counter", Rc::new(RefCell::new(Counter { value: 0 })));

        let err = mgr.restore_all(&reg).unwrap_err();
        assert!(matches!(err, MotherboardError::SnapshotEnvelope { .. }));
    }
}
