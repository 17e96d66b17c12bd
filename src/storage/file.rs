//! File-backed engine
//!
//! Keeps the working set in an [`EntryTable`] and persists each partition
//! as one image file on commit.
//!
//! # Image format
//!
//! ```text
//! <dir>/<partition>.nvs
//! [4-byte length][json PartitionImage][4-byte checksum]
//! ```
//!
//! An image that is truncated or fails its checksum reports
//! [`EngineError::NoFreePages`]; an image written by a different format
//! version reports [`EngineError::NewVersionFound`]. Both are the
//! conditions a manager may answer with erase-and-reinit.

use super::engine::{EngineError, EngineResult, NvsEngine, OpenMode, RawHandle, Scalar, ValueType};
use super::table::{EngineLimits, EntryTable, Namespace, StoredValue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Version written into every partition image
pub const IMAGE_FORMAT_VERSION: u32 = 1;

/// Serialized contents of one partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionImage {
    pub version: u32,
    pub namespaces: BTreeMap<String, Namespace>,
}

impl PartitionImage {
    /// Serialize to bytes with length prefix and checksum
    pub fn to_bytes(&self) -> EngineResult<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| EngineError::Io(format!("Failed to serialize image: {}", e)))?;
        let len = u32::try_from(json.len()).map_err(|_| EngineError::ValueTooLong)?;

        let mut result = Vec::with_capacity(json.len() + 8);
        result.extend_from_slice(&len.to_le_bytes());
        result.extend_from_slice(&json);
        result.extend_from_slice(&checksum(&json).to_le_bytes());
        Ok(result)
    }

    /// Deserialize from bytes, validating length, checksum and version
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() < 8 {
            return Err(EngineError::NoFreePages);
        }
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() != len + 8 {
            return Err(EngineError::NoFreePages);
        }

        let json = &bytes[4..4 + len];
        let stored = u32::from_le_bytes([
            bytes[4 + len],
            bytes[5 + len],
            bytes[6 + len],
            bytes[7 + len],
        ]);
        if stored != checksum(json) {
            return Err(EngineError::NoFreePages);
        }

        let image: PartitionImage =
            serde_json::from_slice(json).map_err(|_| EngineError::NoFreePages)?;
        if image.version != IMAGE_FORMAT_VERSION {
            return Err(EngineError::NewVersionFound);
        }
        Ok(image)
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.rotate_left(5) ^ u32::from(b))
}

/// NVS engine persisted to a directory of partition images
#[derive(Debug)]
pub struct FileEngine {
    dir: PathBuf,
    table: Mutex<EntryTable>,
    dirty: Mutex<BTreeSet<String>>,
}

impl FileEngine {
    /// Create an engine over `dir` with the default partition `"nvs"`
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self::with_partitions(dir, &["nvs"])
    }

    pub fn with_partitions<P: AsRef<Path>, S: AsRef<str>>(dir: P, partitions: &[S]) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            table: Mutex::new(EntryTable::new(partitions, EngineLimits::default())),
            dirty: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the image file for `partition`
    pub fn image_path(&self, partition: &str) -> PathBuf {
        self.dir.join(format!("{}.nvs", partition))
    }

    /// Whether `partition` has writes not yet committed
    pub fn is_dirty(&self, partition: &str) -> bool {
        self.dirty.lock().contains(partition)
    }

    fn load_image(&self, partition: &str) -> EngineResult<Option<PartitionImage>> {
        let path = self.image_path(partition);
        match std::fs::read(&path) {
            Ok(bytes) => PartitionImage::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Io(format!("Failed to read {:?}: {}", path, e))),
        }
    }

    fn write_image(&self, partition: &str, image: &PartitionImage) -> EngineResult<()> {
        let path = self.image_path(partition);
        let temp_path = path.with_extension("nvs.tmp");
        let bytes = image.to_bytes()?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| EngineError::Io(format!("Failed to create temp image: {}", e)))?;
        file.write_all(&bytes)
            .map_err(|e| EngineError::Io(format!("Failed to write image: {}", e)))?;
        file.sync_all()
            .map_err(|e| EngineError::Io(format!("Failed to sync image: {}", e)))?;

        std::fs::rename(&temp_path, &path)
            .map_err(|e| EngineError::Io(format!("Failed to rename image: {}", e)))?;

        debug!(partition, bytes = bytes.len(), "Wrote partition image");
        Ok(())
    }

    fn mark_dirty(&self, result: EngineResult<String>) -> EngineResult<()> {
        let partition = result?;
        self.dirty.lock().insert(partition);
        Ok(())
    }
}

impl NvsEngine for FileEngine {
    fn init(&self) -> EngineResult<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| EngineError::Io(format!("Failed to create engine dir: {}", e)))?;

        let mut table = self.table.lock();
        let mut loaded = Vec::new();
        for partition in table.partition_names() {
            if let Some(image) = self.load_image(&partition)? {
                loaded.push((partition, image.namespaces));
            }
        }

        let count = loaded.len();
        for (partition, namespaces) in loaded {
            table.load_partition(&partition, namespaces);
        }
        table.set_initialized(true);
        self.dirty.lock().clear();

        info!(dir = ?self.dir, images = count, "File engine initialized");
        Ok(())
    }

    fn erase(&self) -> EngineResult<()> {
        let mut table = self.table.lock();
        for partition in table.partition_names() {
            let path = self.image_path(&partition);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(EngineError::Io(format!("Failed to remove {:?}: {}", path, e)))
                }
            }
        }
        table.clear();
        self.dirty.lock().clear();

        warn!(dir = ?self.dir, "Erased all partition images");
        Ok(())
    }

    fn open(&self, partition: &str, namespace: &str, mode: OpenMode) -> EngineResult<RawHandle> {
        let mut table = self.table.lock();
        let created = mode.is_writable()
            && table
                .partition(partition)
                .is_some_and(|namespaces| !namespaces.contains_key(namespace));
        let handle = table.open(partition, namespace, mode)?;
        if created {
            self.dirty.lock().insert(partition.to_string());
        }
        Ok(handle)
    }

    fn close(&self, handle: RawHandle) {
        self.table.lock().close(handle);
    }

    fn commit(&self, handle: RawHandle) -> EngineResult<()> {
        let table = self.table.lock();
        let partition = table.handle_partition(handle)?.to_string();
        if !self.dirty.lock().contains(&partition) {
            return Ok(());
        }

        let image = PartitionImage {
            version: IMAGE_FORMAT_VERSION,
            namespaces: table.partition(&partition).cloned().unwrap_or_default(),
        };
        self.write_image(&partition, &image)?;
        self.dirty.lock().remove(&partition);
        Ok(())
    }

    fn get_scalar(&self, handle: RawHandle, key: &str, kind: ValueType) -> EngineResult<Scalar> {
        self.table.lock().get_scalar(handle, key, kind)
    }

    fn set_scalar(&self, handle: RawHandle, key: &str, value: Scalar) -> EngineResult<()> {
        let result = self.table.lock().set(handle, key, StoredValue::Scalar(value));
        self.mark_dirty(result)
    }

    fn get_str(&self, handle: RawHandle, key: &str, out: Option<&mut [u8]>) -> EngineResult<usize> {
        self.table.lock().get_str(handle, key, out)
    }

    fn set_str(&self, handle: RawHandle, key: &str, value: &str) -> EngineResult<()> {
        let result = self
            .table
            .lock()
            .set(handle, key, StoredValue::Str(value.to_string()));
        self.mark_dirty(result)
    }

    fn get_blob(
        &self,
        handle: RawHandle,
        key: &str,
        out: Option<&mut [u8]>,
    ) -> EngineResult<usize> {
        self.table.lock().get_blob(handle, key, out)
    }

    fn set_blob(&self, handle: RawHandle, key: &str, value: &[u8]) -> EngineResult<()> {
        let result = self
            .table
            .lock()
            .set(handle, key, StoredValue::Blob(value.to_vec()));
        self.mark_dirty(result)
    }

    fn find_key(&self, handle: RawHandle, key: &str) -> EngineResult<ValueType> {
        self.table.lock().find_key(handle, key)
    }

    fn erase_key(&self, handle: RawHandle, key: &str) -> EngineResult<()> {
        let result = self.table.lock().erase_key(handle, key);
        self.mark_dirty(result)
    }

    fn erase_all(&self, handle: RawHandle) -> EngineResult<()> {
        let result = self.table.lock().erase_all(handle);
        self.mark_dirty(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nvs_file_{}_{}", name, std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    #[test]
    fn test_image_roundtrip() -> EngineResult<()> {
        let mut namespace = Namespace::new();
        namespace.insert("k".to_string(), StoredValue::Scalar(Scalar::I16(-5)));
        let mut namespaces = BTreeMap::new();
        namespaces.insert("app".to_string(), namespace);

        let image = PartitionImage {
            version: IMAGE_FORMAT_VERSION,
            namespaces,
        };
        let bytes = image.to_bytes()?;
        let decoded = PartitionImage::from_bytes(&bytes)?;
        assert_eq!(decoded.namespaces, image.namespaces);
        Ok(())
    }

    #[test]
    fn test_image_corruption_detected() -> EngineResult<()> {
        let image = PartitionImage {
            version: IMAGE_FORMAT_VERSION,
            namespaces: BTreeMap::new(),
        };
        let mut bytes = image.to_bytes()?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert_eq!(
            PartitionImage::from_bytes(&bytes).unwrap_err(),
            EngineError::NoFreePages
        );
        assert_eq!(
            PartitionImage::from_bytes(&bytes[..5]).unwrap_err(),
            EngineError::NoFreePages
        );
        Ok(())
    }

    #[test]
    fn test_image_version_mismatch() -> EngineResult<()> {
        let image = PartitionImage {
            version: IMAGE_FORMAT_VERSION + 1,
            namespaces: BTreeMap::new(),
        };
        let bytes = image.to_bytes()?;
        assert_eq!(
            PartitionImage::from_bytes(&bytes).unwrap_err(),
            EngineError::NewVersionFound
        );
        Ok(())
    }

    #[test]
    fn test_commit_persists_across_instances() -> EngineResult<()> {
        let dir = temp_dir("persist");
        {
            let engine = FileEngine::new(&dir);
            engine.init()?;
            let handle = engine.open("nvs", "app", OpenMode::ReadWrite)?;
            engine.set_scalar(handle, "boots", Scalar::U32(41))?;
            assert!(engine.is_dirty("nvs"));
            engine.commit(handle)?;
            assert!(!engine.is_dirty("nvs"));

            // Uncommitted writes are lost
            engine.set_scalar(handle, "lost", Scalar::U8(1))?;
            engine.close(handle);
        }
        {
            let engine = FileEngine::new(&dir);
            engine.init()?;
            let handle = engine.open("nvs", "app", OpenMode::ReadOnly)?;
            assert_eq!(engine.get_scalar(handle, "boots", ValueType::U32)?, Scalar::U32(41));
            assert_eq!(engine.find_key(handle, "lost"), Err(EngineError::NotFound));
        }
        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_corrupted_image_reported_at_init() -> EngineResult<()> {
        let dir = temp_dir("corrupt");
        std::fs::create_dir_all(&dir).map_err(|e| EngineError::Io(e.to_string()))?;
        let engine = FileEngine::new(&dir);
        std::fs::write(engine.image_path("nvs"), b"garbage!garbage!")
            .map_err(|e| EngineError::Io(e.to_string()))?;

        assert_eq!(engine.init(), Err(EngineError::NoFreePages));
        engine.erase()?;
        engine.init()?;
        assert!(!engine.image_path("nvs").exists());

        std::fs::remove_dir_all(dir).ok();
        Ok(())
    }
}
