use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{KeyValueStore, StorageError};

const FILE_SUFFIX: &str = ".kv";

/// One file per key inside a directory, for native hosts.
///
/// File names are the hex encoding of the key so arbitrary keys stay
/// filesystem-safe and can be recovered by `keys()`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| io_error("create_dir_all", e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{FILE_SUFFIX}", hex_encode(key)))
    }
}

impl KeyValueStore for DirStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                Err(StorageError::Corrupt(format!("non-utf8 value for {key}")))
            }
            Err(e) => Err(io_error("read", e)),
        }
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        // Write-then-rename so a failed write never leaves a truncated value behind.
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        if let Err(e) = fs::write(&tmp, value) {
            let _ = fs::remove_file(&tmp);
            return Err(io_error("write", e));
        }
        fs::rename(&tmp, &path).map_err(|e| io_error("rename", e))
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error("read_dir", e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("read_dir", e))?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(FILE_SUFFIX)) else {
                continue;
            };
            if let Some(key) = hex_decode(stem) {
                out.push(key);
            }
        }
        out.sort();
        Ok(out)
    }
}

fn io_error(op: &str, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::StorageFull {
        return StorageError::QuotaExceeded;
    }
    StorageError::Io(format!("{op} failed: {e}"))
}

fn hex_encode(key: &str) -> String {
    key.bytes().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<String> {
    if s.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
