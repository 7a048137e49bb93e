//! Content-addressed, write-once store for rendered formulas.
//!
//! Entries are files named by the hex SHA-512 digest of their key. Once written an entry is never
//! modified. The store assumes a single writer; concurrent writers racing on the same key are not
//! coordinated.

use std::{
    fs, io,
    io::Write as _,
    path::PathBuf,
};

use sha2::{Digest, Sha512};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Opens the cache rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The storage identifier for `key`: 128 lowercase hex digits.
    pub fn hash(key: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(Self::hash(key))
    }

    pub fn read(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Persists `value` under `key`, leaving an existing entry untouched.
    ///
    /// The value is written to a temporary file first so that an interrupted write never leaves
    /// a partial entry behind.
    pub fn write(&self, key: &str, value: &str) -> io::Result<()> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(value.as_bytes())?;
        match file.persist_noclobber(self.path(key)) {
            Ok(_) => Ok(()),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.error),
        }
    }

    /// Returns the stored value for `key`, computing and storing it first if there is none.
    pub fn ensure<E>(
        &self,
        key: &str,
        compute: impl FnOnce(&str) -> Result<String, E>,
    ) -> Result<String, E>
    where
        E: From<io::Error>,
    {
        if let Some(value) = self.read(key)? {
            log::debug!("Cache hit for {key:?}");
            return Ok(value);
        }
        log::debug!("Cache miss for {key:?}");
        let value = compute(key)?;
        self.write(key, &value)?;
        Ok(value)
    }
}
