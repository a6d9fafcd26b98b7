use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::storage::{SessionBackend, StoredSession};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";
const SESSION_TMP_FILE: &str = "session.json.tmp";

/// Session persisted as JSON in the cache directory
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    cache_dir: PathBuf,
}

impl FileTokenStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl SessionBackend for FileTokenStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    fn read(&self) -> Result<Option<StoredSession>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read session file")?;
        let session = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;
        Ok(Some(session))
    }

    /// Write a private temp file beside the session, then rename it into place
    fn write(&self, session: &StoredSession) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
            .context("Failed to create session directory")?;
        let contents = serde_json::to_string_pretty(session)?;

        let tmp_path = self.cache_dir.join(SESSION_TMP_FILE);
        // A leftover temp file could carry looser permissions
        let _ = std::fs::remove_file(&tmp_path);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(&tmp_path)
            .context("Failed to create session temp file")?;
        file.write_all(contents.as_bytes())
            .and_then(|_| file.sync_all())
            .context("Failed to write session temp file")?;
        drop(file);

        std::fs::rename(&tmp_path, self.session_path())
            .context("Failed to replace session file")?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
