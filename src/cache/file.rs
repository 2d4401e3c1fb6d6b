use super::{CacheError, CacheSet, StatusCache};
use crate::status::update::{CachedUpdate, StepUpdate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct HistoryLine {
    score: i64,
    update: StepUpdate,
}

/// Truncates a partial final line left by a crash mid-append, so the next
/// append starts on a line of its own.
fn drop_torn_tail(file: &mut fs::File) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut raw = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut raw)?;
    let keep = raw
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map(|index| index + 1)
        .unwrap_or(0);
    file.set_len(keep as u64)
}

/// File-backed cache that survives an unclean shutdown.
///
/// Layout under `root`:
/// - `history/<key>.jsonl`: one scored update per line, append-only
/// - `latest/<key>.json`: latest pointer, replaced atomically
/// - `sets/<set>/<key>`: one marker per member holding the instance id
///
/// `<key>` is a hash of the instance id so arbitrary ids stay path-safe.
/// Appends are single `O_APPEND` writes, so concurrent writers from other
/// processes interleave whole lines; equal scores keep line order.
#[derive(Debug)]
pub struct FileStatusCache {
    root: PathBuf,
    append_lock: Mutex<()>,
}

impl FileStatusCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let cache = Self {
            root: root.into(),
            append_lock: Mutex::new(()),
        };
        for dir in [
            cache.root.join("history"),
            cache.root.join("latest"),
            cache.set_dir(CacheSet::InProgress),
            cache.set_dir(CacheSet::Persisted),
        ] {
            fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
        }
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn history_path(&self, instance_id: &str) -> PathBuf {
        self.root
            .join("history")
            .join(format!("{}.jsonl", instance_key(instance_id)))
    }

    fn latest_path(&self, instance_id: &str) -> PathBuf {
        self.root
            .join("latest")
            .join(format!("{}.json", instance_key(instance_id)))
    }

    fn set_dir(&self, set: CacheSet) -> PathBuf {
        self.root.join("sets").join(set.as_str())
    }

    fn member_path(&self, set: CacheSet, instance_id: &str) -> PathBuf {
        self.set_dir(set).join(instance_key(instance_id))
    }
}

impl StatusCache for FileStatusCache {
    fn append_history(
        &self,
        instance_id: &str,
        score_millis: i64,
        update: &StepUpdate,
    ) -> Result<(), CacheError> {
        let line = HistoryLine {
            score: score_millis,
            update: update.clone(),
        };
        let mut body = serde_json::to_vec(&line).map_err(|source| CacheError::Encode {
            instance_id: instance_id.to_string(),
            source,
        })?;
        body.push(b'\n');

        let path = self.history_path(instance_id);
        let _guard = self.append_lock.lock().map_err(|_| CacheError::Poisoned)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        drop_torn_tail(&mut file).map_err(|source| io_error(&path, source))?;
        file.write_all(&body)
            .map_err(|source| io_error(&path, source))
    }

    fn history(&self, instance_id: &str) -> Result<Vec<StepUpdate>, CacheError> {
        let path = self.history_path(instance_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&path, source)),
        };

        let complete_tail = raw.ends_with('\n');
        let lines = raw.lines().collect::<Vec<_>>();
        let mut entries = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryLine>(line) {
                Ok(entry) => entries.push(entry),
                // A torn final line from a crash mid-append is dropped.
                Err(_) if !complete_tail && index + 1 == lines.len() => {}
                Err(source) => {
                    return Err(CacheError::Corrupt {
                        path: path.display().to_string(),
                        line: index + 1,
                        source,
                    })
                }
            }
        }

        entries.sort_by_key(|entry| entry.score);
        Ok(entries.into_iter().map(|entry| entry.update).collect())
    }

    fn set_latest(&self, instance_id: &str, update: &CachedUpdate) -> Result<(), CacheError> {
        let body = serde_json::to_vec(update).map_err(|source| CacheError::Encode {
            instance_id: instance_id.to_string(),
            source,
        })?;
        let path = self.latest_path(instance_id);
        replace_file(&path, &body).map_err(|source| io_error(&path, source))
    }

    fn latest(&self, instance_id: &str) -> Result<Option<CachedUpdate>, CacheError> {
        let path = self.latest_path(instance_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&path, source)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CacheError::Corrupt {
                path: path.display().to_string(),
                line: 1,
                source,
            })
    }

    fn clear_instance(&self, instance_id: &str) -> Result<(), CacheError> {
        remove_if_exists(&self.history_path(instance_id))?;
        remove_if_exists(&self.latest_path(instance_id))
    }

    fn add_member(&self, set: CacheSet, instance_id: &str) -> Result<(), CacheError> {
        let path = self.member_path(set, instance_id);
        if path.is_file() {
            return Ok(());
        }
        replace_file(&path, instance_id.as_bytes()).map_err(|source| io_error(&path, source))
    }

    fn remove_member(&self, set: CacheSet, instance_id: &str) -> Result<(), CacheError> {
        remove_if_exists(&self.member_path(set, instance_id))
    }

    fn members(&self, set: CacheSet) -> Result<Vec<String>, CacheError> {
        let dir = self.set_dir(set);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&dir, source)),
        };

        let mut members = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&dir, source))?;
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with('.'))
                .unwrap_or(true);
            if is_temp || !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(id) if !id.is_empty() => members.push(id),
                Ok(_) => {}
                // Removed by a concurrent finalize between listing and reading.
                Err(source) if source.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(io_error(&path, source)),
            }
        }
        members.sort();
        Ok(members)
    }

    fn is_member(&self, set: CacheSet, instance_id: &str) -> Result<bool, CacheError> {
        Ok(self.member_path(set, instance_id).is_file())
    }
}

fn instance_key(instance_id: &str) -> String {
    let digest = Sha256::digest(instance_id.as_bytes());
    digest[..16]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()
}

fn replace_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("cache path has no parent"))?;
    fs::create_dir_all(parent)?;
    let tmp_path = parent.join(format!(
        ".{}.tmp-{}-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("entry"),
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed),
    ));
    {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error(path, source)),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}
