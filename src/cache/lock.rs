//! 条目级文件锁：`<entry>.lock` 以 create_new 独占创建，释放时删除
//!
//! 持锁进程崩溃会留下锁文件；超过 STALE_AFTER 的锁视为失效并被接管。

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::cache::CacheError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STALE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// 条目目录的同级锁文件
    pub fn lock_path(entry_dir: &Path) -> PathBuf {
        let mut name = entry_dir.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn acquire(entry_dir: &Path, timeout: Duration) -> Result<Self, CacheError> {
        let path = Self::lock_path(entry_dir);
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        tracing::debug!(path = %path.display(), "Removing stale cache lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(CacheError::LockTimeout(path.display().to_string()));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age > STALE_AFTER)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
