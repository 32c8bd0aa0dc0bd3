//! 精确缓存：按提示哈希存放响应
//!
//! 目录：`<cache_dir>/<provider>/<model>/filesystem/<agent>/<xxh3_128(prompt)>/response.json`，
//! 内容为 `{llm_string, response}`；llm_string 不同视为未命中。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{hash_hex, model_dir, Cache, CacheError, FileLock};
use crate::llm::{ChatRequest, ChatResponse, Model, Usage};

const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const RESPONSE_FILE: &str = "response.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    llm_string: String,
    response: ChatResponse,
}

pub struct FilesystemCache {
    root: PathBuf,
    /// (agent 目录, 提示哈希) -> 待保存条目
    memory: Mutex<HashMap<(String, String), StoredEntry>>,
    usage: Mutex<Usage>,
}

impl FilesystemCache {
    pub fn new(cache_dir: &Path, model: &Model) -> Self {
        Self {
            root: model_dir(cache_dir, model, "filesystem"),
            memory: Mutex::new(HashMap::new()),
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key(request: &ChatRequest) -> (String, String) {
        (
            request.agent.cache_dir().to_string(),
            hash_hex(&request.prompt_key()),
        )
    }

    fn entry_dir(&self, key: &(String, String)) -> PathBuf {
        self.root.join(&key.0).join(&key.1)
    }

    fn read_entry(&self, key: &(String, String)) -> Option<StoredEntry> {
        let path = self.entry_dir(key).join(RESPONSE_FILE);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Malformed cache entry");
                None
            }
        }
    }

    fn write_entry(&self, key: &(String, String), entry: &StoredEntry) -> Result<(), CacheError> {
        let dir = self.entry_dir(key);
        std::fs::create_dir_all(&dir)?;
        let _lock = FileLock::acquire(&dir, LOCK_TIMEOUT)?;
        std::fs::write(dir.join(RESPONSE_FILE), serde_json::to_string_pretty(entry)?)?;
        Ok(())
    }

    fn record_hit(&self, response: &ChatResponse) {
        if let Ok(mut usage) = self.usage.lock() {
            usage.add(&response.usage);
        }
    }
}

impl Cache for FilesystemCache {
    fn name(&self) -> &'static str {
        "FilesystemCache"
    }

    fn lookup(&self, request: &ChatRequest, llm_string: &str) -> Option<ChatResponse> {
        let key = Self::key(request);
        let in_memory = self
            .memory
            .lock()
            .ok()
            .and_then(|memory| memory.get(&key).cloned());
        let entry = in_memory.or_else(|| self.read_entry(&key))?;
        if entry.llm_string != llm_string {
            return None;
        }
        tracing::debug!(agent = %key.0, hash = %key.1, "Filesystem cache hit");
        self.record_hit(&entry.response);
        Some(entry.response)
    }

    fn update(&self, request: &ChatRequest, llm_string: &str, response: &ChatResponse) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(
                Self::key(request),
                StoredEntry {
                    llm_string: llm_string.to_string(),
                    response: response.clone(),
                },
            );
        }
    }

    fn save(&self) -> Result<(), CacheError> {
        let entries: Vec<_> = match self.memory.lock() {
            Ok(mut memory) => memory.drain().collect(),
            Err(_) => return Ok(()),
        };
        for (key, entry) in entries {
            if let Err(e) = self.write_entry(&key, &entry) {
                tracing::warn!(agent = %key.0, hash = %key.1, error = %e, "Failed to save cache entry");
            }
        }
        Ok(())
    }

    fn discard(&self) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.clear();
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.discard();
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }

    fn usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentKind;
    use crate::llm::{Message, Provider};

    fn request(goal: &str) -> ChatRequest {
        ChatRequest::new(AgentKind::Planner, vec![Message::user(goal)])
    }

    fn cache(dir: &Path) -> FilesystemCache {
        FilesystemCache::new(dir, &Model::new(Provider::Openai, None))
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let first = cache(dir.path());
        first.update(&request("login"), "llm-a", &ChatResponse::text("click login"));
        first.save().unwrap();

        let second = cache(dir.path());
        let hit = second.lookup(&request("login"), "llm-a").unwrap();
        assert_eq!(hit.content, "click login");
        assert!(second.lookup(&request("login"), "llm-b").is_none());
        assert!(second.lookup(&request("logout"), "llm-a").is_none());

        let entries: Vec<_> = walkdir::WalkDir::new(second.root())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_name() == RESPONSE_FILE)
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path().to_string_lossy().contains("/plans/"));
    }

    #[test]
    fn test_discard_drops_pending() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache.update(&request("a"), "llm", &ChatResponse::text("x"));
        assert!(cache.lookup(&request("a"), "llm").is_some());
        cache.discard();
        cache.save().unwrap();
        assert!(cache.lookup(&request("a"), "llm").is_none());
    }

    #[test]
    fn test_malformed_entry_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let key = FilesystemCache::key(&request("a"));
        let entry_dir = cache.entry_dir(&key);
        std::fs::create_dir_all(&entry_dir).unwrap();
        std::fs::write(entry_dir.join(RESPONSE_FILE), "{not json").unwrap();
        assert!(cache.lookup(&request("a"), "llm").is_none());
    }

    #[test]
    fn test_clear_removes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        cache.update(&request("a"), "llm", &ChatResponse::text("x"));
        cache.save().unwrap();
        assert!(cache.root().exists());
        cache.clear().unwrap();
        assert!(!cache.root().exists());
    }
}
