//! SQLite 缓存：`<cache_dir>/cache.sqlite` 单文件，键为 (agent, 提示哈希, llm_string)
//!
//! 与精确缓存语义一致：update 只写内存，save 时以事务批量写入。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::cache::{hash_hex, Cache, CacheError};
use crate::llm::{ChatRequest, ChatResponse, Usage};

pub const DATABASE_FILE: &str = "cache.sqlite";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS responses (
    agent TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    llm_string TEXT NOT NULL,
    response TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (agent, prompt_hash, llm_string)
);
"#;

type Key = (String, String, String);

pub struct SqliteCache {
    path: PathBuf,
    conn: Mutex<Connection>,
    pending: Mutex<HashMap<Key, ChatResponse>>,
    usage: Mutex<Usage>,
}

impl SqliteCache {
    pub fn open(cache_dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(DATABASE_FILE);
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "Opened SQLite cache");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            pending: Mutex::new(HashMap::new()),
            usage: Mutex::new(Usage::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(request: &ChatRequest, llm_string: &str) -> Key {
        (
            request.agent.cache_dir().to_string(),
            hash_hex(&request.prompt_key()),
            llm_string.to_string(),
        )
    }

    fn read(&self, key: &Key) -> Result<Option<ChatResponse>, CacheError> {
        let Ok(conn) = self.conn.lock() else {
            return Ok(None);
        };
        let text: Option<String> = conn
            .query_row(
                "SELECT response FROM responses WHERE agent = ?1 AND prompt_hash = ?2 AND llm_string = ?3",
                params![key.0, key.1, key.2],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

impl Cache for SqliteCache {
    fn name(&self) -> &'static str {
        "SqliteCache"
    }

    fn lookup(&self, request: &ChatRequest, llm_string: &str) -> Option<ChatResponse> {
        let key = Self::key(request, llm_string);
        let pending = self
            .pending
            .lock()
            .ok()
            .and_then(|pending| pending.get(&key).cloned());
        let response = match pending {
            Some(response) => response,
            None => match self.read(&key) {
                Ok(found) => found?,
                Err(e) => {
                    tracing::debug!(error = %e, "SQLite cache read failed");
                    return None;
                }
            },
        };
        if let Ok(mut usage) = self.usage.lock() {
            usage.add(&response.usage);
        }
        tracing::debug!(agent = %key.0, hash = %key.1, "SQLite cache hit");
        Some(response)
    }

    fn update(&self, request: &ChatRequest, llm_string: &str, response: &ChatResponse) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(Self::key(request, llm_string), response.clone());
        }
    }

    fn save(&self) -> Result<(), CacheError> {
        let entries: Vec<_> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => return Ok(()),
        };
        if entries.is_empty() {
            return Ok(());
        }
        let Ok(mut conn) = self.conn.lock() else {
            return Ok(());
        };
        let now = chrono::Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        for ((agent, hash, llm_string), response) in &entries {
            tx.execute(
                "INSERT OR REPLACE INTO responses (agent, prompt_hash, llm_string, response, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![agent, hash, llm_string, serde_json::to_string(response)?, now],
            )?;
        }
        tx.commit()?;
        tracing::debug!(count = entries.len(), "Saved SQLite cache entries");
        Ok(())
    }

    fn discard(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.discard();
        if let Ok(conn) = self.conn.lock() {
            conn.execute("DELETE FROM responses", [])?;
        }
        Ok(())
    }

    fn usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}
