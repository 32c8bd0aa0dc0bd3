//! LLM 响应缓存
//!
//! 默认链路 = 精确缓存（FilesystemCache，按提示哈希）→ 片段缓存（FragmentsCache，按目标 / 步骤哈希并校验元素仍在）。
//! 所有缓存先写内存，`save` 时落盘、`discard` 时丢弃。查询失败（文件损坏、解析失败）一律视为未命中。

pub mod chained;
pub mod factory;
pub mod filesystem;
pub mod fragments;
pub mod lock;
pub mod null;
pub mod sqlite;

use std::path::{Path, PathBuf};

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_128;

use crate::llm::{ChatRequest, ChatResponse, Model, Usage};

pub use chained::ChainedCache;
pub use factory::create_cache;
pub use filesystem::FilesystemCache;
pub use fragments::FragmentsCache;
pub use lock::FileLock;
pub use null::NullCache;
pub use sqlite::SqliteCache;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Timed out acquiring cache lock {0}")]
    LockTimeout(String),
}

/// 缓存后端
pub trait Cache: Send + Sync {
    fn name(&self) -> &'static str;

    fn lookup(&self, request: &ChatRequest, llm_string: &str) -> Option<ChatResponse>;

    fn update(&self, request: &ChatRequest, llm_string: &str, response: &ChatResponse);

    /// 把内存中的更新写入持久层
    fn save(&self) -> Result<(), CacheError>;

    fn discard(&self);

    fn clear(&self) -> Result<(), CacheError>;

    /// 命中所节省的 token
    fn usage(&self) -> Usage;
}

/// xxh3_128 的 32 位十六进制摘要
pub fn hash_hex(text: &str) -> String {
    format!("{:032x}", xxh3_128(text.as_bytes()))
}

/// `<root>/<provider>/<model>/<kind>`
pub(crate) fn model_dir(root: &Path, model: &Model, kind: &str) -> PathBuf {
    root.join(model.provider.as_str()).join(&model.name).join(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    #[test]
    fn test_hash_hex_stable() {
        let a = hash_hex("click login");
        assert_eq!(a.len(), 32);
        assert_eq!(a, hash_hex("click login"));
        assert_ne!(a, hash_hex("click logout"));
    }

    #[test]
    fn test_model_dir_layout() {
        let model = Model::new(Provider::Openai, Some("gpt-4o"));
        let dir = model_dir(Path::new("/tmp/cache"), &model, "fragments");
        assert_eq!(dir, PathBuf::from("/tmp/cache/openai/gpt-4o/fragments"));
    }
}
