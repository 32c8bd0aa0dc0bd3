//! 按配置 `cache` 选择缓存后端

use std::sync::Arc;

use crate::cache::{Cache, ChainedCache, FilesystemCache, FragmentsCache, NullCache, SqliteCache};
use crate::config::AlumniumConfig;
use crate::core::AlumniumError;
use crate::llm::Model;

/// filesystem → 精确缓存 + 片段缓存链；sqlite → SqliteCache；false / 0 / none / null → 关闭
pub fn create_cache(config: &AlumniumConfig, model: &Model) -> Result<Arc<dyn Cache>, AlumniumError> {
    let backend = config.cache.trim().to_lowercase();
    let cache: Arc<dyn Cache> = match backend.as_str() {
        "filesystem" => Arc::new(ChainedCache::new(vec![
            Arc::new(FilesystemCache::new(&config.cache_dir, model)),
            Arc::new(FragmentsCache::new(&config.cache_dir, model)),
        ])),
        "sqlite" => Arc::new(SqliteCache::open(&config.cache_dir)?),
        "false" | "0" | "none" | "null" => Arc::new(NullCache),
        _ => return Err(AlumniumError::UnknownCacheBackend(config.cache.clone())),
    };
    tracing::info!(backend = cache.name(), "Cache backend selected");
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    fn config(cache: &str, dir: &std::path::Path) -> AlumniumConfig {
        AlumniumConfig {
            cache: cache.to_string(),
            cache_dir: dir.to_path_buf(),
            ..AlumniumConfig::default()
        }
    }

    #[test]
    fn test_backend_selection() {
        let dir = tempfile::tempdir().unwrap();
        let model = Model::new(Provider::Openai, None);
        assert_eq!(create_cache(&config("filesystem", dir.path()), &model).unwrap().name(), "ChainedCache");
        assert_eq!(create_cache(&config("sqlite", dir.path()), &model).unwrap().name(), "SqliteCache");
        for off in ["false", "0", "None", "null"] {
            assert_eq!(create_cache(&config(off, dir.path()), &model).unwrap().name(), "NullCache");
        }
    }

    #[test]
    fn test_unknown_backend() {
        let dir = tempfile::tempdir().unwrap();
        let model = Model::new(Provider::Openai, None);
        let err = create_cache(&config("redis", dir.path()), &model).err().unwrap();
        assert!(matches!(err, AlumniumError::UnknownCacheBackend(name) if name == "redis"));
    }
}
