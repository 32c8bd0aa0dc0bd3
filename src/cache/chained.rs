//! 缓存链：按顺序查询，第一个命中者胜出；update / save / discard / clear 广播到所有缓存

use std::sync::{Arc, Mutex};

use crate::cache::{Cache, CacheError};
use crate::llm::{ChatRequest, ChatResponse, Usage};

pub struct ChainedCache {
    caches: Vec<Arc<dyn Cache>>,
    /// 最近一次命中所在缓存的用量
    usage: Mutex<Usage>,
}

impl ChainedCache {
    pub fn new(caches: Vec<Arc<dyn Cache>>) -> Self {
        Self {
            caches,
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn caches(&self) -> &[Arc<dyn Cache>] {
        &self.caches
    }
}

impl Cache for ChainedCache {
    fn name(&self) -> &'static str {
        "ChainedCache"
    }

    fn lookup(&self, request: &ChatRequest, llm_string: &str) -> Option<ChatResponse> {
        for (position, cache) in self.caches.iter().enumerate() {
            if let Some(hit) = cache.lookup(request, llm_string) {
                tracing::debug!(cache = cache.name(), position, "Cache hit");
                if let Ok(mut usage) = self.usage.lock() {
                    *usage = cache.usage();
                }
                return Some(hit);
            }
        }
        tracing::debug!("Cache miss in all chained caches");
        None
    }

    fn update(&self, request: &ChatRequest, llm_string: &str, response: &ChatResponse) {
        for cache in &self.caches {
            cache.update(request, llm_string, response);
        }
    }

    fn save(&self) -> Result<(), CacheError> {
        let mut first_error = None;
        for cache in &self.caches {
            if let Err(e) = cache.save() {
                tracing::warn!(cache = cache.name(), error = %e, "Cache save failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn discard(&self) {
        for cache in &self.caches {
            cache.discard();
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        for cache in &self.caches {
            cache.clear()?;
        }
        Ok(())
    }

    fn usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}
