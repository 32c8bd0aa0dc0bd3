//! 关闭缓存（ALUMNIUM_CACHE=false|0|none|null）

use crate::cache::{Cache, CacheError};
use crate::llm::{ChatRequest, ChatResponse, Usage};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl Cache for NullCache {
    fn name(&self) -> &'static str {
        "NullCache"
    }

    fn lookup(&self, _request: &ChatRequest, _llm_string: &str) -> Option<ChatResponse> {
        None
    }

    fn update(&self, _request: &ChatRequest, _llm_string: &str, _response: &ChatResponse) {}

    fn save(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn discard(&self) {}

    fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn usage(&self) -> Usage {
        Usage::default()
    }
}
