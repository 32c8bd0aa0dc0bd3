//! 可观测性：tracing 订阅器初始化
//!
//! 过滤级别：`RUST_LOG` 优先，其次配置中的 log_level（ALUMNIUM_LOG_LEVEL），默认 warn。
//! 设置 log_path 时写入文件（追加），否则输出到 stdout。

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AlumniumConfig;

const DEFAULT_LEVEL: &str = "warn";

fn build_filter(config: &AlumniumConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = config
        .log_level
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
    EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// 安装全局订阅器；重复调用时忽略（测试中多次初始化）
pub fn init(config: &AlumniumConfig) {
    let filter = build_filter(config);

    let file = config.log_path.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        OpenOptions::new().create(true).append(true).open(path).ok()
    });

    let result = match file {
        Some(file) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .try_init(),
        None => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(log_path = ?config.log_path, "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = AlumniumConfig::default();
        init(&config);
        init(&config);
    }
}
