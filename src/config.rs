//! 运行配置：从 alumnium.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件（可选），再用环境变量 `ALUMNIUM_*` 覆盖（双下划线表示嵌套）。
//! 例如 `ALUMNIUM_MODEL=anthropic/claude-haiku-4-5-20251001`、`ALUMNIUM_CACHE=sqlite`。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 配置根
#[derive(Debug, Clone, Deserialize)]
pub struct AlumniumConfig {
    /// `<provider>/<name>`；为空时按环境选择默认 provider
    #[serde(default)]
    pub model: Option<String>,
    /// filesystem（默认）/ sqlite / false|0|none|null
    #[serde(default = "default_cache")]
    pub cache: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub log_level: Option<String>,
    /// 未设置时输出到 stdout
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// 动词最多执行次数
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// 两次执行之间的间隔（秒）
    #[serde(default = "default_delay")]
    pub delay: f64,
    /// 点击 / 按键后等待新标签页出现的时间（毫秒）
    #[serde(default = "default_new_tab_timeout")]
    pub new_tab_timeout: u64,
    /// do 结束后是否分析页面变化
    #[serde(default)]
    pub changes_analysis: bool,
    /// 页面稳定等待超时（毫秒）
    #[serde(default = "default_driver_timeout")]
    pub driver_timeout: u64,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_cache() -> String {
    "filesystem".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".alumnium/cache")
}

fn default_retries() -> u32 {
    2
}

fn default_delay() -> f64 {
    0.5
}

fn default_new_tab_timeout() -> u64 {
    200
}

fn default_driver_timeout() -> u64 {
    10_000
}

fn default_tool_timeout_secs() -> u64 {
    60
}

impl Default for AlumniumConfig {
    fn default() -> Self {
        Self {
            model: None,
            cache: default_cache(),
            cache_dir: default_cache_dir(),
            log_level: None,
            log_path: None,
            retries: default_retries(),
            delay: default_delay(),
            new_tab_timeout: default_new_tab_timeout(),
            changes_analysis: false,
            driver_timeout: default_driver_timeout(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl AlumniumConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay.max(0.0))
    }

    pub fn new_tab_timeout(&self) -> Duration {
        Duration::from_millis(self.new_tab_timeout)
    }

    pub fn driver_timeout(&self) -> Duration {
        Duration::from_millis(self.driver_timeout)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// 至少执行一次
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

/// 加载配置，环境变量 ALUMNIUM_* 可覆盖
///
/// 1. 当前目录存在 alumnium.toml 时作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ALUMNIUM_*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AlumniumConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    if std::path::Path::new("alumnium.toml").exists() {
        builder = builder.add_source(config::File::with_name("alumnium").required(false));
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ALUMNIUM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AlumniumConfig::default();
        assert_eq!(config.cache, "filesystem");
        assert_eq!(config.retries, 2);
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
        assert_eq!(config.new_tab_timeout(), Duration::from_millis(200));
        assert!(!config.changes_analysis);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "model = \"anthropic/claude-haiku-4-5-20251001\"").unwrap();
        writeln!(file, "cache = \"sqlite\"").unwrap();
        writeln!(file, "retries = 3").unwrap();
        writeln!(file, "changes_analysis = true").unwrap();
        drop(file);

        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.model.as_deref(), Some("anthropic/claude-haiku-4-5-20251001"));
        assert_eq!(config.cache, "sqlite");
        assert_eq!(config.retries, 3);
        assert!(config.changes_analysis);
        assert_eq!(config.delay, 0.5);
    }

    #[test]
    fn test_attempts_never_zero() {
        let config = AlumniumConfig {
            retries: 0,
            ..AlumniumConfig::default()
        };
        assert_eq!(config.attempts(), 1);
    }
}
