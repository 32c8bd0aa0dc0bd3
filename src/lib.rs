//! Alumnium - AI 驱动的 UI 自动化
//!
//! 模块划分：
//! - **accessibility**: 原始快照规范化、面向 LLM 的语义树、id 映射与差异
//! - **agents**: Planner / Actor / Retriever / Area / Locator / ChangesAnalyzer
//! - **alumni** / **area**: 测试代码使用的门面与区域句柄
//! - **cache**: LLM 响应缓存（精确 + 片段 / SQLite / 关闭）
//! - **config**: 配置加载（TOML + ALUMNIUM_* 环境变量）
//! - **core**: 统一错误类型与动词级恢复
//! - **drivers**: Chromium（CDP）、Selenium、Appium 驱动
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Anthropic / Mock）
//! - **observability**: tracing 订阅器
//! - **session**: 会话与会话管理
//! - **tools**: 工具定义、schema 与执行器

pub mod accessibility;
pub mod agents;
pub mod alumni;
pub mod area;
pub mod cache;
pub mod config;
pub mod core;
pub mod drivers;
pub mod llm;
pub mod observability;
pub mod session;
pub mod tools;

pub use agents::Data;
pub use alumni::{Alumni, DoResult, DoStep};
pub use area::Area;
pub use config::{load_config, AlumniumConfig};
pub use core::AlumniumError;
pub use session::{Session, SessionManager, SessionStats};
