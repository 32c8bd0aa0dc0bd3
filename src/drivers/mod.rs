//! 驱动层：统一的交互接口
//!
//! - cdp：Chromium DevTools 协议传输（WebSocket / WebDriver 转发 / 脚本化 mock）
//! - frames：多 frame 无障碍树聚合、iframe 所属关系与 frame 链、跨域 iframe 合成节点
//! - chromium：直接走 CDP 的 ChromiumDriver
//! - webdriver：W3C WebDriver HTTP 客户端（Selenium Grid / chromedriver / Appium 共用）
//! - selenium：WebDriver + `goog/cdp/execute` 的 SeleniumDriver
//! - appium：iOS（XCUITest）/ Android（UIAutomator2）
//!
//! 所有 id 参数均为 raw id；驱动用最近一次 `accessibility_tree` 返回的树解析元素描述符。

pub mod appium;
pub mod cdp;
pub mod chromium;
pub mod frames;
pub mod selenium;
pub mod webdriver;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::accessibility::{AccessibilityError, ElementDescriptor, Platform, RawTree};
use crate::config::AlumniumConfig;
use crate::tools::{Key, ToolKind};

pub use appium::{AppiumDriver, AppiumOptions};
pub use cdp::{CdpTransport, MockCdpTransport};
#[cfg(feature = "chromium")]
pub use cdp::WsCdpTransport;
pub use chromium::ChromiumDriver;
pub use selenium::{SeleniumDriver, WebDriverCdp};
pub use webdriver::WebDriverClient;

/// 页面稳定脚本：注入一次，挂在 `window[Symbol.for("alumnium")]`
pub const WAITER_SCRIPT: &str = include_str!("scripts/waiter.js");

/// 执行上下文被销毁（导航中）时的错误文本
pub(crate) const CONTEXT_DESTROYED: &str = "Execution context was destroyed";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Driver transport error: {0}")]
    Transport(String),

    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },

    #[error("WebDriver error {error}: {message}")]
    WebDriver { error: String, message: String },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Execution context destroyed: {0}")]
    ContextDestroyed(String),

    #[error("Unsupported by driver: {0}")]
    Unsupported(String),

    #[error("Driver timeout: {0}")]
    Timeout(String),

    #[error("Script error: {0}")]
    Script(String),
}

impl DriverError {
    /// 快照过期或页面导航中；整个动词值得重试
    pub fn is_transient(&self) -> bool {
        match self {
            DriverError::ElementNotFound(_) | DriverError::ContextDestroyed(_) => true,
            DriverError::WebDriver { error, .. } => {
                error == "no such element" || error == "stale element reference"
            }
            DriverError::Cdp { message, .. } => {
                message.contains(CONTEXT_DESTROYED) || message.contains("No node with given id")
            }
            _ => false,
        }
    }
}

impl From<AccessibilityError> for DriverError {
    fn from(e: AccessibilityError) -> Self {
        match e {
            AccessibilityError::ElementNotFound(id) => {
                DriverError::ElementNotFound(format!("raw_id={id}"))
            }
            other => DriverError::Script(other.to_string()),
        }
    }
}

/// 驱动原生元素句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// CDP RemoteObject；session_id 为跨域 iframe 的独立会话
    Cdp {
        object_id: String,
        backend_node_id: Option<i64>,
        session_id: Option<String>,
    },
    /// W3C WebDriver element reference
    WebDriver { element_id: String },
}

impl Element {
    pub fn webdriver_id(&self) -> Option<&str> {
        match self {
            Element::WebDriver { element_id } => Some(element_id),
            Element::Cdp { .. } => None,
        }
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn platform(&self) -> Platform;

    fn supported_tools(&self) -> Vec<ToolKind>;

    /// 等待页面稳定后抓取快照；返回的树同时成为后续元素解析的依据
    async fn accessibility_tree(&self) -> Result<RawTree, DriverError>;

    async fn click(&self, id: u32) -> Result<(), DriverError>;

    async fn type_text(&self, id: u32, text: &str) -> Result<(), DriverError>;

    async fn select(&self, id: u32, option: &str) -> Result<(), DriverError> {
        let _ = (id, option);
        Err(DriverError::Unsupported("select".into()))
    }

    async fn hover(&self, id: u32) -> Result<(), DriverError> {
        let _ = id;
        Err(DriverError::Unsupported("hover".into()))
    }

    async fn press_key(&self, key: Key) -> Result<(), DriverError>;

    async fn drag_and_drop(&self, from_id: u32, to_id: u32) -> Result<(), DriverError>;

    async fn upload(&self, id: u32, paths: &[String]) -> Result<(), DriverError> {
        let _ = (id, paths);
        Err(DriverError::Unsupported("upload".into()))
    }

    async fn back(&self) -> Result<(), DriverError>;

    async fn visit(&self, url: &str) -> Result<(), DriverError>;

    /// base64 PNG
    async fn screenshot(&self) -> Result<String, DriverError>;

    async fn title(&self) -> Result<String, DriverError>;

    async fn url(&self) -> Result<String, DriverError>;

    async fn execute_script(&self, script: &str) -> Result<Value, DriverError>;

    async fn find_element(&self, id: u32) -> Result<Element, DriverError>;

    async fn scroll_to(&self, id: u32) -> Result<(), DriverError> {
        let _ = id;
        Err(DriverError::Unsupported("scroll_to".into()))
    }

    async fn switch_to_next_tab(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("switch_to_next_tab".into()))
    }

    async fn switch_to_previous_tab(&self) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("switch_to_previous_tab".into()))
    }

    async fn wait(&self, seconds: f64) -> Result<(), DriverError> {
        tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
        Ok(())
    }

    async fn quit(&self) -> Result<(), DriverError>;
}

/// 浏览器驱动的等待参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverOptions {
    /// 点击 / 按键后等待新标签页出现的时间
    pub new_tab_timeout: Duration,
    /// 抓取快照前等待页面稳定的上限
    pub page_timeout: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from_config(&AlumniumConfig::default())
    }
}

impl DriverOptions {
    pub fn from_config(config: &AlumniumConfig) -> Self {
        Self {
            new_tab_timeout: config.new_tab_timeout(),
            page_timeout: config.driver_timeout(),
        }
    }
}

/// 最近一次快照；驱动据此把 raw id 解析为元素描述符
#[derive(Debug, Default)]
pub(crate) struct TreeSlot {
    tree: Mutex<Option<RawTree>>,
}

impl TreeSlot {
    pub fn store(&self, tree: &RawTree) {
        if let Ok(mut slot) = self.tree.lock() {
            *slot = Some(tree.clone());
        }
    }

    pub fn descriptor(&self, raw_id: u32) -> Result<Option<ElementDescriptor>, DriverError> {
        match self.tree.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(tree) => Ok(Some(tree.element_by_id(raw_id)?)),
                None => Ok(None),
            },
            Err(_) => Ok(None),
        }
    }
}

/// 环形切换：单标签页时原地不动
pub(crate) fn cycle_index(current: usize, len: usize, forward: bool) -> usize {
    if len == 0 {
        return 0;
    }
    if forward {
        (current + 1) % len
    } else {
        (current + len - 1) % len
    }
}

/// 等待稳定的调用表达式
pub(crate) fn wait_for_stability_expression(timeout: Duration) -> String {
    format!(
        "(async () => {{ try {{ await window[Symbol.for(\"alumnium\")].waitForStability({{ timeout: {} }}); return null; }} catch (e) {{ return String(e && e.message || e); }} }})()",
        timeout.as_millis()
    )
}
