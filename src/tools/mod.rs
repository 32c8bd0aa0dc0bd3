//! 工具层：Actor 可调用的原子操作
//!
//! 每个工具声明一次（名称、描述、schemars 生成的参数 schema），由 ToolRegistry 按驱动支持的子集
//! 导出给 Actor；ToolExecutor 把已映射为 raw id 的 ToolCall 分派到驱动并输出审计日志。

pub mod executor;
pub mod registry;
pub mod schema;

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::accessibility::server::ID_FIELDS;

pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use schema::{function_schema, parameters_schema};

/// 工具调用：`{"name": "ClickTool", "args": {"id": 3}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// 参数中引用的元素 id（id / from_id / to_id），无法解析的值被跳过
    pub fn referenced_ids(&self) -> Vec<u32> {
        ID_FIELDS
            .iter()
            .filter_map(|field| self.args.get(*field))
            .filter_map(|value| crate::accessibility::server::parse_id(value).ok())
            .collect()
    }
}

/// 可按键位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Key {
    #[serde(alias = "backspace", alias = "BACKSPACE")]
    Backspace,
    #[serde(alias = "enter", alias = "ENTER", alias = "Return")]
    Enter,
    #[serde(alias = "escape", alias = "ESCAPE", alias = "Esc")]
    Escape,
    #[serde(alias = "tab", alias = "TAB")]
    Tab,
}

impl Key {
    pub fn as_str(&self) -> &'static str {
        match self {
            Key::Backspace => "Backspace",
            Key::Enter => "Enter",
            Key::Escape => "Escape",
            Key::Tab => "Tab",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 全部已知工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolKind {
    Click,
    Type,
    Select,
    Hover,
    PressKey,
    DragAndDrop,
    Upload,
    Scroll,
    NavigateBack,
    NavigateToUrl,
    ExecuteJavascript,
    SwitchToNextTab,
    SwitchToPreviousTab,
    Wait,
}

impl ToolKind {
    pub const ALL: [ToolKind; 14] = [
        ToolKind::Click,
        ToolKind::Type,
        ToolKind::Select,
        ToolKind::Hover,
        ToolKind::PressKey,
        ToolKind::DragAndDrop,
        ToolKind::Upload,
        ToolKind::Scroll,
        ToolKind::NavigateBack,
        ToolKind::NavigateToUrl,
        ToolKind::ExecuteJavascript,
        ToolKind::SwitchToNextTab,
        ToolKind::SwitchToPreviousTab,
        ToolKind::Wait,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Click => "ClickTool",
            ToolKind::Type => "TypeTool",
            ToolKind::Select => "SelectTool",
            ToolKind::Hover => "HoverTool",
            ToolKind::PressKey => "PressKeyTool",
            ToolKind::DragAndDrop => "DragAndDropTool",
            ToolKind::Upload => "UploadTool",
            ToolKind::Scroll => "ScrollTool",
            ToolKind::NavigateBack => "NavigateBackTool",
            ToolKind::NavigateToUrl => "NavigateToUrlTool",
            ToolKind::ExecuteJavascript => "ExecuteJavascriptTool",
            ToolKind::SwitchToNextTab => "SwitchToNextTabTool",
            ToolKind::SwitchToPreviousTab => "SwitchToPreviousTabTool",
            ToolKind::Wait => "WaitTool",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("Unknown tool: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_kind_round_trip_names() {
        for kind in ToolKind::ALL {
            assert_eq!(kind.name().parse::<ToolKind>().unwrap(), kind);
        }
        assert!("ShellTool".parse::<ToolKind>().is_err());
    }

    #[test]
    fn test_referenced_ids() {
        let call = ToolCall::new("DragAndDropTool", json!({"from_id": 3, "to_id": "5"}));
        assert_eq!(call.referenced_ids(), vec![3, 5]);
        let call = ToolCall::new("PressKeyTool", json!({"key": "Enter"}));
        assert!(call.referenced_ids().is_empty());
    }

    #[test]
    fn test_key_aliases() {
        let key: Key = serde_json::from_value(json!("enter")).unwrap();
        assert_eq!(key, Key::Enter);
        let call: ToolCall = serde_json::from_value(json!({"name": "NavigateBackTool"})).unwrap();
        assert_eq!(call.args, json!({}));
    }
}
