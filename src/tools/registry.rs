//! 工具注册表
//!
//! 所有工具实现 Tool trait（名称 / 描述 / 参数 schema / 执行），由 ToolRegistry 按名注册与查找。
//! 注册表按名字有序保存，导出的 schema 列表顺序稳定，缓存键不会因此抖动。

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::schema::{
    function_schema, parameters_schema, DragAndDropArgs, ElementArgs, ExecuteJavascriptArgs,
    NavigateToUrlArgs, NoArgs, PressKeyArgs, SelectArgs, TypeArgs, UploadArgs, WaitArgs,
};
use super::ToolKind;
use crate::core::AlumniumError;
use crate::drivers::Driver;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、对驱动执行（args 中的 id 已是 raw id）
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn description(&self) -> &'static str;

    fn parameters_schema(&self) -> Value;

    async fn execute(&self, driver: &dyn Driver, args: Value) -> Result<(), AlumniumError>;
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, AlumniumError> {
    serde_json::from_value(args)
        .map_err(|e| AlumniumError::InvalidToolCall(format!("{tool}: {e}")))
}

macro_rules! simple_tool {
    ($tool:ident, $kind:expr, $description:expr, |$driver:ident, $args:ident: $args_ty:ty| $body:expr) => {
        pub struct $tool;

        #[async_trait]
        impl Tool for $tool {
            fn kind(&self) -> ToolKind {
                $kind
            }

            fn description(&self) -> &'static str {
                $description
            }

            fn parameters_schema(&self) -> Value {
                parameters_schema::<$args_ty>()
            }

            async fn execute(&self, $driver: &dyn Driver, args: Value) -> Result<(), AlumniumError> {
                let $args: $args_ty = parse_args(self.name(), args)?;
                $body.await.map_err(AlumniumError::from)
            }
        }
    };
}

simple_tool!(
    ClickTool,
    ToolKind::Click,
    "Click an element. NEVER open comboboxes with ClickTool - use SelectTool instead. NEVER use ClickTool to upload files - use UploadTool instead.",
    |driver, args: ElementArgs| driver.click(args.id)
);

simple_tool!(
    TypeTool,
    ToolKind::Type,
    "Type text into an element.",
    |driver, args: TypeArgs| driver.type_text(args.id, &args.text)
);

simple_tool!(
    SelectTool,
    ToolKind::Select,
    "Selects an option in a dropdown. Only use this tool if the dropdown is a combobox.",
    |driver, args: SelectArgs| driver.select(args.id, &args.option)
);

simple_tool!(
    HoverTool,
    ToolKind::Hover,
    "Hover over an element.",
    |driver, args: ElementArgs| driver.hover(args.id)
);

simple_tool!(
    PressKeyTool,
    ToolKind::PressKey,
    "Press a keyboard key.",
    |driver, args: PressKeyArgs| driver.press_key(args.key)
);

simple_tool!(
    DragAndDropTool,
    ToolKind::DragAndDrop,
    "Drag one element onto another and drop it. Don't combine with HoverTool.",
    |driver, args: DragAndDropArgs| driver.drag_and_drop(args.from_id, args.to_id)
);

simple_tool!(
    ScrollTool,
    ToolKind::Scroll,
    "Scroll an element into view.",
    |driver, args: ElementArgs| driver.scroll_to(args.id)
);

simple_tool!(
    NavigateBackTool,
    ToolKind::NavigateBack,
    "Navigate back to the previous page/screen using the browser/app history.",
    |driver, _args: NoArgs| driver.back()
);

simple_tool!(
    NavigateToUrlTool,
    ToolKind::NavigateToUrl,
    "Navigate to or open the URL.",
    |driver, args: NavigateToUrlArgs| driver.visit(&args.url)
);

simple_tool!(
    SwitchToNextTabTool,
    ToolKind::SwitchToNextTab,
    "Switch to the next browser tab/window. If on the last tab, wraps around to the first tab.",
    |driver, _args: NoArgs| driver.switch_to_next_tab()
);

simple_tool!(
    SwitchToPreviousTabTool,
    ToolKind::SwitchToPreviousTab,
    "Switch to the previous browser tab/window. If on the first tab, wraps around to the last tab.",
    |driver, _args: NoArgs| driver.switch_to_previous_tab()
);

/// 上传：模型常给路径加引号或多余的反斜杠转义
pub struct UploadTool;

#[async_trait]
impl Tool for UploadTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Upload
    }

    fn description(&self) -> &'static str {
        "Upload one or more files using a button that opens a file chooser. \
         This tool automatically clicks the button, DO NOT use ClickTool for that."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<UploadArgs>()
    }

    async fn execute(&self, driver: &dyn Driver, args: Value) -> Result<(), AlumniumError> {
        let args: UploadArgs = parse_args(self.name(), args)?;
        let paths: Vec<String> = args.paths.iter().map(|p| normalize_upload_path(p)).collect();
        driver.upload(args.id, &paths).await?;
        Ok(())
    }
}

pub fn normalize_upload_path(path: &str) -> String {
    static ESCAPED_SLASH: OnceLock<Option<Regex>> = OnceLock::new();
    let trimmed = path.trim().trim_matches(|c| c == '"' || c == '\'');
    match ESCAPED_SLASH.get_or_init(|| Regex::new(r"\\+/").ok()) {
        Some(re) => re.replace_all(trimmed, "/").into_owned(),
        None => trimmed.to_string(),
    }
}

pub struct ExecuteJavascriptTool;

#[async_trait]
impl Tool for ExecuteJavascriptTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ExecuteJavascript
    }

    fn description(&self) -> &'static str {
        "Execute JavaScript code in the context of the current page."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ExecuteJavascriptArgs>()
    }

    async fn execute(&self, driver: &dyn Driver, args: Value) -> Result<(), AlumniumError> {
        let args: ExecuteJavascriptArgs = parse_args(self.name(), args)?;
        let result = driver.execute_script(&args.script).await?;
        tracing::debug!(result = %result, "Executed script");
        Ok(())
    }
}

/// 等待固定秒数，限制在 1–30 秒
pub struct WaitTool;

impl WaitTool {
    pub const MIN_SECONDS: f64 = 1.0;
    pub const MAX_SECONDS: f64 = 30.0;
}

#[async_trait]
impl Tool for WaitTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Wait
    }

    fn description(&self) -> &'static str {
        "Wait for the given number of seconds before continuing. Use when the page needs time to update."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<WaitArgs>()
    }

    async fn execute(&self, driver: &dyn Driver, args: Value) -> Result<(), AlumniumError> {
        let args: WaitArgs = parse_args(self.name(), args)?;
        let seconds = if args.seconds.is_finite() {
            args.seconds.clamp(Self::MIN_SECONDS, Self::MAX_SECONDS)
        } else {
            Self::MIN_SECONDS
        };
        driver.wait(seconds).await?;
        Ok(())
    }
}

pub fn tool_for(kind: ToolKind) -> Arc<dyn Tool> {
    match kind {
        ToolKind::Click => Arc::new(ClickTool),
        ToolKind::Type => Arc::new(TypeTool),
        ToolKind::Select => Arc::new(SelectTool),
        ToolKind::Hover => Arc::new(HoverTool),
        ToolKind::PressKey => Arc::new(PressKeyTool),
        ToolKind::DragAndDrop => Arc::new(DragAndDropTool),
        ToolKind::Upload => Arc::new(UploadTool),
        ToolKind::Scroll => Arc::new(ScrollTool),
        ToolKind::NavigateBack => Arc::new(NavigateBackTool),
        ToolKind::NavigateToUrl => Arc::new(NavigateToUrlTool),
        ToolKind::ExecuteJavascript => Arc::new(ExecuteJavascriptTool),
        ToolKind::SwitchToNextTab => Arc::new(SwitchToNextTabTool),
        ToolKind::SwitchToPreviousTab => Arc::new(SwitchToPreviousTabTool),
        ToolKind::Wait => Arc::new(WaitTool),
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 驱动支持的工具子集
    pub fn for_kinds(kinds: &[ToolKind]) -> Self {
        let mut registry = Self::new();
        for kind in kinds {
            registry.register_arc(tool_for(*kind));
        }
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub async fn execute(
        &self,
        driver: &dyn Driver,
        name: &str,
        args: Value,
    ) -> Result<(), AlumniumError> {
        let tool = self
            .get(name)
            .ok_or_else(|| AlumniumError::UnsupportedTool(name.to_string()))?;
        tool.execute(driver, args).await
    }

    /// OpenAI function 格式的 schema 列表，供 Actor 绑定
    pub fn schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| function_schema(tool.name(), tool.description(), tool.parameters_schema()))
            .collect()
    }
}
