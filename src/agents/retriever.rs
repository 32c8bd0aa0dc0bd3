//! Retriever：从页面中取出信息或判定陈述真假
//!
//! 结构化输出 `{explanation, value}`；列表以 `<SEP>` 分隔，缺失信息为 `NOOP`。
//! 带截图时不再附带无障碍树文本。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::base::structured;
use crate::agents::{AgentCore, AgentKind};
use crate::core::AlumniumError;
use crate::llm::{ChatRequest, LlmClient, Message, OutputSchema, Provider, Usage};

pub const LIST_SEPARATOR: &str = "<SEP>";

/// Retrieved information.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetrievedInformation {
    /// Explanation how information was retrieved and why it's related to the requested information. Always include the requested information and its value in the explanation.
    pub explanation: String,
    /// The precise retrieved information value without additional data. If the information is not present in context, reply NOOP.
    pub value: String,
}

/// 原始取值：单个字符串或列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrievedValue {
    Single(String),
    List(Vec<String>),
}

impl RetrievedValue {
    /// 去掉首尾多余分隔符后按分隔符拆分
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        let value = value.strip_prefix(LIST_SEPARATOR).unwrap_or(value);
        let value = value.strip_suffix(LIST_SEPARATOR).unwrap_or(value).trim();
        if value.contains(LIST_SEPARATOR) {
            RetrievedValue::List(
                value
                    .split(LIST_SEPARATOR)
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect(),
            )
        } else {
            RetrievedValue::Single(value.to_string())
        }
    }
}

/// 页面上下文
#[derive(Debug, Clone, Default)]
pub struct PageContext<'a> {
    pub title: &'a str,
    pub url: &'a str,
    /// base64 PNG
    pub screenshot: Option<&'a str>,
}

pub struct RetrieverAgent {
    core: AgentCore,
}

impl RetrieverAgent {
    pub fn new(llm: Arc<dyn LlmClient>, provider: Provider) -> Self {
        Self {
            core: AgentCore::new(AgentKind::Retriever, llm, provider),
        }
    }

    pub fn usage(&self) -> Usage {
        self.core.usage()
    }

    pub async fn invoke(
        &self,
        information: &str,
        accessibility_tree_xml: &str,
        page: PageContext<'_>,
    ) -> Result<(String, RetrievedValue), AlumniumError> {
        tracing::info!("Starting retrieval:");
        tracing::info!("  -> Information: {}", information);
        tracing::debug!("  -> Accessibility tree: {}", accessibility_tree_xml);
        tracing::debug!("  -> Title: {}", page.title);
        tracing::debug!("  -> URL: {}", page.url);

        let prompts = self.core.prompts();
        let mut prompt = String::new();
        if page.screenshot.is_none() {
            prompt.push_str(&prompts.render(
                "_user_text",
                &[
                    ("accessibility_tree", accessibility_tree_xml),
                    ("title", page.title),
                    ("url", page.url),
                ],
            ));
        }
        prompt.push('\n');
        prompt.push_str(information);

        let mut user = Message::user(prompt);
        if let Some(screenshot) = page.screenshot {
            user = user.with_image(screenshot);
        }
        let messages = vec![
            Message::system(prompts.render("system", &[("separator", LIST_SEPARATOR)])),
            user,
        ];
        let request = ChatRequest::new(AgentKind::Retriever, messages).with_output_schema(
            OutputSchema::of::<RetrievedInformation>(
                "RetrievedInformation",
                "Retrieved information.",
            ),
        );
        let response = self.core.invoke(request).await?;
        let info: RetrievedInformation = structured(AgentKind::Retriever, &response)?;
        tracing::info!("  <- Result: {:?}", info);

        Ok((info.explanation, RetrievedValue::parse(&info.value)))
    }
}
