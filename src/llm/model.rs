//! 模型选择：provider + 模型名
//!
//! `ALUMNIUM_MODEL=<provider>/<name>`，name 缺省时使用 provider 的默认模型。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::llm::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    AwsAnthropic,
    AwsMeta,
    AzureOpenai,
    Deepseek,
    Github,
    Google,
    Mistralai,
    Ollama,
    Openai,
}

impl Provider {
    pub const ALL: [Provider; 10] = [
        Provider::Anthropic,
        Provider::AwsAnthropic,
        Provider::AwsMeta,
        Provider::AzureOpenai,
        Provider::Deepseek,
        Provider::Github,
        Provider::Google,
        Provider::Mistralai,
        Provider::Ollama,
        Provider::Openai,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::AwsAnthropic => "aws_anthropic",
            Provider::AwsMeta => "aws_meta",
            Provider::AzureOpenai => "azure_openai",
            Provider::Deepseek => "deepseek",
            Provider::Github => "github",
            Provider::Google => "google",
            Provider::Mistralai => "mistralai",
            Provider::Ollama => "ollama",
            Provider::Openai => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-haiku-4-5-20251001",
            Provider::AwsAnthropic => "us.anthropic.claude-haiku-4-5-20251001-v1:0",
            Provider::AwsMeta => "us.meta.llama4-maverick-17b-instruct-v1:0",
            Provider::AzureOpenai => "gpt-4o-mini",
            Provider::Deepseek => "deepseek-chat",
            Provider::Github => "gpt-4o-mini",
            Provider::Google => "gemini-2.0-flash-001",
            Provider::Mistralai => "mistral-medium-2505",
            Provider::Ollama => "mistral-small3.1",
            Provider::Openai => "gpt-4o-mini-2024-07-18",
        }
    }

    /// 提示词集合：Anthropic 系有专用版本，其余回退到 openai
    pub fn prompt_set(&self) -> &'static str {
        match self {
            Provider::Anthropic | Provider::AwsAnthropic => "anthropic",
            _ => "openai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == lowered)
            .ok_or_else(|| LlmError::UnsupportedProvider(s.to_string()))
    }
}

/// 当前会话使用的模型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Model {
    pub provider: Provider,
    pub name: String,
}

impl Model {
    pub fn new(provider: Provider, name: Option<&str>) -> Self {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| provider.default_model());
        Self {
            provider,
            name: name.to_string(),
        }
    }

    /// 解析 `<provider>/<name>`；模型名本身可含 `/`
    pub fn parse(spec: &str) -> Result<Self, LlmError> {
        let spec = spec.trim();
        match spec.split_once('/') {
            Some((provider, name)) => Ok(Self::new(provider.parse()?, Some(name))),
            None => Ok(Self::new(spec.parse()?, None)),
        }
    }

    /// 配置为空时：CI（GITHUB_ACTIONS）用 github，否则 openai
    pub fn from_config(spec: Option<&str>) -> Result<Self, LlmError> {
        match spec.map(str::trim).filter(|s| !s.is_empty()) {
            Some(spec) => Self::parse(spec),
            None if std::env::var("GITHUB_ACTIONS").is_ok() => Ok(Self::new(Provider::Github, None)),
            None => Ok(Self::new(Provider::Openai, None)),
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_name() {
        let model = Model::parse("anthropic/claude-sonnet-4-20250514").unwrap();
        assert_eq!(model.provider, Provider::Anthropic);
        assert_eq!(model.name, "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_parse_default_name() {
        let model = Model::parse("deepseek").unwrap();
        assert_eq!(model.name, "deepseek-chat");
        let model = Model::parse("openai/").unwrap();
        assert_eq!(model.name, "gpt-4o-mini-2024-07-18");
    }

    #[test]
    fn test_parse_keeps_slashes_in_name() {
        let model = Model::parse("ollama/library/mistral-small3.1").unwrap();
        assert_eq!(model.provider, Provider::Ollama);
        assert_eq!(model.name, "library/mistral-small3.1");
    }

    #[test]
    fn test_unknown_provider() {
        assert!(matches!(
            Model::parse("acme/model"),
            Err(LlmError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_prompt_set() {
        assert_eq!(Provider::AwsAnthropic.prompt_set(), "anthropic");
        assert_eq!(Provider::Mistralai.prompt_set(), "openai");
    }

    #[test]
    fn test_display() {
        let model = Model::new(Provider::AzureOpenai, None);
        assert_eq!(model.to_string(), "azure_openai/gpt-4o-mini");
    }
}
