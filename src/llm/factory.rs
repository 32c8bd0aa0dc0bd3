//! 按 Model 创建 LLM 客户端（外层包 RetryingLlmClient）
//!
//! 凭据读取各 provider 的常用环境变量；AWS Bedrock 需要 SigV4 签名，暂不支持。

use std::sync::Arc;

use crate::llm::deepseek::DEEPSEEK_BASE_URL;
use crate::llm::openai::{GITHUB_BASE_URL, GOOGLE_BASE_URL, MISTRAL_BASE_URL, OLLAMA_DEFAULT_URL};
use crate::llm::{
    AnthropicClient, LlmClient, LlmError, Model, OpenAiClient, Provider, RetryingLlmClient,
};

const AZURE_DEFAULT_API_VERSION: &str = "2024-10-21";

fn env_key(name: &str) -> Result<String, LlmError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LlmError::MissingCredentials(name.to_string()))
}

/// 未包重试的原始客户端
pub fn create_raw_llm(model: &Model) -> Result<Arc<dyn LlmClient>, LlmError> {
    let name = model.name.as_str();
    let client: Arc<dyn LlmClient> = match model.provider {
        Provider::Openai => {
            let key = env_key("OPENAI_API_KEY")?;
            let base = std::env::var("OPENAI_BASE_URL").ok();
            Arc::new(OpenAiClient::for_provider(
                Provider::Openai,
                base.as_deref(),
                name,
                Some(&key),
            ))
        }
        Provider::AzureOpenai => {
            let key = env_key("AZURE_OPENAI_API_KEY")?;
            let endpoint = env_key("AZURE_OPENAI_ENDPOINT")?;
            let version = std::env::var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|_| AZURE_DEFAULT_API_VERSION.to_string());
            Arc::new(OpenAiClient::azure(&endpoint, &version, name, &key))
        }
        Provider::Anthropic => Arc::new(AnthropicClient::new(
            None,
            name,
            &env_key("ANTHROPIC_API_KEY")?,
        )),
        Provider::Deepseek => Arc::new(OpenAiClient::for_provider(
            Provider::Deepseek,
            Some(DEEPSEEK_BASE_URL),
            name,
            Some(&env_key("DEEPSEEK_API_KEY")?),
        )),
        Provider::Github => Arc::new(OpenAiClient::for_provider(
            Provider::Github,
            Some(GITHUB_BASE_URL),
            name,
            Some(&env_key("GITHUB_TOKEN")?),
        )),
        Provider::Google => Arc::new(OpenAiClient::for_provider(
            Provider::Google,
            Some(GOOGLE_BASE_URL),
            name,
            Some(&env_key("GOOGLE_API_KEY")?),
        )),
        Provider::Mistralai => Arc::new(OpenAiClient::for_provider(
            Provider::Mistralai,
            Some(MISTRAL_BASE_URL),
            name,
            Some(&env_key("MISTRAL_API_KEY")?),
        )),
        Provider::Ollama => {
            let url = std::env::var("OLLAMA_URL").unwrap_or_else(|_| OLLAMA_DEFAULT_URL.to_string());
            let base = format!("{}/v1", url.trim_end_matches('/'));
            Arc::new(OpenAiClient::for_provider(
                Provider::Ollama,
                Some(&base),
                name,
                Some("ollama"),
            ))
        }
        Provider::AwsAnthropic | Provider::AwsMeta => {
            return Err(LlmError::UnsupportedProvider(model.provider.to_string()))
        }
    };
    tracing::debug!(model = %model, "LLM client created");
    Ok(client)
}

/// 带限流重试的客户端
pub fn create_llm(model: &Model) -> Result<Arc<dyn LlmClient>, LlmError> {
    Ok(Arc::new(RetryingLlmClient::new(create_raw_llm(model)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_needs_no_key() {
        let model = Model::new(Provider::Ollama, None);
        let client = create_llm(&model).unwrap();
        assert_eq!(client.llm_string(), "ollama/mistral-small3.1?temperature=0");
    }

    #[test]
    fn test_bedrock_unsupported() {
        let model = Model::new(Provider::AwsMeta, None);
        assert!(matches!(
            create_llm(&model),
            Err(LlmError::UnsupportedProvider(_))
        ));
    }
}
