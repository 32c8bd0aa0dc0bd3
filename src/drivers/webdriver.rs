//! W3C WebDriver HTTP 客户端
//!
//! Selenium（chromedriver / Grid）与 Appium 共用。每个命令都是 `{base}/session/{id}/...` 上的
//! 一次 JSON 请求，响应统一包在 `{"value": ...}` 中，错误为 `{"value": {"error", "message"}}`。

use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::drivers::DriverError;
use crate::tools::Key;

/// W3C 元素引用的键
pub const ELEMENT_KEY: &str = "element-6066-11e4-a4f2-ed1a6d21d0d0";

#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: Client,
    base_url: String,
    session_id: String,
    capabilities: Value,
}

impl WebDriverClient {
    /// 新建会话；`capabilities` 作为 `alwaysMatch` 发送
    pub async fn new_session(
        base_url: &str,
        capabilities: Value,
        timeout: Duration,
    ) -> Result<Self, DriverError> {
        let http = http_client(timeout)?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let body = json!({"capabilities": {"alwaysMatch": capabilities}});
        let value = send(&http, Method::POST, &format!("{base_url}/session"), Some(body)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Transport("new session response without sessionId".into()))?
            .to_string();
        let capabilities = value.get("capabilities").cloned().unwrap_or(Value::Null);
        tracing::info!(session = %session_id, "WebDriver session created");

        Ok(Self {
            http,
            base_url,
            session_id,
            capabilities,
        })
    }

    /// 附着到已有会话
    pub fn attach(
        base_url: &str,
        session_id: &str,
        capabilities: Value,
        timeout: Duration,
    ) -> Result<Self, DriverError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
            capabilities,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn capabilities(&self) -> &Value {
        &self.capabilities
    }

    /// 读取能力值，兼容 `appium:` 前缀
    pub fn capability(&self, name: &str) -> Option<&Value> {
        self.capabilities
            .get(name)
            .or_else(|| self.capabilities.get(format!("appium:{name}")))
    }

    /// 会话内命令；`path` 以 `/` 开头，相对 `/session/{id}`
    pub async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        tracing::trace!(%method, path, "WebDriver command");
        send(&self.http, method, &url, body).await
    }

    pub async fn find_element(&self, using: &str, value: &str) -> Result<String, DriverError> {
        let found = self
            .command(
                Method::POST,
                "/element",
                Some(json!({"using": using, "value": value})),
            )
            .await?;
        element_id(&found)
    }

    pub async fn find_elements(&self, using: &str, value: &str) -> Result<Vec<String>, DriverError> {
        let found = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({"using": using, "value": value})),
            )
            .await?;
        Ok(found
            .as_array()
            .map(|items| items.iter().filter_map(|item| element_id(item).ok()).collect())
            .unwrap_or_default())
    }

    pub async fn click(&self, element: &str) -> Result<(), DriverError> {
        self.command(Method::POST, &format!("/element/{element}/click"), Some(json!({})))
            .await
            .map(|_| ())
    }

    pub async fn clear(&self, element: &str) -> Result<(), DriverError> {
        self.command(Method::POST, &format!("/element/{element}/clear"), Some(json!({})))
            .await
            .map(|_| ())
    }

    pub async fn send_keys(&self, element: &str, text: &str) -> Result<(), DriverError> {
        self.command(
            Method::POST,
            &format!("/element/{element}/value"),
            Some(json!({"text": text})),
        )
        .await
        .map(|_| ())
    }

    pub async fn tag_name(&self, element: &str) -> Result<String, DriverError> {
        let value = self
            .command(Method::GET, &format!("/element/{element}/name"), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_lowercase())
    }

    /// `{x, y, width, height}`
    pub async fn element_rect(&self, element: &str) -> Result<Value, DriverError> {
        self.command(Method::GET, &format!("/element/{element}/rect"), None)
            .await
    }

    /// 同步脚本；`args` 中的元素用 [`element_arg`] 构造
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({"script": script, "args": args})),
        )
        .await
    }

    /// 异步脚本：最后一个参数是回调
    pub async fn execute_async(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        self.command(
            Method::POST,
            "/execute/async",
            Some(json!({"script": script, "args": args})),
        )
        .await
    }

    pub async fn perform_actions(&self, actions: Value) -> Result<(), DriverError> {
        self.command(Method::POST, "/actions", Some(json!({"actions": actions})))
            .await?;
        let _ = self.command(Method::DELETE, "/actions", None).await;
        Ok(())
    }

    pub async fn back(&self) -> Result<(), DriverError> {
        self.command(Method::POST, "/back", Some(json!({}))).await.map(|_| ())
    }

    pub async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.command(Method::POST, "/url", Some(json!({"url": url})))
            .await
            .map(|_| ())
    }

    pub async fn title(&self) -> Result<String, DriverError> {
        string_value(self.command(Method::GET, "/title", None).await?)
    }

    pub async fn current_url(&self) -> Result<String, DriverError> {
        string_value(self.command(Method::GET, "/url", None).await?)
    }

    /// base64 PNG
    pub async fn screenshot(&self) -> Result<String, DriverError> {
        string_value(self.command(Method::GET, "/screenshot", None).await?)
    }

    pub async fn page_source(&self) -> Result<String, DriverError> {
        string_value(self.command(Method::GET, "/source", None).await?)
    }

    pub async fn window_handle(&self) -> Result<String, DriverError> {
        string_value(self.command(Method::GET, "/window", None).await?)
    }

    pub async fn window_handles(&self) -> Result<Vec<String>, DriverError> {
        let handles = self.command(Method::GET, "/window/handles", None).await?;
        Ok(string_list(&handles))
    }

    pub async fn switch_to_window(&self, handle: &str) -> Result<(), DriverError> {
        self.command(Method::POST, "/window", Some(json!({"handle": handle})))
            .await
            .map(|_| ())
    }

    /// `None` 回到顶层文档
    pub async fn switch_to_frame(&self, element: Option<&str>) -> Result<(), DriverError> {
        let id = element.map_or(Value::Null, element_arg);
        self.command(Method::POST, "/frame", Some(json!({"id": id})))
            .await
            .map(|_| ())
    }

    /// chromedriver 的 CDP 透传
    pub async fn cdp(&self, cmd: &str, params: Value) -> Result<Value, DriverError> {
        self.command(
            Method::POST,
            "/goog/cdp/execute",
            Some(json!({"cmd": cmd, "params": params})),
        )
        .await
    }

    pub async fn delete_session(&self) -> Result<(), DriverError> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        send(&self.http, Method::DELETE, &url, None).await.map(|_| ())
    }

    // Appium 扩展

    pub async fn contexts(&self) -> Result<Vec<String>, DriverError> {
        let contexts = self.command(Method::GET, "/contexts", None).await?;
        Ok(string_list(&contexts))
    }

    pub async fn context(&self) -> Result<String, DriverError> {
        string_value(self.command(Method::GET, "/context", None).await?)
    }

    pub async fn set_context(&self, name: &str) -> Result<(), DriverError> {
        self.command(Method::POST, "/context", Some(json!({"name": name})))
            .await
            .map(|_| ())
    }

    pub async fn is_keyboard_shown(&self) -> Result<bool, DriverError> {
        let shown = self
            .command(Method::GET, "/appium/device/is_keyboard_shown", None)
            .await?;
        Ok(shown.as_bool().unwrap_or(false))
    }

    pub async fn hide_keyboard(&self) -> Result<(), DriverError> {
        self.command(Method::POST, "/appium/device/hide_keyboard", Some(json!({})))
            .await
            .map(|_| ())
    }
}

/// 元素引用参数
pub fn element_arg(element: &str) -> Value {
    json!({ ELEMENT_KEY: element })
}

/// W3C 按键码位
pub fn key_codepoint(key: Key) -> &'static str {
    match key {
        Key::Backspace => "\u{E003}",
        Key::Enter => "\u{E007}",
        Key::Escape => "\u{E00C}",
        Key::Tab => "\u{E004}",
    }
}

/// 脚本或查找结果中的元素引用
pub fn element_ref(value: &Value) -> Option<String> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)
        .map(String::from)
}

fn element_id(value: &Value) -> Result<String, DriverError> {
    element_ref(value)
        .ok_or_else(|| DriverError::ElementNotFound(format!("not an element reference: {value}")))
}

fn string_value(value: Value) -> Result<String, DriverError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Err(DriverError::Transport(format!("expected string, got {other}"))),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

fn http_client(timeout: Duration) -> Result<Client, DriverError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DriverError::Transport(e.to_string()))
}

async fn send(
    http: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, DriverError> {
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            DriverError::Timeout(format!("{url}: {e}"))
        } else {
            DriverError::Transport(format!("{url}: {e}"))
        }
    })?;
    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| DriverError::Transport(format!("{url}: invalid response body: {e}")))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }
    Err(command_error(&value, status.as_u16()))
}

fn command_error(value: &Value, status: u16) -> DriverError {
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match error.as_str() {
        "javascript error" => DriverError::Script(message),
        "timeout" | "script timeout" => DriverError::Timeout(message),
        _ => {
            tracing::debug!(status, %error, "WebDriver command failed");
            DriverError::WebDriver { error, message }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn session(server: &MockServer) -> WebDriverClient {
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": {"sessionId": "abc", "capabilities": {"browserName": "chrome", "appium:automationName": "XCUITest"}}
            })))
            .mount(server)
            .await;
        WebDriverClient::new_session(&server.uri(), json!({"browserName": "chrome"}), Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_session_reads_capabilities() {
        let server = MockServer::start().await;
        let client = session(&server).await;
        assert_eq!(client.session_id(), "abc");
        assert_eq!(client.capability("browserName"), Some(&json!("chrome")));
        assert_eq!(client.capability("automationName"), Some(&json!("XCUITest")));
    }

    #[tokio::test]
    async fn test_find_element_parses_reference() {
        let server = MockServer::start().await;
        let client = session(&server).await;
        Mock::given(method("POST"))
            .and(path("/session/abc/element"))
            .and(body_json(json!({"using": "css selector", "value": "#login"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": {ELEMENT_KEY: "el-1"}})))
            .mount(&server)
            .await;

        assert_eq!(client.find_element("css selector", "#login").await.unwrap(), "el-1");
    }

    #[tokio::test]
    async fn test_error_body_is_mapped() {
        let server = MockServer::start().await;
        let client = session(&server).await;
        Mock::given(method("POST"))
            .and(path("/session/abc/element"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": {"error": "no such element", "message": "Unable to locate element"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/abc/execute/sync"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "value": {"error": "javascript error", "message": "boom"}
            })))
            .mount(&server)
            .await;

        let err = client.find_element("css selector", "#missing").await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, DriverError::WebDriver { ref error, .. } if error == "no such element"));
        let err = client.execute("throw 1", vec![]).await.unwrap_err();
        assert_eq!(err, DriverError::Script("boom".into()));
    }

    #[tokio::test]
    async fn test_cdp_passthrough_body() {
        let server = MockServer::start().await;
        let client = session(&server).await;
        Mock::given(method("POST"))
            .and(path("/session/abc/goog/cdp/execute"))
            .and(body_json(json!({"cmd": "Page.getFrameTree", "params": {}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": {"frameTree": {}}})))
            .expect(1)
            .mount(&server)
            .await;

        let value = client.cdp("Page.getFrameTree", json!({})).await.unwrap();
        assert_eq!(value, json!({"frameTree": {}}));
    }

    #[tokio::test]
    async fn test_switch_to_default_frame_sends_null() {
        let server = MockServer::start().await;
        let client = session(&server).await;
        Mock::given(method("POST"))
            .and(path("/session/abc/frame"))
            .and(body_json(json!({"id": null})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
            .expect(1)
            .mount(&server)
            .await;

        client.switch_to_frame(None).await.unwrap();
    }
}
