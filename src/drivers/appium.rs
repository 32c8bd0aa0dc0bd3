//! AppiumDriver：iOS（XCUITest）与 Android（UIAutomator2）
//!
//! 快照取自 page source；元素在 iOS 上用谓词、在 Android 上用 XPath 重新查找。
//! 原生操作前切回 NATIVE_APP，标题 / URL / 脚本切到第一个 WEBVIEW 上下文。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::accessibility::{ElementDescriptor, Platform, RawTree};
use crate::drivers::webdriver::{element_arg, key_codepoint, WebDriverClient};
use crate::drivers::{Driver, DriverError, Element, TreeSlot};
use crate::tools::{Key, ToolKind};

const NATIVE_APP: &str = "NATIVE_APP";
const WEBVIEW: &str = "WEBVIEW";

#[derive(Debug, Clone, PartialEq)]
pub struct AppiumOptions {
    pub autoswitch_contexts: bool,
    /// 抓取 page source 前的等待
    pub delay: Duration,
    /// 部分云平台首次返回过期的 page source
    pub double_fetch_page_source: bool,
    pub hide_keyboard_after_typing: bool,
}

impl Default for AppiumOptions {
    fn default() -> Self {
        Self {
            autoswitch_contexts: true,
            delay: Duration::ZERO,
            double_fetch_page_source: false,
            hide_keyboard_after_typing: false,
        }
    }
}

pub struct AppiumDriver {
    client: WebDriverClient,
    platform: Platform,
    tree: TreeSlot,
    options: AppiumOptions,
}

impl AppiumDriver {
    /// 平台取自 `automationName` 能力：UiAutomator2 为 Android，其余按 XCUITest 处理
    pub fn new(client: WebDriverClient, options: AppiumOptions) -> Self {
        let platform = match client
            .capability("automationName")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("uiautomator2") => Platform::Uiautomator2,
            _ => Platform::Xcuitest,
        };
        Self {
            client,
            platform,
            tree: TreeSlot::default(),
            options,
        }
    }

    pub fn options_mut(&mut self) -> &mut AppiumOptions {
        &mut self.options
    }

    async fn ensure_native_app_context(&self) -> Result<(), DriverError> {
        if !self.options.autoswitch_contexts {
            return Ok(());
        }
        if self.client.context().await? != NATIVE_APP {
            self.client.set_context(NATIVE_APP).await?;
        }
        Ok(())
    }

    async fn ensure_webview_context(&self) -> Result<(), DriverError> {
        if !self.options.autoswitch_contexts {
            return Ok(());
        }
        if self.client.context().await?.contains(WEBVIEW) {
            return Ok(());
        }
        let contexts = self.client.contexts().await?;
        if let Some(webview) = contexts.iter().find(|c| c.contains(WEBVIEW)) {
            self.client.set_context(webview).await?;
        }
        Ok(())
    }

    async fn descriptor(&self, id: u32) -> Result<ElementDescriptor, DriverError> {
        if let Some(descriptor) = self.tree.descriptor(id)? {
            return Ok(descriptor);
        }
        let tree = self.accessibility_tree().await?;
        Ok(tree.element_by_id(id)?)
    }

    async fn element_id(&self, id: u32) -> Result<String, DriverError> {
        let element = self.find_element(id).await?;
        element
            .webdriver_id()
            .map(String::from)
            .ok_or_else(|| DriverError::ElementNotFound(format!("raw_id={id}")))
    }

    async fn hide_keyboard(&self) -> Result<(), DriverError> {
        if self.platform == Platform::Uiautomator2 {
            return self.client.hide_keyboard().await;
        }
        // iOS：点击键盘左上角
        let keyboard = self
            .client
            .find_element("-ios predicate string", "type == \"XCUIElementTypeKeyboard\"")
            .await?;
        let rect = self.client.element_rect(&keyboard).await?;
        let x = rect.get("x").and_then(Value::as_f64).unwrap_or_default();
        let y = rect.get("y").and_then(Value::as_f64).unwrap_or_default();
        self.client
            .perform_actions(json!([{
                "type": "pointer",
                "id": "finger",
                "parameters": {"pointerType": "touch"},
                "actions": [
                    {"type": "pointerMove", "duration": 0, "origin": "viewport", "x": x.ceil() as i64, "y": y.ceil() as i64},
                    {"type": "pointerDown", "button": 0},
                    {"type": "pointerUp", "button": 0},
                ],
            }]))
            .await
    }

    /// WebView 外调用 title / url 时 Appium 返回 unknown method
    fn empty_if_unknown(result: Result<String, DriverError>) -> Result<String, DriverError> {
        match result {
            Err(DriverError::WebDriver { error, .. })
                if error == "unknown method" || error == "unknown command" =>
            {
                Ok(String::new())
            }
            other => other,
        }
    }
}

#[async_trait]
impl Driver for AppiumDriver {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn supported_tools(&self) -> Vec<ToolKind> {
        let mut tools = vec![
            ToolKind::Click,
            ToolKind::DragAndDrop,
            ToolKind::NavigateToUrl,
            ToolKind::PressKey,
            ToolKind::Type,
            ToolKind::Wait,
        ];
        if self.platform == Platform::Xcuitest {
            tools.push(ToolKind::Scroll);
        }
        tools
    }

    async fn accessibility_tree(&self) -> Result<RawTree, DriverError> {
        self.ensure_native_app_context().await?;
        if !self.options.delay.is_zero() {
            tokio::time::sleep(self.options.delay).await;
        }
        if self.options.double_fetch_page_source {
            let _ = self.client.page_source().await?;
        }
        let source = self.client.page_source().await?;
        let tree = RawTree::from_mobile_xml(self.platform, &source)?;
        self.tree.store(&tree);
        Ok(tree)
    }

    async fn click(&self, id: u32) -> Result<(), DriverError> {
        self.ensure_native_app_context().await?;
        let element = self.element_id(id).await?;
        self.client.click(&element).await
    }

    async fn type_text(&self, id: u32, text: &str) -> Result<(), DriverError> {
        self.ensure_native_app_context().await?;
        let element = self.element_id(id).await?;
        self.client.clear(&element).await?;
        self.client.send_keys(&element, text).await?;
        if self.options.hide_keyboard_after_typing && self.client.is_keyboard_shown().await? {
            self.hide_keyboard().await?;
        }
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<(), DriverError> {
        self.ensure_native_app_context().await?;
        let value = key_codepoint(key);
        self.client
            .perform_actions(json!([{
                "type": "key",
                "id": "keyboard",
                "actions": [
                    {"type": "keyDown", "value": value},
                    {"type": "keyUp", "value": value},
                ],
            }]))
            .await
    }

    async fn drag_and_drop(&self, from_id: u32, to_id: u32) -> Result<(), DriverError> {
        self.ensure_native_app_context().await?;
        let from = self.element_id(from_id).await?;
        let to = self.element_id(to_id).await?;
        self.client
            .perform_actions(json!([{
                "type": "pointer",
                "id": "finger",
                "parameters": {"pointerType": "touch"},
                "actions": [
                    {"type": "pointerMove", "duration": 0, "origin": element_arg(&from), "x": 0, "y": 0},
                    {"type": "pointerDown", "button": 0},
                    {"type": "pause", "duration": 500},
                    {"type": "pointerMove", "duration": 500, "origin": element_arg(&to), "x": 0, "y": 0},
                    {"type": "pointerUp", "button": 0},
                ],
            }]))
            .await
    }

    async fn back(&self) -> Result<(), DriverError> {
        self.client.back().await
    }

    async fn visit(&self, url: &str) -> Result<(), DriverError> {
        self.client.navigate(url).await
    }

    async fn screenshot(&self) -> Result<String, DriverError> {
        self.client.screenshot().await
    }

    async fn title(&self) -> Result<String, DriverError> {
        self.ensure_webview_context().await?;
        Self::empty_if_unknown(self.client.title().await)
    }

    async fn url(&self) -> Result<String, DriverError> {
        self.ensure_webview_context().await?;
        Self::empty_if_unknown(self.client.current_url().await)
    }

    async fn execute_script(&self, script: &str) -> Result<Value, DriverError> {
        self.ensure_webview_context().await?;
        self.client.execute(script, vec![]).await
    }

    async fn find_element(&self, id: u32) -> Result<Element, DriverError> {
        let descriptor = self.descriptor(id).await?;
        let (using, value) = match self.platform {
            Platform::Xcuitest => ("-ios predicate string", descriptor.ios_predicate()),
            _ => ("xpath", descriptor.android_xpath()),
        };
        let value = value.ok_or_else(|| {
            DriverError::Unsupported(format!("{descriptor:?} on {}", self.platform))
        })?;
        let element_id = self.client.find_element(using, &value).await?;
        Ok(Element::WebDriver { element_id })
    }

    async fn scroll_to(&self, id: u32) -> Result<(), DriverError> {
        if self.platform != Platform::Xcuitest {
            return Err(DriverError::Unsupported(format!(
                "scroll_to on {}",
                self.platform
            )));
        }
        let element = self.element_id(id).await?;
        self.client
            .execute("mobile: scrollToElement", vec![json!({"elementId": element})])
            .await
            .map(|_| ())
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.client.delete_session().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::webdriver::ELEMENT_KEY;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok(value: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"value": value}))
    }

    const IOS_SOURCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AppiumAUT>
  <XCUIElementTypeApplication type="XCUIElementTypeApplication" name="Todo">
    <XCUIElementTypeButton type="XCUIElementTypeButton" name="Add" label="Add item"/>
  </XCUIElementTypeApplication>
</AppiumAUT>"#;

    async fn driver(server: &MockServer, automation: &str) -> AppiumDriver {
        Mock::given(method("GET"))
            .and(path("/session/m1/context"))
            .respond_with(ok(json!("NATIVE_APP")))
            .mount(server)
            .await;
        let client = WebDriverClient::attach(
            &server.uri(),
            "m1",
            json!({"appium:automationName": automation}),
            Duration::from_secs(5),
        )
        .unwrap();
        AppiumDriver::new(client, AppiumOptions::default())
    }

    #[tokio::test]
    async fn test_platform_from_automation_name() {
        let server = MockServer::start().await;
        assert_eq!(driver(&server, "UiAutomator2").await.platform(), Platform::Uiautomator2);
        assert_eq!(driver(&server, "XCUITest").await.platform(), Platform::Xcuitest);
    }

    #[tokio::test]
    async fn test_ios_click_uses_predicate() {
        let server = MockServer::start().await;
        let driver = driver(&server, "XCUITest").await;
        Mock::given(method("GET"))
            .and(path("/session/m1/source"))
            .respond_with(ok(json!(IOS_SOURCE)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/m1/element"))
            .and(body_json(json!({
                "using": "-ios predicate string",
                "value": "type == \"XCUIElementTypeButton\" AND name == \"Add\""
            })))
            .respond_with(ok(json!({ELEMENT_KEY: "btn"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/m1/element/btn/click"))
            .respond_with(ok(Value::Null))
            .expect(1)
            .mount(&server)
            .await;

        let tree = driver.accessibility_tree().await.unwrap();
        let button = tree.roots()[0]
            .find(&|el| el.attr("name") == Some("Add"))
            .and_then(|el| el.attr("raw_id"))
            .and_then(|id| id.parse::<u32>().ok())
            .unwrap();
        driver.click(button).await.unwrap();
    }

    #[tokio::test]
    async fn test_android_scroll_is_unsupported() {
        let server = MockServer::start().await;
        let driver = driver(&server, "UiAutomator2").await;
        assert!(!driver.supported_tools().contains(&ToolKind::Scroll));
        assert!(matches!(driver.scroll_to(1).await, Err(DriverError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_title_switches_to_webview() {
        let server = MockServer::start().await;
        let driver = driver(&server, "XCUITest").await;
        Mock::given(method("GET"))
            .and(path("/session/m1/contexts"))
            .respond_with(ok(json!(["NATIVE_APP", "WEBVIEW_1"])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/m1/context"))
            .and(body_json(json!({"name": "WEBVIEW_1"})))
            .respond_with(ok(Value::Null))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/m1/title"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": {"error": "unknown method", "message": "Method is not implemented"}
            })))
            .mount(&server)
            .await;

        assert_eq!(driver.title().await.unwrap(), "");
    }
}
