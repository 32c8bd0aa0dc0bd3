//! SeleniumDriver：W3C WebDriver 执行动作，`goog/cdp/execute` 抓取无障碍树
//!
//! 元素解析需要从 backendDOMNodeId 得到 WebDriver 元素引用：先沿 frame 链逐层切入 iframe，
//! 再通过 CDP 给目标节点临时设置 `data-alumnium-id` 属性，用 CSS 选择器找到后移除属性。
//! 解析后保持在元素所在 frame，紧接着的动作作用于同一 frame；下次抓取快照前回到顶层文档。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::accessibility::{ElementDescriptor, LocatorHint, Platform, RawTree};
use crate::drivers::cdp::CdpTransport;
use crate::drivers::chromium::SELECT_OPTION_FN;
use crate::drivers::webdriver::{element_arg, element_ref, key_codepoint, WebDriverClient};
use crate::drivers::{
    cycle_index, frames, wait_for_stability_expression, Driver, DriverError, DriverOptions, Element,
    TreeSlot, WAITER_SCRIPT,
};
use crate::tools::{Key, ToolKind};

const NEW_TAB_POLL: Duration = Duration::from_millis(50);
const ELEMENT_MARKER: &str = "data-alumnium-id";
const IFRAME_MARKER: &str = "data-alumnium-iframe-id";

const ROLE_QUERY_SCRIPT: &str = r#"const [role, name] = arguments;
return Array.from(document.querySelectorAll(`[role=${role}], ${role}`))
  .find(el => (el.getAttribute('aria-label') || el.textContent || '').trim() === name) || null;"#;

/// chromedriver 的 CDP 透传；没有独立会话
pub struct WebDriverCdp {
    client: WebDriverClient,
}

impl WebDriverCdp {
    pub fn new(client: WebDriverClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CdpTransport for WebDriverCdp {
    async fn send(
        &self,
        method: &str,
        params: Value,
        _session_id: Option<&str>,
    ) -> Result<Value, DriverError> {
        self.client.cdp(method, params).await
    }

    fn supports_sessions(&self) -> bool {
        false
    }
}

pub struct SeleniumDriver {
    client: WebDriverClient,
    cdp: WebDriverCdp,
    tree: TreeSlot,
    options: DriverOptions,
}

impl SeleniumDriver {
    pub fn new(client: WebDriverClient, options: DriverOptions) -> Self {
        Self {
            cdp: WebDriverCdp::new(client.clone()),
            client,
            tree: TreeSlot::default(),
            options,
        }
    }

    pub fn client(&self) -> &WebDriverClient {
        &self.client
    }

    /// 注入稳定脚本并等待；脚本异常（通常是导航中）重试一次
    async fn wait_for_page_to_load(&self) -> Result<(), DriverError> {
        tracing::debug!("Waiting for page to finish loading");
        for attempt in 0..2 {
            match self.settle().await {
                Ok(()) => return Ok(()),
                Err(DriverError::Script(message) | DriverError::ContextDestroyed(message))
                    if attempt == 0 =>
                {
                    tracing::debug!(%message, "Page script failed while waiting, retrying");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn settle(&self) -> Result<(), DriverError> {
        self.client.execute(WAITER_SCRIPT, vec![]).await?;
        let expression = wait_for_stability_expression(self.options.page_timeout);
        let outcome = self
            .client
            .execute(&format!("return {expression};"), vec![])
            .await?;
        match outcome.as_str() {
            Some(error) => tracing::debug!(%error, "Page did not settle"),
            None => tracing::debug!("Page finished loading"),
        }
        Ok(())
    }

    /// CDP 框架树之外的跨域 iframe：沿 frame 链切入 iframe 执行页内查询，生成合成节点
    async fn cross_origin_nodes(
        &self,
        known: &HashSet<&str>,
        owners: &frames::FrameOwners,
    ) -> Result<Vec<Value>, DriverError> {
        let iframes = frames::iframe_targets(&self.cdp, known).await?;
        let script = format!(
            "return {};",
            frames::INTERACTIVE_QUERY_SCRIPT
                .replace("__LIMIT__", &frames::MAX_ELEMENTS_PER_SELECTOR.to_string())
        );
        let mut nodes = Vec::new();
        let mut next_id = -1i64;
        for iframe in iframes {
            let chain = frames::cross_origin_chain(&self.cdp, None, &iframe, owners).await;
            if chain.is_empty() {
                self.client.switch_to_frame(None).await?;
                let Ok(element) = self
                    .client
                    .find_element("css selector", &iframe_selector(&iframe.url))
                    .await
                else {
                    tracing::debug!(url = %iframe.url, "Cross-origin iframe element not found");
                    continue;
                };
                self.client.switch_to_frame(Some(&element)).await?;
            } else if let Err(e) = self.switch_to_frame_chain(&chain).await {
                tracing::debug!(url = %iframe.url, error = %e, "Cannot switch into cross-origin iframe");
                self.client.switch_to_frame(None).await?;
                continue;
            }
            let items = self.client.execute(&script, vec![]).await;
            self.client.switch_to_frame(None).await?;
            let items = items?.as_array().cloned().unwrap_or_default();
            nodes.extend(frames::synthetic_nodes(&items, &iframe.url, &chain, &mut next_id));
        }
        Ok(nodes)
    }

    async fn descriptor(&self, id: u32) -> Result<ElementDescriptor, DriverError> {
        if let Some(descriptor) = self.tree.descriptor(id)? {
            return Ok(descriptor);
        }
        let tree = self.accessibility_tree().await?;
        Ok(tree.element_by_id(id)?)
    }

    /// 通过临时属性把 backendNodeId 转成当前 frame 内的 WebDriver 元素
    async fn mark_and_find(&self, backend_node_id: i64, marker: &str) -> Result<String, DriverError> {
        self.cdp
            .send("DOM.getDocument", json!({"depth": -1, "pierce": true}), None)
            .await?;
        let pushed = self
            .cdp
            .send(
                "DOM.pushNodesByBackendIdsToFrontend",
                json!({"backendNodeIds": [backend_node_id]}),
                None,
            )
            .await?;
        let node_id = pushed
            .get("nodeIds")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_i64)
            .filter(|id| *id != 0)
            .ok_or_else(|| DriverError::ElementNotFound(format!("backendNodeId={backend_node_id}")))?;
        self.cdp
            .send(
                "DOM.setAttributeValue",
                json!({"nodeId": node_id, "name": marker, "value": backend_node_id.to_string()}),
                None,
            )
            .await?;
        let found = self
            .client
            .find_element("css selector", &format!("[{marker}='{backend_node_id}']"))
            .await;
        let _ = self
            .cdp
            .send("DOM.removeAttribute", json!({"nodeId": node_id, "name": marker}), None)
            .await;
        found
    }

    async fn switch_to_frame_chain(&self, chain: &[i64]) -> Result<(), DriverError> {
        self.client.switch_to_frame(None).await?;
        for iframe in chain {
            let element = self.mark_and_find(*iframe, IFRAME_MARKER).await?;
            self.client.switch_to_frame(Some(&element)).await?;
            tracing::debug!(backend_node_id = iframe, "Switched to iframe");
        }
        Ok(())
    }

    async fn element_id(&self, id: u32) -> Result<String, DriverError> {
        let element = self.find_element(id).await?;
        element
            .webdriver_id()
            .map(String::from)
            .ok_or_else(|| DriverError::ElementNotFound(format!("raw_id={id}")))
    }

    /// 动作前后比较窗口句柄；出现新窗口时切换到最后一个
    async fn switch_to_new_tab(&self, before: &[String]) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + self.options.new_tab_timeout;
        loop {
            let after = self.client.window_handles().await?;
            if let Some(handle) = after.iter().filter(|h| !before.contains(h)).last() {
                if *handle != self.client.window_handle().await? {
                    self.client.switch_to_window(handle).await?;
                    tracing::debug!(%handle, "Auto-switched to new tab");
                }
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(());
            }
            tokio::time::sleep(NEW_TAB_POLL).await;
        }
    }

    async fn cycle_tab(&self, forward: bool) -> Result<(), DriverError> {
        let handles = self.client.window_handles().await?;
        if handles.len() <= 1 {
            return Ok(());
        }
        let current = self.client.window_handle().await?;
        let index = handles.iter().position(|h| *h == current).unwrap_or(0);
        self.client
            .switch_to_window(&handles[cycle_index(index, handles.len(), forward)])
            .await
    }

    async fn select_option(&self, element: &str, option: &str) -> Result<(), DriverError> {
        let script = format!("return ({SELECT_OPTION_FN}).call(arguments[0], arguments[1]);");
        let outcome = self
            .client
            .execute(&script, vec![element_arg(element), json!(option)])
            .await?;
        match outcome.as_str() {
            Some(reason) => Err(DriverError::ElementNotFound(reason.to_string())),
            None => Ok(()),
        }
    }
}

fn iframe_selector(url: &str) -> String {
    format!("iframe[src='{}']", url.replace('\'', "\\'"))
}

fn pointer_move(element: &str) -> Value {
    json!({"type": "pointerMove", "duration": 100, "origin": element_arg(element), "x": 0, "y": 0})
}

#[async_trait]
impl Driver for SeleniumDriver {
    fn platform(&self) -> Platform {
        Platform::Chromium
    }

    fn supported_tools(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|kind| *kind != ToolKind::ExecuteJavascript)
            .collect()
    }

    async fn accessibility_tree(&self) -> Result<RawTree, DriverError> {
        self.client.switch_to_frame(None).await?;
        self.wait_for_page_to_load().await?;

        let mut snapshot = frames::collect_nodes(&self.cdp, None).await?;
        let frame_tree = self.cdp.send("Page.getFrameTree", json!({}), None).await?;
        let known_frames = frames::flatten_frame_tree(frame_tree.get("frameTree").unwrap_or(&Value::Null));
        let known: HashSet<&str> = known_frames.iter().map(|f| f.id.as_str()).collect();
        let owners = frames::FrameOwners::collect(&self.cdp, None, &known_frames).await;
        match self.cross_origin_nodes(&known, &owners).await {
            Ok(extra) => {
                if let Some(Value::Array(nodes)) = snapshot.get_mut("nodes") {
                    nodes.extend(extra);
                }
            }
            Err(e) => tracing::debug!(error = %e, "Cross-origin frame enumeration failed"),
        }

        let tree = RawTree::from_chromium(&snapshot)?;
        self.tree.store(&tree);
        Ok(tree)
    }

    async fn click(&self, id: u32) -> Result<(), DriverError> {
        let element = self.element_id(id).await?;
        if self.client.tag_name(&element).await? == "option" {
            let text = self
                .client
                .execute("return arguments[0].text.trim();", vec![element_arg(&element)])
                .await?;
            return self
                .select_option(&element, text.as_str().unwrap_or_default())
                .await;
        }
        let before = self.client.window_handles().await?;
        self.client.click(&element).await?;
        self.switch_to_new_tab(&before).await
    }

    async fn type_text(&self, id: u32, text: &str) -> Result<(), DriverError> {
        let element = self.element_id(id).await?;
        self.client.clear(&element).await?;
        self.client.send_keys(&element, text).await
    }

    async fn select(&self, id: u32, option: &str) -> Result<(), DriverError> {
        let element = self.element_id(id).await?;
        self.select_option(&element, option).await
    }

    async fn hover(&self, id: u32) -> Result<(), DriverError> {
        let element = self.element_id(id).await?;
        self.client
            .perform_actions(json!([{
                "type": "pointer",
                "id": "mouse",
                "parameters": {"pointerType": "mouse"},
                "actions": [pointer_move(&element)],
            }]))
            .await
    }

    async fn press_key(&self, key: Key) -> Result<(), DriverError> {
        let before = self.client.window_handles().await?;
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
            .await?;
        self.switch_to_new_tab(&before).await
    }

    async fn drag_and_drop(&self, from_id: u32, to_id: u32) -> Result<(), DriverError> {
        let from = self.element_id(from_id).await?;
        let to = self.element_id(to_id).await?;
        self.client
            .perform_actions(json!([{
                "type": "pointer",
                "id": "mouse",
                "parameters": {"pointerType": "mouse"},
                "actions": [
                    pointer_move(&from),
                    {"type": "pointerDown", "button": 0},
                    pointer_move(&to),
                    {"type": "pointerUp", "button": 0},
                ],
            }]))
            .await
    }

    async fn upload(&self, id: u32, paths: &[String]) -> Result<(), DriverError> {
        let element = self.element_id(id).await?;
        self.client.send_keys(&element, &paths.join("\n")).await
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
        self.client.title().await
    }

    async fn url(&self) -> Result<String, DriverError> {
        self.client.current_url().await
    }

    async fn execute_script(&self, script: &str) -> Result<Value, DriverError> {
        self.client.execute(script, vec![]).await
    }

    async fn find_element(&self, id: u32) -> Result<Element, DriverError> {
        let element_id = match self.descriptor(id).await? {
            ElementDescriptor::Chromium {
                backend_node_id,
                frame_chain,
            } => {
                self.switch_to_frame_chain(&frame_chain).await?;
                self.mark_and_find(backend_node_id, ELEMENT_MARKER).await?
            }
            ElementDescriptor::Synthetic {
                locator,
                frame_url,
                frame_chain,
                ..
            } => {
                self.switch_to_frame_chain(&frame_chain).await?;
                if frame_chain.is_empty() {
                    if let Some(url) = &frame_url {
                        let iframe = self
                            .client
                            .find_element("css selector", &iframe_selector(url))
                            .await?;
                        self.client.switch_to_frame(Some(&iframe)).await?;
                    }
                }
                match locator {
                    LocatorHint::Selector { selector, nth } => self
                        .client
                        .find_elements("css selector", &selector)
                        .await?
                        .into_iter()
                        .nth(nth as usize)
                        .ok_or_else(|| DriverError::ElementNotFound(format!("{selector} [{nth}]")))?,
                    LocatorHint::Role { role, name } => {
                        let found = self
                            .client
                            .execute(ROLE_QUERY_SCRIPT, vec![json!(role), json!(name)])
                            .await?;
                        element_ref(&found)
                            .ok_or_else(|| DriverError::ElementNotFound(format!("{role} \"{name}\"")))?
                    }
                    LocatorHint::Frame { .. } => self.client.find_element("css selector", "body").await?,
                }
            }
            other => {
                return Err(DriverError::Unsupported(format!("{other:?} on Selenium")));
            }
        };
        Ok(Element::WebDriver { element_id })
    }

    async fn scroll_to(&self, id: u32) -> Result<(), DriverError> {
        let element = self.element_id(id).await?;
        self.client
            .execute("arguments[0].scrollIntoView();", vec![element_arg(&element)])
            .await
            .map(|_| ())
    }

    async fn switch_to_next_tab(&self) -> Result<(), DriverError> {
        self.cycle_tab(true).await
    }

    async fn switch_to_previous_tab(&self) -> Result<(), DriverError> {
        self.cycle_tab(false).await
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.client.delete_session().await
    }
}
