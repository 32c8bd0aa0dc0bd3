//! ChromiumDriver：直接通过 CDP 驱动一个页面 target
//!
//! 元素解析：普通节点用 `DOM.resolveNode(backendNodeId)`，同源 iframe 内的节点同属一个渲染进程，可直接解析；
//! 跨域 iframe 的合成节点附着到对应 iframe target，在其中按选择器 + nth 或角色 + 名称查找。
//! 点击、悬停、拖拽用 `DOM.getContentQuads` 求中心点后派发鼠标事件；合成节点退回到页内脚本。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::accessibility::{ElementDescriptor, LocatorHint, Platform, RawTree};
use crate::drivers::cdp::{check_exception, CdpTransport};
use crate::drivers::{
    cycle_index, frames, wait_for_stability_expression, Driver, DriverError, DriverOptions, Element,
    TreeSlot, WAITER_SCRIPT,
};
use crate::tools::{Key, ToolKind};

const NEW_TAB_POLL: Duration = Duration::from_millis(50);

const TAG_NAME_FN: &str = "function() { return this.tagName ? this.tagName.toLowerCase() : ''; }";

const CLEAR_FN: &str = r#"function() {
  this.focus();
  if ('value' in this) {
    this.value = '';
    this.dispatchEvent(new Event('input', { bubbles: true }));
  } else if (this.isContentEditable) {
    this.textContent = '';
  }
}"#;

/// 选中 `<select>`（或 `<option>` 所在的 `<select>`）中可见文本匹配的选项；失败时返回原因
pub(crate) const SELECT_OPTION_FN: &str = r#"function(text) {
  const select = this.tagName.toLowerCase() === 'option' ? this.closest('select') : this;
  if (!select || !select.options) return 'Element is not a <select>';
  const wanted = String(text).trim();
  const option = Array.from(select.options).find(o => o.text.trim() === wanted || o.label === wanted || o.value === wanted);
  if (!option) return 'Option not found: ' + wanted;
  select.value = option.value;
  option.selected = true;
  select.dispatchEvent(new Event('input', { bubbles: true }));
  select.dispatchEvent(new Event('change', { bubbles: true }));
  return null;
}"#;

const OPTION_TEXT_FN: &str = "function() { return (this.textContent || '').trim(); }";

const JS_CLICK_FN: &str = "function() { this.scrollIntoView({ block: 'center' }); this.click(); }";

const JS_HOVER_FN: &str = r#"function() {
  for (const type of ['pointerover', 'mouseover', 'mouseenter', 'mousemove']) {
    this.dispatchEvent(new MouseEvent(type, { bubbles: true }));
  }
}"#;

const SCROLL_INTO_VIEW_FN: &str = "function() { this.scrollIntoView({ block: 'center' }); }";

/// 上传：元素本身、内部或关联 label 的 file input，最后退回页面上第一个
const FILE_INPUT_FN: &str = r#"function() {
  if (this.matches && this.matches('input[type=file]')) return this;
  return this.querySelector('input[type=file]')
    || (this.control && this.control.type === 'file' ? this.control : null)
    || document.querySelector('input[type=file]');
}"#;

#[derive(Debug, Clone, PartialEq)]
struct PageTarget {
    target_id: String,
    session_id: String,
}

pub struct ChromiumDriver {
    cdp: Arc<dyn CdpTransport>,
    page: Mutex<PageTarget>,
    /// 跨域 iframe target id -> 已附着的会话
    frame_sessions: Mutex<HashMap<String, String>>,
    tree: TreeSlot,
    options: DriverOptions,
}

impl ChromiumDriver {
    /// 附着到第一个页面 target；没有时新建空白页
    pub async fn attach(cdp: Arc<dyn CdpTransport>, options: DriverOptions) -> Result<Self, DriverError> {
        let pages = page_targets(cdp.as_ref()).await?;
        let target_id = match pages.into_iter().next() {
            Some(target_id) => target_id,
            None => {
                let created = cdp
                    .send("Target.createTarget", json!({"url": "about:blank"}), None)
                    .await?;
                created
                    .get("targetId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DriverError::Transport("Target.createTarget returned no targetId".into()))?
                    .to_string()
            }
        };
        let page = attach_page(cdp.as_ref(), &target_id).await?;
        tracing::debug!(target = %page.target_id, "Attached to page");

        Ok(Self {
            cdp,
            page: Mutex::new(page),
            frame_sessions: Mutex::new(HashMap::new()),
            tree: TreeSlot::default(),
            options,
        })
    }

    fn current_page(&self) -> Result<PageTarget, DriverError> {
        self.page
            .lock()
            .map(|page| page.clone())
            .map_err(|_| DriverError::Transport("page state poisoned".into()))
    }

    /// 替换当前页面，返回被替换的页面
    fn set_page(&self, page: PageTarget) -> Option<PageTarget> {
        self.page
            .lock()
            .ok()
            .map(|mut current| std::mem::replace(&mut *current, page))
    }

    /// 失败只记录；target 可能已经关闭
    async fn detach(&self, session_id: &str) {
        if let Err(e) = self
            .cdp
            .send("Target.detachFromTarget", json!({"sessionId": session_id}), None)
            .await
        {
            tracing::debug!(session = %session_id, error = %e, "Failed to detach session");
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        let page = self.current_page()?;
        self.cdp.send(method, params, Some(&page.session_id)).await
    }

    async fn evaluate(&self, expression: &str, await_promise: bool) -> Result<Value, DriverError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({"expression": expression, "returnByValue": true, "awaitPromise": await_promise}),
            )
            .await?;
        check_exception(&result)?;
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// 注入稳定脚本并等待；导航导致上下文销毁时重试一次
    async fn wait_for_page_to_load(&self) -> Result<(), DriverError> {
        for attempt in 0..2 {
            match self.settle().await {
                Ok(()) => return Ok(()),
                Err(DriverError::ContextDestroyed(message)) if attempt == 0 => {
                    tracing::debug!(%message, "Page context changed while waiting, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn settle(&self) -> Result<(), DriverError> {
        self.evaluate(WAITER_SCRIPT, false).await?;
        let outcome = self
            .evaluate(&wait_for_stability_expression(self.options.page_timeout), true)
            .await?;
        match outcome.as_str() {
            Some(error) => tracing::debug!(%error, "Page did not settle"),
            None => tracing::debug!("Page settled"),
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

    async fn call_on(&self, element: &Element, function: &str, args: &[Value]) -> Result<Value, DriverError> {
        let (object_id, session_id) = cdp_parts(element)?;
        let arguments: Vec<Value> = args.iter().map(|value| json!({"value": value})).collect();
        let params = json!({
            "objectId": object_id,
            "functionDeclaration": function,
            "arguments": arguments,
            "returnByValue": true,
            "awaitPromise": true,
        });
        let result = match session_id {
            Some(session) => self.cdp.send("Runtime.callFunctionOn", params, Some(session)).await?,
            None => self.call("Runtime.callFunctionOn", params).await?,
        };
        check_exception(&result)?;
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    async fn tag_name(&self, element: &Element) -> Result<String, DriverError> {
        Ok(self
            .call_on(element, TAG_NAME_FN, &[])
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// 元素内容区中心点（视口坐标），先滚动到可见
    async fn center(&self, backend_node_id: i64) -> Result<(f64, f64), DriverError> {
        self.call("DOM.scrollIntoViewIfNeeded", json!({"backendNodeId": backend_node_id}))
            .await?;
        let quads = self
            .call("DOM.getContentQuads", json!({"backendNodeId": backend_node_id}))
            .await?;
        let quad: Vec<f64> = quads
            .get("quads")
            .and_then(Value::as_array)
            .and_then(|q| q.first())
            .and_then(Value::as_array)
            .map(|points| points.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        if quad.len() < 8 {
            return Err(DriverError::ElementNotFound(format!(
                "backendNodeId={backend_node_id} is not rendered"
            )));
        }
        let x = (quad[0] + quad[2] + quad[4] + quad[6]) / 4.0;
        let y = (quad[1] + quad[3] + quad[5] + quad[7]) / 4.0;
        Ok((x, y))
    }

    async fn mouse(&self, event: &str, x: f64, y: f64) -> Result<(), DriverError> {
        let mut params = json!({"type": event, "x": x, "y": y});
        if event != "mouseMoved" {
            params["button"] = json!("left");
            params["clickCount"] = json!(1);
        }
        self.call("Input.dispatchMouseEvent", params).await?;
        Ok(())
    }

    async fn click_element(&self, element: &Element) -> Result<(), DriverError> {
        match backend_id(element) {
            Some(backend_node_id) => {
                let (x, y) = self.center(backend_node_id).await?;
                self.mouse("mouseMoved", x, y).await?;
                self.mouse("mousePressed", x, y).await?;
                self.mouse("mouseReleased", x, y).await
            }
            None => self.call_on(element, JS_CLICK_FN, &[]).await.map(|_| ()),
        }
    }

    async fn select_in(&self, element: &Element, option: &str) -> Result<(), DriverError> {
        let outcome = self.call_on(element, SELECT_OPTION_FN, &[json!(option)]).await?;
        match outcome.as_str() {
            Some(reason) => Err(DriverError::ElementNotFound(reason.to_string())),
            None => Ok(()),
        }
    }

    /// 跨域 iframe 的 target 会话；每个 target 只附着一次，已消失的 target 从表中移除
    async fn frame_session(&self, frame_url: Option<&str>) -> Result<String, DriverError> {
        let url = frame_url
            .ok_or_else(|| DriverError::ElementNotFound("synthetic element without frame url".into()))?;
        let targets = self.cdp.send("Target.getTargets", json!({}), None).await?;
        let iframes: Vec<(&str, Option<&str>)> = targets
            .get("targetInfos")
            .and_then(Value::as_array)
            .map(|infos| {
                infos
                    .iter()
                    .filter(|t| t.get("type").and_then(Value::as_str) == Some("iframe"))
                    .filter_map(|t| {
                        let id = t.get("targetId").and_then(Value::as_str)?;
                        Some((id, t.get("url").and_then(Value::as_str)))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let target_id = iframes
            .iter()
            .find(|(_, target_url)| *target_url == Some(url))
            .map(|(id, _)| id.to_string())
            .ok_or_else(|| DriverError::ElementNotFound(format!("no iframe target for {url}")))?;

        let cached = self.frame_sessions.lock().ok().and_then(|mut sessions| {
            sessions.retain(|id, _| iframes.iter().any(|(live, _)| *live == id.as_str()));
            sessions.get(&target_id).cloned()
        });
        if let Some(session) = cached {
            return Ok(session);
        }

        let attached = self
            .cdp
            .send("Target.attachToTarget", json!({"targetId": target_id, "flatten": true}), None)
            .await?;
        let session = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| DriverError::Transport("Target.attachToTarget returned no sessionId".into()))?;
        tracing::debug!(target = %target_id, session = %session, "Attached to iframe target");
        if let Ok(mut sessions) = self.frame_sessions.lock() {
            sessions.insert(target_id, session.clone());
        }
        Ok(session)
    }

    async fn resolve_synthetic(
        &self,
        locator: &LocatorHint,
        frame_url: Option<&str>,
    ) -> Result<Element, DriverError> {
        let session = self.frame_session(frame_url).await?;
        let expression = match locator {
            LocatorHint::Selector { selector, nth } => format!(
                "document.querySelectorAll({})[{nth}] || null",
                json!(selector)
            ),
            LocatorHint::Role { role, name } => format!(
                "Array.from(document.querySelectorAll('[role={role}], {role}')).find(el => (el.getAttribute('aria-label') || el.textContent || '').trim() === {name}) || null",
                role = role.replace(|c: char| !c.is_ascii_alphanumeric(), ""),
                name = json!(name)
            ),
            LocatorHint::Frame { .. } => "document.body".to_string(),
        };
        let result = self
            .cdp
            .send("Runtime.evaluate", json!({"expression": expression}), Some(&session))
            .await?;
        check_exception(&result)?;
        let object_id = result
            .pointer("/result/objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::ElementNotFound(format!("{locator:?} in {frame_url:?}")))?;
        Ok(Element::Cdp {
            object_id: object_id.to_string(),
            backend_node_id: None,
            session_id: Some(session),
        })
    }

    async fn switch_to(&self, target_id: &str) -> Result<(), DriverError> {
        let page = attach_page(self.cdp.as_ref(), target_id).await?;
        self.cdp
            .send("Target.activateTarget", json!({"targetId": target_id}), None)
            .await?;
        if let Some(previous) = self.set_page(page) {
            self.detach(&previous.session_id).await;
        }
        Ok(())
    }

    /// 动作前后比较页面 target；出现新页面时切换到最后一个
    async fn switch_to_new_tab(&self, before: &[String]) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + self.options.new_tab_timeout;
        loop {
            let after = page_targets(self.cdp.as_ref()).await?;
            if let Some(new_tab) = after.iter().filter(|id| !before.contains(id)).last() {
                if *new_tab != self.current_page()?.target_id {
                    self.switch_to(new_tab).await?;
                    tracing::debug!(target = %new_tab, "Auto-switched to new tab");
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
        let pages = page_targets(self.cdp.as_ref()).await?;
        if pages.len() <= 1 {
            return Ok(());
        }
        let current = self.current_page()?.target_id;
        let index = pages.iter().position(|id| *id == current).unwrap_or(0);
        let next = &pages[cycle_index(index, pages.len(), forward)];
        self.switch_to(next).await
    }
}

fn cdp_parts(element: &Element) -> Result<(&str, Option<&str>), DriverError> {
    match element {
        Element::Cdp {
            object_id,
            session_id,
            ..
        } => Ok((object_id, session_id.as_deref())),
        Element::WebDriver { .. } => Err(DriverError::Unsupported(
            "WebDriver element passed to ChromiumDriver".into(),
        )),
    }
}

fn backend_id(element: &Element) -> Option<i64> {
    match element {
        Element::Cdp {
            backend_node_id,
            session_id: None,
            ..
        } => *backend_node_id,
        _ => None,
    }
}

async fn page_targets(cdp: &dyn CdpTransport) -> Result<Vec<String>, DriverError> {
    let targets = cdp.send("Target.getTargets", json!({}), None).await?;
    Ok(targets
        .get("targetInfos")
        .and_then(Value::as_array)
        .map(|infos| {
            infos
                .iter()
                .filter(|t| t.get("type").and_then(Value::as_str) == Some("page"))
                .filter_map(|t| t.get("targetId").and_then(Value::as_str).map(String::from))
                .collect()
        })
        .unwrap_or_default())
}

async fn attach_page(cdp: &dyn CdpTransport, target_id: &str) -> Result<PageTarget, DriverError> {
    let attached = cdp
        .send("Target.attachToTarget", json!({"targetId": target_id, "flatten": true}), None)
        .await?;
    let session_id = attached
        .get("sessionId")
        .and_then(Value::as_str)
        .ok_or_else(|| DriverError::Transport("Target.attachToTarget returned no sessionId".into()))?
        .to_string();
    for domain in ["Page.enable", "DOM.enable"] {
        cdp.send(domain, json!({}), Some(&session_id)).await?;
    }
    Ok(PageTarget {
        target_id: target_id.to_string(),
        session_id,
    })
}

/// `Input.dispatchKeyEvent` 参数：key / code / windowsVirtualKeyCode / text
fn key_event(key: Key) -> (&'static str, i64, Option<&'static str>) {
    match key {
        Key::Backspace => ("Backspace", 8, None),
        Key::Enter => ("Enter", 13, Some("\r")),
        Key::Escape => ("Escape", 27, None),
        Key::Tab => ("Tab", 9, None),
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    fn platform(&self) -> Platform {
        Platform::Chromium
    }

    fn supported_tools(&self) -> Vec<ToolKind> {
        ToolKind::ALL.to_vec()
    }

    async fn accessibility_tree(&self) -> Result<RawTree, DriverError> {
        self.wait_for_page_to_load().await?;
        let page = self.current_page()?;
        let snapshot = frames::collect_nodes(self.cdp.as_ref(), Some(&page.session_id)).await?;
        let tree = RawTree::from_chromium(&snapshot)?;
        self.tree.store(&tree);
        Ok(tree)
    }

    async fn click(&self, id: u32) -> Result<(), DriverError> {
        let element = self.find_element(id).await?;
        // 模型经常直接点击 <option>
        if self.tag_name(&element).await? == "option" {
            let text = self.call_on(&element, OPTION_TEXT_FN, &[]).await?;
            return self
                .select_in(&element, text.as_str().unwrap_or_default())
                .await;
        }
        let before = page_targets(self.cdp.as_ref()).await?;
        self.click_element(&element).await?;
        self.switch_to_new_tab(&before).await
    }

    async fn type_text(&self, id: u32, text: &str) -> Result<(), DriverError> {
        let element = self.find_element(id).await?;
        self.call_on(&element, CLEAR_FN, &[]).await?;
        let params = json!({"text": text});
        match &element {
            Element::Cdp {
                session_id: Some(session),
                ..
            } => self.cdp.send("Input.insertText", params, Some(session)).await?,
            _ => self.call("Input.insertText", params).await?,
        };
        Ok(())
    }

    async fn select(&self, id: u32, option: &str) -> Result<(), DriverError> {
        let element = self.find_element(id).await?;
        self.select_in(&element, option).await
    }

    async fn hover(&self, id: u32) -> Result<(), DriverError> {
        let element = self.find_element(id).await?;
        match backend_id(&element) {
            Some(backend_node_id) => {
                let (x, y) = self.center(backend_node_id).await?;
                self.mouse("mouseMoved", x, y).await
            }
            None => self.call_on(&element, JS_HOVER_FN, &[]).await.map(|_| ()),
        }
    }

    async fn press_key(&self, key: Key) -> Result<(), DriverError> {
        let before = page_targets(self.cdp.as_ref()).await?;
        let (name, code, text) = key_event(key);
        let mut down = json!({
            "type": "keyDown",
            "key": name,
            "code": name,
            "windowsVirtualKeyCode": code,
        });
        if let Some(text) = text {
            down["text"] = json!(text);
        }
        self.call("Input.dispatchKeyEvent", down).await?;
        self.call(
            "Input.dispatchKeyEvent",
            json!({"type": "keyUp", "key": name, "code": name, "windowsVirtualKeyCode": code}),
        )
        .await?;
        self.switch_to_new_tab(&before).await
    }

    async fn drag_and_drop(&self, from_id: u32, to_id: u32) -> Result<(), DriverError> {
        let from = self.find_element(from_id).await?;
        let to = self.find_element(to_id).await?;
        let (Some(from_backend), Some(to_backend)) = (backend_id(&from), backend_id(&to)) else {
            return Err(DriverError::Unsupported(
                "drag and drop inside cross-origin iframes".into(),
            ));
        };
        let (fx, fy) = self.center(from_backend).await?;
        let (tx, ty) = self.center(to_backend).await?;
        self.mouse("mouseMoved", fx, fy).await?;
        self.mouse("mousePressed", fx, fy).await?;
        for step in 1..=5 {
            let t = f64::from(step) / 5.0;
            self.mouse("mouseMoved", fx + (tx - fx) * t, fy + (ty - fy) * t)
                .await?;
        }
        self.mouse("mouseReleased", tx, ty).await
    }

    async fn upload(&self, id: u32, paths: &[String]) -> Result<(), DriverError> {
        let element = self.find_element(id).await?;
        let (object_id, session_id) = cdp_parts(&element)?;
        let params = json!({
            "objectId": object_id,
            "functionDeclaration": FILE_INPUT_FN,
            "returnByValue": false,
        });
        let result = match session_id {
            Some(session) => self.cdp.send("Runtime.callFunctionOn", params, Some(session)).await?,
            None => self.call("Runtime.callFunctionOn", params).await?,
        };
        check_exception(&result)?;
        let input = result
            .pointer("/result/objectId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::ElementNotFound("no file input for upload".into()))?;
        let params = json!({"files": paths, "objectId": input});
        match session_id {
            Some(session) => self.cdp.send("DOM.setFileInputFiles", params, Some(session)).await?,
            None => self.call("DOM.setFileInputFiles", params).await?,
        };
        Ok(())
    }

    async fn back(&self) -> Result<(), DriverError> {
        let history = self.call("Page.getNavigationHistory", json!({})).await?;
        let index = history
            .get("currentIndex")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;
        if index == 0 {
            return Ok(());
        }
        let entry_id = history
            .get("entries")
            .and_then(Value::as_array)
            .and_then(|entries| entries.get(index - 1))
            .and_then(|entry| entry.get("id"))
            .cloned()
            .ok_or_else(|| DriverError::Transport("navigation history entry missing".into()))?;
        self.call("Page.navigateToHistoryEntry", json!({"entryId": entry_id}))
            .await?;
        Ok(())
    }

    async fn visit(&self, url: &str) -> Result<(), DriverError> {
        let result = self.call("Page.navigate", json!({"url": url})).await?;
        match result.get("errorText").and_then(Value::as_str) {
            Some(error) if !error.is_empty() => Err(DriverError::Transport(format!("{url}: {error}"))),
            _ => Ok(()),
        }
    }

    async fn screenshot(&self) -> Result<String, DriverError> {
        let result = self
            .call("Page.captureScreenshot", json!({"format": "png"}))
            .await?;
        result
            .get("data")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| DriverError::Transport("screenshot returned no data".into()))
    }

    async fn title(&self) -> Result<String, DriverError> {
        Ok(self
            .evaluate("document.title", false)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn url(&self) -> Result<String, DriverError> {
        Ok(self
            .evaluate("location.href", false)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn execute_script(&self, script: &str) -> Result<Value, DriverError> {
        self.evaluate(&format!("(async () => {{ {script} }})()"), true)
            .await
    }

    async fn find_element(&self, id: u32) -> Result<Element, DriverError> {
        match self.descriptor(id).await? {
            ElementDescriptor::Chromium {
                backend_node_id, ..
            } => {
                let resolved = self
                    .call("DOM.resolveNode", json!({"backendNodeId": backend_node_id}))
                    .await?;
                let object_id = resolved
                    .pointer("/object/objectId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        DriverError::ElementNotFound(format!("backendNodeId={backend_node_id}"))
                    })?;
                Ok(Element::Cdp {
                    object_id: object_id.to_string(),
                    backend_node_id: Some(backend_node_id),
                    session_id: None,
                })
            }
            ElementDescriptor::Synthetic {
                locator, frame_url, ..
            } => self.resolve_synthetic(&locator, frame_url.as_deref()).await,
            other => Err(DriverError::Unsupported(format!(
                "{other:?} on Chromium"
            ))),
        }
    }

    async fn scroll_to(&self, id: u32) -> Result<(), DriverError> {
        let element = self.find_element(id).await?;
        match backend_id(&element) {
            Some(backend_node_id) => {
                self.call("DOM.scrollIntoViewIfNeeded", json!({"backendNodeId": backend_node_id}))
                    .await?;
                Ok(())
            }
            None => self.call_on(&element, SCROLL_INTO_VIEW_FN, &[]).await.map(|_| ()),
        }
    }

    async fn switch_to_next_tab(&self) -> Result<(), DriverError> {
        self.cycle_tab(true).await
    }

    async fn switch_to_previous_tab(&self) -> Result<(), DriverError> {
        self.cycle_tab(false).await
    }

    async fn quit(&self) -> Result<(), DriverError> {
        let frame_sessions: Vec<String> = self
            .frame_sessions
            .lock()
            .map(|mut sessions| sessions.drain().map(|(_, session)| session).collect())
            .unwrap_or_default();
        for session in frame_sessions {
            self.detach(&session).await;
        }
        let page = self.current_page()?;
        self.detach(&page.session_id).await;
        self.cdp.send("Browser.close", json!({}), None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MockCdpTransport;

    fn targets(ids: &[&str]) -> Value {
        let infos: Vec<Value> = ids
            .iter()
            .map(|id| json!({"targetId": id, "type": "page", "url": "https://app.test/"}))
            .collect();
        json!({"targetInfos": infos})
    }

    fn options() -> DriverOptions {
        DriverOptions {
            new_tab_timeout: Duration::from_millis(0),
            page_timeout: Duration::from_millis(100),
        }
    }

    async fn driver(cdp: Arc<MockCdpTransport>) -> ChromiumDriver {
        cdp.on("Target.getTargets", targets(&["PAGE-1"]));
        cdp.on("Target.attachToTarget", json!({"sessionId": "S1"}));
        cdp.on(
            "Page.getFrameTree",
            json!({"frameTree": {"frame": {"id": "MAIN", "url": "https://app.test/"}}}),
        );
        cdp.on(
            "Accessibility.getFullAXTree",
            json!({"nodes": [
                {"nodeId": "1", "role": {"value": "RootWebArea"}, "childIds": ["2", "3"], "backendDOMNodeId": 1},
                {"nodeId": "2", "parentId": "1", "role": {"value": "button"}, "name": {"value": "Login"}, "backendDOMNodeId": 42},
                {"nodeId": "3", "parentId": "1", "role": {"value": "option"}, "name": {"value": "Blue"}, "backendDOMNodeId": 43}
            ]}),
        );
        cdp.on("DOM.resolveNode", json!({"object": {"objectId": "obj"}}));
        cdp.on("DOM.getContentQuads", json!({"quads": [[0, 0, 10, 0, 10, 20, 0, 20]]}));
        ChromiumDriver::attach(cdp, options()).await.unwrap()
    }

    #[tokio::test]
    async fn test_attach_enables_domains_on_page_session() {
        let cdp = Arc::new(MockCdpTransport::new());
        let _driver = driver(cdp.clone()).await;
        let attach = cdp.calls_to("Target.attachToTarget");
        assert_eq!(attach[0].params["targetId"], "PAGE-1");
        assert_eq!(cdp.calls_to("Page.enable")[0].session_id.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn test_click_dispatches_mouse_at_center() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        driver.accessibility_tree().await.unwrap();
        cdp.push("Runtime.callFunctionOn", Ok(json!({"result": {"value": "button"}})));

        driver.click(2).await.unwrap();

        let resolve = cdp.calls_to("DOM.resolveNode");
        assert_eq!(resolve[0].params["backendNodeId"], 42);
        let mouse = cdp.calls_to("Input.dispatchMouseEvent");
        assert_eq!(mouse.len(), 3);
        assert_eq!(mouse[1].params["type"], "mousePressed");
        assert_eq!(mouse[1].params["x"], 5.0);
        assert_eq!(mouse[1].params["y"], 10.0);
    }

    #[tokio::test]
    async fn test_click_on_option_selects_through_parent() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        driver.accessibility_tree().await.unwrap();
        cdp.push("Runtime.callFunctionOn", Ok(json!({"result": {"value": "option"}})));
        cdp.push("Runtime.callFunctionOn", Ok(json!({"result": {"value": "Blue"}})));
        cdp.push("Runtime.callFunctionOn", Ok(json!({"result": {"type": "object", "subtype": "null", "value": null}})));

        driver.click(3).await.unwrap();

        let calls = cdp.calls_to("Runtime.callFunctionOn");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].params["arguments"][0]["value"], "Blue");
        assert!(cdp.calls_to("Input.dispatchMouseEvent").is_empty());
    }

    #[tokio::test]
    async fn test_click_switches_to_new_tab() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        driver.accessibility_tree().await.unwrap();
        cdp.push("Runtime.callFunctionOn", Ok(json!({"result": {"value": "a"}})));
        cdp.push("Target.getTargets", Ok(targets(&["PAGE-1"])));
        cdp.push("Target.getTargets", Ok(targets(&["PAGE-1", "PAGE-2"])));
        cdp.push("Target.attachToTarget", Ok(json!({"sessionId": "S2"})));

        driver.click(2).await.unwrap();

        let activate = cdp.calls_to("Target.activateTarget");
        assert_eq!(activate[0].params["targetId"], "PAGE-2");
        let detach = cdp.calls_to("Target.detachFromTarget");
        assert_eq!(detach.len(), 1);
        assert_eq!(detach[0].params["sessionId"], "S1");
        driver.visit("https://app.test/next").await.unwrap();
        let navigate = cdp.calls_to("Page.navigate");
        assert_eq!(navigate[0].session_id.as_deref(), Some("S2"));
    }

    fn with_iframe_target(cdp: &MockCdpTransport, iframe: Option<&str>) {
        let mut infos = vec![json!({"targetId": "PAGE-1", "type": "page", "url": "https://app.test/"})];
        if let Some(id) = iframe {
            infos.push(json!({"targetId": id, "type": "iframe", "url": "https://pay.test/"}));
        }
        cdp.on("Target.getTargets", json!({"targetInfos": infos}));
    }

    #[tokio::test]
    async fn test_synthetic_elements_share_frame_session() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        with_iframe_target(&cdp, Some("OOPIF"));
        cdp.push("Target.attachToTarget", Ok(json!({"sessionId": "S-FRAME"})));
        cdp.on("Runtime.evaluate", json!({"result": {"objectId": "remote-1"}}));

        let pay = LocatorHint::Selector {
            selector: "button".into(),
            nth: 0,
        };
        let email = LocatorHint::Role {
            role: "textbox".into(),
            name: "Email".into(),
        };
        let first = driver
            .resolve_synthetic(&pay, Some("https://pay.test/"))
            .await
            .unwrap();
        let second = driver
            .resolve_synthetic(&email, Some("https://pay.test/"))
            .await
            .unwrap();

        // 页面一次 + iframe 一次
        assert_eq!(cdp.calls_to("Target.attachToTarget").len(), 2);
        for element in [first, second] {
            let Element::Cdp { session_id, .. } = element else {
                panic!("expected CDP element");
            };
            assert_eq!(session_id.as_deref(), Some("S-FRAME"));
        }
    }

    #[tokio::test]
    async fn test_frame_session_reattaches_after_target_is_gone() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        with_iframe_target(&cdp, Some("OOPIF-1"));
        cdp.push("Target.attachToTarget", Ok(json!({"sessionId": "S-FRAME-1"})));
        assert_eq!(driver.frame_session(Some("https://pay.test/")).await.unwrap(), "S-FRAME-1");

        // iframe 重新加载后是新的 target
        with_iframe_target(&cdp, Some("OOPIF-2"));
        cdp.push("Target.attachToTarget", Ok(json!({"sessionId": "S-FRAME-2"})));
        assert_eq!(driver.frame_session(Some("https://pay.test/")).await.unwrap(), "S-FRAME-2");
        assert_eq!(driver.frame_sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quit_detaches_sessions() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        with_iframe_target(&cdp, Some("OOPIF"));
        cdp.push("Target.attachToTarget", Ok(json!({"sessionId": "S-FRAME"})));
        driver.frame_session(Some("https://pay.test/")).await.unwrap();

        driver.quit().await.unwrap();

        let mut detached: Vec<String> = cdp
            .calls_to("Target.detachFromTarget")
            .iter()
            .map(|call| call.params["sessionId"].as_str().unwrap().to_string())
            .collect();
        detached.sort();
        assert_eq!(detached, vec!["S-FRAME", "S1"]);
        assert_eq!(cdp.calls_to("Browser.close").len(), 1);
    }

    #[tokio::test]
    async fn test_press_enter_sends_carriage_return() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        driver.press_key(Key::Enter).await.unwrap();
        let keys = cdp.calls_to("Input.dispatchKeyEvent");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].params["windowsVirtualKeyCode"], 13);
        assert_eq!(keys[0].params["text"], "\r");
        assert_eq!(keys[1].params["type"], "keyUp");
    }

    #[tokio::test]
    async fn test_settle_retries_after_context_destroyed() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        cdp.push(
            "Runtime.evaluate",
            Err(DriverError::ContextDestroyed("Execution context was destroyed.".into())),
        );
        driver.accessibility_tree().await.unwrap();
        // 第一次注入失败，重试时注入 + 等待
        assert_eq!(cdp.calls_to("Runtime.evaluate").len(), 3);
    }

    #[tokio::test]
    async fn test_back_uses_previous_history_entry() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        cdp.on(
            "Page.getNavigationHistory",
            json!({"currentIndex": 1, "entries": [{"id": 7}, {"id": 9}]}),
        );
        driver.back().await.unwrap();
        assert_eq!(cdp.calls_to("Page.navigateToHistoryEntry")[0].params["entryId"], 7);
    }

    #[tokio::test]
    async fn test_tab_cycle_wraps() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        cdp.on("Target.getTargets", targets(&["PAGE-1", "PAGE-2"]));
        driver.switch_to_previous_tab().await.unwrap();
        assert_eq!(cdp.calls_to("Target.activateTarget")[0].params["targetId"], "PAGE-2");
    }

    #[tokio::test]
    async fn test_execute_script_surfaces_exceptions() {
        let cdp = Arc::new(MockCdpTransport::new());
        let driver = driver(cdp.clone()).await;
        cdp.push(
            "Runtime.evaluate",
            Ok(json!({"exceptionDetails": {"text": "Uncaught", "exception": {"description": "Error: boom"}}})),
        );
        let err = driver.execute_script("throw new Error('boom')").await.unwrap_err();
        assert_eq!(err, DriverError::Script("Error: boom".into()));
    }
}
