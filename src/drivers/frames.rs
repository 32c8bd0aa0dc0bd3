//! 多 frame 无障碍树聚合
//!
//! 1. `Page.getFrameTree` 枚举所有 frame，`DOM.getFrameOwner` 找到每个子 frame 所属 iframe 的 backendNodeId
//! 2. 逐 frame 调 `Accessibility.getFullAXTree`，子 frame 的节点打上 `_frame_chain`（外层到内层），
//!    根节点再打上 `_parent_iframe_backend_node_id`，规范化时内联到 iframe 元素下
//! 3. CDP frame 树看不到的跨域 iframe（OOPIF）：附着到其 target，用页内查询枚举有限数量的可交互元素，
//!    生成带定位提示的合成节点

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};

use crate::accessibility::raw::{
    ATTR_FRAME_CHAIN, ATTR_FRAME_URL, ATTR_LOCATOR_INFO, ATTR_SYNTHETIC, NODE_PARENT_IFRAME,
};
use crate::drivers::cdp::{check_exception, CdpTransport};
use crate::drivers::DriverError;

/// 每种选择器最多取的元素数
pub const MAX_ELEMENTS_PER_SELECTOR: usize = 20;

/// 跨域 iframe 内执行：返回 `[{selector, nth, role, name}]`
pub const INTERACTIVE_QUERY_SCRIPT: &str = r#"(() => {
  const selectors = [
    ["button", "button"],
    ["a", "link"],
    ["[role='button']", "button"],
    ["[role='link']", "link"],
    ["input[type='submit']", "button"],
    ["input:not([type='hidden'])", "textbox"],
    ["select", "combobox"],
    ["textarea", "textbox"],
    ["[aria-label]", "generic"],
  ];
  const found = [];
  for (const [selector, role] of selectors) {
    const elements = Array.from(document.querySelectorAll(selector)).slice(0, __LIMIT__);
    elements.forEach((el, nth) => {
      const label = el.getAttribute("aria-label");
      const text = (el.textContent || "").trim().slice(0, 50);
      const name = label || text;
      if (name) found.push({ selector, nth, role, name });
    });
  }
  return found;
})()"#;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub id: String,
    pub url: String,
    pub parent: Option<String>,
}

/// frame 树先序展开；第一个为主 frame
pub fn flatten_frame_tree(tree: &Value) -> Vec<FrameInfo> {
    fn visit(node: &Value, parent: Option<&str>, out: &mut Vec<FrameInfo>) {
        let Some(id) = node.pointer("/frame/id").and_then(Value::as_str) else {
            return;
        };
        out.push(FrameInfo {
            id: id.to_string(),
            url: node
                .pointer("/frame/url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parent: parent.map(String::from),
        });
        if let Some(Value::Array(children)) = node.get("childFrames") {
            for child in children {
                visit(child, Some(id), out);
            }
        }
    }

    let mut frames = Vec::new();
    visit(tree, None, &mut frames);
    frames
}

/// 从最外层 iframe 到 frame 自身所属 iframe 的 backendNodeId 链
pub fn frame_chain(
    frame_id: &str,
    owners: &HashMap<String, i64>,
    parents: &HashMap<String, String>,
) -> Vec<i64> {
    let mut chain = Vec::new();
    let mut current = frame_id;
    let mut seen = HashSet::new();
    while let Some(owner) = owners.get(current) {
        if !seen.insert(current) {
            break;
        }
        chain.insert(0, *owner);
        match parents.get(current) {
            Some(parent) => current = parent.as_str(),
            None => break,
        }
    }
    chain
}

/// 页内查询结果 → CDP 形状的合成节点；`next_id` 为负数递减，避免与真实 nodeId 冲突
///
/// `chain` 为从最外层到该跨域 iframe 自身的 iframe 链，最后一项是 iframe 元素；为空时挂在合成容器下
pub fn synthetic_nodes(
    items: &[Value],
    frame_url: &str,
    chain: &[i64],
    next_id: &mut i64,
) -> Vec<Value> {
    let mut nodes = Vec::new();
    for item in items {
        let (Some(selector), Some(nth), Some(role), Some(name)) = (
            item.get("selector").and_then(Value::as_str),
            item.get("nth").and_then(Value::as_u64),
            item.get("role").and_then(Value::as_str),
            item.get("name").and_then(Value::as_str),
        ) else {
            continue;
        };
        nodes.push(json!({
            "nodeId": next_id.to_string(),
            "role": {"value": role},
            "name": {"value": name},
            ATTR_SYNTHETIC: true,
            ATTR_LOCATOR_INFO: {"selector": selector, "nth": nth},
            ATTR_FRAME_URL: frame_url,
            ATTR_FRAME_CHAIN: chain,
        }));
        *next_id -= 1;
    }

    match chain.last().copied() {
        Some(owner) => {
            for node in &mut nodes {
                node[NODE_PARENT_IFRAME] = json!(owner);
            }
        }
        None => {
            // 找不到 iframe 元素时挂在一个合成容器下
            let container_id = next_id.to_string();
            *next_id -= 1;
            let child_ids: Vec<Value> = nodes.iter().map(|n| n["nodeId"].clone()).collect();
            for node in &mut nodes {
                node["parentId"] = json!(container_id);
            }
            nodes.push(json!({
                "nodeId": container_id,
                "role": {"value": "Iframe"},
                "name": {"value": format!("Cross-origin iframe: {}", truncate(frame_url, 80))},
                ATTR_SYNTHETIC: true,
                ATTR_LOCATOR_INFO: {"frame": true},
                ATTR_FRAME_URL: frame_url,
                "childIds": child_ids,
            }));
        }
    }
    nodes
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// 聚合所有 frame 的节点，返回 `{"nodes": [...]}`
pub async fn collect_nodes(
    cdp: &dyn CdpTransport,
    session_id: Option<&str>,
) -> Result<Value, DriverError> {
    let tree = cdp.send("Page.getFrameTree", json!({}), session_id).await?;
    let frames = flatten_frame_tree(tree.get("frameTree").unwrap_or(&Value::Null));
    if frames.is_empty() {
        return Ok(json!({"nodes": []}));
    }
    tracing::debug!(frames = frames.len(), "Enumerated frames");

    if frames.len() > 1 {
        cdp.send("DOM.enable", json!({}), session_id).await?;
    }
    let owners = FrameOwners::collect(cdp, session_id, &frames).await;

    let mut all_nodes = Vec::new();
    for frame in &frames {
        let response = match cdp
            .send("Accessibility.getFullAXTree", json!({"frameId": frame.id}), session_id)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(frame = %frame.id, error = %e, "Frame accessibility tree failed");
                continue;
            }
        };
        let Some(Value::Array(nodes)) = response.get("nodes").cloned() else {
            continue;
        };
        tracing::debug!(frame = %frame.id, nodes = nodes.len(), "Frame accessibility tree");

        let chain = owners.chain(&frame.id);
        let owner = owners.owners.get(&frame.id).copied();
        for mut node in nodes {
            if !chain.is_empty() {
                node[ATTR_FRAME_CHAIN] = json!(chain);
            }
            let is_root = node.get("parentId").map_or(true, Value::is_null);
            if let (true, Some(owner)) = (is_root, owner) {
                node[NODE_PARENT_IFRAME] = json!(owner);
            }
            all_nodes.push(node);
        }
    }

    if cdp.supports_sessions() {
        let known: HashSet<&str> = frames.iter().map(|f| f.id.as_str()).collect();
        match cross_origin_nodes(cdp, session_id, &known, &owners).await {
            Ok(nodes) => all_nodes.extend(nodes),
            Err(e) => tracing::debug!(error = %e, "Cross-origin frame enumeration failed"),
        }
    }

    Ok(json!({"nodes": all_nodes}))
}

async fn cross_origin_nodes(
    cdp: &dyn CdpTransport,
    session_id: Option<&str>,
    known_frames: &HashSet<&str>,
    owners: &FrameOwners,
) -> Result<Vec<Value>, DriverError> {
    let iframes = iframe_targets(cdp, known_frames).await?;

    let mut nodes = Vec::new();
    let mut next_id = -1i64;
    for iframe in iframes {
        let chain = cross_origin_chain(cdp, session_id, &iframe, owners).await;
        let attached = cdp
            .send(
                "Target.attachToTarget",
                json!({"targetId": iframe.target_id, "flatten": true}),
                None,
            )
            .await?;
        let Some(frame_session) = attached.get("sessionId").and_then(Value::as_str) else {
            continue;
        };
        let script = INTERACTIVE_QUERY_SCRIPT.replace("__LIMIT__", &MAX_ELEMENTS_PER_SELECTOR.to_string());
        let evaluated = cdp
            .send(
                "Runtime.evaluate",
                json!({"expression": script, "returnByValue": true}),
                Some(frame_session),
            )
            .await;
        let _ = cdp
            .send("Target.detachFromTarget", json!({"sessionId": frame_session}), None)
            .await;
        let evaluated = evaluated?;
        check_exception(&evaluated)?;

        let items = evaluated
            .pointer("/result/value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let frame_nodes = synthetic_nodes(&items, &iframe.url, &chain, &mut next_id);
        tracing::debug!(url = %truncate(&iframe.url, 60), nodes = frame_nodes.len(), "Cross-origin iframe");
        nodes.extend(frame_nodes);
    }
    Ok(nodes)
}

/// 每个子 frame 所属 iframe 元素的 backendNodeId 与父 frame
#[derive(Debug, Default)]
pub(crate) struct FrameOwners {
    pub owners: HashMap<String, i64>,
    pub parents: HashMap<String, String>,
}

impl FrameOwners {
    pub(crate) async fn collect(
        cdp: &dyn CdpTransport,
        session_id: Option<&str>,
        frames: &[FrameInfo],
    ) -> Self {
        let mut result = Self::default();
        // 第一个为主 frame，没有 owner
        for frame in frames.iter().skip(1) {
            if let Some(parent) = &frame.parent {
                result.parents.insert(frame.id.clone(), parent.clone());
            }
            match frame_owner(cdp, session_id, &frame.id).await {
                Some(backend_id) => {
                    result.owners.insert(frame.id.clone(), backend_id);
                }
                None => tracing::debug!(frame = %frame.id, "No frame owner"),
            }
        }
        result
    }

    pub(crate) fn chain(&self, frame_id: &str) -> Vec<i64> {
        frame_chain(frame_id, &self.owners, &self.parents)
    }
}

async fn frame_owner(cdp: &dyn CdpTransport, session_id: Option<&str>, frame_id: &str) -> Option<i64> {
    cdp.send("DOM.getFrameOwner", json!({"frameId": frame_id}), session_id)
        .await
        .ok()?
        .get("backendNodeId")
        .and_then(Value::as_i64)
}

/// 跨域 iframe 的完整 frame 链：所在 frame 的链 + iframe 元素自身；找不到 iframe 元素时为空
pub(crate) async fn cross_origin_chain(
    cdp: &dyn CdpTransport,
    session_id: Option<&str>,
    iframe: &IframeTarget,
    owners: &FrameOwners,
) -> Vec<i64> {
    // OOPIF 的 targetId 即其 frameId，owner 在父 frame 的进程里
    let owner = match frame_owner(cdp, session_id, &iframe.target_id).await {
        Some(owner) => Some(owner),
        None => iframe_backend_id_by_url(cdp, session_id, &iframe.url).await,
    };
    let Some(owner) = owner else {
        return Vec::new();
    };
    let mut chain = iframe
        .parent_frame
        .as_deref()
        .map(|parent| owners.chain(parent))
        .unwrap_or_default();
    chain.push(owner);
    chain
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IframeTarget {
    pub target_id: String,
    pub url: String,
    /// 包含该 iframe 元素的 frame
    pub parent_frame: Option<String>,
}

/// frame 树之外的 iframe target
pub(crate) async fn iframe_targets(
    cdp: &dyn CdpTransport,
    known_frames: &HashSet<&str>,
) -> Result<Vec<IframeTarget>, DriverError> {
    let targets = cdp.send("Target.getTargets", json!({}), None).await?;
    Ok(targets
        .get("targetInfos")
        .and_then(Value::as_array)
        .map(|infos| {
            infos
                .iter()
                .filter(|t| t.get("type").and_then(Value::as_str) == Some("iframe"))
                .filter_map(|t| {
                    let id = t.get("targetId")?.as_str()?;
                    let url = t.get("url").and_then(Value::as_str).unwrap_or_default();
                    (!known_frames.contains(id)).then(|| IframeTarget {
                        target_id: id.to_string(),
                        url: url.to_string(),
                        parent_frame: t
                            .get("parentFrameId")
                            .and_then(Value::as_str)
                            .map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default())
}

pub(crate) async fn iframe_backend_id_by_url(
    cdp: &dyn CdpTransport,
    session_id: Option<&str>,
    url: &str,
) -> Option<i64> {
    let document = cdp
        .send("DOM.getDocument", json!({"depth": 0}), session_id)
        .await
        .ok()?;
    let root = document.pointer("/root/nodeId")?.as_i64()?;
    let selector = format!("iframe[src='{}']", url.replace('\'', "\\'"));
    let found = cdp
        .send(
            "DOM.querySelectorAll",
            json!({"nodeId": root, "selector": selector}),
            session_id,
        )
        .await
        .ok()?;
    let node_id = found.get("nodeIds")?.as_array()?.first()?.as_i64()?;
    let described = cdp
        .send("DOM.describeNode", json!({"nodeId": node_id}), session_id)
        .await
        .ok()?;
    described.pointer("/node/backendNodeId")?.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::{ElementDescriptor, LocatorHint, Platform, RawTree};
    use crate::drivers::MockCdpTransport;

    fn frame_tree() -> Value {
        json!({"frameTree": {
            "frame": {"id": "MAIN", "url": "https://app.test/"},
            "childFrames": [{
                "frame": {"id": "CHILD", "url": "https://app.test/inner"},
                "childFrames": [{"frame": {"id": "GRANDCHILD", "url": "https://app.test/deep"}}]
            }]
        }})
    }

    #[test]
    fn test_flatten_and_chain() {
        let frames = flatten_frame_tree(&frame_tree()["frameTree"]);
        assert_eq!(
            frames.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["MAIN", "CHILD", "GRANDCHILD"]
        );
        assert_eq!(frames[2].parent.as_deref(), Some("CHILD"));

        let owners = HashMap::from([("CHILD".to_string(), 10), ("GRANDCHILD".to_string(), 20)]);
        let parents = HashMap::from([
            ("CHILD".to_string(), "MAIN".to_string()),
            ("GRANDCHILD".to_string(), "CHILD".to_string()),
        ]);
        assert_eq!(frame_chain("GRANDCHILD", &owners, &parents), vec![10, 20]);
        assert_eq!(frame_chain("MAIN", &owners, &parents), Vec::<i64>::new());
    }

    #[tokio::test]
    async fn test_collect_inlines_child_frame() {
        let cdp = MockCdpTransport::new();
        cdp.on(
            "Page.getFrameTree",
            json!({"frameTree": {
                "frame": {"id": "MAIN", "url": "https://app.test/"},
                "childFrames": [{"frame": {"id": "CHILD", "url": "https://app.test/inner"}}]
            }}),
        );
        cdp.on("DOM.getFrameOwner", json!({"backendNodeId": 5}));
        cdp.push(
            "Accessibility.getFullAXTree",
            Ok(json!({"nodes": [
                {"nodeId": "1", "role": {"value": "RootWebArea"}, "childIds": ["2"], "backendDOMNodeId": 1},
                {"nodeId": "2", "parentId": "1", "role": {"value": "Iframe"}, "backendDOMNodeId": 5}
            ]})),
        );
        cdp.push(
            "Accessibility.getFullAXTree",
            Ok(json!({"nodes": [
                {"nodeId": "10", "role": {"value": "RootWebArea"}, "childIds": ["11"], "backendDOMNodeId": 30},
                {"nodeId": "11", "parentId": "10", "role": {"value": "button"}, "name": {"value": "Pay"}, "backendDOMNodeId": 31}
            ]})),
        );
        cdp.on("Target.getTargets", json!({"targetInfos": []}));

        let snapshot = collect_nodes(&cdp, None).await.unwrap();
        let tree = RawTree::from_chromium(&snapshot).unwrap();
        let xml = tree.to_xml();
        let iframe_at = xml.find("<Iframe").unwrap();
        let button_at = xml.find("name=\"Pay\"").unwrap();
        assert!(button_at > iframe_at);

        // 先序：RootWebArea=1, Iframe=2, 子 frame RootWebArea=3, button=4
        assert_eq!(
            tree.element_by_id(4).unwrap(),
            ElementDescriptor::Chromium {
                backend_node_id: 31,
                frame_chain: vec![5]
            }
        );
    }

    #[tokio::test]
    async fn test_cross_origin_frames_become_synthetic_nodes() {
        let cdp = MockCdpTransport::new();
        cdp.on(
            "Page.getFrameTree",
            json!({"frameTree": {"frame": {"id": "MAIN", "url": "https://app.test/"}}}),
        );
        cdp.on(
            "Accessibility.getFullAXTree",
            json!({"nodes": [
                {"nodeId": "1", "role": {"value": "RootWebArea"}, "childIds": ["2"], "backendDOMNodeId": 1},
                {"nodeId": "2", "parentId": "1", "role": {"value": "Iframe"}, "backendDOMNodeId": 8}
            ]}),
        );
        cdp.on(
            "Target.getTargets",
            json!({"targetInfos": [
                {"targetId": "OOPIF", "type": "iframe", "url": "https://pay.test/"},
                {"targetId": "PAGE", "type": "page", "url": "https://app.test/"}
            ]}),
        );
        cdp.on("DOM.getDocument", json!({"root": {"nodeId": 1}}));
        cdp.on("DOM.querySelectorAll", json!({"nodeIds": [44]}));
        cdp.on("DOM.describeNode", json!({"node": {"backendNodeId": 8}}));
        cdp.on("Target.attachToTarget", json!({"sessionId": "S-OOPIF"}));
        cdp.on(
            "Runtime.evaluate",
            json!({"result": {"type": "object", "value": [
                {"selector": "button", "nth": 0, "role": "button", "name": "Pay now"}
            ]}}),
        );

        let snapshot = collect_nodes(&cdp, None).await.unwrap();
        let tree = RawTree::from_chromium(&snapshot).unwrap();
        assert_eq!(
            tree.element_by_id(3).unwrap(),
            ElementDescriptor::Synthetic {
                role: "button".into(),
                locator: LocatorHint::Selector {
                    selector: "button".into(),
                    nth: 0
                },
                frame_url: Some("https://pay.test/".into()),
                frame_chain: vec![8],
            }
        );
        assert_eq!(tree.platform(), Platform::Chromium);
        let evaluate = cdp.calls_to("Runtime.evaluate");
        assert_eq!(evaluate[0].session_id.as_deref(), Some("S-OOPIF"));
        assert_eq!(cdp.calls_to("Target.detachFromTarget").len(), 1);
    }

    #[tokio::test]
    async fn test_nested_cross_origin_frame_chain() {
        let cdp = MockCdpTransport::new();
        cdp.on(
            "Page.getFrameTree",
            json!({"frameTree": {
                "frame": {"id": "MAIN", "url": "https://app.test/"},
                "childFrames": [{"frame": {"id": "CHILD", "url": "https://app.test/inner"}}]
            }}),
        );
        // CHILD 的 iframe 元素，然后是 CHILD 内跨域 iframe 的元素
        cdp.push("DOM.getFrameOwner", Ok(json!({"backendNodeId": 5})));
        cdp.push("DOM.getFrameOwner", Ok(json!({"backendNodeId": 9})));
        cdp.push(
            "Accessibility.getFullAXTree",
            Ok(json!({"nodes": [
                {"nodeId": "1", "role": {"value": "RootWebArea"}, "childIds": ["2"], "backendDOMNodeId": 1},
                {"nodeId": "2", "parentId": "1", "role": {"value": "Iframe"}, "backendDOMNodeId": 5}
            ]})),
        );
        cdp.push(
            "Accessibility.getFullAXTree",
            Ok(json!({"nodes": [
                {"nodeId": "10", "role": {"value": "RootWebArea"}, "childIds": ["11"], "backendDOMNodeId": 30},
                {"nodeId": "11", "parentId": "10", "role": {"value": "Iframe"}, "backendDOMNodeId": 9}
            ]})),
        );
        cdp.on(
            "Target.getTargets",
            json!({"targetInfos": [
                {"targetId": "OOPIF", "type": "iframe", "url": "https://pay.test/", "parentFrameId": "CHILD"}
            ]}),
        );
        cdp.on("Target.attachToTarget", json!({"sessionId": "S-OOPIF"}));
        cdp.on(
            "Runtime.evaluate",
            json!({"result": {"type": "object", "value": [
                {"selector": "button", "nth": 0, "role": "button", "name": "Pay now"}
            ]}}),
        );

        let snapshot = collect_nodes(&cdp, None).await.unwrap();
        let synthetic = snapshot["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|node| node.get(ATTR_SYNTHETIC).is_some())
            .unwrap();
        assert_eq!(synthetic[ATTR_FRAME_CHAIN], json!([5, 9]));
        assert_eq!(synthetic[NODE_PARENT_IFRAME], json!(9));

        let owner_lookups = cdp.calls_to("DOM.getFrameOwner");
        assert_eq!(owner_lookups[1].params["frameId"], "OOPIF");
    }

    #[test]
    fn test_synthetic_container_without_owner() {
        let mut next_id = -1;
        let items = vec![json!({"selector": "a", "nth": 1, "role": "link", "name": "Docs"})];
        let nodes = synthetic_nodes(&items, "https://x.test/", &[], &mut next_id);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["parentId"], "-2");
        assert_eq!(nodes[1]["role"]["value"], "Iframe");
        assert_eq!(nodes[1]["childIds"], json!(["-1"]));
        assert_eq!(next_id, -3);
    }
}
