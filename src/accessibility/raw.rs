//! 原始树规范化
//!
//! 把平台快照转成统一的 XML：标签为角色（或元素类型），属性原样复制，
//! 并按先序遍历从 1 开始分配 `raw_id`。Chromium 的子 frame 根节点内联到拥有它的 iframe 元素下，
//! 跨域 iframe 由驱动补充的合成节点（`_synthetic`）携带定位提示与 frame 链。

use std::collections::HashMap;

use serde_json::Value;

use super::element::{ElementDescriptor, LocatorHint};
use super::xml::{parse_fragment, serialize_roots, XmlElement};
use super::{AccessibilityError, Platform};

/// 内部属性：不进入服务端树
pub const ATTR_RAW_ID: &str = "raw_id";
pub const ATTR_SYNTHETIC: &str = "_synthetic";
pub const ATTR_LOCATOR_INFO: &str = "_locator_info";
pub const ATTR_FRAME_URL: &str = "_frame_url";
pub const ATTR_FRAME_CHAIN: &str = "_frame_chain";

/// 驱动在 CDP 节点上附加的元数据字段
pub const NODE_PARENT_IFRAME: &str = "_parent_iframe_backend_node_id";

/// 规范化后的原始树，带平台信息；不可变，下一次快照产生新树
#[derive(Debug, Clone, PartialEq)]
pub struct RawTree {
    platform: Platform,
    roots: Vec<XmlElement>,
}

impl RawTree {
    /// 按平台选择规范化方式：Chromium 为 JSON，移动端为 XML
    pub fn parse(platform: Platform, payload: &str) -> Result<Self, AccessibilityError> {
        match platform {
            Platform::Chromium => {
                let value: Value = serde_json::from_str(payload)
                    .map_err(|e| AccessibilityError::MalformedSnapshot(e.to_string()))?;
                Self::from_chromium(&value)
            }
            _ => Self::from_mobile_xml(platform, payload),
        }
    }

    /// Chromium：`{"nodes": [...]}`（`Accessibility.getFullAXTree` 的合并结果）
    pub fn from_chromium(snapshot: &Value) -> Result<Self, AccessibilityError> {
        let nodes = match snapshot.get("nodes") {
            Some(Value::Array(nodes)) => nodes,
            Some(_) => {
                return Err(AccessibilityError::MalformedSnapshot(
                    "`nodes` is not an array".to_string(),
                ))
            }
            None if snapshot.is_object() => {
                return Ok(Self {
                    platform: Platform::Chromium,
                    roots: Vec::new(),
                })
            }
            None => {
                return Err(AccessibilityError::MalformedSnapshot(
                    "snapshot is not an object".to_string(),
                ))
            }
        };

        let mut lookup: HashMap<String, &Value> = HashMap::new();
        for node in nodes {
            let id = node
                .get("nodeId")
                .map(json_scalar)
                .ok_or_else(|| AccessibilityError::MalformedSnapshot("node without nodeId".into()))?;
            lookup.insert(id, node);
        }

        let mut iframe_children: HashMap<String, Vec<&Value>> = HashMap::new();
        let mut true_roots = Vec::new();
        for node in nodes {
            if node.get("parentId").map_or(false, |p| !p.is_null()) {
                continue;
            }
            match node.get(NODE_PARENT_IFRAME).filter(|v| !v.is_null()) {
                Some(owner) => iframe_children.entry(json_scalar(owner)).or_default().push(node),
                None => true_roots.push(node),
            }
        }

        let mut builder = ChromiumBuilder {
            lookup: &lookup,
            iframe_children: &iframe_children,
            next_raw_id: 0,
            depth: 0,
        };
        let roots = true_roots
            .into_iter()
            .map(|node| builder.build(node))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            platform: Platform::Chromium,
            roots,
        })
    }

    /// iOS / Android：Appium page source，属性原样保留，补充先序 raw_id
    pub fn from_mobile_xml(platform: Platform, xml: &str) -> Result<Self, AccessibilityError> {
        let mut roots = parse_fragment(xml)?;
        let mut next = 0u32;
        for root in &mut roots {
            assign_raw_ids(root, &mut next);
        }
        Ok(Self { platform, roots })
    }

    /// 从已规范化（含 raw_id）的 XML 重建，用于服务端接收与区域裁剪
    pub fn from_normalized_xml(platform: Platform, xml: &str) -> Result<Self, AccessibilityError> {
        Ok(Self {
            platform,
            roots: parse_fragment(xml)?,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn roots(&self) -> &[XmlElement] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn to_xml(&self) -> String {
        serialize_roots(&self.roots)
    }

    pub fn find(&self, raw_id: u32) -> Option<&XmlElement> {
        let target = raw_id.to_string();
        self.roots
            .iter()
            .find_map(|root| root.find(&|e| e.attr(ATTR_RAW_ID) == Some(target.as_str())))
    }

    /// 解析驱动定位所需的平台键
    pub fn element_by_id(&self, raw_id: u32) -> Result<ElementDescriptor, AccessibilityError> {
        let element = self
            .find(raw_id)
            .ok_or(AccessibilityError::ElementNotFound(raw_id))?;

        match self.platform {
            Platform::Chromium => chromium_descriptor(raw_id, element),
            Platform::Xcuitest => Ok(ElementDescriptor::Ios {
                element_type: element.tag.clone(),
                name: non_empty(element.attr("name")),
                label: non_empty(element.attr("label")),
                value: non_empty(element.attr("value")),
            }),
            Platform::Uiautomator2 => Ok(ElementDescriptor::Android {
                class_name: element.attr("class").unwrap_or(&element.tag).to_string(),
                resource_id: non_empty(element.attr("resource-id")),
                text: non_empty(element.attr("text")),
                content_desc: non_empty(element.attr("content-desc")),
                bounds: non_empty(element.attr("bounds")),
            }),
        }
    }

    /// 以 raw_id 对应元素为根的子树；找不到时返回原树
    pub fn scope_to_area(&self, raw_id: u32) -> RawTree {
        match self.find(raw_id) {
            Some(element) => RawTree {
                platform: self.platform,
                roots: vec![element.clone()],
            },
            None => self.clone(),
        }
    }
}

struct ChromiumBuilder<'a> {
    lookup: &'a HashMap<String, &'a Value>,
    iframe_children: &'a HashMap<String, Vec<&'a Value>>,
    next_raw_id: u32,
    depth: usize,
}

/// CDP 节点列表理论上无环，但 childIds 来自外部输入
const MAX_DEPTH: usize = 512;

impl ChromiumBuilder<'_> {
    fn build(&mut self, node: &Value) -> Result<XmlElement, AccessibilityError> {
        if self.depth > MAX_DEPTH {
            return Err(AccessibilityError::MalformedSnapshot(
                "node nesting too deep (cycle in childIds?)".to_string(),
            ));
        }

        let role = node
            .pointer("/role/value")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .unwrap_or("unknown");
        let mut element = XmlElement::new(role);

        self.next_raw_id += 1;
        element.set_attr(ATTR_RAW_ID, self.next_raw_id.to_string());

        for key in ["backendDOMNodeId", "nodeId", "ignored"] {
            if let Some(value) = node.get(key).filter(|v| !v.is_null()) {
                element.set_attr(key, json_scalar(value));
            }
        }

        if node.get(ATTR_SYNTHETIC).and_then(Value::as_bool) == Some(true) {
            element.set_attr(ATTR_SYNTHETIC, "true");
        }
        if let Some(info) = node.get(ATTR_LOCATOR_INFO).filter(|v| !v.is_null()) {
            element.set_attr(ATTR_LOCATOR_INFO, info.to_string());
        }
        if let Some(url) = node.get(ATTR_FRAME_URL).and_then(Value::as_str) {
            element.set_attr(ATTR_FRAME_URL, url);
        }
        if let Some(chain @ Value::Array(_)) = node.get(ATTR_FRAME_CHAIN) {
            element.set_attr(ATTR_FRAME_CHAIN, chain.to_string());
        }

        if let Some(name) = node.pointer("/name/value") {
            element.set_attr("name", json_scalar(name));
        }

        if let Some(Value::Array(properties)) = node.get("properties") {
            for property in properties {
                let Some(name) = property.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let value = match property.get("value") {
                    Some(Value::Object(map)) => map.get("value").map(json_scalar).unwrap_or_default(),
                    Some(other) => json_scalar(other),
                    None => String::new(),
                };
                element.set_attr(name, value);
            }
        }

        let lookup = self.lookup;
        let iframe_children = self.iframe_children;
        self.depth += 1;
        if let Some(Value::Array(child_ids)) = node.get("childIds") {
            for child_id in child_ids {
                if let Some(child) = lookup.get(&json_scalar(child_id)).copied() {
                    let child = self.build(child)?;
                    element.children.push(child);
                }
            }
        }

        if let Some(backend_id) = node.get("backendDOMNodeId").filter(|v| !v.is_null()) {
            if let Some(frame_roots) = iframe_children.get(&json_scalar(backend_id)) {
                for frame_root in frame_roots {
                    let child = self.build(frame_root)?;
                    element.children.push(child);
                }
            }
        }
        self.depth -= 1;

        Ok(element)
    }
}

/// JSON 标量转字符串：字符串原样，其余按 JSON 文本
pub(crate) fn json_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn assign_raw_ids(element: &mut XmlElement, next: &mut u32) {
    *next += 1;
    element.set_attr(ATTR_RAW_ID, next.to_string());
    for child in &mut element.children {
        assign_raw_ids(child, next);
    }
}

fn chromium_descriptor(
    raw_id: u32,
    element: &XmlElement,
) -> Result<ElementDescriptor, AccessibilityError> {
    let frame_chain = element
        .attr(ATTR_FRAME_CHAIN)
        .and_then(|chain| serde_json::from_str::<Vec<i64>>(chain).ok())
        .unwrap_or_default();

    if element.attr(ATTR_SYNTHETIC) == Some("true") {
        let locator = element
            .attr(ATTR_LOCATOR_INFO)
            .and_then(|info| serde_json::from_str::<LocatorHint>(info).ok())
            .unwrap_or(LocatorHint::Frame { frame: true });
        return Ok(ElementDescriptor::Synthetic {
            role: element.tag.clone(),
            locator,
            frame_url: element.attr(ATTR_FRAME_URL).map(String::from),
            frame_chain,
        });
    }

    let backend_node_id = element
        .attr("backendDOMNodeId")
        .and_then(|id| id.parse::<i64>().ok())
        .ok_or(AccessibilityError::ElementMissingPlatformId {
            raw_id,
            attribute: "backendDOMNodeId",
        })?;

    Ok(ElementDescriptor::Chromium {
        backend_node_id,
        frame_chain,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo_snapshot() -> Value {
        json!({
            "nodes": [
                {"nodeId": "1", "backendDOMNodeId": 1, "ignored": false,
                 "role": {"type": "internalRole", "value": "RootWebArea"},
                 "name": {"type": "computedString", "value": "TodoMVC"},
                 "properties": [{"name": "focusable", "value": {"type": "booleanOrUndefined", "value": true}}],
                 "childIds": ["2", "3"]},
                {"nodeId": "2", "parentId": "1", "backendDOMNodeId": 20, "ignored": false,
                 "role": {"type": "role", "value": "textbox"},
                 "name": {"type": "computedString", "value": "New Todo Input"},
                 "properties": [{"name": "controls", "value": {"type": "nodeList", "relatedNodes": []}}],
                 "childIds": []},
                {"nodeId": "3", "parentId": "1", "backendDOMNodeId": 30, "ignored": false,
                 "role": {"type": "role", "value": "Iframe"},
                 "childIds": []},
                {"nodeId": "f1:1", "backendDOMNodeId": 100, "ignored": false,
                 "_parent_iframe_backend_node_id": 30,
                 "_frame_chain": [30],
                 "role": {"type": "internalRole", "value": "RootWebArea"},
                 "childIds": ["f1:2"]},
                {"nodeId": "f1:2", "parentId": "f1:1", "backendDOMNodeId": 101, "ignored": false,
                 "_frame_chain": [30],
                 "role": {"type": "role", "value": "button"},
                 "name": {"type": "computedString", "value": "Inside"},
                 "childIds": []}
            ]
        })
    }

    #[test]
    fn test_chromium_normalize_assigns_preorder_raw_ids() {
        let tree = RawTree::from_chromium(&todo_snapshot()).unwrap();
        assert_eq!(tree.roots().len(), 1);

        let root = &tree.roots()[0];
        assert_eq!(root.tag, "RootWebArea");
        assert_eq!(root.attr("raw_id"), Some("1"));
        assert_eq!(root.attr("focusable"), Some("true"));
        assert_eq!(root.attr("name"), Some("TodoMVC"));

        let textbox = &root.children[0];
        assert_eq!(textbox.attr("raw_id"), Some("2"));
        assert_eq!(textbox.attr("controls"), Some(""));
        assert_eq!(textbox.attr("ignored"), Some("false"));
    }

    #[test]
    fn test_chromium_iframe_inlined_under_owner() {
        let tree = RawTree::from_chromium(&todo_snapshot()).unwrap();
        let iframe = &tree.roots()[0].children[1];
        assert_eq!(iframe.tag, "Iframe");
        assert_eq!(iframe.children.len(), 1);
        let frame_root = &iframe.children[0];
        assert_eq!(frame_root.attr("raw_id"), Some("4"));
        assert_eq!(frame_root.children[0].attr("raw_id"), Some("5"));

        let descriptor = tree.element_by_id(5).unwrap();
        assert_eq!(
            descriptor,
            ElementDescriptor::Chromium {
                backend_node_id: 101,
                frame_chain: vec![30]
            }
        );
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let a = RawTree::from_chromium(&todo_snapshot()).unwrap().to_xml();
        let b = RawTree::from_chromium(&todo_snapshot()).unwrap().to_xml();
        assert_eq!(a, b);
    }

    #[test]
    fn test_element_by_id_errors() {
        let snapshot = json!({"nodes": [
            {"nodeId": "1", "role": {"value": "RootWebArea"}, "childIds": []}
        ]});
        let tree = RawTree::from_chromium(&snapshot).unwrap();
        assert_eq!(
            tree.element_by_id(1),
            Err(AccessibilityError::ElementMissingPlatformId {
                raw_id: 1,
                attribute: "backendDOMNodeId"
            })
        );
        assert_eq!(tree.element_by_id(9), Err(AccessibilityError::ElementNotFound(9)));
    }

    #[test]
    fn test_synthetic_node_descriptor() {
        let snapshot = json!({"nodes": [
            {"nodeId": "1", "backendDOMNodeId": 1, "role": {"value": "RootWebArea"}, "childIds": []},
            {"nodeId": "oopif:0", "_parent_iframe_backend_node_id": 1, "_synthetic": true,
             "_locator_info": {"selector": "button", "nth": 1},
             "_frame_url": "https://other.example/", "_frame_chain": [7],
             "role": {"value": "button"}, "name": {"value": "Pay"}, "childIds": []}
        ]});
        let tree = RawTree::from_chromium(&snapshot).unwrap();
        let descriptor = tree.element_by_id(2).unwrap();
        assert_eq!(
            descriptor,
            ElementDescriptor::Synthetic {
                role: "button".into(),
                locator: LocatorHint::Selector {
                    selector: "button".into(),
                    nth: 1
                },
                frame_url: Some("https://other.example/".into()),
                frame_chain: vec![7],
            }
        );
    }

    #[test]
    fn test_scope_to_area_falls_back_to_original() {
        let tree = RawTree::from_chromium(&todo_snapshot()).unwrap();
        let scoped = tree.scope_to_area(3);
        assert_eq!(scoped.roots().len(), 1);
        assert_eq!(scoped.roots()[0].tag, "Iframe");

        let unscoped = tree.scope_to_area(999);
        assert_eq!(unscoped, tree);
    }

    #[test]
    fn test_mobile_xml_normalization() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<hierarchy rotation="0">
  <android.widget.FrameLayout class="android.widget.FrameLayout" bounds="[0,0][1080,2400]">
    <android.widget.Button class="android.widget.Button" resource-id="com.app:id/ok" text="OK" clickable="true" bounds="[10,10][100,60]" />
  </android.widget.FrameLayout>
</hierarchy>"#;
        let tree = RawTree::from_mobile_xml(Platform::Uiautomator2, xml).unwrap();
        assert_eq!(tree.roots()[0].attr("raw_id"), Some("1"));
        let descriptor = tree.element_by_id(3).unwrap();
        assert_eq!(
            descriptor,
            ElementDescriptor::Android {
                class_name: "android.widget.Button".into(),
                resource_id: Some("com.app:id/ok".into()),
                text: Some("OK".into()),
                content_desc: None,
                bounds: Some("[10,10][100,60]".into()),
            }
        );
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(
            RawTree::parse(Platform::Chromium, "not json"),
            Err(AccessibilityError::MalformedSnapshot(_))
        ));
        assert!(matches!(
            RawTree::parse(Platform::Xcuitest, "<AppiumAUT>"),
            Err(AccessibilityError::MalformedSnapshot(_))
        ));
    }
}
