//! 服务端树：面向 LLM 的精简 XML
//!
//! 剪枝（ignored / none 提升子节点，空 generic 删除）、StaticText 内联为父节点文本、属性过滤，
//! 保留节点按先序连续分配语义 id（从 1 开始），并保存 `语义 id → raw_id` 的单射映射。
//! 区域子树与父树共享同一映射，id 不重排。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::raw::{RawTree, ATTR_RAW_ID};
use super::xml::{serialize_roots, XmlElement};
use super::{AccessibilityError, Platform};
use crate::tools::ToolCall;

/// 工具参数中引用元素的字段
pub const ID_FIELDS: [&str; 3] = ["id", "from_id", "to_id"];

/// 不提供给 LLM 的 CDP 属性
const CHROMIUM_HIDDEN_ATTRS: [&str; 3] = ["backendDOMNodeId", "nodeId", "ignored"];

/// 对行为无意义的 CDP 属性
const CHROMIUM_NOISE_PROPERTIES: [&str; 5] =
    ["focusable", "editable", "settable", "hiddenRoot", "root"];

/// 区域引用：代理给出的语义 id，或跨快照保存的 raw_id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaScope {
    Semantic(u32),
    Raw(u32),
}

#[derive(Debug, Clone)]
pub struct ServerTree {
    platform: Platform,
    roots: Vec<XmlElement>,
    id_map: Arc<BTreeMap<u32, u32>>,
}

impl ServerTree {
    pub fn build(raw: &RawTree) -> Result<Self, AccessibilityError> {
        let pruned: Vec<XmlElement> = match raw.platform() {
            Platform::Chromium => raw
                .roots()
                .iter()
                .flat_map(simplify_chromium)
                .filter_map(Piece::into_element)
                .collect(),
            Platform::Uiautomator2 => raw.roots().iter().flat_map(simplify_uiautomator2).collect(),
            Platform::Xcuitest => raw.roots().iter().flat_map(simplify_xcuitest).collect(),
        };

        let mut roots = pruned;
        let mut id_map = BTreeMap::new();
        let mut counter = 0u32;
        for root in &mut roots {
            assign_semantic_ids(root, &mut counter, &mut id_map)?;
        }

        tracing::debug!(
            platform = %raw.platform(),
            elements = id_map.len(),
            "Built server accessibility tree"
        );

        Ok(Self {
            platform: raw.platform(),
            roots,
            id_map: Arc::new(id_map),
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn roots(&self) -> &[XmlElement] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }

    /// 序列化为 LLM 使用的 XML，可按名字去掉部分属性（`id` 始终保留）
    pub fn to_xml(&self, exclude_attrs: &[&str]) -> String {
        if exclude_attrs.is_empty() {
            return serialize_roots(&self.roots);
        }
        let stripped: Vec<XmlElement> = self
            .roots
            .iter()
            .map(|root| strip_attrs(root, exclude_attrs))
            .collect();
        serialize_roots(&stripped)
    }

    /// 以某语义 id 为根的子树；共享映射，不重新编号
    pub fn get_area(&self, semantic_id: u32) -> Result<ServerTree, AccessibilityError> {
        let target = semantic_id.to_string();
        let element = self
            .roots
            .iter()
            .find_map(|root| root.find(&|e| e.attr("id") == Some(target.as_str())))
            .ok_or_else(|| AccessibilityError::UnknownSemanticId(target.clone()))?;

        Ok(ServerTree {
            platform: self.platform,
            roots: vec![element.clone()],
            id_map: Arc::clone(&self.id_map),
        })
    }

    pub fn raw_id_of(&self, semantic_id: u32) -> Result<u32, AccessibilityError> {
        self.id_map
            .get(&semantic_id)
            .copied()
            .ok_or_else(|| AccessibilityError::UnknownSemanticId(semantic_id.to_string()))
    }

    pub fn semantic_id_of_raw(&self, raw_id: u32) -> Option<u32> {
        self.id_map
            .iter()
            .find(|(_, raw)| **raw == raw_id)
            .map(|(semantic, _)| *semantic)
    }

    /// 当前树中可寻址的语义 id
    pub fn contains(&self, semantic_id: u32) -> bool {
        let target = semantic_id.to_string();
        self.roots
            .iter()
            .any(|root| root.find(&|e| e.attr("id") == Some(target.as_str())).is_some())
    }

    /// 把工具调用中的 id / from_id / to_id 从语义 id 改写为 raw_id
    pub fn map_tool_calls_to_raw(&self, calls: &[ToolCall]) -> Result<Vec<ToolCall>, AccessibilityError> {
        calls
            .iter()
            .map(|call| {
                let mut mapped = call.clone();
                if let Value::Object(args) = &mut mapped.args {
                    for field in ID_FIELDS {
                        if let Some(value) = args.get_mut(field) {
                            let semantic = parse_id(value)?;
                            *value = Value::from(self.raw_id_of(semantic)?);
                        }
                    }
                }
                Ok(mapped)
            })
            .collect()
    }
}

/// 部分模型把 id 输出为字符串
pub(crate) fn parse_id(value: &Value) -> Result<u32, AccessibilityError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| AccessibilityError::UnknownSemanticId(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| AccessibilityError::UnknownSemanticId(s.clone())),
        other => Err(AccessibilityError::UnknownSemanticId(other.to_string())),
    }
}

fn assign_semantic_ids(
    element: &mut XmlElement,
    counter: &mut u32,
    id_map: &mut BTreeMap<u32, u32>,
) -> Result<(), AccessibilityError> {
    // 移动端包装根节点不带 raw_id，不分配 id
    if let Some(raw) = element.remove_attr(ATTR_RAW_ID) {
        let raw_id = raw
            .parse::<u32>()
            .map_err(|_| AccessibilityError::MalformedSnapshot(format!("invalid raw_id `{raw}`")))?;
        *counter += 1;
        id_map.insert(*counter, raw_id);
        let position = usize::from(element.attrs.first().map_or(false, |(k, _)| k == "name"));
        element.attrs.insert(position, ("id".to_string(), counter.to_string()));
    }
    for child in &mut element.children {
        assign_semantic_ids(child, counter, id_map)?;
    }
    Ok(())
}

fn strip_attrs(element: &XmlElement, exclude: &[&str]) -> XmlElement {
    XmlElement {
        tag: element.tag.clone(),
        attrs: element
            .attrs
            .iter()
            .filter(|(key, _)| key == "id" || !exclude.contains(&key.as_str()))
            .cloned()
            .collect(),
        text: element.text.clone(),
        children: element
            .children
            .iter()
            .map(|child| strip_attrs(child, exclude))
            .collect(),
    }
}

fn append_text(element: &mut XmlElement, text: &str) {
    match element.text.as_mut() {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(text);
        }
        None => element.text = Some(text.to_string()),
    }
}

/// 剪枝过程的中间结果：元素，或需要并入父节点文本的片段
enum Piece {
    Element(XmlElement),
    Text(String),
}

impl Piece {
    fn into_element(self) -> Option<XmlElement> {
        match self {
            Piece::Element(element) => Some(element),
            Piece::Text(_) => None,
        }
    }
}

fn simplify_chromium(raw: &XmlElement) -> Vec<Piece> {
    if raw.tag == "StaticText" {
        return raw
            .attr("name")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| vec![Piece::Text(name.to_string())])
            .unwrap_or_default();
    }
    if raw.tag == "InlineTextBox" {
        return Vec::new();
    }

    let ignored = raw
        .attr("ignored")
        .map_or(false, |v| v.eq_ignore_ascii_case("true"));
    if ignored || raw.tag == "none" {
        return raw.children.iter().flat_map(simplify_chromium).collect();
    }

    let mut element = XmlElement::new(raw.tag.clone());
    if let Some(name) = raw.attr("name").filter(|n| !n.is_empty()) {
        element.set_attr("name", name);
    }
    if let Some(raw_id) = raw.attr(ATTR_RAW_ID) {
        element.set_attr(ATTR_RAW_ID, raw_id);
    }
    for (key, value) in &raw.attrs {
        if key == "name"
            || key == ATTR_RAW_ID
            || key.starts_with('_')
            || value.is_empty()
            || CHROMIUM_HIDDEN_ATTRS.contains(&key.as_str())
            || CHROMIUM_NOISE_PROPERTIES.contains(&key.as_str())
        {
            continue;
        }
        element.set_attr(key.clone(), value.clone());
    }

    for piece in raw.children.iter().flat_map(simplify_chromium) {
        match piece {
            Piece::Text(text) => append_text(&mut element, &text),
            Piece::Element(child) => element.children.push(child),
        }
    }

    if element.tag == "generic" && element.children.is_empty() && element.text.is_none() {
        return Vec::new();
    }
    if element.attr("name").is_some() && element.attr("name") == element.text.as_deref() {
        element.remove_attr("name");
    }

    vec![Piece::Element(element)]
}

fn short_class_name(element: &XmlElement) -> String {
    let class = element.attr("class").unwrap_or(&element.tag);
    class.rsplit('.').next().unwrap_or(class).to_string()
}

fn simplify_uiautomator2(raw: &XmlElement) -> Vec<XmlElement> {
    if raw.tag == "hierarchy" {
        let mut wrapper = XmlElement::new("hierarchy");
        wrapper.children = raw.children.iter().flat_map(simplify_uiautomator2).collect();
        return vec![wrapper];
    }

    let mut element = XmlElement::new(short_class_name(raw));
    if let Some(raw_id) = raw.attr(ATTR_RAW_ID) {
        element.set_attr(ATTR_RAW_ID, raw_id);
    }
    for key in ["resource-id", "text", "content-desc"] {
        if let Some(value) = raw.attr(key).filter(|v| !v.is_empty()) {
            element.set_attr(key, value);
        }
    }
    let clickable = raw.attr("clickable") == Some("true");
    element.set_attr("clickable", if clickable { "true" } else { "false" });
    if raw.attr("checkable") == Some("true") {
        element.set_attr("checked", raw.attr("checked").unwrap_or("false"));
    }
    if raw.attr("enabled") == Some("false") {
        element.set_attr("enabled", "false");
    }

    element.children = raw.children.iter().flat_map(simplify_uiautomator2).collect();

    // 没有任何可见信息的空布局容器
    let informative = clickable
        || ["resource-id", "text", "content-desc", "checked"]
            .iter()
            .any(|key| element.attr(key).is_some());
    if !informative && element.children.is_empty() {
        return Vec::new();
    }
    vec![element]
}

fn simplify_xcuitest(raw: &XmlElement) -> Vec<XmlElement> {
    if raw.tag == "AppiumAUT" {
        let mut wrapper = XmlElement::new("AppiumAUT");
        wrapper.children = raw.children.iter().flat_map(simplify_xcuitest).collect();
        return vec![wrapper];
    }

    let children: Vec<XmlElement> = raw.children.iter().flat_map(simplify_xcuitest).collect();
    if raw.attr("visible") == Some("false") {
        return children;
    }

    let element_type = raw.attr("type").unwrap_or(&raw.tag);
    let tag = element_type
        .strip_prefix("XCUIElementType")
        .unwrap_or(element_type);
    let mut element = XmlElement::new(tag);
    if let Some(raw_id) = raw.attr(ATTR_RAW_ID) {
        element.set_attr(ATTR_RAW_ID, raw_id);
    }

    let mut seen: Vec<&str> = Vec::new();
    for key in ["name", "label", "value"] {
        if let Some(value) = raw.attr(key).filter(|v| !v.is_empty()) {
            if !seen.contains(&value) {
                element.set_attr(key, value);
                seen.push(value);
            }
        }
    }
    if raw.attr("enabled") == Some("false") {
        element.set_attr("enabled", "false");
    }
    element.children = children;

    if tag == "Other" && seen.is_empty() && element.children.is_empty() {
        return Vec::new();
    }
    vec![element]
}
