//! 轻量 XML 元素模型
//!
//! 无障碍树在各层之间以 XML 字符串流转：解析用 quick-xml，序列化保持与 ElementTree `indent` 一致的缩进格式，
//! 保证同一快照两次规范化得到逐字节相同的输出。

use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::AccessibilityError;

/// 一个 XML 元素：标签、有序属性、文本与子元素
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// 设置属性；已存在时原位覆盖，保持属性顺序稳定
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attrs.iter().position(|(key, _)| key == name)?;
        Some(self.attrs.remove(index).1)
    }

    /// 先序深度优先查找第一个满足条件的元素
    pub fn find(&self, predicate: &dyn Fn(&XmlElement) -> bool) -> Option<&XmlElement> {
        if predicate(self) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(predicate))
    }

    /// 先序遍历所有元素（含自身）
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a XmlElement)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// 序列化为缩进 XML（两空格缩进，无尾随换行）
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_indented(&mut out, 0);
        out
    }

    fn write_indented(&self, out: &mut String, level: usize) {
        out.push('<');
        out.push_str(&self.tag);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }

        let text = self.text.as_deref().filter(|t| !t.is_empty());
        if text.is_none() && self.children.is_empty() {
            out.push_str(" />");
            return;
        }

        out.push('>');
        if let Some(text) = text {
            out.push_str(&partial_escape(text));
        }
        if !self.children.is_empty() {
            let child_indent = "  ".repeat(level + 1);
            for (index, child) in self.children.iter().enumerate() {
                if index > 0 || text.is_none() {
                    out.push('\n');
                    out.push_str(&child_indent);
                }
                child.write_indented(out, level + 1);
            }
            out.push('\n');
            out.push_str(&"  ".repeat(level));
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }
}

/// 多个顶层元素按行拼接
pub fn serialize_roots(roots: &[XmlElement]) -> String {
    roots
        .iter()
        .map(XmlElement::to_xml_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// 解析 XML 片段（允许多个顶层元素、XML 声明与注释）；纯空白文本被忽略
pub fn parse_fragment(xml: &str) -> Result<Vec<XmlElement>, AccessibilityError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut roots = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(start) => stack.push(element_from_start(&start)?),
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut roots, element);
            }
            Event::End(end) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed("unexpected closing tag".to_string()))?;
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if name != element.tag {
                    return Err(malformed(format!(
                        "mismatched closing tag </{name}> for <{}>",
                        element.tag
                    )));
                }
                attach(&mut stack, &mut roots, element);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| malformed(e.to_string()))?;
                append_text(&mut stack, &text);
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                append_text(&mut stack, &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(format!("unclosed element <{}>", open.tag)));
    }
    Ok(roots)
}

/// 解析仅含一个根元素的文档
pub fn parse_document(xml: &str) -> Result<XmlElement, AccessibilityError> {
    let mut roots = parse_fragment(xml)?;
    match roots.len() {
        1 => Ok(roots.remove(0)),
        0 => Err(malformed("document has no root element".to_string())),
        n => Err(malformed(format!("document has {n} root elements"))),
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement, AccessibilityError> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| malformed(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| malformed(e.to_string()))?
            .into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], roots: &mut Vec<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => roots.push(element),
    }
}

fn append_text(stack: &mut [XmlElement], text: &str) {
    if text.trim().is_empty() {
        return;
    }
    // 顶层文本没有归属元素，直接丢弃
    if let Some(current) = stack.last_mut() {
        match current.text.as_mut() {
            Some(existing) => existing.push_str(text),
            None => current.text = Some(text.to_string()),
        }
    }
}

fn malformed(detail: String) -> AccessibilityError {
    AccessibilityError::MalformedSnapshot(detail)
}
