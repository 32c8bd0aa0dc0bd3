//! 元素描述符：驱动定位一个 raw_id 对应元素所需的平台键

use serde::{Deserialize, Serialize};

/// 跨域 iframe 内合成节点的定位提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocatorHint {
    /// CSS 选择器 + 第 nth 个匹配
    Selector {
        selector: String,
        #[serde(default)]
        nth: usize,
    },
    /// 按角色与可访问名定位
    Role { role: String, name: String },
    /// 指向 iframe 本身的合成节点
    Frame {
        #[serde(default)]
        frame: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementDescriptor {
    /// CDP 节点：backendDOMNodeId + 从外到内的祖先 iframe backendDOMNodeId 链
    Chromium {
        backend_node_id: i64,
        frame_chain: Vec<i64>,
    },
    Synthetic {
        role: String,
        locator: LocatorHint,
        frame_url: Option<String>,
        frame_chain: Vec<i64>,
    },
    Ios {
        element_type: String,
        name: Option<String>,
        label: Option<String>,
        value: Option<String>,
    },
    Android {
        class_name: String,
        resource_id: Option<String>,
        text: Option<String>,
        content_desc: Option<String>,
        bounds: Option<String>,
    },
}

impl ElementDescriptor {
    pub fn frame_chain(&self) -> &[i64] {
        match self {
            ElementDescriptor::Chromium { frame_chain, .. }
            | ElementDescriptor::Synthetic { frame_chain, .. } => frame_chain,
            _ => &[],
        }
    }

    /// iOS 谓词：类型 + name / value / label 中第一个存在的字段
    pub fn ios_predicate(&self) -> Option<String> {
        let ElementDescriptor::Ios {
            element_type,
            name,
            label,
            value,
        } = self
        else {
            return None;
        };
        let mut predicate = format!("type == \"{}\"", escape_predicate(element_type));
        let first = [("name", name), ("value", value), ("label", label)]
            .into_iter()
            .find_map(|(key, v)| v.as_deref().map(|v| (key, v)));
        if let Some((key, v)) = first {
            predicate.push_str(&format!(" AND {key} == \"{}\"", escape_predicate(v)));
        }
        Some(predicate)
    }

    /// Android XPath：类名 + resource-id / text / content-desc / bounds
    pub fn android_xpath(&self) -> Option<String> {
        let ElementDescriptor::Android {
            class_name,
            resource_id,
            text,
            content_desc,
            bounds,
        } = self
        else {
            return None;
        };
        let conditions: Vec<String> = [
            ("resource-id", resource_id),
            ("text", text),
            ("content-desc", content_desc),
            ("bounds", bounds),
        ]
        .into_iter()
        .filter_map(|(attr, v)| v.as_deref().map(|v| format!("@{attr}={}", xpath_literal(v))))
        .collect();

        if conditions.is_empty() {
            Some(format!("//{class_name}"))
        } else {
            Some(format!("//{class_name}[{}]", conditions.join(" and ")))
        }
    }
}

fn escape_predicate(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// XPath 1.0 没有转义，含双引号时退回单引号或 concat()
fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let parts: Vec<String> = value.split('"').map(|p| format!("\"{p}\"")).collect();
    format!("concat({})", parts.join(", '\"', "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ios_predicate_uses_first_present_field() {
        let descriptor = ElementDescriptor::Ios {
            element_type: "XCUIElementTypeButton".into(),
            name: None,
            label: Some("Login".into()),
            value: Some("on".into()),
        };
        assert_eq!(
            descriptor.ios_predicate().unwrap(),
            r#"type == "XCUIElementTypeButton" AND value == "on""#
        );
    }

    #[test]
    fn test_android_xpath() {
        let descriptor = ElementDescriptor::Android {
            class_name: "android.widget.Button".into(),
            resource_id: Some("com.app:id/login".into()),
            text: Some("Log \"in\"".into()),
            content_desc: None,
            bounds: Some("[0,0][100,50]".into()),
        };
        assert_eq!(
            descriptor.android_xpath().unwrap(),
            r#"//android.widget.Button[@resource-id="com.app:id/login" and @text='Log "in"' and @bounds="[0,0][100,50]"]"#
        );
    }

    #[test]
    fn test_locator_hint_deserialize() {
        let hint: LocatorHint =
            serde_json::from_str(r#"{"selector":"button","nth":2}"#).unwrap();
        assert_eq!(
            hint,
            LocatorHint::Selector {
                selector: "button".into(),
                nth: 2
            }
        );
        let hint: LocatorHint =
            serde_json::from_str(r#"{"role":"link","name":"Docs"}"#).unwrap();
        assert!(matches!(hint, LocatorHint::Role { .. }));
    }
}
