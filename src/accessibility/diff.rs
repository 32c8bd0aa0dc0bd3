//! 两次快照之间的差异
//!
//! `unified_diff` 提供给 ChangesAnalyzer；`StateDiff` 以 backendDOMNodeId 对齐原始 Chromium 树，
//! 只关心增删节点与状态属性变化。

use std::collections::HashMap;

use similar::TextDiff;

use super::xml::{parse_fragment, XmlElement};

/// 值得跟踪的状态属性
pub const STATE_ATTRIBUTES: [&str; 8] = [
    "value", "checked", "selected", "expanded", "focused", "pressed", "disabled", "invalid",
];

/// 行级 unified diff（before / after 文件头），末行补换行后比较，结果去掉尾部换行
pub fn unified_diff(before: &str, after: &str) -> String {
    let before = with_trailing_newline(before);
    let after = with_trailing_newline(after);
    let diff = TextDiff::from_lines(before.as_str(), after.as_str());
    diff.unified_diff()
        .context_radius(3)
        .header("before", "after")
        .to_string()
        .trim_end_matches('\n')
        .to_string()
}

fn with_trailing_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChange {
    pub kind: ChangeKind,
    pub role: String,
    pub name: Option<String>,
    pub node_id: String,
    /// 仅 Modified：`attr: old → new` 列表
    pub details: String,
}

/// 原始 Chromium XML 的结构化状态差异
#[derive(Debug, Clone, Default)]
pub struct StateDiff {
    changes: Vec<NodeChange>,
}

impl StateDiff {
    /// 解析失败的一侧按空树处理
    pub fn compute(before_xml: &str, after_xml: &str) -> Self {
        let before = collect_nodes(before_xml);
        let after = collect_nodes(after_xml);
        let mut changes = Vec::new();

        for (key, node) in &before.nodes {
            if !after.index.contains_key(key) {
                changes.push(node.change(ChangeKind::Removed, String::new()));
            }
        }
        for (key, node) in &after.nodes {
            if !before.index.contains_key(key) {
                changes.push(node.change(ChangeKind::Added, String::new()));
            }
        }
        for (key, after_node) in &after.nodes {
            if let Some(&index) = before.index.get(key) {
                let details = state_details(&before.nodes[index].1, after_node);
                if !details.is_empty() {
                    changes.push(after_node.change(ChangeKind::Modified, details));
                }
            }
        }

        Self { changes }
    }

    pub fn changes(&self) -> &[NodeChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// 面向 LLM 的文本格式
    pub fn format(&self) -> String {
        if self.changes.is_empty() {
            return "No changes detected.".to_string();
        }

        let mut lines = vec!["ACCESSIBILITY TREE CHANGES:".to_string()];
        let (mut added, mut removed, mut modified) = (0, 0, 0);
        for change in &self.changes {
            let name_part = change
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .map(|n| format!(" \"{n}\""))
                .unwrap_or_default();
            let label = format!("{}{} (id={})", change.role, name_part, change.node_id);
            match change.kind {
                ChangeKind::Added => {
                    added += 1;
                    lines.push(format!("+ Added: {label}"));
                }
                ChangeKind::Removed => {
                    removed += 1;
                    lines.push(format!("- Removed: {label}"));
                }
                ChangeKind::Modified => {
                    modified += 1;
                    lines.push(format!("~ Modified: {label} [{}]", change.details));
                }
            }
        }
        lines.push(format!(
            "\nSummary: {added} added, {removed} removed, {modified} modified"
        ));
        lines.join("\n")
    }
}

struct NodeState {
    role: String,
    attrs: HashMap<String, String>,
}

impl NodeState {
    fn change(&self, kind: ChangeKind, details: String) -> NodeChange {
        NodeChange {
            kind,
            role: self.role.clone(),
            name: self.attrs.get("name").cloned(),
            node_id: self.attrs.get("backendDOMNodeId").cloned().unwrap_or_default(),
            details,
        }
    }
}

#[derive(Default)]
struct NodeIndex {
    nodes: Vec<(String, NodeState)>,
    index: HashMap<String, usize>,
}

fn collect_nodes(xml: &str) -> NodeIndex {
    let mut collected = NodeIndex::default();
    if xml.trim().is_empty() {
        return collected;
    }
    let Ok(roots) = parse_fragment(xml) else {
        tracing::debug!("State diff input is not valid XML, treating as empty");
        return collected;
    };
    for root in &roots {
        root.walk(&mut |element: &XmlElement| {
            let Some(backend_id) = element.attr("backendDOMNodeId").filter(|id| !id.is_empty()) else {
                return;
            };
            let state = NodeState {
                role: element.tag.clone(),
                attrs: element.attrs.iter().cloned().collect(),
            };
            match collected.index.get(backend_id) {
                Some(&index) => collected.nodes[index].1 = state,
                None => {
                    collected
                        .index
                        .insert(backend_id.to_string(), collected.nodes.len());
                    collected.nodes.push((backend_id.to_string(), state));
                }
            }
        });
    }
    collected
}

fn state_details(before: &NodeState, after: &NodeState) -> String {
    let mut diffs = Vec::new();

    let before_name = before.attrs.get("name").map(String::as_str).unwrap_or("");
    let after_name = after.attrs.get("name").map(String::as_str).unwrap_or("");
    if before_name != after_name {
        diffs.push(format!("name: \"{before_name}\" → \"{after_name}\""));
    }

    for attr in STATE_ATTRIBUTES {
        let before_value = before.attrs.get(attr);
        let after_value = after.attrs.get(attr);
        if before_value != after_value {
            diffs.push(format!(
                "{attr}: {} → {}",
                before_value.map(String::as_str).unwrap_or("unset"),
                after_value.map(String::as_str).unwrap_or("unset"),
            ));
        }
    }

    diffs.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_diff_headers_and_hunks() {
        let before = "<a>\n  <b id=\"1\" />\n</a>";
        let after = "<a>\n  <b id=\"1\" checked=\"true\" />\n</a>";
        let diff = unified_diff(before, after);
        assert!(diff.starts_with("--- before\n+++ after\n@@"));
        assert!(diff.contains("-  <b id=\"1\" />"));
        assert!(diff.contains("+  <b id=\"1\" checked=\"true\" />"));
        assert!(!diff.ends_with('\n'));
    }

    #[test]
    fn test_unified_diff_identical_is_empty() {
        assert_eq!(unified_diff("<a />", "<a />"), "");
    }

    #[test]
    fn test_state_diff_added_removed_modified() {
        let before = r#"<RootWebArea backendDOMNodeId="1" name="Shop">
  <button backendDOMNodeId="2" name="Add" />
  <checkbox backendDOMNodeId="3" name="Gift" checked="false" />
</RootWebArea>"#;
        let after = r#"<RootWebArea backendDOMNodeId="1" name="Shop">
  <checkbox backendDOMNodeId="3" name="Gift" checked="true" />
  <dialog backendDOMNodeId="4" name="Cart" />
</RootWebArea>"#;
        let diff = StateDiff::compute(before, after);
        assert_eq!(diff.changes().len(), 3);
        assert_eq!(
            diff.format(),
            "ACCESSIBILITY TREE CHANGES:\n\
             - Removed: button \"Add\" (id=2)\n\
             + Added: dialog \"Cart\" (id=4)\n\
             ~ Modified: checkbox \"Gift\" (id=3) [checked: false → true]\n\
             \nSummary: 1 added, 1 removed, 1 modified"
        );
    }

    #[test]
    fn test_state_diff_no_changes() {
        let xml = r#"<button backendDOMNodeId="2" name="Add" />"#;
        let diff = StateDiff::compute(xml, xml);
        assert!(diff.is_empty());
        assert_eq!(diff.format(), "No changes detected.");
    }
}
