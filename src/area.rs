//! 区域句柄：把 do / check / get / find 限定在某个子树上
//!
//! 句柄记住区域根元素的 raw id 与元素描述符。每次动词重新抓取快照后先按描述符找回根元素
//! （Chromium 的 raw id 是按遍历顺序分配的，页面变化后可能漂移），再取其子树；
//! 子树与整棵树共享 id 映射，工具调用仍按整棵树换算。

use crate::accessibility::raw::ATTR_RAW_ID;
use crate::accessibility::{ElementDescriptor, RawTree};
use crate::agents::Data;
use crate::alumni::{Alumni, DoResult};
use crate::core::AlumniumError;
use crate::drivers::Element;

/// 区域根元素
#[derive(Debug, Clone, PartialEq)]
pub struct AreaRoot {
    pub raw_id: u32,
    pub descriptor: ElementDescriptor,
}

impl AreaRoot {
    pub fn new(raw_id: u32, descriptor: ElementDescriptor) -> Self {
        Self { raw_id, descriptor }
    }

    /// 在新快照中找回根元素：原 raw id 描述符不变时直接用，否则按描述符查找
    pub fn locate(&self, raw: &RawTree) -> Option<u32> {
        if raw.element_by_id(self.raw_id).ok().as_ref() == Some(&self.descriptor) {
            return Some(self.raw_id);
        }
        let mut found = None;
        for root in raw.roots() {
            root.walk(&mut |element| {
                if found.is_some() {
                    return;
                }
                let Some(raw_id) = element.attr(ATTR_RAW_ID).and_then(|id| id.parse::<u32>().ok())
                else {
                    return;
                };
                if raw.element_by_id(raw_id).ok().as_ref() == Some(&self.descriptor) {
                    found = Some(raw_id);
                }
            });
        }
        if found.is_none() {
            tracing::debug!(raw_id = self.raw_id, "Area root not found in snapshot");
        }
        found
    }
}

pub struct Area<'a> {
    alumni: &'a Alumni,
    root: AreaRoot,
    /// Area 代理给出的说明
    pub description: String,
}

impl<'a> Area<'a> {
    pub(crate) fn new(alumni: &'a Alumni, root: AreaRoot, description: String) -> Self {
        tracing::info!(raw_id = root.raw_id, "Area resolved: {}", description);
        Self {
            alumni,
            root,
            description,
        }
    }

    pub fn root(&self) -> &AreaRoot {
        &self.root
    }

    pub async fn do_(&self, goal: &str) -> Result<DoResult, AlumniumError> {
        let root = &self.root;
        self.alumni
            .retrying("do", move || self.alumni.do_in(goal, Some(root)))
            .await
    }

    pub async fn check(&self, statement: &str, vision: bool) -> Result<String, AlumniumError> {
        let root = &self.root;
        self.alumni
            .retrying("check", move || self.alumni.check_in(statement, vision, Some(root)))
            .await
    }

    pub async fn get(&self, data: &str, vision: bool) -> Result<Option<Data>, AlumniumError> {
        let root = &self.root;
        self.alumni
            .retrying("get", move || self.alumni.get_in(data, vision, Some(root)))
            .await
    }

    pub async fn find(&self, description: &str) -> Result<Element, AlumniumError> {
        let root = &self.root;
        self.alumni
            .retrying("find", move || self.alumni.find_in(description, Some(root)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::Platform;

    fn snapshot(extra_first: bool) -> RawTree {
        let banner = if extra_first {
            r#"{"nodeId": "9", "parentId": "1", "backendDOMNodeId": 90, "role": {"value": "banner"}, "childIds": []},"#
        } else {
            ""
        };
        let children = if extra_first { r#"["9", "2"]"# } else { r#"["2"]"# };
        let payload = format!(
            r#"{{"nodes": [
                {{"nodeId": "1", "backendDOMNodeId": 10, "role": {{"value": "RootWebArea"}}, "childIds": {children}}},
                {banner}
                {{"nodeId": "2", "parentId": "1", "backendDOMNodeId": 20, "role": {{"value": "table"}}, "childIds": []}}
            ]}}"#
        );
        RawTree::parse(Platform::Chromium, &payload).unwrap()
    }

    #[test]
    fn test_locate_same_raw_id() {
        let raw = snapshot(false);
        let root = AreaRoot::new(2, raw.element_by_id(2).unwrap());
        assert_eq!(root.locate(&raw), Some(2));
    }

    #[test]
    fn test_locate_after_raw_ids_shift() {
        let before = snapshot(false);
        let root = AreaRoot::new(2, before.element_by_id(2).unwrap());
        // 前面插入了 banner，table 的 raw id 后移
        let after = snapshot(true);
        assert_eq!(root.locate(&after), Some(3));
    }

    #[test]
    fn test_locate_missing_root() {
        let raw = snapshot(false);
        let root = AreaRoot::new(
            2,
            ElementDescriptor::Chromium {
                backend_node_id: 777,
                frame_chain: Vec::new(),
            },
        );
        assert_eq!(root.locate(&raw), None);
    }
}
