//! 片段缓存：缓存的决策只在它依赖的元素仍然存在时才复用
//!
//! - Planner 条目以目标哈希为键（plans），Actor 条目以步骤哈希为键（actions）
//! - Actor 更新时把工具调用引用的元素（id / from_id / to_id）的全部属性存为片段，并合并进同一目标的 Planner 条目
//! - 查询时解析最后一条用户消息：```xml 围栏内是树，目标与步骤只从围栏外的文本读取；逐个校验片段：id 对应元素存在、标签等于 role、
//!   所有存储的属性在（布尔 / 数字归一化后）相等；只比较属性，不比较元素文本
//!
//! 目录：`<cache_dir>/<provider>/<model>/fragments/<plans|actions>/<hash>/{response.json,fragments.json}`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::accessibility::xml::{parse_fragment, XmlElement};
use crate::agents::AgentKind;
use crate::cache::{hash_hex, model_dir, Cache, CacheError, FileLock};
use crate::llm::{ChatRequest, ChatResponse, Model, Usage};

const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const RESPONSE_FILE: &str = "response.json";
const FRAGMENTS_FILE: &str = "fragments.json";
const PLANS: &str = "plans";
const ACTIONS: &str = "actions";

/// 元素属性快照：`{"role": tag, "id": 3, "name": "Login", ...}`
pub type Fragment = Map<String, Value>;

#[derive(Debug, Clone)]
struct Entry {
    response: ChatResponse,
    fragments: Vec<Fragment>,
    should_save: bool,
}

/// (llm_string, plans|actions, hash)
type MemoryKey = (String, &'static str, String);

#[derive(Debug, Default, PartialEq)]
struct ParsedPrompt {
    goal: Option<String>,
    step: Option<String>,
    tree: Option<String>,
}

impl ParsedPrompt {
    /// (agent 目录, 键文本)：Planner 以目标为键，Actor 以步骤为键
    fn cache_key(&self, agent: AgentKind) -> Option<(&'static str, &str)> {
        match agent {
            AgentKind::Planner => self.goal.as_deref().map(|goal| (PLANS, goal)),
            AgentKind::Actor => self.step.as_deref().map(|step| (ACTIONS, step)),
            _ => None,
        }
    }
}

const XML_FENCE: &str = "```xml";
const PLANNER_GOAL_MARKER: &str = "achieve the following goal:";

/// 以 `marker` 开头的行的剩余部分
fn line_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.trim_start().strip_prefix(marker))
        .map(str::trim)
}

/// 拆成 (围栏前文本, 树, 围栏后文本)；树内容不参与目标 / 步骤解析
fn split_fence(message: &str) -> (&str, Option<&str>, &str) {
    let Some(open) = message.find(XML_FENCE) else {
        return (message, None, "");
    };
    let body_start = open + XML_FENCE.len();
    let rest = &message[body_start..];
    match rest.rfind("\n```") {
        Some(close) => (
            &message[..open],
            Some(rest[..close].trim()),
            &rest[close + "\n```".len()..],
        ),
        None => (&message[..open], None, ""),
    }
}

fn parse_prompt(message: &str) -> ParsedPrompt {
    let (before, tree, after) = split_fence(message);
    let goal = line_after(before, "Goal:").map(String::from).or_else(|| {
        after
            .find(PLANNER_GOAL_MARKER)
            .map(|i| after[i + PLANNER_GOAL_MARKER.len()..].trim().to_string())
    });
    let step = line_after(before, "Step:").map(String::from);
    ParsedPrompt {
        goal,
        step,
        tree: tree.map(String::from),
    }
}

/// 布尔与纯数字属性归一化，其余保持字符串
fn coerce(value: &str) -> Value {
    if value.eq_ignore_ascii_case("true") {
        Value::Bool(true)
    } else if value.eq_ignore_ascii_case("false") {
        Value::Bool(false)
    } else if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        value
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(value.to_string()))
    } else {
        Value::String(value.to_string())
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn find_by_id<'a>(roots: &'a [XmlElement], id: &str) -> Option<&'a XmlElement> {
    roots
        .iter()
        .find_map(|root| root.find(&|e| e.attr("id") == Some(id)))
}

fn extract_fragment(roots: &[XmlElement], id: u32) -> Option<Fragment> {
    let element = find_by_id(roots, &id.to_string())?;
    let mut fragment = Map::new();
    fragment.insert("role".to_string(), Value::String(element.tag.clone()));
    for (key, value) in &element.attrs {
        fragment.insert(key.clone(), coerce(value));
    }
    Some(fragment)
}

fn attribute_matches(expected: &Value, actual: &str) -> bool {
    match expected {
        Value::Bool(b) => actual.eq_ignore_ascii_case("true") == *b,
        Value::Number(n) => actual.parse::<u64>().ok() == n.as_u64(),
        Value::String(s) => actual == s,
        _ => false,
    }
}

fn validate(fragments: &[Fragment], tree_xml: &str) -> bool {
    if fragments.is_empty() {
        return true;
    }
    let roots = match parse_fragment(tree_xml) {
        Ok(roots) => roots,
        Err(e) => {
            tracing::debug!(error = %e, "Fragments cache: tree does not parse");
            return false;
        }
    };
    fragments.iter().all(|fragment| {
        let Some(id) = fragment.get("id").and_then(id_text) else {
            tracing::debug!("Fragment missing `id`");
            return false;
        };
        let Some(element) = find_by_id(&roots, &id) else {
            tracing::debug!(id = %id, "Fragment element not found");
            return false;
        };
        if fragment.get("role").and_then(Value::as_str) != Some(element.tag.as_str()) {
            tracing::debug!(id = %id, tag = %element.tag, "Fragment role mismatch");
            return false;
        }
        fragment
            .iter()
            .filter(|(key, _)| key.as_str() != "role")
            .all(|(key, expected)| match element.attr(key) {
                Some(actual) if attribute_matches(expected, actual) => true,
                actual => {
                    tracing::debug!(id = %id, attribute = %key, ?actual, %expected, "Fragment attribute mismatch");
                    false
                }
            })
    })
}

pub struct FragmentsCache {
    root: PathBuf,
    memory: Mutex<HashMap<MemoryKey, Entry>>,
    usage: Mutex<Usage>,
}

impl FragmentsCache {
    pub fn new(cache_dir: &Path, model: &Model) -> Self {
        Self {
            root: model_dir(cache_dir, model, "fragments"),
            memory: Mutex::new(HashMap::new()),
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn parsed(request: &ChatRequest) -> Option<ParsedPrompt> {
        if !matches!(request.agent, AgentKind::Planner | AgentKind::Actor) {
            return None;
        }
        let parsed = parse_prompt(request.last_user_message()?);
        parsed.tree.as_ref()?;
        Some(parsed)
    }

    fn entry_dir(&self, agent_dir: &str, hash: &str) -> PathBuf {
        self.root.join(agent_dir).join(hash)
    }

    fn read_entry(&self, agent_dir: &str, hash: &str) -> Option<(ChatResponse, Vec<Fragment>)> {
        let dir = self.entry_dir(agent_dir, hash);
        let fragments = std::fs::read_to_string(dir.join(FRAGMENTS_FILE)).ok()?;
        let response = std::fs::read_to_string(dir.join(RESPONSE_FILE)).ok()?;
        match (
            serde_json::from_str(&fragments),
            serde_json::from_str(&response),
        ) {
            (Ok(fragments), Ok(response)) => Some((response, fragments)),
            _ => {
                tracing::debug!(dir = %dir.display(), "Malformed fragments cache entry");
                None
            }
        }
    }

    fn write_entry(&self, agent_dir: &str, hash: &str, entry: &Entry) -> Result<(), CacheError> {
        let dir = self.entry_dir(agent_dir, hash);
        std::fs::create_dir_all(&dir)?;
        let _lock = FileLock::acquire(&dir, LOCK_TIMEOUT)?;
        std::fs::write(
            dir.join(RESPONSE_FILE),
            serde_json::to_string_pretty(&entry.response)?,
        )?;
        std::fs::write(
            dir.join(FRAGMENTS_FILE),
            serde_json::to_string_pretty(&entry.fragments)?,
        )?;
        Ok(())
    }

    fn record_hit(&self, response: &ChatResponse) {
        if let Ok(mut usage) = self.usage.lock() {
            usage.add(&response.usage);
        }
    }

    /// 把 Actor 片段并入同一目标的 Planner 条目（按 id 去重，后写覆盖）
    fn merge_into_plan(memory: &mut HashMap<MemoryKey, Entry>, goal: &str, new: &[Fragment]) {
        let goal_hash = hash_hex(goal);
        let plan = memory
            .iter_mut()
            .find(|((_, agent_dir, hash), _)| *agent_dir == PLANS && *hash == goal_hash);
        let Some((_, entry)) = plan else {
            return;
        };
        for fragment in new {
            let id = fragment.get("id").and_then(id_text);
            match entry
                .fragments
                .iter_mut()
                .find(|existing| existing.get("id").and_then(id_text) == id)
            {
                Some(existing) if existing == fragment => {}
                Some(existing) => {
                    *existing = fragment.clone();
                    entry.should_save = true;
                }
                None => {
                    entry.fragments.push(fragment.clone());
                    entry.should_save = true;
                }
            }
        }
        tracing::debug!(total = entry.fragments.len(), "Updated planner fragments");
    }
}

impl Cache for FragmentsCache {
    fn name(&self) -> &'static str {
        "FragmentsCache"
    }

    fn lookup(&self, request: &ChatRequest, llm_string: &str) -> Option<ChatResponse> {
        let parsed = Self::parsed(request)?;
        let tree = parsed.tree.as_deref()?;
        let (agent_dir, key_text) = parsed.cache_key(request.agent)?;
        let hash = hash_hex(key_text);
        let mem_key: MemoryKey = (llm_string.to_string(), agent_dir, hash.clone());

        let in_memory = self
            .memory
            .lock()
            .ok()
            .and_then(|memory| memory.get(&mem_key).cloned());
        if let Some(entry) = in_memory {
            if validate(&entry.fragments, tree) {
                tracing::debug!(agent = agent_dir, key = %key_text, "Fragments cache hit (in-memory)");
                self.record_hit(&entry.response);
                return Some(entry.response);
            }
        }

        let (response, fragments) = self.read_entry(agent_dir, &hash)?;
        if !validate(&fragments, tree) {
            tracing::debug!(agent = agent_dir, key = %key_text, "Fragments cache miss (validation failed)");
            return None;
        }
        tracing::debug!(agent = agent_dir, key = %key_text, "Fragments cache hit (file)");
        self.record_hit(&response);
        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(
                mem_key,
                Entry {
                    response: response.clone(),
                    fragments,
                    should_save: false,
                },
            );
        }
        Some(response)
    }

    fn update(&self, request: &ChatRequest, llm_string: &str, response: &ChatResponse) {
        let Some(parsed) = Self::parsed(request) else {
            return;
        };
        let Some(tree) = parsed.tree.as_deref() else {
            return;
        };
        let Some((agent_dir, key_text)) = parsed.cache_key(request.agent) else {
            return;
        };
        let mem_key: MemoryKey = (llm_string.to_string(), agent_dir, hash_hex(key_text));

        let fragments = if agent_dir == PLANS {
            Vec::new()
        } else {
            let roots = parse_fragment(tree).unwrap_or_default();
            let mut ids: Vec<u32> = response
                .tool_calls
                .iter()
                .flat_map(|call| call.referenced_ids())
                .collect();
            ids.sort_unstable();
            ids.dedup();
            ids.into_iter()
                .filter_map(|id| extract_fragment(&roots, id))
                .collect()
        };

        let Ok(mut memory) = self.memory.lock() else {
            return;
        };
        if agent_dir == ACTIONS {
            if let Some(goal) = parsed.goal.as_deref() {
                Self::merge_into_plan(&mut memory, goal, &fragments);
            }
        }
        memory.insert(
            mem_key,
            Entry {
                response: response.clone(),
                fragments,
                should_save: true,
            },
        );
    }

    fn save(&self) -> Result<(), CacheError> {
        let entries: Vec<_> = match self.memory.lock() {
            Ok(mut memory) => memory.drain().collect(),
            Err(_) => return Ok(()),
        };
        for ((_, agent_dir, hash), entry) in entries {
            if !entry.should_save {
                continue;
            }
            if let Err(e) = self.write_entry(agent_dir, &hash, &entry) {
                tracing::warn!(agent = agent_dir, hash = %hash, error = %e, "Failed to save fragments cache entry");
            }
        }
        Ok(())
    }

    fn discard(&self) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.clear();
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.discard();
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }

    fn usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}
