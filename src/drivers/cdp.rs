//! Chromium DevTools 协议传输
//!
//! CdpTransport 只负责「发命令、等结果」；`session_id` 为 flatten 模式下附着的 target 会话。
//! WsCdpTransport 直连浏览器 WebSocket，后台任务按请求 id 分发响应；
//! MockCdpTransport 按方法名返回脚本化结果，供驱动测试使用。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::drivers::{DriverError, CONTEXT_DESTROYED};

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, DriverError>;

    /// 是否支持附着到其他 target（跨域 iframe、标签页切换）
    fn supports_sessions(&self) -> bool {
        true
    }
}

/// CDP 错误对象 → DriverError
pub(crate) fn protocol_error(error: &Value) -> DriverError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown CDP error")
        .to_string();
    if message.contains(CONTEXT_DESTROYED) {
        DriverError::ContextDestroyed(message)
    } else {
        DriverError::Cdp { code, message }
    }
}

/// `Runtime.evaluate` / `callFunctionOn` 的 exceptionDetails → Script 错误
pub(crate) fn check_exception(result: &Value) -> Result<(), DriverError> {
    let Some(details) = result.get("exceptionDetails") else {
        return Ok(());
    };
    let text = details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("script threw an exception")
        .to_string();
    if text.contains(CONTEXT_DESTROYED) {
        Err(DriverError::ContextDestroyed(text))
    } else {
        Err(DriverError::Script(text))
    }
}

#[cfg(feature = "chromium")]
pub use ws::WsCdpTransport;

#[cfg(feature = "chromium")]
mod ws {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::stream::{SplitSink, SplitStream};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    use super::{protocol_error, CdpTransport};
    use crate::drivers::DriverError;

    type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
    type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, DriverError>>>>>;

    /// 浏览器级 WebSocket 连接（`ws://host:port/devtools/browser/<id>`）
    pub struct WsCdpTransport {
        sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
        next_id: AtomicU64,
        pending: Pending,
        timeout: Duration,
        _recv_task: tokio::task::JoinHandle<()>,
    }

    impl WsCdpTransport {
        pub async fn connect(ws_url: &str, timeout: Duration) -> Result<Self, DriverError> {
            let (stream, _) = tokio_tungstenite::connect_async(ws_url)
                .await
                .map_err(|e| DriverError::Transport(format!("{ws_url}: {e}")))?;
            let (sink, source) = stream.split();
            let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
            let recv_task = tokio::spawn(receive_loop(source, pending.clone()));
            tracing::debug!(url = %ws_url, "CDP websocket connected");

            Ok(Self {
                sink: tokio::sync::Mutex::new(sink),
                next_id: AtomicU64::new(1),
                pending,
                timeout,
                _recv_task: recv_task,
            })
        }

        /// 通过 `http://host:port/json/version` 查找浏览器 WebSocket 地址
        pub async fn discover(http_endpoint: &str, timeout: Duration) -> Result<Self, DriverError> {
            let url = format!("{}/json/version", http_endpoint.trim_end_matches('/'));
            let version: Value = reqwest::get(&url)
                .await
                .map_err(|e| DriverError::Transport(format!("{url}: {e}")))?
                .json()
                .await
                .map_err(|e| DriverError::Transport(format!("{url}: {e}")))?;
            let ws_url = version
                .get("webSocketDebuggerUrl")
                .and_then(Value::as_str)
                .ok_or_else(|| DriverError::Transport("webSocketDebuggerUrl missing".into()))?;
            Self::connect(ws_url, timeout).await
        }
    }

    async fn receive_loop(mut source: SplitStream<WsStream>, pending: Pending) {
        while let Some(message) = source.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    tracing::debug!("CDP websocket closed");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "CDP websocket error");
                    break;
                }
            };
            let value: Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, "Unparseable CDP message");
                    continue;
                }
            };
            // 事件没有 id，当前不订阅
            let Some(id) = value.get("id").and_then(Value::as_u64) else {
                continue;
            };
            let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
            if let Some(tx) = waiter {
                let result = match value.get("error") {
                    Some(error) => Err(protocol_error(error)),
                    None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
                };
                let _ = tx.send(result);
            }
        }
        if let Ok(mut pending) = pending.lock() {
            pending.clear();
        }
    }

    #[async_trait]
    impl CdpTransport for WsCdpTransport {
        async fn send(
            &self,
            method: &str,
            params: Value,
            session_id: Option<&str>,
        ) -> Result<Value, DriverError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut request = json!({"id": id, "method": method, "params": params});
            if let Some(session_id) = session_id {
                request["sessionId"] = json!(session_id);
            }
            tracing::trace!(method, id, "CDP send");

            let (tx, rx) = oneshot::channel();
            if let Ok(mut pending) = self.pending.lock() {
                pending.insert(id, tx);
            }
            {
                let mut sink = self.sink.lock().await;
                sink.send(Message::Text(request.to_string()))
                    .await
                    .map_err(|e| DriverError::Transport(e.to_string()))?;
            }

            match tokio::time::timeout(self.timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(DriverError::Transport("CDP connection closed".into())),
                Err(_) => {
                    if let Ok(mut pending) = self.pending.lock() {
                        pending.remove(&id);
                    }
                    Err(DriverError::Timeout(format!("{method} timed out")))
                }
            }
        }
    }
}

/// 一次记录下来的 CDP 调用
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// 脚本化 CDP：一次性结果队列优先，其次是常驻结果，未配置的方法返回 `{}`
#[derive(Default)]
pub struct MockCdpTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, DriverError>>>>,
    sticky: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockCdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该方法之后每次都返回 value
    pub fn on(&self, method: &str, value: Value) -> &Self {
        if let Ok(mut sticky) = self.sticky.lock() {
            sticky.insert(method.to_string(), value);
        }
        self
    }

    /// 只返回一次
    pub fn push(&self, method: &str, result: Result<Value, DriverError>) -> &Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.entry(method.to_string()).or_default().push_back(result);
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }
}

#[async_trait]
impl CdpTransport for MockCdpTransport {
    async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, DriverError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                method: method.to_string(),
                params,
                session_id: session_id.map(String::from),
            });
        }
        let queued = self
            .queued
            .lock()
            .ok()
            .and_then(|mut q| q.get_mut(method).and_then(VecDeque::pop_front));
        if let Some(result) = queued {
            return result;
        }
        let sticky = self
            .sticky
            .lock()
            .ok()
            .and_then(|s| s.get(method).cloned());
        Ok(sticky.unwrap_or_else(|| json!({})))
    }
}
