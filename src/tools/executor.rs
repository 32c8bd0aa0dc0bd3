//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时，按顺序把 ToolCall 分派到驱动；
//! 每次调用输出结构化审计日志（JSON），超时转为 DriverError::Timeout。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AlumniumError;
use crate::drivers::{Driver, DriverError};
use crate::tools::{ToolCall, ToolRegistry};

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 驱动支持的全部工具
    pub fn for_driver(driver: &dyn Driver, timeout: Duration) -> Self {
        Self::new(ToolRegistry::for_kinds(&driver.supported_tools()), timeout)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行一次工具调用（id 已映射为 raw id）
    pub async fn execute(&self, driver: &dyn Driver, call: &ToolCall) -> Result<(), AlumniumError> {
        let start = Instant::now();
        let args_preview = args_preview(&call.args);
        let result = timeout(
            self.timeout,
            self.registry.execute(driver, &call.name, call.args.clone()),
        )
        .await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(())) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(DriverError::Timeout(format!(
                "{} did not finish within {:?}",
                call.name, self.timeout
            ))
            .into()),
        }
    }

    /// 按顺序执行，遇错即停
    pub async fn execute_all(
        &self,
        driver: &dyn Driver,
        calls: &[ToolCall],
    ) -> Result<(), AlumniumError> {
        for call in calls {
            self.execute(driver, call).await?;
        }
        Ok(())
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_preview_truncates() {
        let long = serde_json::json!({"text": "x".repeat(500)});
        let preview = args_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 203);
        assert_eq!(args_preview(&serde_json::json!({"id": 1})), r#"{"id":1}"#);
    }
}
