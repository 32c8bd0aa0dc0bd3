//! 核心：统一错误类型与动词级恢复策略

pub mod error;
pub mod recovery;

pub use error::{AlumniumError, RecoveryAction};
pub use recovery::RecoveryEngine;
