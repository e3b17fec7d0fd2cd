//! 推理调用错误类型
//!
//! 在 Adapter 边界（`GeminiService`）对每一次远程调用的失败做显式分类，
//! 重试策略（`workflow::retry`）完全依赖这里的分类结果：
//!
//! - `Decode`：响应不是合法的结构化 JSON，立即短延迟重试，终态时保留原始响应
//! - `RateLimited`：后端返回 HTTP 429，按 `(attempt + 1) * backoff_unit` 退避
//! - `Transient`：其他网络 / API 错误，固定短延迟重试
//!
//! 分类依据 HTTP 状态码与响应结构，而不是在错误文本里找 "429" 字符串。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单次推理调用的失败分类
#[derive(Debug, Error)]
pub enum CallError {
    /// 响应无法解析为预期的 JSON 结构
    #[error("JSON parse error: {message}")]
    Decode {
        message: String,
        /// 原始响应文本，保留用于事后诊断
        raw_response: Option<String>,
    },

    /// 后端限流（HTTP 429）
    #[error("rate limited (HTTP 429): {message}")]
    RateLimited { message: String },

    /// 其他可重试的调用错误（网络、5xx 等）
    #[error("API error: {message}")]
    Transient { message: String },
}

impl CallError {
    pub fn decode(message: impl Into<String>, raw_response: Option<String>) -> Self {
        CallError::Decode {
            message: message.into(),
            raw_response,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        CallError::RateLimited {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        CallError::Transient {
            message: message.into(),
        }
    }

    /// 对应的检查点 `error_type` 取值
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Decode { .. } => ErrorKind::Decode,
            CallError::RateLimited { .. } => ErrorKind::RateLimited,
            CallError::Transient { .. } => ErrorKind::Transient,
        }
    }
}

/// 检查点文件中 `error_type` 字段的取值
///
/// 除 `CallError` 的三种分类外，还有两个由调度层合成的终态：
/// `Exhausted`（重试预算耗尽且没有保留到具体错误）和
/// `Exception`（fan-out 工作任务本身 panic，与 Adapter 无关）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    RateLimited,
    Transient,
    Exhausted,
    Exception,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_kind_mapping() {
        assert_eq!(CallError::decode("bad json", None).kind(), ErrorKind::Decode);
        assert_eq!(CallError::rate_limited("429").kind(), ErrorKind::RateLimited);
        assert_eq!(CallError::transient("boom").kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_error_kind_wire_format() {
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");

        let kind: ErrorKind = serde_json::from_str("\"decode\"").unwrap();
        assert_eq!(kind, ErrorKind::Decode);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CallError>();
    }
}
