//! 弹性调用执行器 - 流程层
//!
//! 把一次 Adapter 调用包装成"带重试预算的调用"：
//!
//! 1. 限流错误：睡 `(attempt + 1) * rate_limit_backoff` 后重试
//! 2. 解析错误：睡固定短延迟后立即重试（不占用限流退避时间）
//! 3. 其他瞬时错误：睡固定短延迟后重试
//!
//! 三种错误共享同一个 `max_attempts` 预算。无论怎么失败，
//! 本函数只返回 `CallOutcome`，绝不向上抛错——一个条目的失败
//! 不允许中断兄弟条目。

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::{CallError, ErrorKind};

/// 重试策略
///
/// 三个调用点各有一套参数，全部集中在这里。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 总尝试次数（含第一次）
    pub max_attempts: u32,
    /// 限流退避单位，实际睡眠 = (attempt + 1) * 单位
    pub rate_limit_backoff: Duration,
    /// 解析失败后的固定重试延迟
    pub decode_retry_delay: Duration,
    /// 其他瞬时错误的固定重试延迟
    pub transient_retry_delay: Duration,
}

impl RetryPolicy {
    /// 图片解析（首轮）：3 次尝试，2 秒退避单位
    pub fn parse() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(2),
            decode_retry_delay: Duration::from_millis(500),
            transient_retry_delay: Duration::from_secs(1),
        }
    }

    /// 失败图片重试：5 次尝试，3 秒退避单位
    pub fn retry_parse() -> Self {
        Self {
            max_attempts: 5,
            rate_limit_backoff: Duration::from_secs(3),
            decode_retry_delay: Duration::from_secs(1),
            transient_retry_delay: Duration::from_secs(1),
        }
    }

    /// 题目分类：3 次尝试，2 秒退避单位
    pub fn categorize() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(2),
            decode_retry_delay: Duration::from_millis(500),
            transient_retry_delay: Duration::from_secs(1),
        }
    }
}

/// 一次弹性调用的最终结果
///
/// 不变量：`success == true` 当且仅当 `data` 有值且 `error_kind` 为空。
#[derive(Debug, Clone)]
pub struct CallOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// 仅解析失败时保留，用于事后诊断
    pub raw_response: Option<String>,
}

impl<T> CallOutcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            raw_response: None,
        }
    }

    pub fn failed(kind: ErrorKind, error: String, raw_response: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            error_kind: Some(kind),
            raw_response,
        }
    }
}

/// 带重试地执行一次 Adapter 调用
///
/// `op` 是一个能力型函数值：每次调用发起一次完整的远程请求
/// （包括重新读取输入，保证各次尝试互相独立）。
pub async fn execute_with_retry<T, F, Fut>(policy: &RetryPolicy, op: F) -> CallOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut last_error: Option<CallError> = None;

    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(data) => return CallOutcome::ok(data),
            Err(err) => {
                let attempts_left = attempt + 1 < policy.max_attempts;
                if !attempts_left {
                    last_error = Some(err);
                    break;
                }

                match &err {
                    CallError::RateLimited { .. } => {
                        let backoff = policy.rate_limit_backoff * (attempt + 1);
                        debug!("限流，第 {} 次尝试后退避 {:?}", attempt + 1, backoff);
                        sleep(backoff).await;
                    }
                    CallError::Decode { .. } => {
                        debug!("解析失败，第 {} 次尝试后短延迟重试", attempt + 1);
                        sleep(policy.decode_retry_delay).await;
                    }
                    CallError::Transient { .. } => {
                        debug!("调用失败，第 {} 次尝试后重试: {}", attempt + 1, err);
                        sleep(policy.transient_retry_delay).await;
                    }
                }
            }
        }
    }

    match last_error {
        Some(CallError::Decode {
            message,
            raw_response,
        }) => CallOutcome::failed(ErrorKind::Decode, format!("JSON parse error: {}", message), raw_response),
        Some(err) => CallOutcome::failed(err.kind(), err.to_string(), None),
        // max_attempts == 0 的防卫分支
        None => CallOutcome::failed(ErrorKind::Exhausted, "Max retries exceeded".to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            rate_limit_backoff: Duration::from_secs(2),
            decode_retry_delay: Duration::from_millis(500),
            transient_retry_delay: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let outcome = execute_with_retry(&test_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, CallError>(42u32) }
        })
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.data, Some(42));
        assert!(outcome.error_kind.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "成功后不应再尝试");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausts_with_increasing_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let timestamps = Arc::new(Mutex::new(Vec::new()));

        let outcome = {
            let calls = calls.clone();
            let timestamps = timestamps.clone();
            execute_with_retry(&test_policy(), move || {
                calls.fetch_add(1, Ordering::SeqCst);
                timestamps.lock().unwrap().push(Instant::now());
                async { Err::<u32, _>(CallError::rate_limited("too many requests")) }
            })
            .await
        };

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "应恰好尝试 max_attempts 次");

        // 两个间隔应严格递增：2s，然后 4s
        let ts = timestamps.lock().unwrap();
        let gap1 = ts[1] - ts[0];
        let gap2 = ts[2] - ts[1];
        assert_eq!(gap1, Duration::from_secs(2));
        assert_eq!(gap2, Duration::from_secs(4));
        assert!(gap2 > gap1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failures_recover_without_rate_limit_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let outcome = {
            let calls = calls.clone();
            execute_with_retry(&test_policy(), move || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(CallError::decode("not json", Some("garbage".to_string())))
                    } else {
                        Ok("parsed".to_string())
                    }
                }
            })
            .await
        };

        assert!(outcome.success);
        assert_eq!(outcome.data.as_deref(), Some("parsed"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // 两次解析重试各 0.5s，远小于限流退避的 2s + 4s
        let elapsed = start.elapsed();
        assert_eq!(elapsed, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_exhaustion_preserves_raw_response() {
        let outcome: CallOutcome<u32> = execute_with_retry(&test_policy(), || async {
            Err(CallError::decode("unexpected token", Some("```oops```".to_string())))
        })
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Decode));
        assert_eq!(outcome.raw_response.as_deref(), Some("```oops```"));
        assert!(outcome.error.unwrap().contains("unexpected token"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_then_exhaust() {
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = {
            let calls = calls.clone();
            execute_with_retry(&test_policy(), move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(CallError::transient("connection reset")) }
            })
            .await
        };

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.raw_response.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success_consumes_budget() {
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = {
            let calls = calls.clone();
            execute_with_retry(&test_policy(), move || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(CallError::rate_limited("slow down"))
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await
        };

        assert!(outcome.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
