//! 解析失败聚合器 - 业务能力层
//!
//! 只负责"跨 worker 收集解析失败诊断"能力，不关心流程。
//! 所有并发 worker 共享同一个实例（Arc），内部用互斥锁串行化追加；
//! 运行结束时一次性写出诊断侧文件（仅在非空时）。

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::debug;

use crate::models::question::FailedImage;

/// 解析失败诊断收集器（append-only）
#[derive(Default)]
pub struct DecodeFailureLog {
    entries: Mutex<Vec<FailedImage>>,
}

impl DecodeFailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条诊断（可从任意 worker 并发调用）
    pub fn record(&self, entry: FailedImage) {
        debug!("收集解析失败: {}/{}", entry.folder, entry.file);
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 非空时写出诊断侧文件，返回写出的条数
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<usize> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if entries.is_empty() {
            return Ok(0);
        }

        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&*entries)?;
        fs::write(path, json).with_context(|| format!("写入诊断文件失败: {}", path.display()))?;

        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn failure(folder: &str, file: &str) -> FailedImage {
        FailedImage {
            folder: folder.to_string(),
            file: file.to_string(),
            error: Some("JSON parse error".to_string()),
            raw_response: Some("not json".to_string()),
        }
    }

    #[test]
    fn test_empty_log_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("json_parse_errors.json");

        let log = DecodeFailureLog::new();
        let written = log.write_to(&path).unwrap();

        assert_eq!(written, 0);
        assert!(!path.exists(), "空收集器不应产生侧文件");
    }

    #[test]
    fn test_records_are_written_as_json_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("json_parse_errors.json");

        let log = DecodeFailureLog::new();
        log.record(failure("2019_01", "q_03.png"));
        log.record(failure("2019_02", "q_07.png"));

        let written = log.write_to(&path).unwrap();
        assert_eq!(written, 2);

        let content = fs::read_to_string(&path).unwrap();
        let entries: Vec<FailedImage> = serde_json::from_str(&content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].folder, "2019_01");
    }

    #[tokio::test]
    async fn test_concurrent_recording_loses_nothing() {
        let log = Arc::new(DecodeFailureLog::new());

        let mut handles = Vec::new();
        for i in 0..50 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.record(failure("folder", &format!("q_{:02}.png", i)));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(log.len(), 50);
    }
}
