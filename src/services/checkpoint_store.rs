//! 增量检查点存储 - 业务能力层
//!
//! 只负责"把一批记录可靠落盘 / 读回"能力，不关心流程：
//!
//! - `load`：文件不存在时返回空集合，存在时整体读回
//! - `save`:整体替换式写入——先写临时文件再原子改名，
//!   崩溃时磁盘上要么是旧的完整数组，要么是新的完整数组
//!
//! 并发写者（周期性局部保存）由内部互斥锁串行化。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// 一个检查点文件
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 读回整个记录集合；文件不存在视为空集合
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("读取检查点失败: {}", self.path.display()))?;
        let records = serde_json::from_str(&content)
            .with_context(|| format!("解析检查点失败: {}", self.path.display()))?;
        Ok(records)
    }

    /// 整体替换式保存
    ///
    /// 写入临时文件后 rename 到目标路径，调用方视角下是原子替换。
    pub fn save<T: Serialize>(&self, records: &[T]) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let json = serde_json::to_string_pretty(records)?;

        let mut tmp_path = self.path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        fs::write(&tmp_path, json)
            .with_context(|| format!("写入临时检查点失败: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("替换检查点失败: {}", self.path.display()))?;

        debug!("检查点已保存: {} ({} 条)", self.path.display(), records.len());
        Ok(())
    }
}

/// 扫描集合，返回尚未成功的下标
///
/// 恢复算法只会对这些下标重新调用 Adapter，其余条目保持原值。
pub fn failed_indices<T>(records: &[T], is_success: impl Fn(&T) -> bool) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| !is_success(record))
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        file: String,
        success: bool,
    }

    fn entry(file: &str, success: bool) -> Entry {
        Entry {
            file: file.to_string(),
            success,
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("parsed.json"));

        assert!(!store.exists());
        let records: Vec<Entry> = store.load().unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("parsed.json"));

        let records = vec![entry("a.png", true), entry("b.png", false)];
        store.save(&records).unwrap();

        let loaded: Vec<Entry> = store.load().unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_save_replaces_wholesale_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("parsed.json"));

        store.save(&vec![entry("a.png", true); 5]).unwrap();
        store.save(&[entry("b.png", true)]).unwrap();

        let loaded: Vec<Entry> = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].file, "b.png");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("parsed.json")]);
    }

    #[test]
    fn test_failed_indices_scan() {
        let records = vec![
            entry("0", true),
            entry("1", true),
            entry("2", false),
            entry("3", true),
            entry("4", true),
            entry("5", false),
            entry("6", true),
            entry("7", true),
            entry("8", true),
            entry("9", false),
        ];

        let failed = failed_indices(&records, |r| r.success);
        assert_eq!(failed, vec![2, 5, 9]);
    }

    #[test]
    fn test_failed_indices_all_success_is_empty() {
        let records = vec![entry("a", true), entry("b", true)];
        assert!(failed_indices(&records, |r| r.success).is_empty());
    }
}
