//! 失败图片重试驱动 - 编排层
//!
//! ## 职责
//!
//! 读入失败清单（`failed_images.json`，缺失时回退到上次运行写出的
//! `json_parse_errors.json`），对其中每张图片用更严格的提示词和
//! 更慷慨的重试预算重新解析，
//! 然后把新结果**按文件名**合并回各文件夹的 `parsed.json`：
//!
//! 1. 按文件夹分组，文件夹内逐张顺序处理（重试量小，不值得并发）
//! 2. 新记录整条替换检查点里同名文件的旧记录；
//!    检查点里找不到的文件名追加到末尾
//! 3. 每个文件夹处理完立即落盘，处理到一半被杀也只损失当前文件夹
//! 4. 相邻调用之间固定 200ms 间隔，给配额让路

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::question::{FailedImage, QuestionRecord};
use crate::services::checkpoint_store::CheckpointStore;
use crate::services::gemini_service::{mime_type_for, GeminiService};
use crate::utils::logging::{log_run_footer, log_run_header};
use crate::workflow::retry::{execute_with_retry, RetryPolicy};

/// 调用间隔，重试跑在配额吃紧的时候，主动放慢
const PACING: Duration = Duration::from_millis(200);

/// 运行失败图片重试
pub async fn run(config: &Config) -> Result<()> {
    if config.api_key.is_empty() {
        anyhow::bail!("未设置 GOOGLE_API_KEY / GEMINI_API_KEY，无法调用推理 API");
    }

    // 优先读人工整理的失败清单，缺失时回退到 parse 写出的诊断文件（同一形状）
    let mut failed_file = PathBuf::from(&config.failed_images_file);
    if !failed_file.is_file() {
        failed_file = PathBuf::from(&config.errors_file);
    }
    if !failed_file.is_file() {
        anyhow::bail!("失败清单不存在: {}（先跑 parse）", failed_file.display());
    }

    let failed: Vec<FailedImage> = CheckpointStore::new(&failed_file).load()?;
    if failed.is_empty() {
        info!("失败清单为空，无事可做");
        return Ok(());
    }

    log_run_header("失败图片重试");
    info!("📊 模型: {}", config.retry_model);
    info!("📋 待重试: {} 张图片", failed.len());

    // 按文件夹分组，保持文件夹内的文件顺序
    let mut by_folder: BTreeMap<String, Vec<FailedImage>> = BTreeMap::new();
    for entry in failed {
        by_folder.entry(entry.folder.clone()).or_default().push(entry);
    }

    // 重试轮换用更严格的提示词
    let service = Arc::new(GeminiService::with_strict_prompt(config, &config.retry_model));
    let policy = RetryPolicy::retry_parse();
    let input_dir = PathBuf::from(&config.input_dir);

    let mut fixed = 0usize;
    let mut still_failing = 0usize;

    for (folder, entries) in by_folder {
        let folder_path = input_dir.join(&folder);
        if !folder_path.is_dir() {
            warn!("⚠️ 跳过 {}: 文件夹不存在", folder);
            still_failing += entries.len();
            continue;
        }

        let (folder_fixed, folder_failed) = retry_folder(
            &folder_path,
            &folder,
            &entries,
            &service,
            policy,
            &config.parsed_file_name,
        )
        .await?;

        fixed += folder_fixed;
        still_failing += folder_failed;
    }

    log_run_footer();
    info!("✓ 修复: {} 张", fixed);
    if still_failing > 0 {
        warn!("⚠️ 仍然失败: {} 张", still_failing);
    } else {
        info!("所有失败图片均已修复");
    }

    Ok(())
}

/// 重试一个文件夹里的失败图片，并把结果合并回检查点
async fn retry_folder(
    folder_path: &Path,
    folder_name: &str,
    entries: &[FailedImage],
    service: &Arc<GeminiService>,
    policy: RetryPolicy,
    parsed_file_name: &str,
) -> Result<(usize, usize)> {
    let store = CheckpointStore::new(folder_path.join(parsed_file_name));
    let mut records: Vec<QuestionRecord> = store.load()?;

    let mut fixed = 0usize;
    let mut failed = 0usize;

    for entry in entries {
        let image_path = folder_path.join(&entry.file);
        if !image_path.is_file() {
            warn!("⚠️ {}/{}: 图片不存在，跳过", folder_name, entry.file);
            failed += 1;
            continue;
        }

        let new_record = retry_single_image(&image_path, &entry.file, service, policy).await;
        if new_record.success {
            fixed += 1;
            info!("✓ {}/{}", folder_name, entry.file);
        } else {
            failed += 1;
            warn!(
                "❌ {}/{}: {}",
                folder_name,
                entry.file,
                new_record.error.as_deref().unwrap_or("unknown")
            );
        }

        merge_record(&mut records, new_record);

        tokio::time::sleep(PACING).await;
    }

    // 文件夹处理完立即落盘
    store.save(&records)?;
    info!("{}: 检查点已更新（{} 条）", folder_name, records.len());

    Ok((fixed, failed))
}

async fn retry_single_image(
    image_path: &Path,
    file_name: &str,
    service: &Arc<GeminiService>,
    policy: RetryPolicy,
) -> QuestionRecord {
    let mime_type = mime_type_for(file_name);

    let outcome = execute_with_retry(&policy, || {
        let service = service.clone();
        let image_path = image_path.to_path_buf();
        async move {
            let image_data = tokio::fs::read(&image_path)
                .await
                .map_err(|e| crate::error::CallError::transient(format!("读取图片失败: {}", e)))?;
            service.parse_question_image(&image_data, mime_type).await
        }
    })
    .await;

    QuestionRecord::from_outcome(file_name, outcome)
}

/// 以 `file` 为身份把新记录合并进检查点集合
///
/// 命中则整条替换，未命中则追加。
fn merge_record(records: &mut Vec<QuestionRecord>, new_record: QuestionRecord) {
    match records.iter_mut().find(|r| r.file == new_record.file) {
        Some(slot) => *slot = new_record,
        None => records.push(new_record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::workflow::CallOutcome;

    fn failed_record(file: &str) -> QuestionRecord {
        QuestionRecord::from_outcome(
            file,
            CallOutcome::failed(
                ErrorKind::Decode,
                "JSON parse error: eof".to_string(),
                Some("garbage".to_string()),
            ),
        )
    }

    fn ok_record(file: &str) -> QuestionRecord {
        use crate::models::question::{ParsedQuestion, QuestionType};
        QuestionRecord::from_outcome(
            file,
            CallOutcome::ok(ParsedQuestion {
                question_number: "3.".to_string(),
                points: 1,
                question_text: "Hol termelődik az epe?".to_string(),
                question_type: QuestionType::Open,
                correct_answer: "A májban".to_string(),
                options: vec![],
            }),
        )
    }

    #[test]
    fn test_merge_replaces_matching_file_in_place() {
        let mut records = vec![failed_record("q_01.png"), failed_record("q_02.png")];

        merge_record(&mut records, ok_record("q_02.png"));

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].file, "q_02.png");
        assert!(records[1].success);
        assert!(records[1].raw_response.is_none());
        // 未触及的记录保持原样
        assert!(!records[0].success);
    }

    #[test]
    fn test_merge_appends_unknown_file() {
        let mut records = vec![failed_record("q_01.png")];

        merge_record(&mut records, ok_record("q_09.png"));

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].file, "q_09.png");
    }
}
