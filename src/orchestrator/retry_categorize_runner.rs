//! 分类重试驱动 - 编排层
//!
//! ## 职责
//!
//! 读入合并检查点 `categorized_questions.json`，找出其中分类仍然
//! 失败的条目，只对这些条目重新调用分类 Adapter：
//!
//! 1. **幂等**：全部成功时零 Adapter 调用、零写盘，直接返回
//! 2. **就地更新**：只替换被选中条目的 `categorization` 字段，
//!    其余字段（含未建模字段）原样保留
//! 3. **周期落盘**：每完成 10 条保存一次检查点，
//!    结束时再保存一次；中途保存失败只告警不中断
//!
//! 失败条目的选取发生在 API key 校验之前——没有密钥也能确认
//! "无事可做"。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::fan_out;
use crate::models::categorization::{Categorization, CategorizedQuestion};
use crate::services::checkpoint_store::{failed_indices, CheckpointStore};
use crate::services::gemini_service::GeminiService;
use crate::utils::logging::{log_run_footer, log_run_header, truncate_text};
use crate::workflow::retry::{execute_with_retry, RetryPolicy};

/// 每完成多少条保存一次检查点
const SAVE_INTERVAL: usize = 10;

/// 运行分类重试
pub async fn run(config: &Config) -> Result<()> {
    let combined_file = PathBuf::from(&config.combined_file);
    if !combined_file.is_file() {
        anyhow::bail!("合并检查点不存在: {}", combined_file.display());
    }

    let store = CheckpointStore::new(&combined_file);
    let mut all: Vec<CategorizedQuestion> = store.load()?;

    let pending = failed_indices(&all, CategorizedQuestion::is_categorized);
    if pending.is_empty() {
        info!("所有 {} 条都已分类成功，无事可做", all.len());
        return Ok(());
    }

    if config.api_key.is_empty() {
        anyhow::bail!("未设置 GOOGLE_API_KEY / GEMINI_API_KEY，无法调用推理 API");
    }

    log_run_header("分类重试");
    info!("📊 模型: {}", config.categorize_model);
    info!("📋 待重试: {}/{} 条", pending.len(), all.len());

    let service = Arc::new(GeminiService::new(config, &config.categorize_model));
    let policy = RetryPolicy::categorize();

    // 提前抽取调用所需文本，worker 不接触检查点本身
    let jobs: Vec<(usize, String, String)> = pending
        .iter()
        .map(|&idx| {
            (
                idx,
                all[idx].question_text().to_string(),
                all[idx].correct_answer().to_string(),
            )
        })
        .collect();
    let fallback_indices: Vec<usize> = pending.clone();

    let total_pending = pending.len();
    let mut completed = 0usize;

    fan_out(
        jobs,
        config.categorize_workers,
        move |_, (orig_idx, question_text, answer): (usize, String, String)| {
            let service = service.clone();
            async move {
                let outcome = execute_with_retry(&policy, || {
                    let service = service.clone();
                    let question_text = question_text.clone();
                    let answer = answer.clone();
                    async move { service.categorize_question(&question_text, &answer).await }
                })
                .await;
                (orig_idx, Categorization::from_outcome(outcome))
            }
        },
        |slot_idx, message| {
            (
                fallback_indices[slot_idx],
                Categorization::exception(message),
            )
        },
        |_, (orig_idx, categorization): &(usize, Categorization)| {
            if categorization.is_success() {
                info!(
                    "✓ [{}] {} → {}",
                    orig_idx,
                    truncate_text(all[*orig_idx].question_text(), 40),
                    categorization.category.as_deref().unwrap_or("?")
                );
            } else {
                warn!(
                    "❌ [{}] {}",
                    orig_idx,
                    categorization.error.as_deref().unwrap_or("unknown")
                );
            }

            all[*orig_idx].categorization = Some(categorization.clone());

            completed += 1;
            if completed % SAVE_INTERVAL == 0 || completed == total_pending {
                if let Err(e) = store.save(&all) {
                    warn!("⚠️ 周期保存失败（继续处理）: {}", e);
                } else {
                    info!("检查点已保存（{}/{} 条完成）", completed, total_pending);
                }
            }
        },
    )
    .await;

    let still_failing = failed_indices(&all, CategorizedQuestion::is_categorized).len();
    let fixed = total_pending - still_failing.min(total_pending);

    log_run_footer();
    info!("✓ 修复: {} 条", fixed);
    if still_failing > 0 {
        warn!("⚠️ 仍然失败: {} 条", still_failing);
    } else {
        info!("所有条目均已分类成功");
    }

    Ok(())
}
