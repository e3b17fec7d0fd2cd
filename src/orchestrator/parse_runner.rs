//! 批量图片解析驱动 - 编排层
//!
//! ## 职责
//!
//! 本模块是 `parse` 命令的入口，实现两级有界并发调度：
//!
//! 1. **外层**：按文件夹 fan-out（`folder_workers` 上限）
//! 2. **内层**：文件夹内按图片 fan-out（`image_workers` 上限）
//! 3. **检查点**：每个文件夹完成时先把 `parsed.json` 落盘再上报完成，
//!    中途被杀也不丢已完成文件夹的数据
//! 4. **诊断**：解析失败条目汇入共享的 `DecodeFailureLog`，
//!    运行结束时写诊断侧文件
//!
//! 空文件夹直接短路成零条目汇总，不触碰 Adapter。
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单张图片的细节，向下委托执行器
//! - **故障隔离**：单张图片、单个文件夹的失败都不会中断兄弟任务

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::infrastructure::fan_out;
use crate::models::question::{FailedImage, FolderSummary, QuestionRecord};
use crate::services::checkpoint_store::CheckpointStore;
use crate::services::decode_failure_log::DecodeFailureLog;
use crate::services::gemini_service::{mime_type_for, GeminiService};
use crate::utils::logging::{log_run_footer, log_run_header};
use crate::workflow::retry::{execute_with_retry, RetryPolicy};
use crate::error::ErrorKind;

/// 运行批量解析
pub async fn run(config: &Config) -> Result<()> {
    if config.api_key.is_empty() {
        anyhow::bail!("未设置 GOOGLE_API_KEY / GEMINI_API_KEY，无法调用推理 API");
    }

    let input_dir = PathBuf::from(&config.input_dir);
    if !input_dir.is_dir() {
        anyhow::bail!("输入路径不是目录: {}", input_dir.display());
    }

    let folders = enumerate_folders(&input_dir)?;
    if folders.is_empty() {
        anyhow::bail!("在 {} 下没有找到子目录", input_dir.display());
    }

    log_run_header("批量试题图片解析");
    info!("📊 模型: {}", config.model);
    info!("📁 文件夹数: {}", folders.len());
    info!(
        "📋 并发: {} 个文件夹 × 每文件夹 {} 张图片",
        config.folder_workers, config.image_workers
    );

    let service = Arc::new(GeminiService::new(config, &config.model));
    let failure_log = Arc::new(DecodeFailureLog::new());
    let policy = RetryPolicy::parse();

    let folder_names: Vec<String> = folders.iter().map(|f| folder_name(f)).collect();
    let total_folders = folders.len();
    let parsed_file_name = config.parsed_file_name.clone();
    let image_workers = config.image_workers;

    let mut completed = 0usize;
    let summaries = {
        let service = service.clone();
        let failure_log = failure_log.clone();
        fan_out(
            folders,
            config.folder_workers,
            move |_, folder: PathBuf| {
                let service = service.clone();
                let failure_log = failure_log.clone();
                let parsed_file_name = parsed_file_name.clone();
                async move {
                    process_folder(
                        &folder,
                        service,
                        failure_log,
                        policy,
                        image_workers,
                        &parsed_file_name,
                    )
                    .await
                }
            },
            |idx, message| FolderSummary::failed(folder_names[idx].clone(), message),
            |_, _summary: &FolderSummary| {
                completed += 1;
                debug!("文件夹进度: {}/{}", completed, total_folders);
            },
        )
        .await
    };

    // 汇总
    let total_questions: usize = summaries.iter().map(|s| s.question_count).sum();
    let total_successful: usize = summaries.iter().map(|s| s.successful).sum();
    let successful_folders = summaries.iter().filter(|s| s.success).count();

    log_run_footer();
    info!("文件夹: {}/{} 完成", successful_folders, summaries.len());
    info!("题目: {}/{} 解析成功", total_successful, total_questions);

    if let Some(output_file) = &config.output_file {
        CheckpointStore::new(output_file).save(&summaries)?;
        info!("汇总已保存: {}", output_file);
    }

    let error_count = failure_log.write_to(&config.errors_file)?;
    if error_count > 0 {
        info!(
            "JSON 解析失败: {} 条已保存到 {}",
            error_count, config.errors_file
        );
    } else {
        info!("没有 JSON 解析失败");
    }

    info!("各文件夹结果已保存为各自的 '{}'", config.parsed_file_name);

    Ok(())
}

/// 处理一个文件夹的全部图片
///
/// 返回前保证 `parsed.json` 已落盘（或在汇总里标记保存失败）。
async fn process_folder(
    folder: &Path,
    service: Arc<GeminiService>,
    failure_log: Arc<DecodeFailureLog>,
    policy: RetryPolicy,
    image_workers: usize,
    parsed_file_name: &str,
) -> FolderSummary {
    let name = folder_name(folder);

    let images = match list_images(folder) {
        Ok(images) => images,
        Err(e) => return FolderSummary::failed(name, e.to_string()),
    };

    // 空文件夹短路：不触碰 Adapter
    if images.is_empty() {
        return FolderSummary::empty(name);
    }

    let file_names: Vec<String> = images
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();
    let fallback_names = file_names.clone();

    let records = {
        let name = name.clone();
        let worker_names = file_names;
        fan_out(
            images,
            image_workers,
            move |idx, image_path: PathBuf| {
                let service = service.clone();
                let failure_log = failure_log.clone();
                let folder_name = name.clone();
                let file_name = worker_names[idx].clone();
                async move {
                    parse_single_image(&image_path, &file_name, &folder_name, service, failure_log, policy)
                        .await
                }
            },
            |idx, message| QuestionRecord::exception(fallback_names[idx].clone(), message),
            |_, _| {},
        )
        .await
    };

    let successful = records.iter().filter(|r| r.success).count();
    let total = records.len();

    // 先落盘再上报完成
    let store = CheckpointStore::new(folder.join(parsed_file_name));
    if let Err(e) = store.save(&records) {
        warn!("⚠️ {}: 检查点保存失败: {}", name, e);
        return FolderSummary {
            folder: name,
            success: false,
            question_count: total,
            successful,
            output_file: None,
            error: Some(e.to_string()),
        };
    }

    info!("✓ {}: {}/{} 题", name, successful, total);

    FolderSummary {
        folder: name,
        success: true,
        question_count: total,
        successful,
        output_file: Some(store.path().to_string_lossy().into_owned()),
        error: None,
    }
}

/// 带重试地解析一张图片，终态解析失败时喂给聚合器
async fn parse_single_image(
    image_path: &Path,
    file_name: &str,
    folder_name: &str,
    service: Arc<GeminiService>,
    failure_log: Arc<DecodeFailureLog>,
    policy: RetryPolicy,
) -> QuestionRecord {
    let mime_type = mime_type_for(file_name);

    let outcome = execute_with_retry(&policy, || {
        let service = service.clone();
        let image_path = image_path.to_path_buf();
        async move {
            // 每次尝试重新读文件，保证尝试之间互相独立
            let image_data = tokio::fs::read(&image_path)
                .await
                .map_err(|e| crate::error::CallError::transient(format!("读取图片失败: {}", e)))?;
            service.parse_question_image(&image_data, mime_type).await
        }
    })
    .await;

    let record = QuestionRecord::from_outcome(file_name, outcome);

    if record.error_type == Some(ErrorKind::Decode) {
        failure_log.record(FailedImage {
            folder: folder_name.to_string(),
            file: record.file.clone(),
            error: record.error.clone(),
            raw_response: record.raw_response.clone(),
        });
    }

    record
}

/// 枚举全部子目录（按名称排序）
///
/// 不含图片的子目录也会进入调度，由 `process_folder` 短路成空汇总。
fn enumerate_folders(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut folders: Vec<PathBuf> = std::fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    folders.sort();
    Ok(folders)
}

/// 枚举文件夹里的图片（png/jpg/jpeg，按文件名排序）
fn list_images(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    let ext = ext.to_lowercase();
                    ext == "png" || ext == "jpg" || ext == "jpeg"
                })
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    Ok(images)
}

fn folder_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_enumerate_sorts_folders_and_skips_plain_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("2019_02")).unwrap();
        std::fs::create_dir(dir.path().join("2019_01")).unwrap();
        std::fs::write(dir.path().join("jegyzet.txt"), b"nem mappa").unwrap();

        let folders = enumerate_folders(dir.path()).unwrap();
        let names: Vec<String> = folders.iter().map(|f| folder_name(f)).collect();
        assert_eq!(names, vec!["2019_01", "2019_02"]);
    }

    #[test]
    fn test_list_images_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"img").unwrap();
        std::fs::write(dir.path().join("a.PNG"), b"img").unwrap();
        std::fs::write(dir.path().join("c.gif"), b"nem").unwrap();

        let images = list_images(dir.path()).unwrap();
        let names: Vec<String> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.jpg"]);
    }
}
