use anyhow::Result;
use tracing::error;

use parse_questions_gemini::config::Config;
use parse_questions_gemini::orchestrator::{
    parse_runner, retry_categorize_runner, retry_parse_runner,
};
use parse_questions_gemini::services::dataset_service;
use parse_questions_gemini::utils::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置
    let mut config = Config::from_env();

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("parse");
    // 第二个位置参数按命令各自解释（输入目录 / 输入文件）
    let path_override = args.get(2).cloned();

    match mode {
        "parse" => {
            if let Some(dir) = path_override {
                config.input_dir = dir;
            }
            parse_runner::run(&config).await
        }
        "retry-failed" => {
            if let Some(file) = path_override {
                config.failed_images_file = file;
            }
            retry_parse_runner::run(&config).await
        }
        "retry-categorization" => {
            if let Some(file) = path_override {
                config.combined_file = file;
            }
            retry_categorize_runner::run(&config).await
        }
        "split" => {
            let input = path_override.unwrap_or_else(|| config.combined_file.clone());
            let stats = dataset_service::split_by_category(
                std::path::Path::new(&input),
                std::path::Path::new(&config.categories_dir),
            )?;
            tracing::info!(
                "拆分完成: {} 个类目，{} 题，{} 题无类目",
                stats.categories,
                stats.written,
                stats.skipped.len()
            );
            Ok(())
        }
        "dedupe" => {
            let dir = path_override.unwrap_or_else(|| config.categories_dir.clone());
            let stats = dataset_service::dedupe_by_longest(std::path::Path::new(&dir))?;
            tracing::info!(
                "去重完成: {} 个文件，{} -> {} 题",
                stats.files,
                stats.original,
                stats.kept
            );
            Ok(())
        }
        other => {
            error!("未知命令: {}", other);
            error!("用法: parse_questions_gemini [parse|retry-failed|retry-categorization|split|dedupe] [路径]");
            std::process::exit(2);
        }
    }
}
