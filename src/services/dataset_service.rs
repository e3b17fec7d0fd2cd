//! 数据集后处理 - 业务能力层
//!
//! 两个纯粹的、非并发的归约步骤：
//!
//! - `split_by_category`：把合并检查点按类目拆成每类一个 JSON 文件
//! - `dedupe_by_longest`：在带相似度分组的类目文件里，每组只保留
//!   `question_text` 最长的那道题

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::models::categorization::{CategorizedQuestion, CategoryFile, GroupedCategoryFile};
use crate::services::checkpoint_store::CheckpointStore;
use crate::utils::filename::sanitize_category_filename;

/// 拆分结果统计
#[derive(Debug, Default)]
pub struct SplitStats {
    pub categories: usize,
    pub written: usize,
    pub skipped: Vec<String>,
}

/// 去重结果统计
#[derive(Debug, Default)]
pub struct DedupeStats {
    pub files: usize,
    pub original: usize,
    pub kept: usize,
}

/// 把合并检查点拆成每类目一个文件
pub fn split_by_category(input_file: &Path, output_dir: &Path) -> Result<SplitStats> {
    let store = CheckpointStore::new(input_file);
    if !store.exists() {
        anyhow::bail!("找不到合并检查点: {}", input_file.display());
    }

    info!("📖 读取 {}...", input_file.display());
    let questions: Vec<CategorizedQuestion> = store.load()?;

    // 按类目分组；BTreeMap 保证输出遍历顺序稳定
    let mut by_category: BTreeMap<String, Vec<CategorizedQuestion>> = BTreeMap::new();
    let mut stats = SplitStats::default();

    for question in questions {
        let category = question
            .categorization
            .as_ref()
            .and_then(|c| c.category.clone());

        match category {
            Some(category) if !category.is_empty() => {
                by_category.entry(category).or_default().push(question);
            }
            _ => stats.skipped.push(question.file.clone()),
        }
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("创建输出目录失败: {}", output_dir.display()))?;

    stats.categories = by_category.len();
    info!("找到 {} 个类目:", stats.categories);

    // 按条目数倒序输出，与条目数无关的同量类目按名称稳定排序
    let mut ordered: Vec<_> = by_category.into_iter().collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

    for (category, items) in ordered {
        let file_name = format!("{}.json", sanitize_category_filename(&category));
        let output_path = output_dir.join(&file_name);

        let payload = CategoryFile {
            category_name: category.clone(),
            items,
        };
        let json = serde_json::to_string_pretty(&payload)?;
        fs::write(&output_path, json)
            .with_context(|| format!("写入类目文件失败: {}", output_path.display()))?;

        info!("  {}: {} 题 -> {}", category, payload.items.len(), file_name);
        stats.written += payload.items.len();
    }

    if !stats.skipped.is_empty() {
        warn!("⚠️ 跳过 {} 个无类目条目:", stats.skipped.len());
        for file in &stats.skipped {
            warn!("  - {}", file);
        }
    }

    Ok(stats)
}

/// 在相似度分组内只保留题干最长的一道题
pub fn dedupe_by_longest(categories_dir: &Path) -> Result<DedupeStats> {
    if !categories_dir.is_dir() {
        anyhow::bail!("类目目录不存在: {}", categories_dir.display());
    }

    let mut json_files: Vec<_> = fs::read_dir(categories_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    json_files.sort();

    if json_files.is_empty() {
        anyhow::bail!("类目目录里没有 JSON 文件: {}", categories_dir.display());
    }

    let mut stats = DedupeStats::default();
    info!("处理 {} 个类目文件...\n", json_files.len());

    for path in json_files {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("读取类目文件失败: {}", path.display()))?;
        let mut data: GroupedCategoryFile = serde_json::from_str(&content)
            .with_context(|| format!("解析类目文件失败: {}", path.display()))?;

        let original: usize = data.groups.iter().map(Vec::len).sum();

        data.groups = data
            .groups
            .into_iter()
            .filter(|group| !group.is_empty())
            .map(|group| keep_longest(group))
            .collect();

        let kept: usize = data.groups.iter().map(Vec::len).sum();

        let json = serde_json::to_string_pretty(&data)?;
        fs::write(&path, json)
            .with_context(|| format!("写回类目文件失败: {}", path.display()))?;

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("?");
        info!("{}: {} -> {} (去掉 {})", stem, original, kept, original - kept);

        stats.files += 1;
        stats.original += original;
        stats.kept += kept;
    }

    info!(
        "\n合计: {} -> {} (去掉 {})",
        stats.original,
        stats.kept,
        stats.original - stats.kept
    );

    Ok(stats)
}

/// 组内只留题干最长的一道
///
/// 长度按字符数算（重音字符不按字节膨胀），并列时保留靠前的那道。
fn keep_longest(group: Vec<CategorizedQuestion>) -> Vec<CategorizedQuestion> {
    let mut best: Option<(usize, CategorizedQuestion)> = None;
    for question in group {
        let len = question.question_text().chars().count();
        if best.as_ref().map_or(true, |(best_len, _)| len > *best_len) {
            best = Some((len, question));
        }
    }
    best.map(|(_, question)| vec![question]).unwrap_or_default()
}
