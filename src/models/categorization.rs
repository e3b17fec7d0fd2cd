//! 题目分类相关的数据模型
//!
//! 分类标签来自一个封闭的匈牙利语类目集合。模型返回的标签先做精确匹配，
//! 不中则做大小写无关的子串模糊匹配，仍不中时保留原始标签（未解析类目）。

use serde::{Deserialize, Serialize};

use crate::workflow::CallOutcome;

use super::question::ParsedQuestion;

/// 固定类目集合（医学解剖学考试的 11 个章节）
pub const CATEGORIES: [&str; 11] = [
    "Általános anatómia és kortan",
    "A mozgás szerv rendszere",
    "Keringés",
    "Légzőrendszer",
    "Idegrendszer",
    "Kiválasztás szervrendszere",
    "Szaporodás szervrendszere",
    "A neuroendokrin rendszer",
    "Az érzékszervek és emlő",
    "Elsősegélynyújtás",
    "Emésztés",
];

/// 把模型返回的标签解析到规范类目
///
/// 1. 精确命中 → 规范类目
/// 2. 任一方向的大小写无关子串命中 → 第一个命中的规范类目
/// 3. 都不中 → 原样保留
pub fn resolve_category(raw: &str) -> String {
    let raw = raw.trim();
    if CATEGORIES.contains(&raw) {
        return raw.to_string();
    }

    let raw_lower = raw.to_lowercase();
    for category in CATEGORIES {
        let category_lower = category.to_lowercase();
        if category_lower.contains(&raw_lower) || raw_lower.contains(&category_lower) {
            return category.to_string();
        }
    }

    raw.to_string()
}

/// 一道题的分类结果（合并检查点中的 `categorization` 字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Categorization {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

/// 分类 Adapter 的成功载荷
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryLabel {
    pub category: String,
    pub reasoning: String,
}

impl Categorization {
    pub fn from_outcome(outcome: CallOutcome<CategoryLabel>) -> Self {
        match outcome.data {
            Some(label) => Self {
                success: true,
                category: Some(label.category),
                reasoning: Some(label.reasoning),
                error: None,
                raw_response: None,
            },
            None => Self {
                success: false,
                category: None,
                reasoning: None,
                error: outcome.error,
                raw_response: outcome.raw_response,
            },
        }
    }

    pub fn exception(message: String) -> Self {
        Self {
            success: false,
            category: None,
            reasoning: None,
            error: Some(message),
            raw_response: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// 合并检查点（`categorized_questions.json`）中的一个条目
///
/// 未建模的字段通过 `extra` 原样透传，保证重试只改动被选中的条目。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizedQuestion {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ParsedQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorization: Option<Categorization>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CategorizedQuestion {
    pub fn question_text(&self) -> &str {
        self.data.as_ref().map(|d| d.question_text.as_str()).unwrap_or("")
    }

    pub fn correct_answer(&self) -> &str {
        self.data.as_ref().map(|d| d.correct_answer.as_str()).unwrap_or("")
    }

    pub fn is_categorized(&self) -> bool {
        self.categorization.as_ref().is_some_and(Categorization::is_success)
    }
}

/// `split` 产出的单类目文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFile {
    pub category_name: String,
    pub items: Vec<CategorizedQuestion>,
}

/// 带相似度分组的类目文件（`dedupe` 的输入 / 输出）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedCategoryFile {
    pub groups: Vec<Vec<CategorizedQuestion>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
