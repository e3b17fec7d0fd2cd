//! 配置管理
//!
//! 所有可调参数集中在 `Config`：默认值内置，环境变量按需覆盖。
//! API key 从 `GOOGLE_API_KEY` 或 `GEMINI_API_KEY` 读取（前者优先）。

use std::env;

/// 全局配置
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key
    pub api_key: String,
    /// API 基地址（测试时指向 mock server）
    pub api_base_url: String,

    /// 首轮解析用的模型
    pub model: String,
    /// 失败重试用的模型（更强也更贵）
    pub retry_model: String,
    /// 分类用的模型
    pub categorize_model: String,

    /// 试卷图片根目录（每个子目录一份试卷）
    pub input_dir: String,
    /// 可选的全局汇总输出文件
    pub output_file: Option<String>,
    /// 每个文件夹内的检查点文件名
    pub parsed_file_name: String,
    /// 解析失败诊断侧文件
    pub errors_file: String,
    /// 重试驱动读取的失败清单（缺失时回退到诊断侧文件）
    pub failed_images_file: String,
    /// 分类合并检查点
    pub combined_file: String,
    /// `split` 的输出目录
    pub categories_dir: String,

    /// 同时处理的文件夹数上限
    pub folder_workers: usize,
    /// 每个文件夹内同时处理的图片数上限
    pub image_workers: usize,
    /// 分类重试的并发上限
    pub categorize_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash".to_string(),
            retry_model: "gemini-2.0-flash".to_string(),
            categorize_model: "gemini-2.0-flash".to_string(),
            input_dir: "kepek".to_string(),
            output_file: None,
            parsed_file_name: "parsed.json".to_string(),
            errors_file: "json_parse_errors.json".to_string(),
            failed_images_file: "failed_images.json".to_string(),
            combined_file: "categorized_questions.json".to_string(),
            categories_dir: "categories".to_string(),
            folder_workers: 5,
            image_workers: 10,
            categorize_workers: 10,
        }
    }
}

impl Config {
    /// 从环境变量加载配置（缺失的用默认值）
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            api_key: env::var("GOOGLE_API_KEY")
                .or_else(|_| env::var("GEMINI_API_KEY"))
                .unwrap_or_default(),
            api_base_url: env_or("GEMINI_BASE_URL", defaults.api_base_url),
            model: env_or("PARSE_MODEL", defaults.model),
            retry_model: env_or("RETRY_MODEL", defaults.retry_model),
            categorize_model: env_or("CATEGORIZE_MODEL", defaults.categorize_model),
            input_dir: env_or("INPUT_DIR", defaults.input_dir),
            output_file: env::var("OUTPUT_FILE").ok(),
            parsed_file_name: defaults.parsed_file_name,
            errors_file: env_or("ERRORS_FILE", defaults.errors_file),
            failed_images_file: env_or("FAILED_IMAGES_FILE", defaults.failed_images_file),
            combined_file: env_or("COMBINED_FILE", defaults.combined_file),
            categories_dir: env_or("CATEGORIES_DIR", defaults.categories_dir),
            folder_workers: env_usize("FOLDER_WORKERS", defaults.folder_workers),
            image_workers: env_usize("IMAGE_WORKERS", defaults.image_workers),
            categorize_workers: env_usize("CATEGORIZE_WORKERS", defaults.categorize_workers),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_limits() {
        let config = Config::default();
        assert_eq!(config.folder_workers, 5);
        assert_eq!(config.image_workers, 10);
        assert_eq!(config.parsed_file_name, "parsed.json");
    }

    #[test]
    fn test_default_api_key_is_empty() {
        assert!(Config::default().api_key.is_empty());
    }
}
