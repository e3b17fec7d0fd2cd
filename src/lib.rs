//! # Parse Questions Gemini
//!
//! 一个把扫描版试卷图片批量解析为结构化题库的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/fan_out` - 有界并发派发，槽位按输入顺序写回，
//!   panic 只污染自己的槽位
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单次调用 / 单个文件
//! - `GeminiService` - 图片解析与题目分类能力（HTTP 边界做失败分类）
//! - `CheckpointStore` - 检查点的原子落盘 / 读回能力
//! - `DecodeFailureLog` - 跨 worker 的解析失败聚合能力
//! - `dataset_service` - 按类目切分与组内去重
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/retry` - 弹性调用执行器：共享尝试预算、
//!   按错误形态区分延迟、永不向上抛错
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/parse_runner` - 两级调度的批量解析驱动
//! - `orchestrator/retry_parse_runner` - 失败图片的按身份合并重试
//! - `orchestrator/retry_categorize_runner` - 分类失败条目的幂等重试
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{CallError, ErrorKind};
pub use infrastructure::fan_out;
pub use models::question::{FailedImage, FolderSummary, ParsedQuestion, QuestionRecord};
pub use services::{CheckpointStore, DecodeFailureLog, GeminiService};
pub use workflow::{execute_with_retry, CallOutcome, RetryPolicy};
