//! 试题解析相关的数据模型
//!
//! `QuestionRecord` 是每张图片在 `parsed.json` 检查点中的持久化形态，
//! 一旦由执行器生成便不再修改，重试流程只会整条替换。

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::workflow::CallOutcome;

/// 题目类型（模型输出的固定枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    FillIn,
    Matching,
    Open,
}

/// 从一张试题图片解析出的结构化题目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    /// 题号，例如 "1."、"2.*"、"19."
    pub question_number: String,
    /// 分值，来自 "X pont"
    pub points: i64,
    /// 题干（仅黑色文字，表格用 markdown）
    pub question_text: String,
    pub question_type: QuestionType,
    /// 正确答案（仅红色文字），无红字时为空串
    pub correct_answer: String,
    /// 选择题的全部选项，其他题型为空
    #[serde(default)]
    pub options: Vec<String>,
}

/// 每张图片一条的检查点记录
///
/// 不变量：`success == true` 当且仅当 `data` 有值且 `error_type` 为空。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    /// 稳定身份：图片文件名
    pub file: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ParsedQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    /// 仅解析失败时保留的原始响应
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl QuestionRecord {
    /// 把执行器的结果落成检查点记录
    pub fn from_outcome(file: impl Into<String>, outcome: CallOutcome<ParsedQuestion>) -> Self {
        Self {
            file: file.into(),
            success: outcome.success,
            data: outcome.data,
            error: outcome.error,
            error_type: outcome.error_kind,
            raw_response: outcome.raw_response,
        }
    }

    /// fan-out 任务本身 panic 时合成的记录
    pub fn exception(file: impl Into<String>, message: String) -> Self {
        Self {
            file: file.into(),
            success: false,
            data: None,
            error: Some(message),
            error_type: Some(ErrorKind::Exception),
            raw_response: None,
        }
    }
}

/// 外层调度对一个文件夹的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSummary {
    pub folder: String,
    pub success: bool,
    /// 条目数 == 该文件夹的图片数，空文件夹为 0
    pub question_count: usize,
    pub successful: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FolderSummary {
    /// 空文件夹的短路结果：不触碰 Adapter
    pub fn empty(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            success: true,
            question_count: 0,
            successful: 0,
            output_file: None,
            error: None,
        }
    }

    pub fn failed(folder: impl Into<String>, error: String) -> Self {
        Self {
            folder: folder.into(),
            success: false,
            question_count: 0,
            successful: 0,
            output_file: None,
            error: Some(error),
        }
    }
}

/// 解析失败图片的诊断条目
///
/// 同一个形状身兼两职：聚合器写出的 `json_parse_errors.json`，
/// 以及重试驱动读入的 `failed_images.json`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedImage {
    pub folder: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_record_wire_shape() {
        let record = QuestionRecord {
            file: "q_01.png".to_string(),
            success: true,
            data: Some(ParsedQuestion {
                question_number: "1.".to_string(),
                points: 2,
                question_text: "Mi a szív feladata?".to_string(),
                question_type: QuestionType::Open,
                correct_answer: "A vér keringetése".to_string(),
                options: vec![],
            }),
            error: None,
            error_type: None,
            raw_response: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["file"], "q_01.png");
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["question_type"], "open");
        // 成功记录不应序列化出错误字段
        assert!(json.get("error").is_none());
        assert!(json.get("error_type").is_none());
        assert!(json.get("raw_response").is_none());
    }

    #[test]
    fn test_exception_record_invariant() {
        let record = QuestionRecord::exception("q_02.png", "task panicked".to_string());
        assert!(!record.success);
        assert!(record.data.is_none());
        assert_eq!(record.error_type, Some(ErrorKind::Exception));
    }

    #[test]
    fn test_question_type_round_trip() {
        let json = "\"multiple_choice\"";
        let parsed: QuestionType = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, QuestionType::MultipleChoice);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }

    #[test]
    fn test_failed_image_tolerates_minimal_entries() {
        let entry: FailedImage =
            serde_json::from_str(r#"{"folder": "2019_01", "file": "q_05.png"}"#).unwrap();
        assert_eq!(entry.folder, "2019_01");
        assert!(entry.error.is_none());
    }
}
