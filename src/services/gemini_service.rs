//! Gemini 推理服务 - 业务能力层
//!
//! 只负责"调一次 Gemini"能力，不关心流程：
//!
//! - `parse_question_image`：试题图片 → 结构化题目（固定 JSON schema）
//! - `categorize_question`：题干文本 → 封闭集合中的类目标签
//!
//! 本服务自身不做任何重试，重试是执行器（`workflow::retry`）的职责；
//! 它的义务是在 HTTP 边界把失败分类成 `CallError` 的三种形态，
//! 其中限流通过 HTTP 429 状态码识别。
//!
//! 客户端构造后无内部可变状态，可以被所有 worker 只读共享。

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::CallError;
use crate::models::categorization::{resolve_category, CategoryLabel, CATEGORIES};
use crate::models::question::ParsedQuestion;

/// 图片解析的系统提示词（外部契约，保持英文原文）
const PARSE_PROMPT: &str = r#"Parse this Hungarian medical exam image. RED TEXT = correct answers filled in by solution key.

Extract these fields:
- question_number: e.g. "1.", "2.*", "19."
- points: integer from "X pont"
- question_text: ALL BLACK text. For tables, use markdown format with empty cells where red answers appear.
- question_type: "multiple_choice" or "fill_in" or "matching" or "open"
- correct_answer: RED text only. For tables, use markdown format showing the filled answers.
- options: list of all choices for multiple choice, empty [] otherwise

TABLE FORMATTING (use markdown):
- question_text table: show structure with EMPTY cells where red answers would go
  | Header1 | Header2 |
  |---------|---------|
  | black text |  |

- correct_answer table: show the RED answers in their positions
  | Header1 | Header2 |
  |---------|---------|
  | | red answer |

RULES:
- Tables MUST be markdown format in both question_text and correct_answer
- question_text: include all BLACK text, leave answer cells EMPTY
- correct_answer: show only RED text (answers), can be markdown table or plain text
- If no red text visible, set correct_answer to ""
- Keep Hungarian characters exact (á, é, í, ó, ö, ő, ú, ü, ű)"#;

/// 重试轮用的更严格的提示词（同样是外部契约）
const STRICT_PARSE_PROMPT: &str = r#"You are an exam question parser. Analyze the image of a Hungarian medical exam question WITH ITS SOLUTION KEY.

CRITICAL: This is a SOLVED exam. RED/underlined TEXT shows the CORRECT ANSWERS from the solution key.

How to interpret:
- BLACK text = original exam question and options
- RED text or UNDERLINED text = CORRECT ANSWER marked by solution key

Extract with EXACT text (preserve Hungarian characters: á, é, í, ó, ö, ő, ú, ü, ű):

1. question_number: e.g., "1.", "2.*", "19."
2. points: integer from "X pont"
3. question_text: the question text (BLACK text only, NO red answers)
4. question_type: "multiple_choice", "fill_in", "matching", or "open"
5. correct_answer: ONLY the correct answers (red/underlined text), each on a new line
6. options: list of ALL answer options for multiple choice questions

IMPORTANT RULES:

1. For "Húzza alá" (underline) questions:
   - question_text: include the question AND list ALL options (one per line)
   - correct_answer: list ONLY the underlined/red options (the correct ones)
   - options: array of ALL option texts

2. For fill-in/open questions where the answer is a simple list of words or short sentences:
   - question_text: ONLY the black question text, DO NOT include red answer text
   - correct_answer: the red text (the filled-in answers)
   - options: empty array

Parse this exam question image and return structured JSON."#;

/// Gemini 推理服务
pub struct GeminiService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    parse_prompt: &'static str,
}

impl GeminiService {
    /// 创建新的推理服务
    pub fn new(config: &Config, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            parse_prompt: PARSE_PROMPT,
        }
    }

    /// 重试轮的变体：同样的能力，更严格的解析提示词
    pub fn with_strict_prompt(config: &Config, model: impl Into<String>) -> Self {
        Self {
            parse_prompt: STRICT_PARSE_PROMPT,
            ..Self::new(config, model)
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 解析一张试题图片为结构化题目
    pub async fn parse_question_image(
        &self,
        image_data: &[u8],
        mime_type: &str,
    ) -> Result<ParsedQuestion, CallError> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"inline_data": {"mime_type": mime_type, "data": BASE64.encode(image_data)}},
                    {"text": self.parse_prompt},
                ],
            }],
            "generationConfig": {
                "temperature": 0.1,
                "maxOutputTokens": 2048,
                "responseMimeType": "application/json",
                "responseSchema": question_response_schema(),
            },
        });

        let text = self.generate(body).await?;

        let value = extract_json(&text)
            .map_err(|e| CallError::decode(e.to_string(), Some(text.clone())))?;
        let parsed: ParsedQuestion = serde_json::from_value(value)
            .map_err(|e| CallError::decode(e.to_string(), Some(text.clone())))?;

        Ok(parsed)
    }

    /// 给一道题打类目标签
    pub async fn categorize_question(
        &self,
        question_text: &str,
        correct_answer: &str,
    ) -> Result<CategoryLabel, CallError> {
        let prompt = format!(
            "Categorize this Hungarian medical exam question:\n\n\
             Question: {}\n\n\
             Correct Answer: {}\n\n\
             Return ONLY a JSON object with \"category\" and \"reasoning\" fields. \
             No markdown, no explanation.",
            question_text, correct_answer
        );

        let body = json!({
            "system_instruction": {"parts": [{"text": categorize_system_prompt()}]},
            "contents": [{
                "role": "user",
                "parts": [{"text": prompt}],
            }],
            "generationConfig": {
                "temperature": 0.1,
                "maxOutputTokens": 1024,
            },
        });

        let text = self.generate(body).await?;

        let value = extract_json(&text)
            .map_err(|e| CallError::decode(e.to_string(), Some(text.clone())))?;

        let raw_label = value
            .get("category")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CallError::decode("response has no \"category\" field", Some(text.clone()))
            })?;

        Ok(CategoryLabel {
            category: resolve_category(raw_label),
            reasoning: value
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        })
    }

    /// 发起一次 generateContent 调用并取出首个候选的文本
    ///
    /// 失败分类都发生在这一层：429 → `RateLimited`，其他非 2xx 与
    /// 网络错误 → `Transient`。
    async fn generate(&self, body: Value) -> Result<String, CallError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        debug!("调用 Gemini API，模型: {}", self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::transient(format!("request failed: {}", e)))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let message = response.text().await.unwrap_or_default();
            return Err(CallError::rate_limited(message));
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(CallError::transient(format!("HTTP {}: {}", status, message)));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| CallError::transient(format!("invalid response envelope: {}", e)))?;

        parsed
            .first_text()
            .ok_or_else(|| CallError::transient("empty response from model"))
    }
}

/// 从模型响应中提取 JSON，带降级回退
///
/// 依次尝试：整体直接解析 → markdown 代码块 → 文本中的首个 `{...}`。
pub fn extract_json(text: &str) -> anyhow::Result<Value> {
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("empty response");
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let fence = Regex::new(r"```(?:json)?\s*([\s\S]*?)```")?;
    if let Some(captures) = fence.captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(captures[1].trim()) {
            return Ok(value);
        }
    }

    let object = Regex::new(r"\{[\s\S]*\}")?;
    if let Some(found) = object.find(text) {
        if let Ok(value) = serde_json::from_str::<Value>(found.as_str()) {
            return Ok(value);
        }
    }

    anyhow::bail!(
        "could not extract JSON from: {}",
        text.chars().take(100).collect::<String>()
    )
}

/// 题目结构化输出的 response schema
fn question_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "question_number": {"type": "string"},
            "points": {"type": "integer"},
            "question_text": {"type": "string"},
            "question_type": {"type": "string", "enum": ["multiple_choice", "fill_in", "matching", "open"]},
            "correct_answer": {"type": "string"},
            "options": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["question_number", "points", "question_text", "question_type", "correct_answer"]
    })
}

/// 分类任务的系统提示词（类目集合 + 判定准则）
fn categorize_system_prompt() -> String {
    let numbered: Vec<String> = CATEGORIES
        .iter()
        .enumerate()
        .map(|(i, cat)| format!("{}. {}", i + 1, cat))
        .collect();

    format!(
        "You are a medical exam question categorizer. Your task is to categorize Hungarian \
         medical exam questions into exactly one of these categories:\n\n{}\n\n\
         Rules:\n\
         - Choose the SINGLE most appropriate category based on the question content\n\
         - Return ONLY a JSON object with \"category\" and \"reasoning\" fields\n\
         - If a question spans multiple topics, choose the PRIMARY topic\n\n\
         Category guidelines:\n\
         - \"Általános anatómia és kortan\": General anatomy, body types, cell biology, health factors, pathology basics\n\
         - \"A mozgás szerv rendszere\": Bones, muscles, joints, spine, limbs, musculoskeletal diseases\n\
         - \"Keringés\": Heart, blood vessels, blood, circulation, cardiovascular diseases\n\
         - \"Légzőrendszer\": Lungs, respiratory tract, breathing, respiratory diseases\n\
         - \"Idegrendszer\": Brain, spinal cord, nerves, neurological diseases, reflexes\n\
         - \"Kiválasztás szervrendszere\": Kidneys, urinary system, urine, excretion\n\
         - \"Szaporodás szervrendszere\": Reproductive organs, pregnancy, sexual development\n\
         - \"A neuroendokrin rendszer\": Hormones, glands (thyroid, pituitary, adrenal), endocrine diseases\n\
         - \"Az érzékszervek és emlő\": Eyes, ears, skin sensation, breast anatomy and diseases\n\
         - \"Elsősegélynyújtás\": First aid, emergency care, resuscitation, trauma care\n\
         - \"Emésztés\": Digestive system, stomach, intestines, liver, nutrition, vitamins",
        numbered.join("\n")
    )
}

/// 根据文件扩展名推断 MIME 类型
pub fn mime_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    }
}

// ========== Gemini 响应信封 ==========

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|part| part.text)
    }
}
