use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 可以放入 [`super::SessionCache`] 的会话
///
/// 缓存只关心会话标识和开始时间，其余内容原样保存。
pub trait SessionRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn session_id(&self) -> &str;

    fn started_at(&self) -> DateTime<Utc>;
}

/// 测验类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuizType {
    #[default]
    Standard,
    Wild,
}

/// 本次测验选中的挑战对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub catalog_number: u32,
    pub name: String,
    pub tier: u8,
}

/// 测验计分参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizParameters {
    pub question_count: u32,
    pub pass_threshold: f64,
    pub pass_count: u32,
}

/// 进行中的测验会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    pub session_id: String,
    pub topic: String,
    pub course: Option<String>,
    pub level: String,
    #[serde(rename = "type")]
    pub quiz_type: QuizType,
    pub challenge: Challenge,
    pub parameters: QuizParameters,
    pub started_at: DateTime<Utc>,
}

impl SessionRecord for QuizSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
