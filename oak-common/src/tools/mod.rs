//! 工具接口
//!
//! 每个请求是一行 JSON: `{"tool": "<名称>", "args": {...}}`，
//! 通过 [`ToolHandler::handle_line`] 提交时可以省略 `args`。结果总是一个 JSON 对象，
//! 成功时带 `"success": true`，失败时为 `{"success": false, "error": "..."}`。

mod pokedex;
mod quiz;
pub mod rules;
mod topic;
mod trainer;

use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Settings;
use crate::session::{QuizSession, SessionCache};
use crate::store::{AtomicModifier, LockManager, RecordStore, StoreError, StoreResult};

pub use pokedex::{
    AddPokemonArgs, CatchMethod, CaughtEntry, CollectionStats, EvolvePokemonArgs, GetPokedexArgs, Pokedex,
    Sprites, POKEDEX_RECORD,
};
pub use quiz::{
    GetQuizHistoryArgs, QuizAnswers, QuizHistory, QuizHistoryEntry, QuizOutcome, StartQuizArgs,
    SubmitQuizResultArgs,
};
pub use topic::{
    CoursePlan, CreateTopicArgs, ExercisePlan, LevelRoadmap, ListTopicsArgs, RoadmapItem, RoadmapPlan,
    RoadmapStatus, SetRoadmapArgs, SetTopicLevelArgs, TopicArgs, TopicProgress,
};
pub use trainer::{
    AddPointsArgs, GetPointHistoryArgs, GetTrainerArgs, PointHistoryEntry, TrainerAchievements,
    TrainerData, TrainerSettings, UpdateTrainerArgs, TRAINER_RECORD,
};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// 无参数工具的参数
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoArgs {}

// 解析后的工具请求
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "camelCase")]
pub enum ToolRequest {
    // 主题
    CreateTopic(CreateTopicArgs),
    GetTopic(TopicArgs),
    ListTopics(ListTopicsArgs),
    InitializeLevel(SetTopicLevelArgs),
    SetTopicLevel(SetTopicLevelArgs),
    SetRoadmap(SetRoadmapArgs),

    // 训练师
    GetTrainer(GetTrainerArgs),
    UpdateTrainer(UpdateTrainerArgs),
    AddPoints(AddPointsArgs),
    GetRank(NoArgs),
    GetPointHistory(GetPointHistoryArgs),

    // 测验
    StartQuiz(StartQuizArgs),
    SubmitQuizResult(SubmitQuizResultArgs),
    GetQuizHistory(GetQuizHistoryArgs),

    // 图鉴
    GetPokedex(GetPokedexArgs),
    AddPokemon(AddPokemonArgs),
    EvolvePokemon(EvolvePokemonArgs),
    GetPokedexStats(NoArgs),

    // 会话维护
    ListSessions(NoArgs),
    CleanupSessions(NoArgs),
}

impl ToolRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::CreateTopic(_) => "createTopic",
            ToolRequest::GetTopic(_) => "getTopic",
            ToolRequest::ListTopics(_) => "listTopics",
            ToolRequest::InitializeLevel(_) => "initializeLevel",
            ToolRequest::SetTopicLevel(_) => "setTopicLevel",
            ToolRequest::SetRoadmap(_) => "setRoadmap",
            ToolRequest::GetTrainer(_) => "getTrainer",
            ToolRequest::UpdateTrainer(_) => "updateTrainer",
            ToolRequest::AddPoints(_) => "addPoints",
            ToolRequest::GetRank(_) => "getRank",
            ToolRequest::GetPointHistory(_) => "getPointHistory",
            ToolRequest::StartQuiz(_) => "startQuiz",
            ToolRequest::SubmitQuizResult(_) => "submitQuizResult",
            ToolRequest::GetQuizHistory(_) => "getQuizHistory",
            ToolRequest::GetPokedex(_) => "getPokedex",
            ToolRequest::AddPokemon(_) => "addPokemon",
            ToolRequest::EvolvePokemon(_) => "evolvePokemon",
            ToolRequest::GetPokedexStats(_) => "getPokedexStats",
            ToolRequest::ListSessions(_) => "listSessions",
            ToolRequest::CleanupSessions(_) => "cleanupSessions",
        }
    }
}

/// 工具处理器
///
/// 所有工具共用同一个记录存储、锁管理器和会话缓存。
/// 处理器可以廉价克隆，并发请求各自持有一个克隆即可。
#[derive(Clone)]
pub struct ToolHandler {
    store: RecordStore,
    locks: Arc<LockManager>,
    modifier: AtomicModifier,
    sessions: Arc<SessionCache<QuizSession>>,
}

impl ToolHandler {
    pub fn new(store: RecordStore, locks: Arc<LockManager>, sessions: Arc<SessionCache<QuizSession>>) -> Self {
        let modifier = AtomicModifier::new(store.clone(), Arc::clone(&locks));
        ToolHandler {
            store,
            locks,
            modifier,
            sessions,
        }
    }

    /// 按配置组装存储、锁管理器和会话缓存
    pub fn from_settings(settings: &Settings) -> Self {
        let store = RecordStore::new(settings.data_root());
        let locks = Arc::new(LockManager::new());
        let sessions = Arc::new(SessionCache::new(
            store.clone(),
            Arc::clone(&locks),
            settings.sessions.store_file.clone(),
            settings.expiry_policy(),
        ));
        Self::new(store, locks, sessions)
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn sessions(&self) -> &Arc<SessionCache<QuizSession>> {
        &self.sessions
    }

    /// 解析并执行一行请求
    ///
    /// 请求中的 `id` 字段会原样带回响应，调用方可以据此匹配乱序返回的结果。
    pub async fn handle_line(&self, line: &str) -> Value {
        let value: Value = match serde_json::from_str(line.trim()) {
            Ok(value) => value,
            Err(e) => {
                warn!("无法解析请求: {}", e);
                return failure(format!("无效的请求: {}", e));
            }
        };
        let request_id = value.get("id").cloned();

        let mut response = match request_from_value(value) {
            Ok(request) => self.execute(request).await,
            Err(e) => {
                warn!("无法解析请求: {}", e);
                failure(format!("无效的请求: {}", e))
            }
        };
        if let (Some(id), Value::Object(map)) = (request_id, &mut response) {
            map.insert("id".to_string(), id);
        }
        response
    }

    /// 执行请求，错误转换为失败结果
    pub async fn execute(&self, request: ToolRequest) -> Value {
        let name = request.name();
        debug!("执行工具: {}", name);

        let result = match request {
            ToolRequest::CreateTopic(args) => topic::create_topic(self, args).await,
            ToolRequest::GetTopic(args) => topic::get_topic(self, args).await,
            ToolRequest::ListTopics(args) => topic::list_topics(self, args).await,
            ToolRequest::InitializeLevel(args) => topic::initialize_level(self, args).await,
            ToolRequest::SetTopicLevel(args) => topic::set_topic_level(self, args).await,
            ToolRequest::SetRoadmap(args) => topic::set_roadmap(self, args).await,
            ToolRequest::GetTrainer(args) => trainer::get_trainer(self, args).await,
            ToolRequest::UpdateTrainer(args) => trainer::update_trainer(self, args).await,
            ToolRequest::AddPoints(args) => trainer::add_points(self, args).await,
            ToolRequest::GetRank(_) => trainer::get_rank(self).await,
            ToolRequest::GetPointHistory(args) => trainer::get_point_history(self, args).await,
            ToolRequest::StartQuiz(args) => quiz::start_quiz(self, args).await,
            ToolRequest::SubmitQuizResult(args) => quiz::submit_quiz_result(self, args).await,
            ToolRequest::GetQuizHistory(args) => quiz::get_quiz_history(self, args).await,
            ToolRequest::GetPokedex(args) => pokedex::get_pokedex(self, args).await,
            ToolRequest::AddPokemon(args) => pokedex::add_pokemon(self, args).await,
            ToolRequest::EvolvePokemon(args) => pokedex::evolve_pokemon(self, args).await,
            ToolRequest::GetPokedexStats(_) => pokedex::get_pokedex_stats(self).await,
            ToolRequest::ListSessions(_) => quiz::list_sessions(self).await,
            ToolRequest::CleanupSessions(_) => quiz::cleanup_sessions(self).await,
        };

        match result {
            Ok(value) => success(value),
            Err(e) => {
                warn!("工具 {} 执行失败: {}", name, e);
                failure(e.to_string())
            }
        }
    }
}

/// 解析一行请求，缺少 `args` 时按空对象处理
pub fn parse_request(line: &str) -> Result<ToolRequest, serde_json::Error> {
    request_from_value(serde_json::from_str(line.trim())?)
}

fn request_from_value(mut value: Value) -> Result<ToolRequest, serde_json::Error> {
    if let Value::Object(map) = &mut value {
        map.entry("args").or_insert_with(|| json!({}));
    }
    serde_json::from_value(value)
}

fn success(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        other => json!({ "success": true, "result": other }),
    }
}

fn failure(message: String) -> Value {
    json!({ "success": false, "error": message })
}

/// 今天的日期 `YYYY-MM-DD`
fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// 读取记录，不存在时返回默认值
///
/// 本身不加锁。读改写时调用方必须已经持有该记录的锁。
async fn read_or_default<T: DeserializeOwned + Default>(store: &RecordStore, id: &str) -> StoreResult<T> {
    match store.read_as(id).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_not_found() => Ok(T::default()),
        Err(err) => Err(err),
    }
}

fn validate_name(kind: &str, name: &str) -> ToolResult<()> {
    if rules::is_valid_kebab_case(name) {
        Ok(())
    } else {
        Err(ToolError::InvalidArgument(format!(
            "{} \"{}\" 无效，只能包含小写字母、数字和连字符 (如 python-async)",
            kind, name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_args_default_to_empty_object() {
        assert_eq!(parse_request(r#"{"tool":"getRank"}"#).unwrap().name(), "getRank");
        assert_eq!(parse_request(r#"{"tool":"getTrainer"}"#).unwrap().name(), "getTrainer");
        assert_eq!(parse_request(r#"{"tool":"listTopics"}"#).unwrap().name(), "listTopics");
        assert_eq!(parse_request(r#"{"tool":"getPokedexStats"}"#).unwrap().name(), "getPokedexStats");

        let request = parse_request(r#"{"tool":"getTopic","args":{"topic":"docker"}}"#).unwrap();
        assert_eq!(request.name(), "getTopic");
    }

    #[test]
    fn malformed_requests_are_rejected() {
        assert!(parse_request(r#"{"tool":"dropTables"}"#).is_err());
        assert!(parse_request(r#"{"tool":"getTopic"}"#).is_err());
        assert!(parse_request("not json").is_err());
    }

    #[test]
    fn success_marks_objects() {
        assert_eq!(success(json!({"a": 1})), json!({"a": 1, "success": true}));
        assert_eq!(failure("x".into()), json!({"success": false, "error": "x"}));
    }
}
