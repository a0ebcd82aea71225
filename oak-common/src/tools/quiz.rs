use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::pokedex::{CatchMethod, CaughtEntry, Pokedex, POKEDEX_HEADER, POKEDEX_RECORD};
use super::rules::{self, Level, QuizPoints, LEGENDARY_TIER};
use super::topic::{missing_topic, progress_record, TopicProgress};
use super::trainer::{PointHistoryEntry, TrainerData, TRAINER_HEADER, TRAINER_RECORD};
use super::{read_or_default, validate_name, ToolError, ToolHandler, ToolResult};
use crate::session::{Challenge, QuizSession, QuizType};

const HISTORY_HEADER: &str = "Quiz History";

fn history_record(month: &str) -> String {
    format!("quiz-history/{}.yaml", month)
}

fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// `YYYY-MM`
fn is_valid_month(month: &str) -> bool {
    let bytes = month.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'-'
        && bytes.iter().enumerate().all(|(i, b)| i == 4 || b.is_ascii_digit())
        && matches!(&month[5..], "01" | "02" | "03" | "04" | "05" | "06" | "07" | "08" | "09" | "10" | "11" | "12")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizOutcome {
    pub questions: u32,
    pub correct: u32,
    pub passed: bool,
    pub points_earned: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizHistoryEntry {
    pub session_id: String,
    pub date: String,
    pub topic: String,
    pub course: Option<String>,
    pub level: String,
    #[serde(rename = "type")]
    pub quiz_type: QuizType,
    pub challenge: Challenge,
    pub result: QuizOutcome,
    pub gym_leader: String,
}

/// 某个月的测验记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizHistory {
    #[serde(default)]
    pub entries: Vec<QuizHistoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartQuizArgs {
    pub topic: String,
    pub course: Option<String>,
    #[serde(rename = "type", default)]
    pub quiz_type: QuizType,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuizAnswers {
    pub total: u32,
    pub correct: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuizResultArgs {
    pub session_id: String,
    pub answers: QuizAnswers,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetQuizHistoryArgs {
    pub topic: Option<String>,
    pub month: Option<String>,
    pub limit: Option<usize>,
}

fn session_not_found() -> ToolError {
    ToolError::NotFound("无效的会话ID，测验会话不存在或已过期".to_string())
}

/// 在等级对应的难度范围内随机选择挑战对象
fn select_challenge(level: Level) -> Option<Challenge> {
    let (min, max) = level.tier_range();
    let mut rng = rand::thread_rng();
    let tier = rng.gen_range(min..=max);
    let (catalog_number, name) = rules::challenges_for_tier(tier).choose(&mut rng)?;
    Some(Challenge {
        catalog_number: *catalog_number,
        name: name.to_string(),
        tier,
    })
}

fn leader_name(level: &str) -> String {
    level
        .parse::<Level>()
        .map(|level| level.leader().name.to_string())
        .unwrap_or_default()
}

pub(super) async fn start_quiz(handler: &ToolHandler, args: StartQuizArgs) -> ToolResult<Value> {
    validate_name("主题名称", &args.topic)?;
    let topic = args.topic;
    let course = args.course.filter(|course| !course.trim().is_empty());

    let progress: TopicProgress = handler
        .store
        .read_as(&progress_record(&topic))
        .await
        .map_err(|err| missing_topic(err, &topic))?;
    let level = progress.current_level.ok_or_else(|| {
        ToolError::InvalidArgument(format!("主题 \"{}\" 还没有设置等级，请先调用 setTopicLevel", topic))
    })?;

    let challenge = select_challenge(level)
        .ok_or_else(|| ToolError::InvalidArgument(format!("等级 {} 没有可用的挑战", level)))?;
    let parameters = rules::quiz_parameters(challenge.tier)
        .ok_or_else(|| ToolError::InvalidArgument(format!("无效的难度: {}", challenge.tier)))?;

    let session = QuizSession {
        session_id: Uuid::new_v4().to_string(),
        topic,
        course,
        level: level.as_str().to_string(),
        quiz_type: args.quiz_type,
        challenge,
        parameters,
        started_at: Utc::now(),
    };
    handler.sessions.save(session.clone()).await?;

    info!(
        "开始测验 {}: 主题 {}，挑战 {} (难度 {})",
        session.session_id, session.topic, session.challenge.name, session.challenge.tier
    );

    let expires_at = handler.sessions.policy().expires_at(session.started_at);
    Ok(json!({
        "sessionId": session.session_id,
        "challenge": session.challenge,
        "parameters": session.parameters,
        "gymLeader": level.leader(),
        "context": {
            "topic": session.topic,
            "course": session.course,
            "level": session.level,
            "type": session.quiz_type,
        },
        "expiresAt": expires_at,
    }))
}

pub(super) async fn submit_quiz_result(handler: &ToolHandler, args: SubmitQuizResultArgs) -> ToolResult<Value> {
    let answers = args.answers;
    let session = handler
        .sessions
        .get(&args.session_id)
        .await?
        .ok_or_else(session_not_found)?;

    if answers.correct > answers.total {
        return Err(ToolError::InvalidArgument("正确题数不能超过总题数".to_string()));
    }
    if answers.total != session.parameters.question_count {
        return Err(ToolError::InvalidArgument(format!(
            "应提交 {} 道题，实际提交了 {} 道",
            session.parameters.question_count, answers.total
        )));
    }

    // 取出会话，同一个会话并发提交时只有一个能继续
    let session = handler
        .sessions
        .take(&args.session_id)
        .await?
        .ok_or_else(session_not_found)?;

    let passed = answers.correct >= session.parameters.pass_count;
    let percentage = if answers.total > 0 {
        (f64::from(answers.correct) / f64::from(answers.total) * 100.0).round() as u32
    } else {
        0
    };
    let points = rules::quiz_points(session.challenge.tier, answers.correct, passed);

    let now = Utc::now();
    let history_id = history_record(&month_key(now));
    let records = [TRAINER_RECORD, POKEDEX_RECORD, history_id.as_str()];
    let promoted = handler
        .locks
        .with_multi_lock(records, || record_result(handler, &session, answers, passed, points, &history_id, now))
        .await
        .map_err(|err| {
            error!("记录测验 {} 的结果失败: {}", session.session_id, err);
            err
        })?;

    info!(
        "测验 {} 完成: {}/{}，{}，获得 {} 积分",
        session.session_id,
        answers.correct,
        answers.total,
        if passed { "通过" } else { "未通过" },
        points.total
    );

    let message = if passed {
        format!("捕获了 {}!", session.challenge.name)
    } else {
        format!("{} 逃走了!", session.challenge.name)
    };
    Ok(json!({
        "passed": passed,
        "score": {
            "correct": answers.correct,
            "total": answers.total,
            "percentage": percentage,
        },
        "challenge": {
            "caught": passed,
            "name": session.challenge.name,
            "message": message,
        },
        "points": {
            "earned": points.total,
            "breakdown": points,
        },
        "rankUp": promoted,
    }))
}

/// 写入训练师、图鉴和当月测验记录，调用方必须持有这三个记录的锁
///
/// 返回升级后的段位。
async fn record_result(
    handler: &ToolHandler,
    session: &QuizSession,
    answers: QuizAnswers,
    passed: bool,
    points: QuizPoints,
    history_id: &str,
    now: DateTime<Utc>,
) -> ToolResult<Option<String>> {
    let mut written = Vec::new();
    let result = write_result(handler, session, answers, passed, points, history_id, now, &mut written).await;
    if result.is_err() && !written.is_empty() {
        warn!(
            "测验 {} 的结果只写入了部分记录: 已写入 {:?}",
            session.session_id, written
        );
    }
    result
}

/// 依次写入各个记录，每写完一个就记到 `written`
#[allow(clippy::too_many_arguments)]
async fn write_result<'a>(
    handler: &ToolHandler,
    session: &QuizSession,
    answers: QuizAnswers,
    passed: bool,
    points: QuizPoints,
    history_id: &'a str,
    now: DateTime<Utc>,
    written: &mut Vec<&'a str>,
) -> ToolResult<Option<String>> {
    let store = &handler.store;
    let date = now.format("%Y-%m-%d").to_string();
    let gym_leader = leader_name(&session.level);
    let mut promoted = None;

    if points.total > 0 || passed {
        let mut trainer: TrainerData = read_or_default(store, TRAINER_RECORD).await?;

        if points.total > 0 {
            let mut details = BTreeMap::new();
            if passed {
                details.insert("pokemon".to_string(), json!(session.challenge.name));
            }
            details.insert("level".to_string(), json!(session.level));

            let entry = PointHistoryEntry {
                date: date.clone(),
                action: if passed { "quiz_passed" } else { "quiz_partial" }.to_string(),
                topic: session.topic.clone(),
                points: format!("+{}", points.total),
                details,
            };
            if trainer.award(points.total, entry)? {
                promoted = Some(trainer.rank.clone());
            }
        }

        if passed {
            let achievements = &mut trainer.achievements;
            achievements
                .first_pokemon
                .get_or_insert_with(|| session.challenge.name.clone());
            if session.challenge.tier == LEGENDARY_TIER {
                achievements
                    .first_legendary
                    .get_or_insert_with(|| session.challenge.name.clone());
            }
        }

        store.write_as(TRAINER_RECORD, &trainer, Some(TRAINER_HEADER)).await?;
        written.push(TRAINER_RECORD);
    }

    if passed {
        let mut pokedex: Pokedex = read_or_default(store, POKEDEX_RECORD).await?;
        let id = pokedex.next_id();
        pokedex.record_catch(CaughtEntry {
            id,
            pokedex_number: session.challenge.catalog_number,
            name: session.challenge.name.clone(),
            sprites: None,
            topic: session.topic.clone(),
            course: session.course.clone(),
            level: session.level.clone(),
            tier: session.challenge.tier,
            caught_at: date.clone(),
            caught_during: CatchMethod::Quiz,
            quiz_score: Some(format!("{}/{}", answers.correct, answers.total)),
            points_earned: Some(points.total),
            gym_leader: Some(gym_leader.clone()),
            evolved_from: None,
            evolved_to: None,
            evolved_at: None,
        });
        store.write_as(POKEDEX_RECORD, &pokedex, Some(POKEDEX_HEADER)).await?;
        written.push(POKEDEX_RECORD);
    }

    let mut history: QuizHistory = read_or_default(store, history_id).await?;
    history.entries.push(QuizHistoryEntry {
        session_id: session.session_id.clone(),
        date,
        topic: session.topic.clone(),
        course: session.course.clone(),
        level: session.level.clone(),
        quiz_type: session.quiz_type,
        challenge: session.challenge.clone(),
        result: QuizOutcome {
            questions: answers.total,
            correct: answers.correct,
            passed,
            points_earned: points.total,
        },
        gym_leader,
    });
    store.write_as(history_id, &history, Some(HISTORY_HEADER)).await?;
    written.push(history_id);

    Ok(promoted)
}

pub(super) async fn get_quiz_history(handler: &ToolHandler, args: GetQuizHistoryArgs) -> ToolResult<Value> {
    let month = match args.month {
        Some(month) if is_valid_month(&month) => month,
        Some(month) => {
            return Err(ToolError::InvalidArgument(format!("无效的月份: {}，格式应为 YYYY-MM", month)));
        }
        None => month_key(Utc::now()),
    };

    let history: QuizHistory = read_or_default(&handler.store, &history_record(&month)).await?;
    let limit = args.limit.filter(|limit| *limit > 0).unwrap_or(usize::MAX);
    let entries: Vec<&QuizHistoryEntry> = history
        .entries
        .iter()
        .filter(|entry| args.topic.as_deref().map_or(true, |topic| entry.topic == topic))
        .take(limit)
        .collect();

    Ok(json!({
        "month": month,
        "entries": entries,
    }))
}

pub(super) async fn list_sessions(handler: &ToolHandler) -> ToolResult<Value> {
    let policy = handler.sessions.policy();
    let now = Utc::now();
    let sessions: Vec<Value> = handler
        .sessions
        .list_all()
        .await?
        .into_iter()
        .map(|session| {
            json!({
                "sessionId": session.session_id,
                "topic": session.topic,
                "level": session.level,
                "challenge": session.challenge.name,
                "startedAt": session.started_at,
                "remainingSeconds": policy.remaining(session.started_at, now).num_seconds(),
            })
        })
        .collect();

    Ok(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

pub(super) async fn cleanup_sessions(handler: &ToolHandler) -> ToolResult<Value> {
    let cleaned = handler.sessions.cleanup_expired().await?;
    Ok(json!({ "cleaned": cleaned }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_keys_are_validated() {
        assert!(is_valid_month("2026-10"));
        assert!(!is_valid_month("2026-13"));
        assert!(!is_valid_month("2026/10"));
        assert!(!is_valid_month("../../x"));
        assert!(!is_valid_month("2026-1"));
    }

    #[test]
    fn challenge_comes_from_level_range() {
        for level in Level::ALL {
            let (min, max) = level.tier_range();
            for _ in 0..20 {
                let challenge = select_challenge(level).unwrap();
                assert!(challenge.tier >= min && challenge.tier <= max);
                assert!(rules::challenges_for_tier(challenge.tier)
                    .iter()
                    .any(|(number, name)| *number == challenge.catalog_number && *name == challenge.name));
            }
        }
    }
}
