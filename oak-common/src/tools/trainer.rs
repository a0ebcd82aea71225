use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::rules::{calculate_rank, points_to_next_rank, RANKS};
use super::{today, ToolError, ToolHandler, ToolResult};
use crate::store::ModifyOptions;

pub const TRAINER_RECORD: &str = "trainer.yaml";
pub(super) const TRAINER_HEADER: &str = "Professor Oak - Trainer Profile";
const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSettings {
    pub wild_encounters: bool,
    pub notifications: bool,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        TrainerSettings {
            wild_encounters: true,
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerAchievements {
    pub first_pokemon: Option<String>,
    pub first_badge: Option<String>,
    pub first_legendary: Option<String>,
}

/// 积分流水中的一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointHistoryEntry {
    pub date: String,
    pub action: String,
    pub topic: String,
    /// 形如 `+40`
    pub points: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

/// 训练师档案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerData {
    pub version: u32,
    pub trainer: Option<String>,
    pub started_at: Option<String>,
    pub total_points: u64,
    pub rank: String,
    #[serde(default)]
    pub settings: TrainerSettings,
    #[serde(default)]
    pub achievements: TrainerAchievements,
    #[serde(default)]
    pub point_history: Vec<PointHistoryEntry>,
}

impl Default for TrainerData {
    fn default() -> Self {
        TrainerData {
            version: 1,
            trainer: None,
            started_at: None,
            total_points: 0,
            rank: RANKS[0].name.to_string(),
            settings: TrainerSettings::default(),
            achievements: TrainerAchievements::default(),
            point_history: Vec::new(),
        }
    }
}

impl TrainerData {
    /// 增加积分并记一笔流水，返回是否升级
    ///
    /// 总积分溢出时不做任何修改。
    pub fn award(&mut self, points: u64, entry: PointHistoryEntry) -> ToolResult<bool> {
        let total = self.total_points.checked_add(points).ok_or_else(|| {
            ToolError::InvalidArgument(format!("积分溢出: 当前 {}，增加 {}", self.total_points, points))
        })?;
        self.total_points = total;
        self.point_history.push(entry);

        let rank = calculate_rank(self.total_points);
        if rank != self.rank {
            self.rank = rank.to_string();
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTrainerArgs {
    #[serde(default)]
    pub include_history: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTrainerArgs {
    pub name: Option<String>,
    pub wild_encounters: Option<bool>,
    pub notifications: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPointsArgs {
    pub points: i64,
    pub action: String,
    pub topic: String,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPointHistoryArgs {
    pub topic: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

fn trainer_options() -> ModifyOptions<TrainerData> {
    ModifyOptions::new()
        .with_default(TrainerData::default())
        .with_header(TRAINER_HEADER)
}

/// 读取训练师档案，第一次使用时创建
async fn load_trainer(handler: &ToolHandler) -> ToolResult<TrainerData> {
    match handler.store.read_as::<TrainerData>(TRAINER_RECORD).await {
        Ok(trainer) => Ok(trainer),
        Err(err) if err.is_not_found() => {
            handler
                .modifier
                .modify_as(TRAINER_RECORD, trainer_options(), |trainer| async move {
                    Ok::<_, ToolError>(trainer)
                })
                .await
        }
        Err(err) => Err(err.into()),
    }
}

fn rank_summary(trainer: &TrainerData) -> Value {
    let next = points_to_next_rank(trainer.total_points)
        .map(|(name, remaining)| json!({ "rank": name, "pointsNeeded": remaining }));
    json!({
        "rank": trainer.rank,
        "totalPoints": trainer.total_points,
        "nextRank": next,
    })
}

pub(super) async fn get_trainer(handler: &ToolHandler, args: GetTrainerArgs) -> ToolResult<Value> {
    let trainer = load_trainer(handler).await?;
    let mut summary = json!({
        "trainer": trainer.trainer,
        "startedAt": trainer.started_at,
        "totalPoints": trainer.total_points,
        "rank": trainer.rank,
        "settings": trainer.settings,
        "achievements": trainer.achievements,
        "historyCount": trainer.point_history.len(),
    });
    if args.include_history {
        summary["pointHistory"] = json!(trainer.point_history);
    }
    Ok(summary)
}

pub(super) async fn update_trainer(handler: &ToolHandler, args: UpdateTrainerArgs) -> ToolResult<Value> {
    if let Some(name) = &args.name {
        if name.trim().is_empty() {
            return Err(ToolError::InvalidArgument("训练师名称不能为空".to_string()));
        }
    }

    let mut updated_fields = Vec::new();
    let fields = &mut updated_fields;
    let trainer = handler
        .modifier
        .modify_as(TRAINER_RECORD, trainer_options(), |mut trainer| async move {
            if let Some(name) = args.name {
                trainer.trainer = Some(name.trim().to_string());
                if trainer.started_at.is_none() {
                    trainer.started_at = Some(today());
                }
                fields.push("name");
            }
            if let Some(wild) = args.wild_encounters {
                trainer.settings.wild_encounters = wild;
                fields.push("wildEncounters");
            }
            if let Some(notifications) = args.notifications {
                trainer.settings.notifications = notifications;
                fields.push("notifications");
            }
            Ok::<_, ToolError>(trainer)
        })
        .await?;

    Ok(json!({
        "updated": updated_fields,
        "trainer": trainer.trainer,
        "settings": trainer.settings,
    }))
}

pub(super) async fn add_points(handler: &ToolHandler, args: AddPointsArgs) -> ToolResult<Value> {
    if args.points <= 0 {
        return Err(ToolError::InvalidArgument("积分必须是正数".to_string()));
    }
    if args.action.trim().is_empty() {
        return Err(ToolError::InvalidArgument("action 不能为空".to_string()));
    }

    let points = args.points.unsigned_abs();
    let entry = PointHistoryEntry {
        date: today(),
        action: args.action,
        topic: args.topic,
        points: format!("+{}", points),
        details: args.details,
    };

    let mut previous_rank = String::new();
    let slot = &mut previous_rank;
    let trainer = handler
        .modifier
        .modify_as(TRAINER_RECORD, trainer_options(), |mut trainer| async move {
            *slot = trainer.rank.clone();
            trainer.award(points, entry)?;
            Ok::<_, ToolError>(trainer)
        })
        .await?;

    let rank_up = previous_rank != trainer.rank;
    if rank_up {
        info!("训练师升级: {} → {}", previous_rank, trainer.rank);
    }

    Ok(json!({
        "pointsAdded": points,
        "totalPoints": trainer.total_points,
        "rank": trainer.rank,
        "previousRank": previous_rank,
        "rankUp": rank_up,
    }))
}

pub(super) async fn get_rank(handler: &ToolHandler) -> ToolResult<Value> {
    let trainer = load_trainer(handler).await?;
    Ok(rank_summary(&trainer))
}

pub(super) async fn get_point_history(handler: &ToolHandler, args: GetPointHistoryArgs) -> ToolResult<Value> {
    let trainer = load_trainer(handler).await?;
    let limit = args.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    // 最新的在前
    let filtered: Vec<&PointHistoryEntry> = trainer
        .point_history
        .iter()
        .rev()
        .filter(|entry| args.topic.as_deref().map_or(true, |topic| entry.topic == topic))
        .collect();
    let total = filtered.len();
    let page: Vec<&PointHistoryEntry> = filtered.into_iter().skip(args.offset).take(limit).collect();

    Ok(json!({
        "total": total,
        "offset": args.offset,
        "entries": page,
    }))
}
