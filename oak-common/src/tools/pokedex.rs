use std::collections::BTreeMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::rules::{Level, EVOLUTION_POINTS, LEGENDARY_TIER};
use super::trainer::{PointHistoryEntry, TrainerData, TRAINER_HEADER, TRAINER_RECORD};
use super::{read_or_default, today, validate_name, ToolError, ToolHandler, ToolResult};
use crate::store::ModifyOptions;

pub const POKEDEX_RECORD: &str = "pokedex.yaml";
pub(super) const POKEDEX_HEADER: &str = "Professor Oak - Pokedex";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub total_caught: u64,
    pub total_evolved: u64,
    pub legendaries: u64,
    #[serde(default)]
    pub by_topic: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprites {
    pub front: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shiny: Option<String>,
}

/// 捕获方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatchMethod {
    Quiz,
    Wild,
}

/// 图鉴中的一条捕获记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaughtEntry {
    /// `pokemon-001` 形式，按加入顺序编号
    pub id: String,
    pub pokedex_number: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprites: Option<Sprites>,
    pub topic: String,
    pub course: Option<String>,
    pub level: String,
    pub tier: u8,
    pub caught_at: String,
    pub caught_during: CatchMethod,
    /// 形如 `4/5`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_score: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_earned: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gym_leader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolved_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolved_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolved_at: Option<String>,
}

/// 图鉴
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pokedex {
    pub version: u32,
    pub trainer: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub pokemon: Vec<CaughtEntry>,
    #[serde(default)]
    pub stats: CollectionStats,
}

impl Default for Pokedex {
    fn default() -> Self {
        Pokedex {
            version: 1,
            trainer: None,
            created_at: None,
            pokemon: Vec::new(),
            stats: CollectionStats::default(),
        }
    }
}

impl Pokedex {
    /// 下一条记录的编号
    pub fn next_id(&self) -> String {
        format!("pokemon-{:03}", self.pokemon.len() + 1)
    }

    pub fn find(&self, id: &str) -> Option<&CaughtEntry> {
        self.pokemon.iter().find(|entry| entry.id == id)
    }

    pub fn record_catch(&mut self, entry: CaughtEntry) {
        if self.created_at.is_none() {
            self.created_at = Some(today());
        }
        self.stats.total_caught += 1;
        *self.stats.by_topic.entry(entry.topic.clone()).or_insert(0) += 1;
        if entry.tier == LEGENDARY_TIER {
            self.stats.legendaries += 1;
        }
        self.pokemon.push(entry);
    }

    /// 让 `id` 对应的宝可梦进化，返回新加入的记录
    pub fn evolve(&mut self, id: &str, pokedex_number: u32, name: String, sprites: Sprites) -> ToolResult<CaughtEntry> {
        let original = self
            .find(id)
            .ok_or_else(|| ToolError::NotFound(format!("找不到宝可梦: {}", id)))?;
        if let Some(evolved_to) = &original.evolved_to {
            return Err(ToolError::InvalidArgument(format!("宝可梦 {} 已经进化为 {}", id, evolved_to)));
        }
        if original.tier >= LEGENDARY_TIER {
            return Err(ToolError::InvalidArgument("传说级宝可梦已是最高难度，不能再进化".to_string()));
        }

        let date = today();
        let evolved = CaughtEntry {
            id: self.next_id(),
            pokedex_number,
            name,
            sprites: Some(sprites),
            topic: original.topic.clone(),
            course: original.course.clone(),
            level: original.level.clone(),
            tier: original.tier + 1,
            caught_at: date.clone(),
            caught_during: original.caught_during,
            quiz_score: None,
            points_earned: None,
            gym_leader: None,
            evolved_from: Some(original.id.clone()),
            evolved_to: None,
            evolved_at: Some(date),
        };

        if let Some(original) = self.pokemon.iter_mut().find(|entry| entry.id == id) {
            original.evolved_to = Some(evolved.id.clone());
        }
        self.record_catch(evolved.clone());
        self.stats.total_evolved += 1;
        Ok(evolved)
    }

    /// 按难度统计数量
    pub fn count_by_tier(&self) -> BTreeMap<u8, u64> {
        let mut by_tier = BTreeMap::new();
        for entry in &self.pokemon {
            *by_tier.entry(entry.tier).or_insert(0) += 1;
        }
        by_tier
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetPokedexArgs {
    pub topic: Option<String>,
    pub level: Option<Level>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPokemonArgs {
    pub pokedex_number: u32,
    pub name: String,
    pub sprites: Sprites,
    pub topic: String,
    #[serde(default)]
    pub course: Option<String>,
    pub level: Level,
    pub tier: u8,
    pub caught_during: CatchMethod,
    pub quiz_score: Option<String>,
    pub points_earned: Option<u64>,
    pub gym_leader: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolvePokemonArgs {
    pub pokemon_id: String,
    pub evolved_pokedex_number: u32,
    pub evolved_name: String,
    pub evolved_sprites: Sprites,
}

fn pokedex_options() -> ModifyOptions<Pokedex> {
    ModifyOptions::new()
        .with_default(Pokedex {
            created_at: Some(today()),
            ..Pokedex::default()
        })
        .with_header(POKEDEX_HEADER)
}

pub(super) async fn get_pokedex(handler: &ToolHandler, args: GetPokedexArgs) -> ToolResult<Value> {
    let pokedex = match handler.store.read_as::<Pokedex>(POKEDEX_RECORD).await {
        Ok(pokedex) => pokedex,
        Err(err) if err.is_not_found() => {
            handler
                .modifier
                .modify_as(POKEDEX_RECORD, pokedex_options(), |pokedex| async move {
                    Ok::<_, ToolError>(pokedex)
                })
                .await?
        }
        Err(err) => return Err(err.into()),
    };

    let level = args.level.map(Level::as_str);
    let pokemon: Vec<&CaughtEntry> = pokedex
        .pokemon
        .iter()
        .filter(|entry| args.topic.as_deref().map_or(true, |topic| entry.topic == topic))
        .filter(|entry| level.map_or(true, |level| entry.level == level))
        .collect();

    let mut response = json!({
        "pokemon": pokemon,
        "stats": pokedex.stats,
    });
    let mut filters = serde_json::Map::new();
    if let Some(topic) = &args.topic {
        filters.insert("topic".to_string(), json!(topic));
    }
    if let Some(level) = level {
        filters.insert("level".to_string(), json!(level));
    }
    if !filters.is_empty() {
        response["filtersApplied"] = Value::Object(filters);
    }
    Ok(response)
}

pub(super) async fn add_pokemon(handler: &ToolHandler, args: AddPokemonArgs) -> ToolResult<Value> {
    validate_name("主题名称", &args.topic)?;
    if args.name.trim().is_empty() {
        return Err(ToolError::InvalidArgument("宝可梦名称不能为空".to_string()));
    }
    if !(1..=LEGENDARY_TIER).contains(&args.tier) {
        return Err(ToolError::InvalidArgument(format!(
            "无效的难度: {}，应在 1 到 {} 之间",
            args.tier, LEGENDARY_TIER
        )));
    }

    let mut first = false;
    let first_slot = &mut first;
    let pokedex = handler
        .modifier
        .modify_as(POKEDEX_RECORD, pokedex_options(), |mut pokedex: Pokedex| async move {
            *first_slot = pokedex.pokemon.is_empty();
            let id = pokedex.next_id();
            pokedex.record_catch(CaughtEntry {
                id,
                pokedex_number: args.pokedex_number,
                name: args.name.trim().to_string(),
                sprites: Some(args.sprites),
                topic: args.topic,
                course: args.course,
                level: args.level.as_str().to_string(),
                tier: args.tier,
                caught_at: today(),
                caught_during: args.caught_during,
                quiz_score: args.quiz_score,
                points_earned: args.points_earned,
                gym_leader: args.gym_leader,
                evolved_from: None,
                evolved_to: None,
                evolved_at: None,
            });
            Ok::<_, ToolError>(pokedex)
        })
        .await?;

    let added = pokedex.pokemon.last();
    if let Some(entry) = added {
        info!("图鉴新增 {} ({})", entry.name, entry.id);
    }
    Ok(json!({
        "pokemon": added,
        "firstPokemon": first,
    }))
}

/// 进化并奖励积分，图鉴和训练师档案在同一组锁下更新
pub(super) async fn evolve_pokemon(handler: &ToolHandler, args: EvolvePokemonArgs) -> ToolResult<Value> {
    if args.evolved_name.trim().is_empty() {
        return Err(ToolError::InvalidArgument("进化后的名称不能为空".to_string()));
    }

    handler
        .locks
        .with_multi_lock([POKEDEX_RECORD, TRAINER_RECORD], || record_evolution(handler, args))
        .await
}

/// 调用方必须持有图鉴和训练师档案的锁
async fn record_evolution(handler: &ToolHandler, args: EvolvePokemonArgs) -> ToolResult<Value> {
    let store = &handler.store;
    let mut pokedex: Pokedex = read_or_default(store, POKEDEX_RECORD).await?;
    let evolved = pokedex.evolve(
        &args.pokemon_id,
        args.evolved_pokedex_number,
        args.evolved_name.trim().to_string(),
        args.evolved_sprites,
    )?;

    let mut trainer: TrainerData = read_or_default(store, TRAINER_RECORD).await?;
    let mut details = BTreeMap::new();
    details.insert("pokemon".to_string(), json!(evolved.name));
    details.insert("evolvedFrom".to_string(), json!(args.pokemon_id));
    let rank_up = trainer.award(
        EVOLUTION_POINTS,
        PointHistoryEntry {
            date: today(),
            action: "pokemon_evolved".to_string(),
            topic: evolved.topic.clone(),
            points: format!("+{}", EVOLUTION_POINTS),
            details,
        },
    )?;

    store.write_as(POKEDEX_RECORD, &pokedex, Some(POKEDEX_HEADER)).await?;
    if let Err(err) = store.write_as(TRAINER_RECORD, &trainer, Some(TRAINER_HEADER)).await {
        warn!("{} 已进化为 {}，但积分未能写入训练师档案", args.pokemon_id, evolved.id);
        return Err(err.into());
    }

    info!("{} 进化为 {} ({})", args.pokemon_id, evolved.name, evolved.id);
    Ok(json!({
        "evolvedPokemon": evolved,
        "pointsAwarded": EVOLUTION_POINTS,
        "totalPoints": trainer.total_points,
        "rankUp": rank_up,
    }))
}

pub(super) async fn get_pokedex_stats(handler: &ToolHandler) -> ToolResult<Value> {
    let pokedex: Pokedex = read_or_default(&handler.store, POKEDEX_RECORD).await?;
    let stats = &pokedex.stats;
    Ok(json!({
        "stats": {
            "total_caught": stats.total_caught,
            "total_evolved": stats.total_evolved,
            "legendaries": stats.legendaries,
            "by_topic": stats.by_topic,
            "by_tier": pokedex.count_by_tier(),
        }
    }))
}
