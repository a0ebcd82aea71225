use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::session::QuizParameters;

/// 学习等级，按难度排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Starter,
    Beginner,
    Advanced,
    Expert,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Starter, Level::Beginner, Level::Advanced, Level::Expert];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Starter => "starter",
            Level::Beginner => "beginner",
            Level::Advanced => "advanced",
            Level::Expert => "expert",
        }
    }

    /// 该等级可出现的挑战难度范围(闭区间)
    pub fn tier_range(self) -> (u8, u8) {
        match self {
            Level::Starter => (1, 2),
            Level::Beginner => (2, 3),
            Level::Advanced => (3, 4),
            Level::Expert => (4, 5),
        }
    }

    /// 该等级的道馆馆主
    pub fn leader(self) -> GymLeader {
        match self {
            Level::Starter => GymLeader { name: "Brock", badge: "Boulder Badge" },
            Level::Beginner => GymLeader { name: "Misty", badge: "Cascade Badge" },
            Level::Advanced => GymLeader { name: "Lt. Surge", badge: "Thunder Badge" },
            Level::Expert => GymLeader { name: "Sabrina", badge: "Marsh Badge" },
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("无效的等级: {}，可选值: starter, beginner, advanced, expert", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GymLeader {
    pub name: &'static str,
    pub badge: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Rank {
    pub name: &'static str,
    pub min_points: u64,
}

/// 训练师段位表，按所需积分升序
pub const RANKS: [Rank; 5] = [
    Rank { name: "Rookie Trainer", min_points: 0 },
    Rank { name: "Pokemon Trainer", min_points: 500 },
    Rank { name: "Great Trainer", min_points: 2000 },
    Rank { name: "Expert Trainer", min_points: 5000 },
    Rank { name: "Pokemon Master", min_points: 10000 },
];

/// 根据总积分计算段位
pub fn calculate_rank(points: u64) -> &'static str {
    RANKS
        .iter()
        .rev()
        .find(|rank| points >= rank.min_points)
        .map(|rank| rank.name)
        .unwrap_or(RANKS[0].name)
}

/// 下一段位及还差的积分，已是最高段位时返回 `None`
pub fn points_to_next_rank(points: u64) -> Option<(&'static str, u64)> {
    RANKS
        .iter()
        .find(|rank| points < rank.min_points)
        .map(|rank| (rank.name, rank.min_points - points))
}

#[derive(Debug, Clone, Copy)]
pub struct QuizTier {
    pub questions: u32,
    pub pass_rate: f64,
    pub base: u64,
    pub catch_bonus: u64,
    pub per_correct: u64,
}

const QUIZ_TIERS: [QuizTier; 5] = [
    QuizTier { questions: 3, pass_rate: 0.66, base: 15, catch_bonus: 25, per_correct: 3 },
    QuizTier { questions: 4, pass_rate: 0.75, base: 25, catch_bonus: 35, per_correct: 4 },
    QuizTier { questions: 5, pass_rate: 0.80, base: 35, catch_bonus: 50, per_correct: 5 },
    QuizTier { questions: 6, pass_rate: 0.83, base: 50, catch_bonus: 75, per_correct: 6 },
    QuizTier { questions: 8, pass_rate: 0.87, base: 100, catch_bonus: 150, per_correct: 10 },
];

/// 最高难度，也是传说级
pub const LEGENDARY_TIER: u8 = 5;

/// 宝可梦进化奖励的积分
pub const EVOLUTION_POINTS: u64 = 100;

pub fn quiz_tier(tier: u8) -> Option<&'static QuizTier> {
    QUIZ_TIERS.get(usize::from(tier).checked_sub(1)?)
}

/// 某个难度的测验参数，及格题数向上取整
pub fn quiz_parameters(tier: u8) -> Option<QuizParameters> {
    let config = quiz_tier(tier)?;
    let pass_count = (f64::from(config.questions) * config.pass_rate).ceil() as u32;
    Some(QuizParameters {
        question_count: config.questions,
        pass_threshold: config.pass_rate,
        pass_count,
    })
}

/// 测验得分明细
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizPoints {
    pub total: u64,
    pub base: u64,
    pub catch_bonus: u64,
    pub per_correct: u64,
}

/// 计算测验得分
///
/// 一题未对不得分；及格得到 基础分 + 捕获奖励 + 每题分，不及格只有每题分。
pub fn quiz_points(tier: u8, correct: u32, passed: bool) -> QuizPoints {
    let config = match quiz_tier(tier) {
        Some(config) if correct > 0 => config,
        _ => return QuizPoints::default(),
    };

    let per_correct = u64::from(correct) * config.per_correct;
    if passed {
        QuizPoints {
            total: config.base + config.catch_bonus + per_correct,
            base: config.base,
            catch_bonus: config.catch_bonus,
            per_correct,
        }
    } else {
        QuizPoints {
            total: per_correct,
            per_correct,
            ..QuizPoints::default()
        }
    }
}

/// 各难度可选的挑战对象 (图鉴编号, 名称)
pub fn challenges_for_tier(tier: u8) -> &'static [(u32, &'static str)] {
    match tier {
        1 => &[(16, "Pidgey"), (19, "Rattata"), (10, "Caterpie"), (13, "Weedle")],
        2 => &[(4, "Charmander"), (25, "Pikachu"), (1, "Bulbasaur"), (7, "Squirtle")],
        3 => &[(6, "Charizard"), (130, "Gyarados"), (9, "Blastoise"), (3, "Venusaur")],
        4 => &[(149, "Dragonite"), (248, "Tyranitar"), (143, "Snorlax"), (131, "Lapras")],
        5 => &[(150, "Mewtwo"), (384, "Rayquaza"), (249, "Lugia"), (250, "Ho-Oh")],
        _ => &[],
    }
}

/// 小写字母、数字和连字符组成的名称，如 `python-async`
pub fn is_valid_kebab_case(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('-')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()))
}

/// `python-async` → `Python Async`
pub fn to_title_case(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
