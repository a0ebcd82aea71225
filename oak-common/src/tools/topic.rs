use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::rules::{to_title_case, Level};
use super::{today, validate_name, ToolError, ToolHandler, ToolResult};
use crate::store::{ModifyOptions, StoreError};

const PROGRESS_HEADER: &str = "Topic Progress";
const REWARDS_HEADER: &str = "Topic Rewards";

pub(super) fn topic_path(topic: &str) -> String {
    format!("topics/{}", topic)
}

pub(super) fn progress_record(topic: &str) -> String {
    format!("topics/{}/progress.yaml", topic)
}

fn rewards_record(topic: &str) -> String {
    format!("topics/{}/rewards.yaml", topic)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadmapStatus {
    Pending,
    Active,
    Completed,
}

/// 路线图中的一门课程或一道练习
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadmapItem {
    pub id: String,
    pub name: String,
    pub mandatory: bool,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl RoadmapItem {
    fn new(id: String, name: String, mandatory: bool) -> Self {
        RoadmapItem {
            id,
            name,
            mandatory,
            completed: false,
            completed_at: None,
        }
    }
}

/// 某个等级的学习路线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRoadmap {
    pub status: RoadmapStatus,
    #[serde(default)]
    pub courses: Vec<RoadmapItem>,
    /// 以课程编号为键
    #[serde(default)]
    pub exercices: BTreeMap<String, Vec<RoadmapItem>>,
    #[serde(default)]
    pub quiz_required: bool,
    #[serde(default)]
    pub quiz_passed: bool,
    #[serde(default, rename = "completed_at", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl LevelRoadmap {
    pub fn pending() -> Self {
        LevelRoadmap {
            status: RoadmapStatus::Pending,
            courses: Vec::new(),
            exercices: BTreeMap::new(),
            quiz_required: false,
            quiz_passed: false,
            completed_at: None,
        }
    }
}

/// 主题学习进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicProgress {
    pub version: u32,
    pub topic: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
    pub current_level: Option<Level>,
    /// 以等级名为键
    #[serde(default)]
    pub roadmap: BTreeMap<String, LevelRoadmap>,
    #[serde(default)]
    pub progress: BTreeMap<String, Value>,
    #[serde(default)]
    pub extras: Vec<Value>,
}

impl TopicProgress {
    pub fn new(topic: &str, display_name: Option<String>, description: Option<String>) -> Self {
        TopicProgress {
            version: 1,
            topic: topic.to_string(),
            display_name: display_name.unwrap_or_else(|| to_title_case(topic)),
            description: description.unwrap_or_default(),
            created_at: today(),
            current_level: None,
            roadmap: BTreeMap::new(),
            progress: BTreeMap::new(),
            extras: Vec::new(),
        }
    }

    /// 已完成课程的百分比，没有课程时为 0
    pub fn completion(&self) -> u32 {
        let (total, completed) = Level::ALL
            .iter()
            .filter_map(|level| self.roadmap.get(level.as_str()))
            .flat_map(|roadmap| &roadmap.courses)
            .fold((0u32, 0u32), |(total, completed), course| {
                (total + 1, completed + u32::from(course.completed))
            });
        if total == 0 {
            0
        } else {
            (f64::from(completed) / f64::from(total) * 100.0).round() as u32
        }
    }
}

#[derive(Serialize)]
struct TopicRewards<'a> {
    version: u32,
    topic: &'a str,
    created_at: String,
    badges: Vec<Value>,
    milestones: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicArgs {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicArgs {
    pub topic: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetTopicLevelArgs {
    pub topic: String,
    pub level: Level,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTopicsArgs {
    #[serde(default)]
    pub include_progress: bool,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePlan {
    pub name: String,
    pub display_name: String,
    #[serde(default = "yes")]
    pub mandatory: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExercisePlan {
    pub name: String,
    #[serde(default)]
    pub mandatory: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapPlan {
    pub courses: Vec<CoursePlan>,
    /// 以课程名为键
    #[serde(default)]
    pub exercices: BTreeMap<String, Vec<ExercisePlan>>,
    #[serde(default = "yes")]
    pub quiz_required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetRoadmapArgs {
    pub topic: String,
    pub level: Level,
    pub roadmap: RoadmapPlan,
}

/// 主题不存在时给出友好的提示
pub(super) fn missing_topic(err: StoreError, topic: &str) -> ToolError {
    if err.is_not_found() {
        ToolError::NotFound(format!("主题 \"{}\" 不存在", topic))
    } else {
        err.into()
    }
}

pub(super) async fn create_topic(handler: &ToolHandler, args: CreateTopicArgs) -> ToolResult<Value> {
    validate_name("主题名称", &args.name)?;
    let name = args.name;
    let path = topic_path(&name);

    if handler.store.exists(&path).await {
        return Err(ToolError::AlreadyExists(format!("主题 \"{}\" 已存在: {}", name, path)));
    }

    let mut folders = Vec::new();
    for level in Level::ALL {
        folders.push(format!("{}/courses/{}", path, level));
        folders.push(format!("{}/exercices/{}", path, level));
    }
    folders.push(format!("{}/extras", path));
    folders.push(format!("{}/rewards", path));
    for folder in &folders {
        handler.store.create_container(folder).await?;
    }

    // 并发创建同名主题时只有一个能写入进度记录
    let progress = TopicProgress::new(&name, args.display_name, args.description);
    let progress_id = progress_record(&name);
    let created = handler
        .modifier
        .modify(
            &progress_id,
            ModifyOptions::new().with_default(Value::Null).with_header(PROGRESS_HEADER),
            |current| async move {
                if !current.is_null() {
                    return Err(ToolError::AlreadyExists(format!("主题 \"{}\" 已存在", progress.topic)));
                }
                serde_json::to_value(&progress).map_err(|e| ToolError::InvalidArgument(e.to_string()))
            },
        )
        .await?;

    let rewards = TopicRewards {
        version: 1,
        topic: &name,
        created_at: today(),
        badges: Vec::new(),
        milestones: Vec::new(),
    };
    let rewards_id = rewards_record(&name);
    handler
        .locks
        .with_lock(&rewards_id, || handler.store.write_as(&rewards_id, &rewards, Some(REWARDS_HEADER)))
        .await?;

    info!("创建主题: {}", name);
    Ok(json!({
        "path": path,
        "topic": name,
        "displayName": created["display_name"],
        "nextStep": "setTopicLevel",
    }))
}

pub(super) async fn get_topic(handler: &ToolHandler, args: TopicArgs) -> ToolResult<Value> {
    validate_name("主题名称", &args.topic)?;
    let progress: TopicProgress = handler
        .store
        .read_as(&progress_record(&args.topic))
        .await
        .map_err(|err| missing_topic(err, &args.topic))?;

    Ok(json!({
        "topic": progress.topic,
        "displayName": progress.display_name,
        "description": progress.description,
        "createdAt": progress.created_at,
        "currentLevel": progress.current_level,
        "roadmap": progress.roadmap,
        "progress": progress.progress,
        "extras": progress.extras.len(),
    }))
}

pub(super) async fn set_topic_level(handler: &ToolHandler, args: SetTopicLevelArgs) -> ToolResult<Value> {
    validate_name("主题名称", &args.topic)?;
    let topic = args.topic;
    let level = args.level;

    let mut previous = None;
    let slot = &mut previous;
    handler
        .modifier
        .modify_as(
            &progress_record(&topic),
            ModifyOptions::new().with_header(PROGRESS_HEADER),
            |mut progress: TopicProgress| async move {
                *slot = progress.current_level;
                progress.current_level = Some(level);
                progress
                    .roadmap
                    .entry(level.as_str().to_string())
                    .or_insert_with(LevelRoadmap::pending);
                Ok::<_, ToolError>(progress)
            },
        )
        .await
        .map_err(|err| match err {
            ToolError::Store(err) => missing_topic(err, &topic),
            other => other,
        })?;

    info!("主题 {} 的等级设置为 {}", topic, level);
    Ok(json!({
        "topic": topic,
        "level": level,
        "previousLevel": previous,
        "leader": level.leader(),
    }))
}

/// 列出全部主题，不加锁，读不出进度的目录会被跳过
pub(super) async fn list_topics(handler: &ToolHandler, args: ListTopicsArgs) -> ToolResult<Value> {
    let names = match handler.store.list_containers("topics").await {
        Ok(names) => names,
        Err(err) if err.is_not_found() => Vec::new(),
        Err(err) => return Err(err.into()),
    };

    let mut topics = Vec::new();
    for name in names {
        let progress: TopicProgress = match handler.store.read_as(&progress_record(&name)).await {
            Ok(progress) => progress,
            Err(err) => {
                debug!("跳过主题目录 {}: {}", name, err);
                continue;
            }
        };

        let mut item = json!({
            "name": progress.topic,
            "displayName": progress.display_name,
            "path": topic_path(&name),
            "currentLevel": progress.current_level,
        });
        if args.include_progress {
            item["completion"] = json!(progress.completion());
        }
        topics.push(item);
    }

    Ok(json!({
        "count": topics.len(),
        "topics": topics,
    }))
}

/// 第一次设置主题等级，已有等级时拒绝
pub(super) async fn initialize_level(handler: &ToolHandler, args: SetTopicLevelArgs) -> ToolResult<Value> {
    validate_name("主题名称", &args.topic)?;
    let topic = args.topic;
    let level = args.level;

    handler
        .modifier
        .modify_as(
            &progress_record(&topic),
            ModifyOptions::new().with_header(PROGRESS_HEADER),
            |mut progress: TopicProgress| async move {
                if let Some(current) = progress.current_level {
                    return Err(ToolError::AlreadyExists(format!(
                        "主题 \"{}\" 的等级已经设置为 \"{}\"",
                        progress.topic, current
                    )));
                }
                progress.current_level = Some(level);
                progress.roadmap.insert(level.as_str().to_string(), LevelRoadmap::pending());
                Ok(progress)
            },
        )
        .await
        .map_err(|err| match err {
            ToolError::Store(err) => missing_topic(err, &topic),
            other => other,
        })?;

    info!("主题 {} 初始等级为 {}", topic, level);
    Ok(json!({
        "topic": topic,
        "level": level,
        "leader": level.leader(),
        "nextStep": "setRoadmap",
    }))
}

fn course_id(index: usize, name: &str) -> String {
    format!("{:02}-{}", index + 1, name)
}

fn exercise_id(index: usize) -> String {
    format!("exercice-{:02}", index + 1)
}

/// 写入占位文件，已有内容的文件保持不变
async fn write_placeholder(handler: &ToolHandler, id: &str, content: &str) -> ToolResult<bool> {
    if handler.store.exists(id).await {
        return Ok(false);
    }
    handler.store.write_text(id, content).await?;
    Ok(true)
}

/// 保存某个等级的路线图，并创建课程和练习的占位文件
///
/// 文件在进度记录的锁内创建，同一主题的路线图更新不会交错。
pub(super) async fn set_roadmap(handler: &ToolHandler, args: SetRoadmapArgs) -> ToolResult<Value> {
    validate_name("主题名称", &args.topic)?;
    for course in &args.roadmap.courses {
        validate_name("课程名称", &course.name)?;
    }
    let topic = args.topic;
    let level = args.level;
    let plan = args.roadmap;
    let path = topic_path(&topic);

    let mut course_paths = Vec::new();
    let mut exercise_count = 0usize;
    let created = (&mut course_paths, &mut exercise_count);
    handler
        .modifier
        .modify_as(
            &progress_record(&topic),
            ModifyOptions::new().with_header(PROGRESS_HEADER),
            |mut progress: TopicProgress| async move {
                let (course_paths, exercise_count) = created;
                let courses_dir = format!("{}/courses/{}", path, level);
                handler.store.create_container(&courses_dir).await?;

                let mut roadmap = LevelRoadmap {
                    status: RoadmapStatus::Active,
                    courses: Vec::new(),
                    exercices: BTreeMap::new(),
                    quiz_required: plan.quiz_required,
                    quiz_passed: false,
                    completed_at: None,
                };

                for (index, course) in plan.courses.iter().enumerate() {
                    let id = course_id(index, &course.name);
                    let course_path = format!("{}/{}.md", courses_dir, id);
                    let placeholder = format!("# {}\n\n> 课程内容待生成\n", course.display_name);
                    write_placeholder(handler, &course_path, &placeholder).await?;
                    course_paths.push(course_path);

                    let exercises = plan.exercices.get(&course.name).map(Vec::as_slice).unwrap_or_default();
                    let mut items = Vec::new();
                    for (number, exercise) in exercises.iter().enumerate() {
                        let exercise_dir = format!("{}/exercices/{}/{}/{}", path, level, id, exercise_id(number));
                        handler.store.create_container(&format!("{}/result", exercise_dir)).await?;
                        handler.store.create_container(&format!("{}/sandbox", exercise_dir)).await?;
                        let placeholder = format!("# Exercise: {}\n\n> 练习说明待生成\n", exercise.name);
                        write_placeholder(handler, &format!("{}/exercice.md", exercise_dir), &placeholder).await?;
                        items.push(RoadmapItem::new(exercise_id(number), exercise.name.clone(), exercise.mandatory));
                        *exercise_count += 1;
                    }
                    if !items.is_empty() {
                        roadmap.exercices.insert(id.clone(), items);
                    }

                    roadmap
                        .courses
                        .push(RoadmapItem::new(id, course.display_name.clone(), course.mandatory));
                }

                progress.roadmap.insert(level.as_str().to_string(), roadmap);
                Ok::<_, ToolError>(progress)
            },
        )
        .await
        .map_err(|err| match err {
            ToolError::Store(err) => missing_topic(err, &topic),
            other => other,
        })?;

    info!(
        "主题 {} 的 {} 路线图: {} 门课程，{} 道练习",
        topic,
        level,
        course_paths.len(),
        exercise_count
    );
    Ok(json!({
        "topic": topic,
        "level": level,
        "created": {
            "courses": course_paths.len(),
            "exercises": exercise_count,
        },
        "coursePaths": course_paths,
    }))
}
