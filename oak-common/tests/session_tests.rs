use chrono::{DateTime, Duration, Utc};
use oak_common::session::{
    Challenge, ExpiryPolicy, QuizParameters, QuizSession, QuizType, SessionCache, DEFAULT_SESSIONS_RECORD,
};
use oak_common::store::{DataRoot, DocumentCodec, JsonCodec, LockManager, RecordStore};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinSet;

fn quiz_session(id: &str, started_at: DateTime<Utc>) -> QuizSession {
    QuizSession {
        session_id: id.to_string(),
        topic: "rust".to_string(),
        course: Some("01-ownership".to_string()),
        level: "beginner".to_string(),
        quiz_type: QuizType::Standard,
        challenge: Challenge {
            catalog_number: 25,
            name: "Pikachu".to_string(),
            tier: 2,
        },
        parameters: QuizParameters {
            question_count: 4,
            pass_threshold: 0.75,
            pass_count: 3,
        },
        started_at,
    }
}

fn cache_in(dir: &TempDir) -> SessionCache<QuizSession> {
    let store = RecordStore::new(DataRoot::fixed(dir.path()));
    SessionCache::new(
        store,
        Arc::new(LockManager::new()),
        DEFAULT_SESSIONS_RECORD,
        ExpiryPolicy::from_secs(3600),
    )
}

fn persisted(dir: &TempDir) -> serde_json::Value {
    let text = fs::read_to_string(dir.path().join(DEFAULT_SESSIONS_RECORD)).unwrap();
    JsonCodec.decode(&text).unwrap()
}

#[tokio::test]
async fn test_save_and_get() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    let session = quiz_session("s-1", Utc::now());

    cache.save(session.clone()).await.unwrap();

    assert_eq!(cache.get("s-1").await.unwrap(), Some(session));
    assert!(cache.has_session("s-1").await.unwrap());
    assert_eq!(cache.get("unknown").await.unwrap(), None);
    assert!(!cache.has_session("unknown").await.unwrap());
}

#[tokio::test]
async fn test_persisted_format() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    let started = Utc::now();

    cache.save(quiz_session("s-1", started)).await.unwrap();

    let record = persisted(&dir);
    assert_eq!(record["version"], 1);
    let entry = &record["sessions"][0];
    assert_eq!(entry["sessionId"], "s-1");
    assert_eq!(entry["type"], "standard");
    assert_eq!(entry["challenge"]["name"], "Pikachu");

    let expires_at: DateTime<Utc> = serde_json::from_value(entry["expiresAt"].clone()).unwrap();
    assert_eq!(expires_at, started + Duration::seconds(3600));
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let session = quiz_session("s-1", Utc::now());
    cache_in(&dir).save(session.clone()).await.unwrap();

    // 新的缓存实例相当于重启后的进程
    let restarted = cache_in(&dir);
    assert_eq!(restarted.get("s-1").await.unwrap(), Some(session.clone()));

    restarted.reset_loaded_state().await;
    assert_eq!(restarted.get("s-1").await.unwrap(), Some(session));
}

#[tokio::test]
async fn test_expired_session_is_absent() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);

    cache
        .save(quiz_session("old", Utc::now() - Duration::hours(2)))
        .await
        .unwrap();

    assert_eq!(cache.get("old").await.unwrap(), None);
    assert!(!cache.has_session("old").await.unwrap());
    assert_eq!(persisted(&dir)["sessions"], json!([]));
}

#[tokio::test]
async fn test_cleanup_removes_only_expired() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);

    cache.save(quiz_session("fresh", Utc::now())).await.unwrap();
    cache
        .save(quiz_session("stale", Utc::now() - Duration::hours(2)))
        .await
        .unwrap();

    assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
    assert_eq!(cache.cleanup_expired().await.unwrap(), 0);

    let remaining: Vec<String> = cache
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|session| session.session_id)
        .collect();
    assert_eq!(remaining, vec!["fresh".to_string()]);
}

#[tokio::test]
async fn test_load_skips_expired_entries() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();
    let mut live = serde_json::to_value(quiz_session("live", now)).unwrap();
    live["expiresAt"] = json!(now + Duration::minutes(30));
    let mut dead = serde_json::to_value(quiz_session("dead", now - Duration::hours(3))).unwrap();
    dead["expiresAt"] = json!(now - Duration::hours(2));

    RecordStore::new(DataRoot::fixed(dir.path()))
        .write(
            DEFAULT_SESSIONS_RECORD,
            &json!({"version": 1, "sessions": [live, dead]}),
            None,
        )
        .await
        .unwrap();

    let cache = cache_in(&dir);
    cache.load().await.unwrap();
    assert!(cache.get("live").await.unwrap().is_some());
    assert!(cache.get("dead").await.unwrap().is_none());
    assert_eq!(cache.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_corrupt_record_loads_as_empty() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(DEFAULT_SESSIONS_RECORD), "sessions: [oops").unwrap();

    let cache = cache_in(&dir);
    assert_eq!(cache.get("anything").await.unwrap(), None);

    // 之后的保存会覆盖损坏的记录
    cache.save(quiz_session("s-1", Utc::now())).await.unwrap();
    assert_eq!(persisted(&dir)["sessions"][0]["sessionId"], "s-1");
}

#[tokio::test]
async fn test_remove_and_take() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    cache.save(quiz_session("a", Utc::now())).await.unwrap();
    cache.save(quiz_session("b", Utc::now())).await.unwrap();

    cache.remove("a").await.unwrap();
    cache.remove("a").await.unwrap();
    assert_eq!(cache.get("a").await.unwrap(), None);

    // 同一个会话只能被取出一次
    assert!(cache.take("b").await.unwrap().is_some());
    assert!(cache.take("b").await.unwrap().is_none());
    assert_eq!(persisted(&dir)["sessions"], json!([]));
}

#[tokio::test]
async fn test_list_all_is_ordered_by_start_time() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    let now = Utc::now();

    cache.save(quiz_session("late", now)).await.unwrap();
    cache
        .save(quiz_session("early", now - Duration::minutes(20)))
        .await
        .unwrap();
    cache
        .save(quiz_session("middle", now - Duration::minutes(10)))
        .await
        .unwrap();

    let ids: Vec<String> = cache
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|session| session.session_id)
        .collect();
    assert_eq!(ids, vec!["early", "middle", "late"]);
}

#[tokio::test]
async fn test_clear_all() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    cache.save(quiz_session("a", Utc::now())).await.unwrap();

    cache.clear_all().await.unwrap();

    assert!(cache.list_all().await.unwrap().is_empty());
    assert_eq!(persisted(&dir)["sessions"], json!([]));
    assert!(cache_in(&dir).get("a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_saves_are_all_persisted() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(cache_in(&dir));

    let mut tasks = JoinSet::new();
    for i in 0..50 {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move {
            cache
                .save(quiz_session(&format!("s-{:02}", i), Utc::now()))
                .await
                .unwrap();
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let restarted = cache_in(&dir);
    assert_eq!(restarted.list_all().await.unwrap().len(), 50);
    assert_eq!(persisted(&dir)["sessions"].as_array().map(Vec::len), Some(50));
}

#[test]
fn test_expiry_boundary_is_consistent() {
    let policy = ExpiryPolicy::from_secs(3600);
    let started = Utc::now();
    let expires_at = policy.expires_at(started);

    // 恰好到达窗口时两种判断都认为仍然有效
    assert!(!policy.is_expired(started, expires_at));
    assert!(policy.is_live(expires_at, expires_at));

    let later = expires_at + Duration::milliseconds(1);
    assert!(policy.is_expired(started, later));
    assert!(!policy.is_live(expires_at, later));

    assert_eq!(policy.remaining(started, later), Duration::zero());
    assert_eq!(ExpiryPolicy::default().window(), Duration::seconds(3600));
}

/// 把会话记录的位置换成目录，之后的写回都会失败
fn block_record(dir: &TempDir) {
    let path = dir.path().join(DEFAULT_SESSIONS_RECORD);
    let _ = fs::remove_file(&path);
    fs::create_dir(&path).unwrap();
}

fn unblock_record(dir: &TempDir) {
    fs::remove_dir(dir.path().join(DEFAULT_SESSIONS_RECORD)).unwrap();
}

#[tokio::test]
async fn test_expired_get_keeps_session_when_write_fails() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    cache
        .save(quiz_session("old", Utc::now() - Duration::hours(2)))
        .await
        .unwrap();

    block_record(&dir);
    assert!(cache.get("old").await.is_err());
    unblock_record(&dir);

    // 会话仍在内存中，下一次访问完成移除并写回
    assert_eq!(cache.get("old").await.unwrap(), None);
    assert_eq!(persisted(&dir)["sessions"], json!([]));
}

#[tokio::test]
async fn test_cleanup_keeps_sessions_when_write_fails() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);
    cache.save(quiz_session("fresh", Utc::now())).await.unwrap();
    cache
        .save(quiz_session("stale", Utc::now() - Duration::hours(2)))
        .await
        .unwrap();

    block_record(&dir);
    assert!(cache.cleanup_expired().await.is_err());
    unblock_record(&dir);

    assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
    assert_eq!(persisted(&dir)["sessions"][0]["sessionId"], "fresh");
}
