use oak_common::store::{
    AtomicModifier, DataRoot, LockManager, ModifyOptions, RecordStore, StoreError, StoreErrorKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio::time::sleep;

fn modifier_in(dir: &TempDir) -> AtomicModifier {
    let store = RecordStore::new(DataRoot::fixed(dir.path()));
    AtomicModifier::new(store, Arc::new(LockManager::new()))
}

#[derive(Debug)]
enum TestError {
    Store(StoreError),
    Rejected(&'static str),
}

impl From<StoreError> for TestError {
    fn from(err: StoreError) -> Self {
        TestError::Store(err)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Counter {
    count: u64,
    history: Vec<u64>,
}

#[tokio::test]
async fn test_concurrent_increments_are_not_lost() {
    let dir = TempDir::new().unwrap();
    let modifier = modifier_in(&dir);

    let mut tasks = JoinSet::new();
    for i in 0..100u64 {
        let modifier = modifier.clone();
        tasks.spawn(async move {
            modifier
                .modify_as(
                    "counter.yaml",
                    ModifyOptions::new().with_default(Counter::default()),
                    |mut counter: Counter| async move {
                        // 读和写之间让出执行权，放大竞争窗口
                        tokio::task::yield_now().await;
                        counter.count += 1;
                        counter.history.push(i);
                        Ok::<_, StoreError>(counter)
                    },
                )
                .await
                .unwrap();
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let counter: Counter = modifier.store().read_as("counter.yaml").await.unwrap();
    assert_eq!(counter.count, 100);
    assert_eq!(counter.history.len(), 100);
}

#[tokio::test]
async fn test_missing_record_uses_default() {
    let dir = TempDir::new().unwrap();
    let modifier = modifier_in(&dir);

    let written = modifier
        .modify(
            "trainer.yaml",
            ModifyOptions::new()
                .with_default(json!({"total_points": 0}))
                .with_header("Professor Oak - Trainer Profile"),
            |mut doc| async move {
                doc["total_points"] = json!(doc["total_points"].as_u64().unwrap_or(0) + 40);
                Ok::<_, StoreError>(doc)
            },
        )
        .await
        .unwrap();

    assert_eq!(written, json!({"total_points": 40}));
    assert_eq!(modifier.store().read("trainer.yaml").await.unwrap(), written);
}

#[tokio::test]
async fn test_missing_record_without_default_fails() {
    let dir = TempDir::new().unwrap();
    let modifier = modifier_in(&dir);

    let err = modifier
        .modify("missing.yaml", ModifyOptions::new(), |doc| async move {
            Ok::<Value, StoreError>(doc)
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), StoreErrorKind::NotFound);
    assert!(!modifier.store().exists("missing.yaml").await);
}

#[tokio::test]
async fn test_rejected_transform_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let modifier = modifier_in(&dir);
    modifier
        .store()
        .write("progress.yaml", &json!({"level": "starter"}), None)
        .await
        .unwrap();

    let result = modifier
        .modify("progress.yaml", ModifyOptions::new(), |_doc| async move {
            Err::<Value, _>(TestError::Rejected("等级无效"))
        })
        .await;

    assert!(matches!(result, Err(TestError::Rejected("等级无效"))));
    assert_eq!(
        modifier.store().read("progress.yaml").await.unwrap(),
        json!({"level": "starter"})
    );

    // 锁已经释放，后续修改正常进行
    let updated = modifier
        .modify("progress.yaml", ModifyOptions::new(), |mut doc| async move {
            doc["level"] = json!("beginner");
            Ok::<_, TestError>(doc)
        })
        .await
        .unwrap();
    assert_eq!(updated["level"], "beginner");
}

#[tokio::test]
async fn test_unparsable_record_is_not_replaced_by_default() {
    let dir = TempDir::new().unwrap();
    let modifier = modifier_in(&dir);
    std::fs::write(dir.path().join("broken.yaml"), "{{{").unwrap();

    let result = modifier
        .modify(
            "broken.yaml",
            ModifyOptions::new().with_default(json!({})),
            |doc| async move { Ok::<_, TestError>(doc) },
        )
        .await;

    match result {
        Err(TestError::Store(err)) => assert_eq!(err.kind(), StoreErrorKind::ParseError),
        other => panic!("应返回解析错误: {:?}", other),
    }
    assert_eq!(std::fs::read_to_string(dir.path().join("broken.yaml")).unwrap(), "{{{");
}

#[tokio::test]
async fn test_modify_holds_the_record_lock() {
    let dir = TempDir::new().unwrap();
    let modifier = modifier_in(&dir);
    let locks = Arc::clone(modifier.locks());

    let held = modifier
        .modify(
            "trainer.yaml",
            ModifyOptions::new().with_default(json!({})),
            |doc| async move {
                sleep(Duration::from_millis(5)).await;
                let held = locks.is_held("trainer.yaml");
                Ok::<_, StoreError>(json!({ "held": held, "before": doc }))
            },
        )
        .await
        .unwrap();

    assert_eq!(held["held"], true);
    assert!(!modifier.locks().is_held("trainer.yaml"));
}

#[tokio::test]
async fn test_second_modify_sees_written_value() {
    let dir = TempDir::new().unwrap();
    let modifier = modifier_in(&dir);
    let options = || ModifyOptions::new().with_default(json!({"badges": []}));

    for badge in ["Boulder Badge", "Cascade Badge"] {
        modifier
            .modify("rewards.yaml", options(), |mut doc| async move {
                if let Some(badges) = doc["badges"].as_array_mut() {
                    badges.push(json!(badge));
                }
                Ok::<_, StoreError>(doc)
            })
            .await
            .unwrap();
    }

    // 第二次修改基于第一次写入的内容，而不是默认值
    assert_eq!(
        modifier.store().read("rewards.yaml").await.unwrap(),
        json!({"badges": ["Boulder Badge", "Cascade Badge"]})
    );
}
