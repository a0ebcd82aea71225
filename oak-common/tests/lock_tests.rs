use oak_common::store::LockManager;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

fn push(events: &Mutex<Vec<&'static str>>, event: &'static str) {
    events.lock().unwrap().push(event);
}

#[tokio::test]
async fn test_same_record_is_serialized() {
    let locks = LockManager::new();
    let events = Mutex::new(Vec::new());

    // 同一记录上的两个操作不能交错
    tokio::join!(
        locks.with_lock("trainer.yaml", || async {
            push(&events, "a-start");
            sleep(Duration::from_millis(50)).await;
            push(&events, "a-end");
        }),
        locks.with_lock("trainer.yaml", || async {
            push(&events, "b-start");
            sleep(Duration::from_millis(10)).await;
            push(&events, "b-end");
        }),
    );

    assert_eq!(*events.lock().unwrap(), vec!["a-start", "a-end", "b-start", "b-end"]);
}

#[tokio::test]
async fn test_different_records_run_concurrently() {
    let locks = LockManager::new();
    let events = Mutex::new(Vec::new());

    tokio::join!(
        locks.with_lock("trainer.yaml", || async {
            push(&events, "a-start");
            sleep(Duration::from_millis(50)).await;
            push(&events, "a-end");
        }),
        locks.with_lock("pokedex.yaml", || async {
            push(&events, "b-start");
            sleep(Duration::from_millis(50)).await;
            push(&events, "b-end");
        }),
    );

    let events = events.lock().unwrap();
    let position = |event| events.iter().position(|e| *e == event).unwrap();
    assert!(position("b-start") < position("a-end"));
    assert!(position("a-start") < position("b-end"));
}

#[tokio::test]
async fn test_result_is_returned_unchanged() {
    let locks = LockManager::new();

    let value = locks.with_lock("a.yaml", || async { 42 }).await;
    assert_eq!(value, 42);

    let failed: Result<(), String> = locks
        .with_lock("a.yaml", || async { Err("转换失败".to_string()) })
        .await;
    assert_eq!(failed, Err("转换失败".to_string()));

    // 出错后锁已释放
    assert!(!locks.is_held("a.yaml"));
    let again = timeout(Duration::from_secs(1), locks.with_lock("a.yaml", || async { "ok" })).await;
    assert_eq!(again.unwrap(), "ok");
}

#[tokio::test]
async fn test_lock_released_after_panic() {
    let locks = Arc::new(LockManager::new());

    let panicking = Arc::clone(&locks);
    let handle = tokio::spawn(async move {
        panicking
            .with_lock("trainer.yaml", || async {
                panic!("操作中途崩溃");
            })
            .await
    });
    assert!(handle.await.is_err());

    let result = timeout(
        Duration::from_secs(1),
        locks.with_lock("trainer.yaml", || async { true }),
    )
    .await;
    assert_eq!(result.unwrap(), true);
}

#[tokio::test]
async fn test_lock_released_when_cancelled() {
    let locks = LockManager::new();

    // 超时会丢弃正在执行的操作
    let cancelled = timeout(
        Duration::from_millis(20),
        locks.with_lock("slow.yaml", || async {
            sleep(Duration::from_secs(10)).await;
        }),
    )
    .await;
    assert!(cancelled.is_err());
    assert!(!locks.is_held("slow.yaml"));
}

#[tokio::test]
async fn test_multi_lock_any_order_does_not_deadlock() {
    let locks = Arc::new(LockManager::new());
    let counter = Arc::new(Mutex::new(0));

    let orders: [[&str; 3]; 6] = [
        ["a.yaml", "b.yaml", "c.yaml"],
        ["a.yaml", "c.yaml", "b.yaml"],
        ["b.yaml", "a.yaml", "c.yaml"],
        ["b.yaml", "c.yaml", "a.yaml"],
        ["c.yaml", "a.yaml", "b.yaml"],
        ["c.yaml", "b.yaml", "a.yaml"],
    ];

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        for order in orders {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            tasks.spawn(async move {
                locks
                    .with_multi_lock(order, || async {
                        sleep(Duration::from_millis(1)).await;
                        *counter.lock().unwrap() += 1;
                    })
                    .await;
            });
        }
    }

    let finished = timeout(Duration::from_secs(10), async {
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
    })
    .await;

    assert!(finished.is_ok(), "多记录加锁出现死锁");
    assert_eq!(*counter.lock().unwrap(), 30);
}

#[tokio::test]
async fn test_multi_lock_excludes_single_lock_holders() {
    let locks = LockManager::new();
    let events = Mutex::new(Vec::new());

    tokio::join!(
        locks.with_multi_lock(["trainer.yaml", "pokedex.yaml"], || async {
            push(&events, "multi-start");
            sleep(Duration::from_millis(50)).await;
            push(&events, "multi-end");
        }),
        locks.with_lock("pokedex.yaml", || async {
            push(&events, "single");
        }),
    );

    assert_eq!(*events.lock().unwrap(), vec!["multi-start", "multi-end", "single"]);
    assert!(!locks.is_held("trainer.yaml"));
    assert!(!locks.is_held("pokedex.yaml"));
}

#[tokio::test]
async fn test_multi_lock_duplicates_and_empty_set() {
    let locks = LockManager::new();

    // 重复的标识只加一次锁
    let duplicated = timeout(
        Duration::from_secs(1),
        locks.with_multi_lock(["x.yaml", "x.yaml", "y.yaml"], || async { "done" }),
    )
    .await;
    assert_eq!(duplicated.unwrap(), "done");

    let empty = locks.with_multi_lock(Vec::<String>::new(), || async { 7 }).await;
    assert_eq!(empty, 7);
}

#[tokio::test]
async fn test_multi_lock_opposite_orders_return_own_results() {
    let locks = LockManager::new();

    let (first, second) = timeout(Duration::from_secs(5), async {
        tokio::join!(
            locks.with_multi_lock(["a", "b"], || async {
                sleep(Duration::from_millis(20)).await;
                "a-then-b"
            }),
            locks.with_multi_lock(["b", "a"], || async {
                sleep(Duration::from_millis(20)).await;
                "b-then-a"
            }),
        )
    })
    .await
    .unwrap();

    assert_eq!(first, "a-then-b");
    assert_eq!(second, "b-then-a");
}
