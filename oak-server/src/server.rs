use std::io;
use std::time::Duration;

use log::{debug, error, info, warn};
use oak_common::ToolHandler;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant};

pub struct Server {
    handler: ToolHandler,
    cleanup_interval: Option<Duration>,
}

impl Server {
    /// `cleanup_interval_secs` 为 0 时不启用后台清理
    pub fn new(handler: ToolHandler, cleanup_interval_secs: u64) -> Self {
        let cleanup_interval = (cleanup_interval_secs > 0).then(|| Duration::from_secs(cleanup_interval_secs));
        Server {
            handler,
            cleanup_interval,
        }
    }

    // 启动服务: 每行一个请求，每个请求一个任务，响应按完成顺序逐行写出
    pub async fn run<R, W>(&self, input: R, output: W) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if let Err(e) = self.handler.sessions().load().await {
            warn!("加载会话失败，将在下次访问时重试: {}", e);
        }

        let (tx, rx) = mpsc::unbounded_channel::<Value>();
        let writer = tokio::spawn(write_responses(rx, output));

        let mut lines = BufReader::new(input).lines();
        let mut tasks = JoinSet::new();

        let period = self.cleanup_interval.unwrap_or(Duration::from_secs(3600));
        let mut ticker = interval_at(Instant::now() + period, period);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!("服务已启动，等待请求");
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            debug!("接收到请求: {}", line);
                            let handler = self.handler.clone();
                            let tx = tx.clone();
                            tasks.spawn(async move {
                                let response = handler.handle_line(&line).await;
                                // 写出任务已退出时丢弃响应
                                let _ = tx.send(response);
                            });
                        }
                        Ok(None) => {
                            info!("输入已关闭");
                            break;
                        }
                        Err(e) => {
                            error!("读取请求时出错: {}", e);
                            break;
                        }
                    }
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!("请求任务异常退出: {}", e);
                    }
                }
                _ = ticker.tick(), if self.cleanup_interval.is_some() => {
                    self.sweep().await;
                }
                _ = &mut shutdown => {
                    info!("接收到终止信号，正在关闭服务...");
                    break;
                }
            }
        }

        // 等待进行中的请求完成
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("请求任务异常退出: {}", e);
            }
        }
        self.sweep().await;

        drop(tx);
        match writer.await {
            Ok(result) => result?,
            Err(e) => error!("响应写出任务异常退出: {}", e),
        }

        info!("服务已关闭");
        Ok(())
    }

    // 清理过期会话和空闲的记录锁
    async fn sweep(&self) {
        match self.handler.sessions().cleanup_expired().await {
            Ok(0) => {}
            Ok(cleaned) => info!("定期清理: 移除 {} 个过期会话", cleaned),
            Err(e) => error!("清理过期会话失败: {}", e),
        }
        let pruned = self.handler.locks().prune_idle();
        if pruned > 0 {
            debug!("释放了 {} 个空闲记录锁", pruned);
        }
    }
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<Value>, mut output: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = response.to_string();
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oak_common::store::{DataRoot, LockManager, RecordStore};
    use oak_common::{ExpiryPolicy, SessionCache};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn test_handler(dir: &TempDir) -> ToolHandler {
        let store = RecordStore::new(DataRoot::fixed(dir.path()));
        let locks = Arc::new(LockManager::new());
        let sessions = Arc::new(SessionCache::new(
            store.clone(),
            Arc::clone(&locks),
            "quiz-sessions.yaml",
            ExpiryPolicy::default(),
        ));
        ToolHandler::new(store, locks, sessions)
    }

    async fn run_lines(dir: &TempDir, input: &str) -> Vec<Value> {
        let server = Server::new(test_handler(dir), 0);
        let (output, mut reader) = tokio::io::duplex(64 * 1024);

        server.run(input.as_bytes(), output).await.unwrap();

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        text.lines().map(|line| serde_json::from_str(line).unwrap()).collect()
    }

    #[tokio::test]
    async fn answers_every_request_line() {
        let dir = TempDir::new().unwrap();
        let input = concat!(
            r#"{"id": 1, "tool": "getRank"}"#,
            "\n\n",
            r#"{"id": 2, "tool": "noSuchTool"}"#,
            "\n",
            "not json\n",
        );

        let mut responses = run_lines(&dir, input).await;
        assert_eq!(responses.len(), 3);

        responses.sort_by_key(|response| response["id"].as_i64().unwrap_or(i64::MAX));
        assert_eq!(responses[0]["success"], true);
        assert_eq!(responses[0]["rank"], "Rookie Trainer");
        assert_eq!(responses[1]["success"], false);
        assert_eq!(responses[2]["success"], false);
    }

    #[tokio::test]
    async fn concurrent_point_awards_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let input: String = (1..=20)
            .map(|i| {
                format!(
                    "{{\"id\": {}, \"tool\": \"addPoints\", \"args\": {{\"points\": 25, \"action\": \"bonus\", \"topic\": \"rust\"}}}}\n",
                    i
                )
            })
            .collect();

        let responses = run_lines(&dir, &input).await;
        assert_eq!(responses.len(), 20);
        assert!(responses.iter().all(|response| response["success"] == true));

        let trainer = RecordStore::new(DataRoot::fixed(dir.path()))
            .read("trainer.yaml")
            .await
            .unwrap();
        assert_eq!(trainer["total_points"], 500);
        assert_eq!(trainer["rank"], "Pokemon Trainer");
        assert_eq!(trainer["point_history"].as_array().map(Vec::len), Some(20));
    }
}
