use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use tokio::sync::mpsc;

use crate::db::cache::KeyValueStore;
use crate::error::AppResult;
use crate::models::VoteTarget;
use crate::services::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Enriched recommendation list for a request fingerprint
    LlmRecommendations(Fingerprint),
    /// Marks an enrichment job as dispatched for a fingerprint
    GenerationMarker(Fingerprint),
    MovieSearch(String),
    /// Ledger entry: user `fingerprint` already voted on `target`
    Vote { fingerprint: String, target: VoteTarget },
    /// Fixed-window counter of votes cast by a user fingerprint
    DailyVotes(String),
    /// One page of the daily trending list
    Trending(u32),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::LlmRecommendations(fp) => write!(f, "llm_rec:{}", fp),
            CacheKey::GenerationMarker(fp) => write!(f, "llm_rec:pending:{}", fp),
            CacheKey::MovieSearch(query) => write!(f, "search:{}", query.trim().to_lowercase()),
            CacheKey::Vote {
                fingerprint,
                target,
            } => write!(f, "vote:{}:{}", fingerprint, target),
            CacheKey::DailyVotes(fingerprint) => write!(f, "votes:daily:{}", fingerprint),
            CacheKey::Trending(page) => write!(f, "trending:day:page:{}", page),
        }
    }
}

/// INCR and start the expiry window in one atomic step
const INCR_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('TTL', KEYS[1]) < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// DECR only a live positive counter, so a refund never creates a key
/// without a TTL or pushes a window below zero
const DECR_WINDOW_SCRIPT: &str = r#"
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
if count > 0 then
    redis.call('DECR', KEYS[1])
end
return 0
"#;

/// Creates a Redis client for caching
///
/// Connections are multiplexed through a `ConnectionManager` owned by [`Cache`].
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Redis-backed hot tier and vote ledger store
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Initiates a graceful shutdown of the cache writer
    ///
    /// Sends a shutdown signal to the writer task and waits for it to flush
    /// all pending writes to Redis.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task panicked");
        }
    }
}

impl Cache {
    /// Connects to Redis and spawns the background write task
    ///
    /// Writes issued through `set_in_background` are processed by that task so
    /// they never block a response.
    pub async fn new(redis_client: Client) -> AppResult<(Self, CacheWriterHandle)> {
        let conn = ConnectionManager::new(redis_client).await?;
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let writer_conn = conn.clone();
        let task = tokio::spawn(async move {
            Self::cache_writer_task(writer_conn, write_rx, shutdown_rx).await;
        });

        let cache = Self { conn, write_tx };
        let handle = CacheWriterHandle { shutdown_tx, task };

        Ok((cache, handle))
    }

    /// Background task that processes cache write messages
    ///
    /// On shutdown signal, flushes the messages already queued before exiting.
    async fn cache_writer_task(
        conn: ConnectionManager,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(conn.clone(), msg).await {
                        tracing::error!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    let mut flushed = 0;
                    while let Ok(msg) = write_rx.try_recv() {
                        if let Err(e) = Self::write_to_redis(conn.clone(), msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }

                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(mut conn: ConnectionManager, msg: CacheWriteMessage) -> AppResult<()> {
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for Cache {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key.to_string()).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key.to_string(), value, ttl_secs).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key.to_string())
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &CacheKey) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key.to_string()).await?;
        Ok(exists)
    }

    async fn delete(&self, key: &CacheKey) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key.to_string()).await?;
        Ok(())
    }

    async fn incr_window(&self, key: &CacheKey, window_secs: u64) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::Script::new(INCR_WINDOW_SCRIPT)
            .key(key.to_string())
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn decr_window(&self, key: &CacheKey) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::Script::new(DECR_WINDOW_SCRIPT)
            .key(key.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    fn set_in_background(&self, key: &CacheKey, value: String, ttl_secs: u64) {
        let msg = CacheWriteMessage {
            key: key.to_string(),
            value,
            ttl: ttl_secs,
        };

        if let Err(e) = self.write_tx.send(msg) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }
}
