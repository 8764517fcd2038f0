use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cinegraph_api::config::Config;
use cinegraph_api::db::{
    create_pool, create_redis_client, run_migrations, Cache, KeyValueStore, PgGraphStore,
    PgMovieStore, PgProcessingQueue, PgRecommendationStore, PgVoteLog,
};
use cinegraph_api::queue::{JobSource, QueueName, RedisJobSource, RedisTaskQueue, TaskQueue};
use cinegraph_api::routes::{create_router, AppState};
use cinegraph_api::services::generation::GeminiGenerator;
use cinegraph_api::services::scoring::ScoreWeights;
use cinegraph_api::services::{
    Enricher, RecommendationCache, RecommendationOrchestrator, VoteLedger, VoteProcessor,
    VoteService,
};
use cinegraph_api::workers::{JobRunner, WorkerPool};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cinegraph_api=info,tower_http=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = Cache::new(redis_client.clone())
        .await
        .context("Failed to connect to Redis")?;
    let queue_conn = redis_client
        .get_connection_manager()
        .await
        .context("Failed to open Redis task queue connection")?;

    let kv: Arc<dyn KeyValueStore> = Arc::new(cache);
    let task_queue: Arc<dyn TaskQueue> = Arc::new(RedisTaskQueue::new(queue_conn));

    let movies = Arc::new(PgMovieStore::new(pool.clone()));
    let graph = Arc::new(PgGraphStore::new(pool.clone(), ScoreWeights::default()));
    let recommendations = Arc::new(PgRecommendationStore::new(pool.clone()));

    let rec_cache = RecommendationCache::new(
        kv.clone(),
        recommendations.clone(),
        config.recommendation_ttl_secs,
        config.generation_marker_ttl_secs,
    );

    let http_client = reqwest::Client::builder()
        .timeout(config.generation_timeout())
        .connect_timeout(config.external_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let generator = Arc::new(GeminiGenerator::new(
        http_client,
        config.gemini_api_key.clone(),
        config.gemini_api_url.clone(),
        config.gemini_model.clone(),
        config.generation_timeout(),
    ));

    let orchestrator = RecommendationOrchestrator::new(
        movies.clone(),
        graph.clone(),
        rec_cache.clone(),
        task_queue.clone(),
        config.fallback_limit,
    );
    let vote_service = VoteService::new(
        VoteLedger::new(kv.clone(), config.vote_policy()),
        recommendations.clone(),
        task_queue.clone(),
    );

    let runner = Arc::new(JobRunner::new(
        VoteProcessor::new(
            graph.clone(),
            recommendations.clone(),
            Arc::new(PgVoteLog::new(pool.clone())),
        ),
        Enricher::new(
            movies.clone(),
            generator,
            rec_cache,
            Arc::new(PgProcessingQueue::new(pool.clone())),
        ),
    ));

    let mut workers = WorkerPool::new();
    for (queue, count) in [
        (QueueName::Votes, config.vote_workers),
        (QueueName::Llm, config.llm_workers),
    ] {
        for idx in 0..count {
            // BLMOVE blocks its connection, so every worker gets its own
            let consumer = format!("{}-{}-{}", config.worker_id, queue, idx);
            let source = RedisJobSource::connect(&redis_client, consumer).await?;
            source
                .requeue_unacked(queue)
                .await
                .with_context(|| format!("Failed to recover unacked {} jobs", queue))?;
            let source: Arc<dyn JobSource> = Arc::new(source);
            workers.spawn(queue, source, runner.clone());
        }
    }
    tracing::info!(workers = workers.len(), "Background workers started");

    let state = AppState {
        movies,
        graph,
        cache: kv,
        recommendations: Arc::new(orchestrator),
        votes: Arc::new(vote_service),
    };
    let app = create_router(state).layer(cors_layer(&config.allowed_origins()));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workers.shutdown().await;
    cache_writer.shutdown().await;
    pool.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
