/// Read-through caching over a [`KeyValueStore`](crate::db::KeyValueStore).
///
/// Returns the cached value when present. Otherwise awaits `$block`, queues the
/// result for a background write with `$ttl` seconds to live, and returns it.
/// A failing cache read is logged and treated as a miss so the cache never
/// turns a working lookup into an error.
///
/// # Example
/// ```rust,ignore
/// let movies: Vec<Movie> = cached!(cache, CacheKey::MovieSearch(q.clone()), 3600, async {
///     store.search_by_title(&q, 20).await
/// })?;
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let key = $key;
        match $cache.get_from_cache(&key).await {
            Ok(Some(cached)) => Ok(cached),
            other => {
                if let Err(e) = other {
                    tracing::warn!(error = %e, key = %key, "Cache read failed, computing value");
                }
                match $block.await {
                    Ok(value) => {
                        $cache.set_json_in_background(&key, &value, $ttl);
                        Ok(value)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }};
}
