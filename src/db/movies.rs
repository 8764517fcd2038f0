use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashSet;

use crate::error::AppResult;
use crate::models::{Genre, Movie, TrendingPage};

/// Read access to the movie metadata store
#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn get_movie(&self, id: i64) -> AppResult<Option<Movie>>;

    /// Movies for the given IDs; unknown IDs are skipped, order is unspecified
    async fn get_movies(&self, ids: &[i64]) -> AppResult<Vec<Movie>>;

    /// Ranked by text-match relevance, then popularity
    async fn search_by_title(&self, query: &str, limit: usize) -> AppResult<Vec<Movie>>;

    /// The subset of `ids` the catalog does not know
    async fn filter_new_ids(&self, ids: &[i64]) -> AppResult<HashSet<i64>>;

    /// Exact match on normalized title and release year, where the year
    /// falls back to the release date. Ties go to the most popular movie.
    async fn find_by_title_year(&self, title: &str, year: i32) -> AppResult<Option<Movie>>;

    /// Displayable movies by descending popularity, one 1-based page at a time
    async fn trending(&self, page: u32, page_size: usize) -> AppResult<TrendingPage>;
}

pub(crate) const MOVIE_COLUMNS: &str = "id, title, overview, release_date, release_year, poster_path, \
                             backdrop_path, genres, ai_keywords, popularity";

/// Normalized title expression matching `normalize_keyword`.
///
/// Both sides lowercase before stripping non-alphanumerics. Matching assumes a
/// UTF-8 database whose collation lowercases the same way Rust's
/// `char::to_lowercase` does; titles outside that overlap may not resolve.
const NORMALIZED_TITLE: &str = "trim(regexp_replace(lower(title), '[^[:alnum:]]+', ' ', 'g'))";

const RESOLVED_YEAR: &str = "COALESCE(release_year, EXTRACT(YEAR FROM release_date)::INT)";

const DISPLAYABLE: &str = "btrim(title) <> '' AND COALESCE(poster_path, '') <> '' \
                           AND COALESCE(release_year, EXTRACT(YEAR FROM release_date)::INT) IS NOT NULL";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MovieRow {
    pub(crate) id: i64,
    title: String,
    overview: Option<String>,
    release_date: Option<NaiveDate>,
    release_year: Option<i32>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    genres: Json<Vec<Genre>>,
    ai_keywords: Vec<String>,
    popularity: f64,
}

impl From<MovieRow> for Movie {
    fn from(row: MovieRow) -> Self {
        Movie {
            id: row.id,
            title: row.title,
            overview: row.overview,
            release_date: row.release_date,
            release_year: row.release_year,
            poster_path: row.poster_path,
            backdrop_path: row.backdrop_path,
            genres: row.genres.0,
            ai_keywords: row.ai_keywords,
            popularity: row.popularity,
        }
    }
}

pub struct PgMovieStore {
    pool: PgPool,
}

impl PgMovieStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MovieStore for PgMovieStore {
    async fn get_movie(&self, id: i64) -> AppResult<Option<Movie>> {
        let sql = format!("SELECT {} FROM movies WHERE id = $1", MOVIE_COLUMNS);
        let row: Option<MovieRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Movie::from))
    }

    async fn get_movies(&self, ids: &[i64]) -> AppResult<Vec<Movie>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let sql = format!("SELECT {} FROM movies WHERE id = ANY($1)", MOVIE_COLUMNS);
        let rows: Vec<MovieRow> = sqlx::query_as(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Movie::from).collect())
    }

    async fn search_by_title(&self, query: &str, limit: usize) -> AppResult<Vec<Movie>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM movies
            WHERE to_tsvector('english', title) @@ websearch_to_tsquery('english', $1)
               OR title ILIKE '%' || $1 || '%'
            ORDER BY ts_rank(to_tsvector('english', title), websearch_to_tsquery('english', $1)) DESC,
                     popularity DESC
            LIMIT $2
            "#,
            MOVIE_COLUMNS
        );
        let rows: Vec<MovieRow> = sqlx::query_as(&sql)
            .bind(query.trim())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(query = %query, results = rows.len(), "Title search completed");

        Ok(rows.into_iter().map(Movie::from).collect())
    }

    async fn filter_new_ids(&self, ids: &[i64]) -> AppResult<HashSet<i64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let known: Vec<i64> = sqlx::query_scalar("SELECT id FROM movies WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        let known: HashSet<i64> = known.into_iter().collect();

        Ok(ids.iter().copied().filter(|id| !known.contains(id)).collect())
    }

    async fn find_by_title_year(&self, title: &str, year: i32) -> AppResult<Option<Movie>> {
        let normalized = crate::services::fingerprint::normalize_keyword(title);
        if normalized.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            r#"
            SELECT {}
            FROM movies
            WHERE {} = $1
              AND {} = $2
            ORDER BY popularity DESC
            LIMIT 1
            "#,
            MOVIE_COLUMNS, NORMALIZED_TITLE, RESOLVED_YEAR
        );
        let row: Option<MovieRow> = sqlx::query_as(&sql)
            .bind(normalized)
            .bind(year)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Movie::from))
    }

    async fn trending(&self, page: u32, page_size: usize) -> AppResult<TrendingPage> {
        let page = page.max(1);
        let count_sql = format!("SELECT COUNT(*) FROM movies WHERE {}", DISPLAYABLE);
        let total: i64 = sqlx::query_scalar(&count_sql).fetch_one(&self.pool).await?;

        let sql = format!(
            r#"
            SELECT {}
            FROM movies
            WHERE {}
            ORDER BY popularity DESC, id
            LIMIT $1 OFFSET $2
            "#,
            MOVIE_COLUMNS, DISPLAYABLE
        );
        let offset = i64::from(page - 1) * page_size as i64;
        let rows: Vec<MovieRow> = sqlx::query_as(&sql)
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        tracing::debug!(page, total, results = rows.len(), "Trending page loaded");

        Ok(TrendingPage {
            page,
            results: rows.into_iter().map(Movie::from).collect(),
            total_pages: TrendingPage::page_count(total.max(0) as u64, page_size),
        })
    }
}
