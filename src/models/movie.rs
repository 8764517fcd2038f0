use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::services::fingerprint::normalized_keyword_set;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

/// A catalog movie, identified by the metadata source's integer ID.
///
/// Read-only to the recommendation core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub release_year: Option<i32>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    /// Free-text keywords derived offline by the LLM pipeline
    #[serde(default)]
    pub ai_keywords: Vec<String>,
    #[serde(default)]
    pub popularity: f64,
}

impl Movie {
    /// Normalized keyword set used to validate a user's keyword selection
    pub fn keyword_set(&self) -> BTreeSet<String> {
        normalized_keyword_set(&self.ai_keywords)
    }

    /// Whether the movie carries everything a result card needs.
    ///
    /// Records missing a title, poster or release year are dropped from
    /// result lists rather than rendered half-empty.
    pub fn is_displayable(&self) -> bool {
        !self.title.trim().is_empty()
            && self.poster_path.as_deref().is_some_and(|p| !p.is_empty())
            && self.year().is_some()
    }

    /// Release year, falling back to the year of the release date
    pub fn year(&self) -> Option<i32> {
        self.release_year
            .or_else(|| self.release_date.map(|d| chrono::Datelike::year(&d)))
    }
}

/// One page of the trending list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendingPage {
    pub page: u32,
    pub results: Vec<Movie>,
    pub total_pages: u32,
}

impl TrendingPage {
    /// Pages needed for `total` movies, never less than one
    pub fn page_count(total: u64, page_size: usize) -> u32 {
        let size = page_size.max(1) as u64;
        u32::try_from(total.div_ceil(size)).unwrap_or(u32::MAX).max(1)
    }
}

#[cfg(test)]
pub(crate) fn sample_movie(id: i64, title: &str, keywords: &[&str]) -> Movie {
    Movie {
        id,
        title: title.to_string(),
        overview: Some(format!("Overview of {}", title)),
        release_date: NaiveDate::from_ymd_opt(2010, 7, 16),
        release_year: Some(2010),
        poster_path: Some(format!("/poster-{}.jpg", id)),
        backdrop_path: None,
        genres: vec![],
        ai_keywords: keywords.iter().map(|k| k.to_string()).collect(),
        popularity: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_set_is_normalized() {
        let movie = sample_movie(42, "Inception", &["Heist", "Time-Loop", "heist"]);
        let set = movie.keyword_set();
        assert_eq!(set.len(), 2);
        assert!(set.contains("heist"));
        assert!(set.contains("time loop"));
    }

    #[test]
    fn test_missing_poster_is_not_displayable() {
        let mut movie = sample_movie(1, "Heat", &[]);
        assert!(movie.is_displayable());
        movie.poster_path = None;
        assert!(!movie.is_displayable());
        movie.poster_path = Some(String::new());
        assert!(!movie.is_displayable());
    }

    #[test]
    fn test_blank_title_is_not_displayable() {
        let mut movie = sample_movie(1, "Heat", &[]);
        movie.title = "  ".to_string();
        assert!(!movie.is_displayable());
    }

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(TrendingPage::page_count(0, 20), 1);
        assert_eq!(TrendingPage::page_count(20, 20), 1);
        assert_eq!(TrendingPage::page_count(21, 20), 2);
    }

    #[test]
    fn test_year_falls_back_to_release_date() {
        let mut movie = sample_movie(1, "Heat", &[]);
        movie.release_year = None;
        movie.release_date = NaiveDate::from_ymd_opt(1995, 12, 15);
        assert_eq!(movie.year(), Some(1995));
    }
}
