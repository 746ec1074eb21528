use crate::models::{Genre, Movie, Page};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[async_trait]
pub trait TmdbApi: Send + Sync {
    async fn trending(&self) -> Result<Page<Movie>>;
    async fn search(&self, query: &str) -> Result<Page<Movie>>;
    async fn movie_details(&self, id: i64) -> Result<Movie>;
    async fn genres(&self) -> Result<Vec<Genre>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageSize {
    W200,
    W300,
    #[default]
    W500,
    W780,
    Original,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::W200 => "w200",
            ImageSize::W300 => "w300",
            ImageSize::W500 => "w500",
            ImageSize::W780 => "w780",
            ImageSize::Original => "original",
        }
    }
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client failed")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path_and_query: &str) -> Result<T> {
        let sep = if path_and_query.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}{}api_key={}",
            self.base_url, path_and_query, sep, self.api_key
        );
        debug!("GET {}{}", self.base_url, path_and_query);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            // The URL carries the credential, so only the path goes into the error.
            return Err(anyhow!("{} -> {}: {}", path_and_query, status, text));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed)
    }
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn trending(&self) -> Result<Page<Movie>> {
        self.get_json("/trending/movie/day")
            .await
            .context("Failed to fetch trending movies")
    }

    async fn search(&self, query: &str) -> Result<Page<Movie>> {
        let path = format!("/search/movie?query={}", urlencoding::encode(query));
        self.get_json(&path)
            .await
            .context("Failed to search movies")
    }

    async fn movie_details(&self, id: i64) -> Result<Movie> {
        let path = format!("/movie/{id}?append_to_response=credits,videos");
        self.get_json(&path)
            .await
            .with_context(|| format!("Failed to fetch movie details for {id}"))
    }

    async fn genres(&self) -> Result<Vec<Genre>> {
        #[derive(Deserialize)]
        struct GenreList {
            genres: Vec<Genre>,
        }

        let data: GenreList = self
            .get_json("/genre/movie/list")
            .await
            .context("Failed to fetch genres")?;
        Ok(data.genres)
    }
}

/// Full image URL for a poster or backdrop path, empty when there is none.
pub fn image_url(path: Option<&str>, size: ImageSize) -> String {
    match path {
        Some(p) if !p.is_empty() => format!("{IMAGE_BASE}/{}{p}", size.as_str()),
        _ => String::new(),
    }
}

pub fn trailer_url(movie: &Movie) -> Option<String> {
    movie
        .videos
        .as_ref()?
        .results
        .iter()
        .find(|v| v.site == "YouTube" && v.video_type == "Trailer")
        .map(|v| format!("https://www.youtube.com/watch?v={}", v.key))
}

/// Route segment to movie id. Leading digits are accepted the way a lenient
/// integer parse would ("123abc" -> 123, "+7" -> 7); anything without them
/// is `None`.
pub fn parse_movie_id(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}
