//! Fetch TMDB data through the service's client and print what the API exposes.
//! Usage:
//!   cargo run --bin tmdb_props -- movie <tmdb_id>
//!   cargo run --bin tmdb_props -- search <query>
//!   cargo run --bin tmdb_props -- trending
//!   cargo run --bin tmdb_props -- genres
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use movie_finder::config::Config;
use movie_finder::models::Movie;
use movie_finder::tmdb::{image_url, parse_movie_id, trailer_url, ImageSize, TmdbApi, TmdbClient};
use serde_json::json;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Movie,
    Search,
    Trending,
    Genres,
}

impl FromStr for Command {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(Command::Movie),
            "search" => Ok(Command::Search),
            "trending" => Ok(Command::Trending),
            "genres" => Ok(Command::Genres),
            _ => Err(anyhow!(
                "command must be one of 'movie', 'search', 'trending', 'genres'"
            )),
        }
    }
}

fn summary(movie: &Movie) -> serde_json::Value {
    json!({
        "id": movie.id,
        "title": movie.title,
        "release_date": movie.release_date,
        "rating": format!("{:.1}", movie.vote_average),
        "votes": movie.vote_count,
        "poster": image_url(movie.poster_path.as_deref(), ImageSize::W500),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let mut args = env::args().skip(1);
    let command: Command = args
        .next()
        .context("missing command (movie | search | trending | genres)")?
        .parse()?;
    let rest: Vec<String> = args.collect();

    let config = Config::from_env()?;
    let client = TmdbClient::new(config.tmdb_api_key, config.tmdb_base_url, config.http_timeout)?;

    match command {
        Command::Movie => {
            let raw = rest.first().context("missing movie id")?;
            let id = parse_movie_id(raw).ok_or_else(|| anyhow!("'{}' is not a movie id", raw))?;
            let movie = client.movie_details(id).await?;
            let genres: Vec<&str> = movie
                .genres
                .iter()
                .flatten()
                .map(|g| g.name.as_str())
                .collect();
            let cast: Vec<String> = movie
                .main_cast(5)
                .into_iter()
                .map(|c| format!("{} as {}", c.name, c.character))
                .collect();
            let mut out = summary(&movie);
            out["runtime"] = json!(movie.runtime);
            out["genres"] = json!(genres);
            out["cast"] = json!(cast);
            out["trailer"] = json!(trailer_url(&movie));
            out["backdrop"] = json!(image_url(
                movie.backdrop_path.as_deref(),
                ImageSize::Original
            ));
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Search => {
            let query = rest.join(" ");
            if query.trim().is_empty() {
                return Err(anyhow!("missing search query"));
            }
            let page = client.search(query.trim()).await?;
            println!(
                "{} result(s), page {}/{}",
                page.total_results, page.page, page.total_pages
            );
            for movie in &page.results {
                println!("{}", summary(movie));
            }
        }
        Command::Trending => {
            let page = client.trending().await?;
            for movie in &page.results {
                println!("{}", summary(movie));
            }
        }
        Command::Genres => {
            for genre in client.genres().await? {
                println!("{}\t{}", genre.id, genre.name);
            }
        }
    }

    Ok(())
}
