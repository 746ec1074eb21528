use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::favorites::{FavoritesStore, FavoritesWatcher, FileStorage};
use crate::models::{CastMember, Genre, Movie, Page};
use crate::tmdb::{self, TmdbApi, TmdbClient};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_stream::{wrappers::WatchStream, Stream, StreamExt};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 1024 * 1024;
const MIN_SUGGESTION_CHARS: usize = 2;
const MAX_SUGGESTIONS: usize = 5;
const MAIN_CAST: usize = 5;
const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub tmdb: Arc<dyn TmdbApi>,
    pub favorites: FavoritesStore,
    pub favorites_view: Arc<FavoritesWatcher>,
    pub search_rate_limit: u32,
    pub rate_limits: Arc<Mutex<HashMap<String, WindowCounter>>>,
}

#[derive(Clone, Debug)]
pub struct WindowCounter {
    pub window: u64,
    pub count: u32,
}

impl AppState {
    /// Spawns the favorites watcher, so this needs a running tokio runtime.
    pub fn new(
        tmdb: Arc<dyn TmdbApi>,
        favorites: FavoritesStore,
        poll_interval: Duration,
        search_rate_limit: u32,
    ) -> Self {
        let favorites_view = Arc::new(FavoritesWatcher::spawn(favorites.clone(), poll_interval));
        Self {
            tmdb,
            favorites,
            favorites_view,
            search_rate_limit,
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::new(
        config.tmdb_api_key.clone(),
        config.tmdb_base_url.clone(),
        config.http_timeout,
    )?);
    info!("Favorites stored under {}", config.favorites_dir.display());
    let favorites = FavoritesStore::new(Arc::new(FileStorage::new(&config.favorites_dir)));
    let initial = favorites.list().len();
    info!("Loaded {} favorite(s)", initial);

    let state = AppState::new(
        tmdb,
        favorites,
        config.poll_interval,
        config.search_rate_limit,
    );
    let app = build_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/trending", get(trending))
        .route("/api/search", get(search))
        .route("/api/search-suggestions", get(search_suggestions))
        .route("/api/genres", get(genres))
        .route("/api/movies/:id", get(movie_details))
        .route("/api/favorites", get(list_favorites).post(add_favorite))
        .route("/api/favorites/events", get(favorites_events))
        .route(
            "/api/favorites/:id",
            get(favorite_status).delete(remove_favorite),
        )
        .route("/api/favorites/:id/toggle", post(toggle_favorite))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: Option<String>,
}

impl SearchParams {
    fn trimmed(&self) -> &str {
        self.q.as_deref().map(str::trim).unwrap_or("")
    }
}

async fn trending(State(state): State<AppState>) -> ApiResult<Json<Page<Movie>>> {
    state
        .tmdb
        .trending()
        .await
        .map(Json)
        .map_err(|e| ApiError::upstream("Failed to fetch trending movies", e))
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Page<Movie>>> {
    let query = params.trimmed();
    if query.is_empty() {
        return Ok(Json(Page::empty()));
    }
    if !check_rate_limit(&state, &extract_ip(&headers)).await {
        return Err(ApiError::RateLimited);
    }
    state
        .tmdb
        .search(query)
        .await
        .map(Json)
        .map_err(|e| ApiError::upstream("Failed to search movies", e))
}

/// Autocomplete relay: short queries never reach the provider, and provider
/// failures come back as an empty list with a 500.
async fn search_suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Response {
    let query = params.trimmed();
    if query.chars().count() < MIN_SUGGESTION_CHARS {
        return Json(json!({ "results": [] })).into_response();
    }
    let ip = extract_ip(&headers);
    if !check_rate_limit(&state, &ip).await {
        warn!("Rate limit exceeded for {}", ip);
        return ApiError::RateLimited.into_response();
    }

    match state.tmdb.search(query).await {
        Ok(page) => {
            let results: Vec<Movie> = page.results.into_iter().take(MAX_SUGGESTIONS).collect();
            Json(json!({ "results": results })).into_response()
        }
        Err(e) => {
            warn!("Search suggestions error: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "results": [] })),
            )
                .into_response()
        }
    }
}

async fn genres(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let genres: Vec<Genre> = state
        .tmdb
        .genres()
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch genres", e))?;
    Ok(Json(json!({ "genres": genres })))
}

#[derive(Debug, Serialize)]
struct MovieView {
    movie: Movie,
    trailer_url: Option<String>,
    poster_url: String,
    backdrop_url: String,
    main_cast: Vec<CastMember>,
    is_favorite: bool,
}

fn movie_id_or_not_found(raw: &str) -> ApiResult<i64> {
    tmdb::parse_movie_id(raw).ok_or_else(|| ApiError::NotFound(format!("movie '{raw}'")))
}

async fn movie_details(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<MovieView>> {
    let id = movie_id_or_not_found(&raw_id)?;
    let movie = match state.tmdb.movie_details(id).await {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to fetch movie {}: {:#}", id, e);
            return Err(ApiError::NotFound(format!("movie {id}")));
        }
    };

    Ok(Json(MovieView {
        trailer_url: tmdb::trailer_url(&movie),
        poster_url: tmdb::image_url(movie.poster_path.as_deref(), tmdb::ImageSize::W500),
        backdrop_url: tmdb::image_url(
            movie.backdrop_path.as_deref(),
            tmdb::ImageSize::Original,
        ),
        main_cast: movie.main_cast(MAIN_CAST),
        is_favorite: state.favorites.contains(movie.id),
        movie,
    }))
}

async fn list_favorites(State(state): State<AppState>) -> Json<serde_json::Value> {
    let favorites = state.favorites.list();
    Json(json!({ "count": favorites.len(), "results": favorites }))
}

async fn add_favorite(
    State(state): State<AppState>,
    Json(movie): Json<Movie>,
) -> Json<serde_json::Value> {
    let id = movie.id;
    state.favorites.add(movie);
    Json(json!({ "id": id, "favorite": state.favorites.contains(id) }))
}

async fn favorite_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = movie_id_or_not_found(&raw_id)?;
    Ok(Json(json!({ "id": id, "favorite": state.favorites.contains(id) })))
}

async fn remove_favorite(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = movie_id_or_not_found(&raw_id)?;
    state.favorites.remove(id);
    Ok(Json(json!({ "id": id, "favorite": false })))
}

/// Card/detail toggle. Adding needs the full record, so a movie that is not
/// yet a favorite is fetched from the provider first.
async fn toggle_favorite(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = movie_id_or_not_found(&raw_id)?;
    let stored = state.favorites.list().into_iter().find(|m| m.id == id);
    let movie = match stored {
        Some(movie) => movie,
        None => state
            .tmdb
            .movie_details(id)
            .await
            .map_err(|e| ApiError::upstream("Failed to fetch movie details", e))?,
    };
    let favorite = state.favorites.toggle(movie);
    Ok(Json(json!({ "id": id, "favorite": favorite })))
}

/// Streams the full favorites list once on connect and again after every
/// change, whether made by this process or another one sharing the slot.
async fn favorites_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.favorites_view.receiver()).filter_map(|favorites| {
        match Event::default().event("favorites").json_data(&favorites) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Failed to encode favorites event: {}", e);
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}

fn extract_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-real-ip")
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fixed one-minute window per client, shared by the routes that reach the
/// provider with our API key.
async fn check_rate_limit(state: &AppState, ip: &str) -> bool {
    let window = (Utc::now().timestamp() / 60) as u64;
    let mut guards = state.rate_limits.lock().await;
    if guards.len() > MAX_RATE_LIMIT_ENTRIES {
        guards.retain(|_, v| v.window == window);
    }
    let entry = guards
        .entry(ip.to_string())
        .or_insert(WindowCounter { window, count: 0 });
    if entry.window != window {
        entry.window = window;
        entry.count = 0;
    }
    if entry.count >= state.search_rate_limit {
        return false;
    }
    entry.count += 1;
    true
}
