use crate::error::{AppError, AppResult};
use crate::filter::{self, Era};
use crate::gemini::{GeminiClient, GenerativeApi};
use crate::metadata::{self, MetadataApi, TmdbClient};
use crate::models::{member_group, Movie, MovieDraft, Suggestion, ERAS, INITIAL_GENRES, MOODS};
use crate::ratings;
use crate::store::{self, FirestoreClient, LibrarySnapshot, MergeField, StoreApi};
use crate::suggest::{self, FilterSelections, SuggestionRequest};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StoreApi>,
    pub gemini: Arc<dyn GenerativeApi>,
    pub metadata: Arc<dyn MetadataApi>,
    pub library: watch::Receiver<LibrarySnapshot>,
    pub genres: Arc<RwLock<Vec<String>>>,
    pub suggestions: Arc<RwLock<Vec<Suggestion>>>,
    pub suggestion_gen: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn StoreApi>,
        gemini: Arc<dyn GenerativeApi>,
        metadata: Arc<dyn MetadataApi>,
        library: watch::Receiver<LibrarySnapshot>,
    ) -> Self {
        AppState {
            store,
            gemini,
            metadata,
            library,
            genres: Arc::new(RwLock::new(
                INITIAL_GENRES.iter().map(|g| g.to_string()).collect(),
            )),
            suggestions: Arc::new(RwLock::new(Vec::new())),
            suggestion_gen: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The latest delivered library snapshot. Handlers work on this copy;
    /// the feed task is the only writer of the shared state.
    fn snapshot(&self) -> LibrarySnapshot {
        self.library.borrow().clone()
    }
}

pub async fn run_server() -> Result<()> {
    let store: Arc<dyn StoreApi> = Arc::new(FirestoreClient::from_env()?);
    let gemini: Arc<dyn GenerativeApi> = Arc::new(GeminiClient::from_env()?);
    let metadata: Arc<dyn MetadataApi> = Arc::new(TmdbClient::from_env()?);
    let library = store::spawn_library_feed(store.clone(), store::POLL_INTERVAL);
    let state = AppState::new(store, gemini, metadata, library);

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3147));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/library", get(get_library))
        .route("/library/seed", post(seed_library))
        .route("/movies/:id/rating", put(put_rating))
        .route("/movies/:id/review", put(put_review))
        .route("/movies/:id/watched", put(put_watched))
        .route("/suggestions", get(get_suggestions).post(generate_suggestions))
        .route("/filters", get(get_filters))
        .route("/genres/refresh", post(refresh_genres))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Library entry decorated with the derived family and group averages.
/// Values are unrounded; rounding to one decimal is the display's job.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MovieView {
    #[serde(flatten)]
    movie: Movie,
    family_average: f64,
    adult_average: f64,
    kid_average: f64,
}

impl From<&Movie> for MovieView {
    fn from(movie: &Movie) -> Self {
        MovieView {
            family_average: ratings::average(&movie.ratings),
            adult_average: ratings::group_average(&movie.ratings, crate::models::Group::Adult),
            kid_average: ratings::group_average(&movie.ratings, crate::models::Group::Kid),
            movie: movie.clone(),
        }
    }
}

#[derive(Deserialize)]
struct LibraryQuery {
    #[serde(default)]
    search: String,
    /// Comma-separated era labels.
    #[serde(default)]
    eras: String,
}

async fn get_library(
    State(state): State<AppState>,
    Query(query): Query<LibraryQuery>,
) -> AppResult<Json<Value>> {
    let snapshot = state.snapshot();
    let eras = parse_era_labels(&query.eras)?;
    let movies: Vec<MovieView> = filter::filter_library(&snapshot.movies, &query.search, &eras)
        .into_iter()
        .map(MovieView::from)
        .collect();
    Ok(Json(json!({
        "movies": movies,
        "loaded": snapshot.loaded,
        "error": snapshot.error,
    })))
}

fn parse_era_labels(raw: &str) -> AppResult<HashSet<Era>> {
    raw.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(|label| {
            Era::from_label(label)
                .ok_or_else(|| AppError::Validation(format!("unknown era: {label}")))
        })
        .collect()
}

/// Rejects writes against ids not present in the library, which covers
/// both stale ids and ephemeral suggestion ids: a suggestion must be
/// promoted into the library before it can carry ratings.
fn ensure_library_movie(state: &AppState, id: &str) -> AppResult<()> {
    if state.library.borrow().movies.iter().any(|m| m.id == id) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("movie {id} is not in the library")))
    }
}

fn ensure_member(name: &str) -> AppResult<()> {
    member_group(name)
        .map(|_| ())
        .ok_or_else(|| AppError::Validation(format!("unknown family member: {name}")))
}

#[derive(Deserialize)]
struct RatingBody {
    member: String,
    score: u8,
}

async fn put_rating(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RatingBody>,
) -> AppResult<StatusCode> {
    ensure_member(&body.member)?;
    if !(1..=5).contains(&body.score) {
        return Err(AppError::Validation(format!(
            "rating must be between 1 and 5, got {}",
            body.score
        )));
    }
    ensure_library_movie(&state, &id)?;
    state
        .store
        .merge_field(
            &id,
            MergeField::Rating {
                member: body.member,
                score: body.score,
            },
        )
        .await
        .map_err(|e| AppError::Connectivity(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ReviewBody {
    member: String,
    text: String,
}

async fn put_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReviewBody>,
) -> AppResult<StatusCode> {
    ensure_member(&body.member)?;
    ensure_library_movie(&state, &id)?;
    state
        .store
        .merge_field(
            &id,
            MergeField::Review {
                member: body.member,
                text: body.text,
            },
        )
        .await
        .map_err(|e| AppError::Connectivity(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum WatchedWhen {
    Recent,
    WhileAgo,
    LongAgo,
}

impl WatchedWhen {
    fn timestamp(self) -> DateTime<Utc> {
        let now = Utc::now();
        let months_back = match self {
            WatchedWhen::Recent => return now,
            WatchedWhen::WhileAgo => 36,
            WatchedWhen::LongAgo => 60,
        };
        now.checked_sub_months(Months::new(months_back)).unwrap_or(now)
    }
}

#[derive(Deserialize)]
struct WatchedBody {
    when: WatchedWhen,
}

async fn put_watched(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<WatchedBody>,
) -> AppResult<StatusCode> {
    ensure_library_movie(&state, &id)?;
    state
        .store
        .merge_field(
            &id,
            MergeField::LastWatched {
                when: body.when.timestamp(),
            },
        )
        .await
        .map_err(|e| AppError::Connectivity(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Bootstraps an empty library: one generative call for the seed list,
/// a metadata lookup per accepted title, then a single batch insert.
async fn seed_library(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let snapshot = state.snapshot();
    if !snapshot.loaded {
        return Err(AppError::Connectivity(
            "the library has not loaded yet".to_string(),
        ));
    }
    if !snapshot.movies.is_empty() {
        return Err(AppError::Validation(
            "the library is already seeded".to_string(),
        ));
    }

    let request = SuggestionRequest::Seed;
    let prompt = request.prompt(&snapshot.movies)?;
    info!("Generating initial movie list");
    let payload = state
        .gemini
        .generate(&prompt, request.response_schema())
        .await
        .map_err(|e| AppError::ExternalService(e.to_string()))?;
    let candidates = suggest::parse_movie_candidates(&payload)
        .map_err(|e| AppError::ExternalService(e.to_string()))?;

    let mut drafts: Vec<MovieDraft> = Vec::new();
    let mut seen = HashSet::new();
    for candidate in candidates {
        let draft = draft_from_candidate(&state, candidate).await;
        if seen.insert(draft.id.clone()) {
            drafts.push(draft);
        }
    }

    let inserted = drafts.len();
    state
        .store
        .batch_insert(drafts)
        .await
        .map_err(|e| AppError::Connectivity(e.to_string()))?;
    info!("Seeded {inserted} movies into the library");
    Ok(Json(json!({ "inserted": inserted })))
}

/// A failed or empty metadata lookup is not an error: the draft falls back
/// to a placeholder poster and a locally synthesized id.
async fn draft_from_candidate(state: &AppState, candidate: suggest::Candidate) -> MovieDraft {
    let found = match state.metadata.lookup(&candidate.title, candidate.year).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Metadata lookup failed for '{}': {e}", candidate.title);
            None
        }
    };
    match found {
        Some(found) => MovieDraft {
            id: format!("tmdb-{}", found.tmdb_id),
            poster_url: Some(
                found
                    .poster_url
                    .unwrap_or_else(|| metadata::placeholder_poster(&candidate.title)),
            ),
            title: candidate.title,
            year: candidate.year,
        },
        None => MovieDraft {
            id: metadata::local_id(&candidate.title, candidate.year),
            poster_url: Some(metadata::placeholder_poster(&candidate.title)),
            title: candidate.title,
            year: candidate.year,
        },
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestBody {
    #[serde(default)]
    base_title: Option<String>,
    #[serde(flatten)]
    filters: FilterSelections,
}

async fn get_suggestions(State(state): State<AppState>) -> Json<Value> {
    let current = state.suggestions.read().await;
    Json(json!({ "suggestions": &*current }))
}

async fn generate_suggestions(
    State(state): State<AppState>,
    Json(body): Json<SuggestBody>,
) -> AppResult<Json<Value>> {
    let snapshot = state.snapshot();
    let request = match body.base_title {
        Some(base_title) => {
            info!("Finding movies like {base_title}");
            SuggestionRequest::MoreLikeThis { base_title }
        }
        None => {
            info!("Generating new suggestions");
            SuggestionRequest::Generate {
                filters: body.filters,
            }
        }
    };

    let generation = state.suggestion_gen.fetch_add(1, Ordering::SeqCst) + 1;
    let prompt = request.prompt(&snapshot.movies)?;
    let payload = state
        .gemini
        .generate(&prompt, request.response_schema())
        .await
        .map_err(|e| AppError::ExternalService(e.to_string()))?;
    let candidates = suggest::parse_movie_candidates(&payload)
        .map_err(|e| AppError::ExternalService(e.to_string()))?;
    let batch = suggest::build_suggestions(candidates, &snapshot.movies);

    // Racing requests are legal; the newest one owns the stored batch and
    // responses from superseded requests are discarded.
    let mut current = state.suggestions.write().await;
    if state.suggestion_gen.load(Ordering::SeqCst) != generation {
        debug!("Discarding stale suggestion response");
        return Ok(Json(json!({ "suggestions": &*current, "stale": true })));
    }
    *current = batch.clone();
    Ok(Json(json!({ "suggestions": batch })))
}

async fn get_filters(State(state): State<AppState>) -> Json<Value> {
    let genres = state.genres.read().await;
    Json(json!({
        "eras": ERAS,
        "genres": &*genres,
        "moods": MOODS,
    }))
}

/// Coins fresh blended genre labels from the highly rated subset of the
/// library. The insufficient-signal case fails before any external call.
async fn refresh_genres(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let snapshot = state.snapshot();
    let request = SuggestionRequest::RefreshGenres;
    let prompt = request.prompt(&snapshot.movies)?;
    info!("Creating new genres");
    let payload = state
        .gemini
        .generate(&prompt, request.response_schema())
        .await
        .map_err(|e| AppError::ExternalService(e.to_string()))?;
    let fresh = suggest::parse_genre_candidates(&payload)
        .map_err(|e| AppError::ExternalService(e.to_string()))?;

    let mut genres = state.genres.write().await;
    *genres = INITIAL_GENRES
        .iter()
        .map(|g| g.to_string())
        .chain(fresh)
        .collect();
    Ok(Json(json!({ "genres": &*genres })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
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
