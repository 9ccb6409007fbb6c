//! Boundary to the document store holding the movie library.
//!
//! The Firestore implementation keeps the store's field-level merge
//! semantics: a rating, review or watch-date write updates exactly one
//! field path and never disturbs sibling fields, so concurrent edits by
//! different family members to different fields of the same movie both
//! survive. Any replacement store must preserve this contract.

use crate::models::{Movie, MovieDraft};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";
const IDENTITY_BASE: &str = "https://identitytoolkit.googleapis.com/v1";
const COLLECTION: &str = "movies";
const PAGE_SIZE: usize = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One single-field merge update.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeField {
    Rating { member: String, score: u8 },
    Review { member: String, text: String },
    LastWatched { when: DateTime<Utc> },
}

impl MergeField {
    fn field_path(&self) -> String {
        match self {
            MergeField::Rating { member, .. } => format!("ratings.{member}"),
            MergeField::Review { member, .. } => format!("reviews.{member}"),
            MergeField::LastWatched { .. } => "lastWatched".to_string(),
        }
    }

    fn document_fields(&self) -> Value {
        match self {
            MergeField::Rating { member, score } => {
                nested_field("ratings", member, json!({ "integerValue": score.to_string() }))
            }
            MergeField::Review { member, text } => {
                nested_field("reviews", member, json!({ "stringValue": text }))
            }
            MergeField::LastWatched { when } => json!({
                "lastWatched": {
                    "timestampValue": when.to_rfc3339_opts(SecondsFormat::Micros, true)
                }
            }),
        }
    }
}

/// `{outer: {mapValue: {fields: {member: value}}}}`
fn nested_field(outer: &str, member: &str, value: Value) -> Value {
    let mut entry = Map::new();
    entry.insert(member.to_string(), value);
    let mut fields = Map::new();
    fields.insert(outer.to_string(), json!({ "mapValue": { "fields": entry } }));
    Value::Object(fields)
}

#[async_trait]
pub trait StoreApi: Send + Sync {
    /// Full current collection snapshot.
    async fn fetch_all(&self) -> Result<Vec<Movie>>;
    /// Merge exactly one logical field of one document.
    async fn merge_field(&self, movie_id: &str, field: MergeField) -> Result<()>;
    /// Insert multiple new library entries in one commit. A partial failure
    /// surfaces as a single aggregate error; there is no per-item rollback.
    async fn batch_insert(&self, drafts: Vec<MovieDraft>) -> Result<()>;
}

pub struct FirestoreClient {
    client: Client,
    api_key: String,
    project_id: String,
    token: Mutex<Option<String>>,
}

impl FirestoreClient {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("FIREBASE_API_KEY").context("FIREBASE_API_KEY not set")?;
        let project_id = env::var("FIREBASE_PROJECT_ID").context("FIREBASE_PROJECT_ID not set")?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client failed")?;
        Ok(Self {
            client,
            api_key,
            project_id,
            token: Mutex::new(None),
        })
    }

    fn collection_url(&self) -> String {
        format!(
            "{FIRESTORE_BASE}/projects/{}/databases/(default)/documents/{COLLECTION}",
            self.project_id
        )
    }

    fn document_name(&self, movie_id: &str) -> String {
        format!(
            "projects/{}/databases/(default)/documents/{COLLECTION}/{movie_id}",
            self.project_id
        )
    }

    /// Returns the cached anonymous session token, establishing one if
    /// needed. A failed sign-in is retried once before becoming fatal to
    /// store operations.
    async fn session_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = match self.sign_in_anonymously().await {
            Ok(token) => token,
            Err(e) => {
                warn!("Anonymous sign-in failed, retrying once: {e}");
                self.sign_in_anonymously().await?
            }
        };
        info!("Anonymous session established");
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn sign_in_anonymously(&self) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SignUpResponse {
            id_token: String,
        }

        let url = format!("{IDENTITY_BASE}/accounts:signUp?key={}", self.api_key);
        let res = self
            .client
            .post(&url)
            .json(&json!({ "returnSecureToken": true }))
            .send()
            .await
            .context("sign-in request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("anonymous sign-in returned {} -> {}", status, text));
        }
        let parsed: SignUpResponse = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed.id_token)
    }

    async fn send_authed(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let token = self.session_token().await?;
        let res = req
            .bearer_auth(&token)
            .send()
            .await
            .context("store request failed")?;
        let status = res.status();
        if status == StatusCode::UNAUTHORIZED {
            // Session expired; drop it so the next call signs in again.
            self.token.lock().await.take();
        }
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("store returned {} -> {}", status, text));
        }
        serde_json::from_str(&text).context("JSON parse failed")
    }
}

#[async_trait]
impl StoreApi for FirestoreClient {
    async fn fetch_all(&self) -> Result<Vec<Movie>> {
        let mut movies = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = format!("{}?pageSize={PAGE_SIZE}", self.collection_url());
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }
            let body = self.send_authed(self.client.get(&url)).await?;
            if let Some(documents) = body.get("documents").and_then(|d| d.as_array()) {
                for doc in documents {
                    match decode_movie(doc) {
                        Some(movie) => movies.push(movie),
                        None => debug!("Skipping malformed movie document"),
                    }
                }
            }
            page_token = body
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .map(|t| t.to_string());
            if page_token.is_none() {
                break;
            }
        }
        Ok(movies)
    }

    async fn merge_field(&self, movie_id: &str, field: MergeField) -> Result<()> {
        let url = format!(
            "{FIRESTORE_BASE}/{}?updateMask.fieldPaths={}&currentDocument.exists=true",
            self.document_name(movie_id),
            urlencoding::encode(&field.field_path())
        );
        let body = json!({ "fields": field.document_fields() });
        self.send_authed(self.client.patch(&url).json(&body))
            .await
            .map(|_| ())
            .with_context(|| format!("merge of {} on {movie_id} failed", field.field_path()))
    }

    async fn batch_insert(&self, drafts: Vec<MovieDraft>) -> Result<()> {
        if drafts.is_empty() {
            return Ok(());
        }
        let count = drafts.len();
        let writes: Vec<Value> = drafts
            .iter()
            .map(|draft| {
                json!({
                    "update": {
                        "name": self.document_name(&draft.id),
                        "fields": encode_draft(draft),
                    },
                    "updateTransforms": [{
                        "fieldPath": "createdAt",
                        "setToServerValue": "REQUEST_TIME",
                    }],
                })
            })
            .collect();
        let url = format!(
            "{FIRESTORE_BASE}/projects/{}/databases/(default)/documents:commit",
            self.project_id
        );
        self.send_authed(self.client.post(&url).json(&json!({ "writes": writes })))
            .await
            .map(|_| ())
            .with_context(|| format!("batch insert of {count} movies failed"))
    }
}

/// Latest delivered state of the library subscription. Each successful
/// delivery fully replaces `movies`; on a failed poll the last good list is
/// retained and `error` carries the connectivity condition until a later
/// poll clears it.
#[derive(Debug, Clone, Default)]
pub struct LibrarySnapshot {
    pub movies: Vec<Movie>,
    pub loaded: bool,
    pub error: Option<String>,
}

/// Spawns the subscription task: polls the store and publishes snapshots
/// over a watch channel. The task exits when every receiver is gone.
pub fn spawn_library_feed(
    store: Arc<dyn StoreApi>,
    interval: Duration,
) -> watch::Receiver<LibrarySnapshot> {
    let (tx, rx) = watch::channel(LibrarySnapshot::default());
    tokio::spawn(async move {
        loop {
            match store.fetch_all().await {
                Ok(movies) => {
                    tx.send_replace(LibrarySnapshot {
                        movies,
                        loaded: true,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Library poll failed: {e:#}");
                    tx.send_modify(|snapshot| snapshot.error = Some(e.to_string()));
                }
            }
            if tx.is_closed() {
                break;
            }
            tokio::time::sleep(interval).await;
        }
    });
    rx
}

fn encode_draft(draft: &MovieDraft) -> Value {
    let mut fields = Map::new();
    fields.insert("title".to_string(), json!({ "stringValue": draft.title }));
    fields.insert(
        "year".to_string(),
        json!({ "integerValue": draft.year.to_string() }),
    );
    if let Some(poster) = &draft.poster_url {
        fields.insert("posterUrl".to_string(), json!({ "stringValue": poster }));
    }
    fields.insert("ratings".to_string(), json!({ "mapValue": {} }));
    fields.insert("reviews".to_string(), json!({ "mapValue": {} }));
    Value::Object(fields)
}

fn decode_movie(doc: &Value) -> Option<Movie> {
    let id = doc
        .get("name")
        .and_then(|n| n.as_str())
        .and_then(|n| n.rsplit('/').next())?
        .to_string();
    let fields = doc.get("fields")?;
    let title = decode_string(fields.get("title")?)?;
    let year = decode_int(fields.get("year")?)? as i32;
    let poster_url = fields.get("posterUrl").and_then(decode_string);
    let ratings = fields
        .get("ratings")
        .map(decode_rating_map)
        .unwrap_or_default();
    let reviews = fields
        .get("reviews")
        .map(decode_review_map)
        .unwrap_or_default();
    let last_watched = fields.get("lastWatched").and_then(decode_timestamp);
    let created_at = fields.get("createdAt").and_then(decode_timestamp);
    Some(Movie {
        id,
        title,
        year,
        poster_url,
        ratings,
        reviews,
        last_watched,
        created_at,
    })
}

fn decode_string(value: &Value) -> Option<String> {
    value
        .get("stringValue")
        .and_then(|s| s.as_str())
        .map(|s| s.to_string())
}

fn decode_int(value: &Value) -> Option<i64> {
    if let Some(raw) = value.get("integerValue").and_then(|v| v.as_str()) {
        return raw.parse().ok();
    }
    value
        .get("doubleValue")
        .and_then(|v| v.as_f64())
        .map(|v| v as i64)
}

fn decode_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .get("timestampValue")
        .and_then(|v| v.as_str())
        .and_then(|raw| raw.parse().ok())
}

fn map_fields(value: &Value) -> Option<&Map<String, Value>> {
    value
        .get("mapValue")
        .and_then(|m| m.get("fields"))
        .and_then(|f| f.as_object())
}

fn decode_rating_map(value: &Value) -> BTreeMap<String, u8> {
    map_fields(value)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|(name, v)| {
                    let score = decode_int(v)?;
                    (1..=5).contains(&score).then(|| (name.clone(), score as u8))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn decode_review_map(value: &Value) -> BTreeMap<String, String> {
    map_fields(value)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|(name, v)| Some((name.clone(), decode_string(v)?)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_fields_address_a_single_field_path() {
        let rating = MergeField::Rating {
            member: "Kate".to_string(),
            score: 5,
        };
        assert_eq!(rating.field_path(), "ratings.Kate");
        assert_eq!(
            rating.document_fields()["ratings"]["mapValue"]["fields"]["Kate"]["integerValue"],
            "5"
        );

        let review = MergeField::Review {
            member: "Ellie".to_string(),
            text: "so good".to_string(),
        };
        assert_eq!(review.field_path(), "reviews.Ellie");

        let watched = MergeField::LastWatched {
            when: "2024-06-01T00:00:00Z".parse().unwrap(),
        };
        assert_eq!(watched.field_path(), "lastWatched");
        assert!(watched.document_fields()["lastWatched"]["timestampValue"]
            .as_str()
            .unwrap()
            .starts_with("2024-06-01"));
    }

    #[test]
    fn decodes_a_store_document() {
        let doc = json!({
            "name": "projects/p/databases/(default)/documents/movies/tmdb-603",
            "fields": {
                "title": { "stringValue": "The Matrix" },
                "year": { "integerValue": "1999" },
                "posterUrl": { "stringValue": "https://img/matrix.jpg" },
                "ratings": { "mapValue": { "fields": {
                    "Kate": { "integerValue": "5" },
                    "Quinn": { "integerValue": "9" }
                } } },
                "reviews": { "mapValue": { "fields": {
                    "Kate": { "stringValue": "whoa" }
                } } },
                "lastWatched": { "timestampValue": "2024-06-01T12:00:00Z" }
            }
        });
        let movie = decode_movie(&doc).expect("document decodes");
        assert_eq!(movie.id, "tmdb-603");
        assert_eq!(movie.title, "The Matrix");
        assert_eq!(movie.year, 1999);
        // Out-of-range scores are dropped rather than clamped.
        assert_eq!(movie.ratings.len(), 1);
        assert_eq!(movie.ratings["Kate"], 5);
        assert_eq!(movie.reviews["Kate"], "whoa");
        assert!(movie.last_watched.is_some());
        assert!(movie.created_at.is_none());
    }

    #[test]
    fn sparse_documents_decode_with_defaults() {
        let doc = json!({
            "name": "x/movies/m1",
            "fields": {
                "title": { "stringValue": "Clueless" },
                "year": { "integerValue": "1995" }
            }
        });
        let movie = decode_movie(&doc).expect("document decodes");
        assert!(movie.ratings.is_empty());
        assert!(movie.reviews.is_empty());
        assert!(movie.poster_url.is_none());
    }

    #[test]
    fn drafts_encode_with_typed_values_and_empty_maps() {
        let draft = MovieDraft {
            id: "tmdb-1".to_string(),
            title: "Hook".to_string(),
            year: 1991,
            poster_url: Some("https://img/hook.jpg".to_string()),
        };
        let fields = encode_draft(&draft);
        assert_eq!(fields["title"]["stringValue"], "Hook");
        assert_eq!(fields["year"]["integerValue"], "1991");
        assert_eq!(fields["posterUrl"]["stringValue"], "https://img/hook.jpg");
        assert!(fields["ratings"]["mapValue"].is_object());
    }
}
