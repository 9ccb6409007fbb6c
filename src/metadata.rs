use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::time::Duration;

const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const POSTER_BASE: &str = "https://image.tmdb.org/t/p/w500";
const PLACEHOLDER_BASE: &str = "https://placehold.co/500x750/171717/FFFFFF";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Best-match record for a title/year pair. Zero matches is a defined
/// outcome, not an error; the caller falls back to a placeholder poster
/// and a locally synthesized document id.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieMatch {
    pub tmdb_id: i64,
    pub poster_url: Option<String>,
}

#[async_trait]
pub trait MetadataApi: Send + Sync {
    async fn lookup(&self, title: &str, year: i32) -> Result<Option<MovieMatch>>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
}

impl TmdbClient {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client failed")?;
        Ok(Self { client, api_key })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let res = self.client.get(url).send().await.context("request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("{} -> {}", url, text));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed)
    }
}

#[async_trait]
impl MetadataApi for TmdbClient {
    async fn lookup(&self, title: &str, year: i32) -> Result<Option<MovieMatch>> {
        #[derive(Deserialize)]
        struct SearchResult {
            id: i64,
            poster_path: Option<String>,
        }
        #[derive(Deserialize)]
        struct SearchResponse {
            results: Vec<SearchResult>,
        }

        let url = format!(
            "{TMDB_BASE}/search/movie?api_key={}&query={}&primary_release_year={}&language=en-US",
            self.api_key,
            urlencoding::encode(title),
            year
        );
        let data: SearchResponse = self.get_json(&url).await?;
        Ok(data.results.into_iter().next().map(|r| MovieMatch {
            tmdb_id: r.id,
            poster_url: r.poster_path.map(|p| format!("{POSTER_BASE}{p}")),
        }))
    }
}

/// Placeholder artwork used when no poster could be resolved.
pub fn placeholder_poster(title: &str) -> String {
    format!("{PLACEHOLDER_BASE}?text={}", urlencoding::encode(title))
}

/// Document id for a draft with no canonical metadata match.
pub fn local_id(title: &str, year: i32) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').replace("--", "-");
    format!("{slug}-{year}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_poster_encodes_the_title() {
        let url = placeholder_poster("The Goonies");
        assert_eq!(
            url,
            "https://placehold.co/500x750/171717/FFFFFF?text=The%20Goonies"
        );
    }

    #[test]
    fn local_ids_are_url_safe_slugs() {
        assert_eq!(local_id("The Goonies", 1985), "the-goonies-1985");
        assert_eq!(local_id("WALL·E", 2008), "wall-e-2008");
    }
}
