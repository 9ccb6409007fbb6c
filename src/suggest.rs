//! Turns a recommendation intent into a prompt plus a declared response
//! shape, then validates and repairs what the generative API sends back.

use crate::error::AppError;
use crate::metadata::placeholder_poster;
use crate::models::{Movie, Suggestion, FAMILY, SEED_FAVORITES};
use crate::ratings;
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;

pub const SEED_COUNT: usize = 50;
pub const GENERATE_COUNT: usize = 10;
pub const GENRE_COUNT: usize = 10;

/// Rated-history entries quoted in a prompt are capped to bound its size.
pub const HISTORY_CAP: usize = 20;

/// Family average a movie needs before it informs genre generation.
pub const GENRE_RATING_FLOOR: f64 = 4.0;

const GENRE_TITLE_CAP: usize = 10;

/// Era/genre/mood selections forwarded from the client. They shape the
/// suggestion prompt only; the library itself has no genre or mood fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSelections {
    #[serde(default)]
    pub eras: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub moods: Vec<String>,
}

/// The closed set of recommendation intents.
#[derive(Debug, Clone)]
pub enum SuggestionRequest {
    /// Bootstrap an empty library from the fixed seed favorites.
    Seed,
    /// New candidates matching the family profile, rating history and the
    /// active filter selections.
    Generate { filters: FilterSelections },
    /// Candidates thematically similar to one named library movie.
    MoreLikeThis { base_title: String },
    /// Freshly coined blended genre labels from the highly rated subset.
    RefreshGenres,
}

impl SuggestionRequest {
    /// Builds the instruction prompt against the current library.
    ///
    /// `RefreshGenres` fails here, before any external call is made, when
    /// no movie carries a qualifying family average.
    pub fn prompt(&self, library: &[Movie]) -> Result<String, AppError> {
        match self {
            SuggestionRequest::Seed => Ok(format!(
                "Generate a list of {SEED_COUNT} diverse, family-appropriate movies \
                 inspired by these favorites: {}.",
                SEED_FAVORITES.join(", ")
            )),
            SuggestionRequest::Generate { filters } => Ok(format!(
                "{} Generate {GENERATE_COUNT} new movie suggestions based on their \
                 profile, ratings, and these filters: Eras: {}; Genres: {}; Moods: {}. \
                 Find novel recommendations.",
                recommender_preamble(library),
                render_selection(&filters.eras),
                render_selection(&filters.genres),
                render_selection(&filters.moods),
            )),
            SuggestionRequest::MoreLikeThis { base_title } => Ok(format!(
                "{} Generate {GENERATE_COUNT} new movie suggestions very similar to \
                 \"{base_title}\".",
                recommender_preamble(library),
            )),
            SuggestionRequest::RefreshGenres => {
                let favorites: Vec<&str> = library
                    .iter()
                    .filter(|m| ratings::average(&m.ratings) >= GENRE_RATING_FLOOR)
                    .take(GENRE_TITLE_CAP)
                    .map(|m| m.title.as_str())
                    .collect();
                if favorites.is_empty() {
                    return Err(AppError::Validation(
                        "Rate some movies 4 stars or higher to generate creative genres."
                            .to_string(),
                    ));
                }
                Ok(format!(
                    "Based on these highly-rated movies ({}), generate {GENRE_COUNT} \
                     blended, creative genre categories. Examples: \"Quirky \
                     Coming-of-Age\", \"Sci-Fi with a Heart\". Do not use standard \
                     single-word genres.",
                    favorites.join(", ")
                ))
            }
        }
    }

    /// Declared response shape for the generative call: an array of
    /// {title, year} objects for movie variants, an array of strings for
    /// the genre variant.
    pub fn response_schema(&self) -> Value {
        match self {
            SuggestionRequest::RefreshGenres => json!({
                "type": "ARRAY",
                "items": { "type": "STRING" }
            }),
            _ => json!({
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING" },
                        "year": { "type": "INTEGER" }
                    },
                    "required": ["title", "year"]
                }
            }),
        }
    }
}

fn recommender_preamble(library: &[Movie]) -> String {
    let history = rating_history(library);
    format!(
        "Act as a movie recommender for this family: {}. Their rating history is: {}. \
         Exclude these from suggestions as they are already in the library: {}.",
        family_profile(),
        if history.is_empty() {
            "None yet"
        } else {
            history.as_str()
        },
        exclusion_list(library),
    )
}

fn family_profile() -> String {
    let current_year = Utc::now().year();
    FAMILY
        .iter()
        .map(|m| format!("{} (age {})", m.name, current_year - m.born))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rated movies rendered as prompt lines, most-rated first, capped at
/// [`HISTORY_CAP`] entries. Review text rides along when present.
fn rating_history(library: &[Movie]) -> String {
    let mut rated: Vec<&Movie> = library.iter().filter(|m| !m.ratings.is_empty()).collect();
    rated.sort_by(|a, b| b.ratings.len().cmp(&a.ratings.len()));
    rated
        .iter()
        .take(HISTORY_CAP)
        .map(|m| {
            let mut line = format!(
                "Title: {}, Family Avg Rating: {:.1}/5",
                m.title,
                ratings::average(&m.ratings)
            );
            if !m.reviews.is_empty() {
                let notes: Vec<&str> = m.reviews.values().map(String::as_str).collect();
                line.push_str(&format!(", Notes: {}", notes.join(" / ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every title currently in the library, rated or not. Advisory only: the
/// generator is instructed not to repeat them but is not guaranteed to
/// comply, which is why [`build_suggestions`] de-duplicates again.
fn exclusion_list(library: &[Movie]) -> String {
    if library.is_empty() {
        return "None".to_string();
    }
    library
        .iter()
        .map(|m| m.title.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_selection(values: &[String]) -> String {
    if values.is_empty() {
        "Any".to_string()
    } else {
        values.join(", ")
    }
}

/// Outcome of validating a generative payload. Both variants are
/// recoverable: the attempt is discarded and prior state stays put.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PayloadError {
    #[error("no JSON array found in the response")]
    Parse,
    #[error("response did not match the expected shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub year: i32,
}

/// Cuts the bracket-delimited JSON array out of a payload that may be
/// wrapped in extra prose.
fn extract_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_movie_candidates(payload: &str) -> Result<Vec<Candidate>, PayloadError> {
    let raw = extract_array(payload).ok_or(PayloadError::Parse)?;
    let value: Value = serde_json::from_str(raw).map_err(|_| PayloadError::Parse)?;
    serde_json::from_value(value).map_err(|e| PayloadError::Shape(e.to_string()))
}

pub fn parse_genre_candidates(payload: &str) -> Result<Vec<String>, PayloadError> {
    let raw = extract_array(payload).ok_or(PayloadError::Parse)?;
    let value: Value = serde_json::from_str(raw).map_err(|_| PayloadError::Parse)?;
    serde_json::from_value(value).map_err(|e| PayloadError::Shape(e.to_string()))
}

/// Display identifier unique within a suggestion batch.
pub fn suggestion_id(title: &str) -> String {
    format!("rec-{}", title.split_whitespace().collect::<String>())
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Converts accepted candidates into tagged ephemeral suggestions.
///
/// Candidates whose normalized title is already in the library are dropped
/// (the exclusion instruction is advisory), as are in-batch duplicates --
/// the first occurrence wins.
pub fn build_suggestions(candidates: Vec<Candidate>, library: &[Movie]) -> Vec<Suggestion> {
    let mut seen: HashSet<String> = library
        .iter()
        .map(|m| normalize_title(&m.title))
        .collect();
    let mut batch = Vec::new();
    for candidate in candidates {
        let key = normalize_title(&candidate.title);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        batch.push(Suggestion {
            id: suggestion_id(&candidate.title),
            poster_url: placeholder_poster(&candidate.title),
            title: candidate.title,
            year: candidate.year,
            is_suggestion: true,
        });
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Movie;

    fn rated(id: &str, title: &str, year: i32, scores: &[(&str, u8)]) -> Movie {
        let mut movie = Movie::new(id, title, year);
        movie.ratings = scores
            .iter()
            .map(|(name, score)| (name.to_string(), *score))
            .collect();
        movie
    }

    #[test]
    fn seed_prompt_asks_for_the_configured_count_of_favorites() {
        let prompt = SuggestionRequest::Seed.prompt(&[]).unwrap();
        assert!(prompt.contains("50"));
        assert!(prompt.contains("The Goonies"));
        assert!(prompt.contains("High Fidelity"));
    }

    #[test]
    fn generate_prompt_renders_empty_selections_as_any() {
        let request = SuggestionRequest::Generate {
            filters: FilterSelections::default(),
        };
        let prompt = request.prompt(&[]).unwrap();
        assert!(prompt.contains("Eras: Any"));
        assert!(prompt.contains("Genres: Any"));
        assert!(prompt.contains("Moods: Any"));
        assert!(prompt.contains("None yet"));
    }

    #[test]
    fn generate_prompt_joins_active_selections() {
        let request = SuggestionRequest::Generate {
            filters: FilterSelections {
                eras: vec!["80s Throwbacks".to_string()],
                genres: vec!["Comedy".to_string(), "Sci-Fi".to_string()],
                moods: vec![],
            },
        };
        let prompt = request.prompt(&[]).unwrap();
        assert!(prompt.contains("Eras: 80s Throwbacks"));
        assert!(prompt.contains("Genres: Comedy, Sci-Fi"));
        assert!(prompt.contains("Moods: Any"));
    }

    #[test]
    fn exclusion_list_covers_rated_and_unrated_titles() {
        let library = vec![
            rated("a", "A", 1999, &[("Kate", 5)]),
            Movie::new("b", "B", 2005),
        ];
        let request = SuggestionRequest::MoreLikeThis {
            base_title: "A".to_string(),
        };
        let prompt = request.prompt(&library).unwrap();
        let exclusion = prompt
            .split("already in the library: ")
            .nth(1)
            .expect("prompt names the exclusion list");
        assert!(exclusion.contains("A"));
        assert!(exclusion.contains("B"));
        assert!(prompt.contains("very similar to \"A\""));
    }

    #[test]
    fn rating_history_is_capped() {
        let library: Vec<Movie> = (0..HISTORY_CAP + 5)
            .map(|i| rated(&format!("m{i}"), &format!("Movie {i}"), 2000, &[("Kate", 4)]))
            .collect();
        let history = rating_history(&library);
        assert_eq!(history.matches("Title: ").count(), HISTORY_CAP);
    }

    #[test]
    fn rating_history_carries_review_notes() {
        let mut movie = rated("a", "Clueless", 1995, &[("Kate", 5), ("Ellie", 4)]);
        movie
            .reviews
            .insert("Kate".to_string(), "as if!".to_string());
        let history = rating_history(&[movie]);
        assert!(history.contains("Title: Clueless, Family Avg Rating: 4.5/5"));
        assert!(history.contains("Notes: as if!"));
    }

    #[test]
    fn refresh_genres_requires_a_qualifying_rating() {
        let library = vec![rated("a", "A", 1999, &[("Kate", 3)])];
        let err = SuggestionRequest::RefreshGenres
            .prompt(&library)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn refresh_genres_quotes_only_qualifying_titles() {
        let library = vec![
            rated("a", "Low", 1999, &[("Kate", 2)]),
            rated("b", "High", 2001, &[("Kate", 5), ("Ryan", 4)]),
        ];
        let prompt = SuggestionRequest::RefreshGenres.prompt(&library).unwrap();
        assert!(prompt.contains("High"));
        assert!(!prompt.contains("Low"));
    }

    #[test]
    fn genre_variant_declares_a_string_array_shape() {
        let schema = SuggestionRequest::RefreshGenres.response_schema();
        assert_eq!(schema["items"]["type"], "STRING");
        let schema = SuggestionRequest::Seed.response_schema();
        assert_eq!(schema["items"]["required"][0], "title");
    }

    #[test]
    fn candidates_parse_out_of_a_prose_wrapped_payload() {
        let payload = "Here you go!\n[{\"title\": \"Hook\", \"year\": 1991}]\nEnjoy.";
        let parsed = parse_movie_candidates(payload).unwrap();
        assert_eq!(
            parsed,
            vec![Candidate {
                title: "Hook".to_string(),
                year: 1991
            }]
        );
    }

    #[test]
    fn missing_array_is_a_parse_failure() {
        assert_eq!(
            parse_movie_candidates("no structure here"),
            Err(PayloadError::Parse)
        );
        assert_eq!(parse_movie_candidates("]["), Err(PayloadError::Parse));
    }

    #[test]
    fn wrong_shape_is_a_shape_failure() {
        let payload = "[{\"name\": \"Hook\"}]";
        assert!(matches!(
            parse_movie_candidates(payload),
            Err(PayloadError::Shape(_))
        ));
    }

    #[test]
    fn genre_payloads_parse_as_plain_strings() {
        let parsed = parse_genre_candidates("[\"Sci-Fi with a Heart\"]").unwrap();
        assert_eq!(parsed, vec!["Sci-Fi with a Heart".to_string()]);
        assert!(matches!(
            parse_genre_candidates("[{\"title\": \"x\"}]"),
            Err(PayloadError::Shape(_))
        ));
    }

    #[test]
    fn suggestions_drop_library_repeats_and_batch_duplicates() {
        let library = vec![Movie::new("m1", "The Goonies", 1985)];
        let candidates = vec![
            Candidate {
                title: "the goonies ".to_string(),
                year: 1985,
            },
            Candidate {
                title: "Hook".to_string(),
                year: 1991,
            },
            Candidate {
                title: "HOOK".to_string(),
                year: 1992,
            },
        ];
        let batch = build_suggestions(candidates, &library);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].title, "Hook");
        assert_eq!(batch[0].year, 1991);
        assert_eq!(batch[0].id, "rec-Hook");
        assert!(batch[0].is_suggestion);
    }

    #[test]
    fn suggestion_ids_strip_whitespace() {
        assert_eq!(
            suggestion_id("The Breakfast Club"),
            "rec-TheBreakfastClub"
        );
    }
}
