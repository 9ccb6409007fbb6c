use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Group {
    Adult,
    Kid,
}

/// Static roster entry. The roster is fixed at process start and never
/// persisted; group membership drives the demographic-split averages.
#[derive(Debug, Clone)]
pub struct FamilyMember {
    pub name: &'static str,
    pub born: i32,
    pub group: Group,
}

pub static FAMILY: Lazy<Vec<FamilyMember>> = Lazy::new(|| {
    vec![
        FamilyMember {
            name: "Kate",
            born: 1978,
            group: Group::Adult,
        },
        FamilyMember {
            name: "Ryan",
            born: 1978,
            group: Group::Adult,
        },
        FamilyMember {
            name: "Ellie",
            born: 2011,
            group: Group::Kid,
        },
        FamilyMember {
            name: "Quinn",
            born: 2014,
            group: Group::Kid,
        },
    ]
});

pub fn member_group(name: &str) -> Option<Group> {
    FAMILY.iter().find(|m| m.name == name).map(|m| m.group)
}

pub const ERAS: [&str; 5] = [
    "Pre-80s Classics",
    "80s Throwbacks",
    "90s Gems",
    "2000s Hits",
    "Modern (2010+)",
];

pub const INITIAL_GENRES: [&str; 10] = [
    "Comedy",
    "Action",
    "Sci-Fi",
    "Family",
    "Fantasy",
    "Animation",
    "Drama",
    "Adventure",
    "Thriller",
    "Musical",
];

pub const MOODS: [&str; 10] = [
    "Need a good laugh",
    "A blast from the past",
    "Something for everyone",
    "Heartwarming story",
    "Mind-bending plot",
    "Edge of your seat",
    "Epic adventure",
    "Cozy movie night",
    "Critically-acclaimed",
    "Visually stunning",
];

pub const SEED_FAVORITES: [&str; 7] = [
    "10 Things I Hate About You",
    "Clueless",
    "The Goonies",
    "The Breakfast Club",
    "Harry and the Hendersons",
    "Adventures in Babysitting",
    "High Fidelity",
];

/// A library entry as held in the store. Rating scores are 1-5; the
/// ratings and reviews maps are sparse and independent of each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub ratings: BTreeMap<String, u8>,
    #[serde(default)]
    pub reviews: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_watched: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Movie {
    pub fn new(id: impl Into<String>, title: impl Into<String>, year: i32) -> Self {
        Movie {
            id: id.into(),
            title: title.into(),
            year,
            poster_url: None,
            ratings: BTreeMap::new(),
            reviews: BTreeMap::new(),
            last_watched: None,
            created_at: None,
        }
    }
}

/// A not-yet-inserted library entry. The document id is chosen before the
/// batch write: the canonical metadata id when the lookup matched, a local
/// slug otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieDraft {
    pub id: String,
    pub title: String,
    pub year: i32,
    pub poster_url: Option<String>,
}

/// An ephemeral AI-proposed candidate. Never persisted; the rating, review
/// and watch-date endpoints reject its id because it is not in the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub title: String,
    pub year: i32,
    pub poster_url: String,
    pub is_suggestion: bool,
}
