//! Release-era bucketing and predicate-based library filtering.

use crate::models::Movie;
use std::collections::HashSet;

/// Fixed partition of release years into five half-open buckets. Every year
/// falls into exactly one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Era {
    PreEighties,
    Eighties,
    Nineties,
    TwoThousands,
    Modern,
}

impl Era {
    pub const ALL: [Era; 5] = [
        Era::PreEighties,
        Era::Eighties,
        Era::Nineties,
        Era::TwoThousands,
        Era::Modern,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Era::PreEighties => "Pre-80s Classics",
            Era::Eighties => "80s Throwbacks",
            Era::Nineties => "90s Gems",
            Era::TwoThousands => "2000s Hits",
            Era::Modern => "Modern (2010+)",
        }
    }

    pub fn from_label(label: &str) -> Option<Era> {
        Era::ALL.into_iter().find(|e| e.label() == label)
    }

    pub fn of_year(year: i32) -> Era {
        match year {
            y if y < 1980 => Era::PreEighties,
            y if y < 1990 => Era::Eighties,
            y if y < 2000 => Era::Nineties,
            y if y < 2010 => Era::TwoThousands,
            _ => Era::Modern,
        }
    }
}

/// Filters the library by free-text title search and era selection,
/// preserving the input order. An empty query together with an empty era
/// set means "no filtering active" and returns every movie.
///
/// Genre and mood selections never reach this function: library entries
/// carry no genre or mood fields, so those selections only shape the
/// suggestion prompt.
pub fn filter_library<'a>(
    movies: &'a [Movie],
    query: &str,
    eras: &HashSet<Era>,
) -> Vec<&'a Movie> {
    if query.is_empty() && eras.is_empty() {
        return movies.iter().collect();
    }
    let needle = query.to_lowercase();
    movies
        .iter()
        .filter(|m| {
            let title_match = query.is_empty() || m.title.to_lowercase().contains(&needle);
            let era_match = eras.is_empty() || eras.contains(&Era::of_year(m.year));
            title_match && era_match
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Movie;

    fn library() -> Vec<Movie> {
        vec![
            Movie::new("m1", "The Goonies", 1985),
            Movie::new("m2", "Clueless", 1995),
            Movie::new("m3", "Spirited Away", 2001),
            Movie::new("m4", "Paddington 2", 2017),
        ]
    }

    #[test]
    fn no_active_filter_returns_everything_in_order() {
        let movies = library();
        let out = filter_library(&movies, "", &HashSet::new());
        assert_eq!(out.len(), movies.len());
        for (kept, original) in out.iter().zip(&movies) {
            assert_eq!(kept.id, original.id);
        }
    }

    #[test]
    fn title_search_is_a_case_insensitive_substring_match() {
        let movies = vec![
            Movie::new("m1", "The Goonies", 1985),
            Movie::new("m2", "Clueless", 1995),
        ];
        let out = filter_library(&movies, "goon", &HashSet::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "The Goonies");
        let out = filter_library(&movies, "GOON", &HashSet::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "The Goonies");
    }

    #[test]
    fn era_selection_keeps_only_matching_years() {
        let movies = vec![
            Movie::new("a", "A", 1975),
            Movie::new("b", "B", 1982),
            Movie::new("c", "C", 1995),
            Movie::new("d", "D", 1989),
        ];
        let eras: HashSet<Era> = [Era::Eighties].into();
        let out = filter_library(&movies, "", &eras);
        let years: Vec<i32> = out.iter().map(|m| m.year).collect();
        assert_eq!(years, vec![1982, 1989]);
    }

    #[test]
    fn query_and_era_must_both_match() {
        let movies = library();
        let eras: HashSet<Era> = [Era::Nineties].into();
        assert_eq!(filter_library(&movies, "goonies", &eras).len(), 0);
        assert_eq!(filter_library(&movies, "clue", &eras).len(), 1);
    }

    #[test]
    fn era_buckets_are_total_and_non_overlapping() {
        for year in 1890..2100 {
            let holding: Vec<Era> = Era::ALL
                .into_iter()
                .filter(|e| Era::of_year(year) == *e)
                .collect();
            assert_eq!(holding.len(), 1, "year {year} must land in one bucket");
        }
        assert_eq!(Era::of_year(1979), Era::PreEighties);
        assert_eq!(Era::of_year(1980), Era::Eighties);
        assert_eq!(Era::of_year(1990), Era::Nineties);
        assert_eq!(Era::of_year(2000), Era::TwoThousands);
        assert_eq!(Era::of_year(2010), Era::Modern);
    }

    #[test]
    fn era_labels_round_trip_and_reject_unknown() {
        for era in Era::ALL {
            assert_eq!(Era::from_label(era.label()), Some(era));
        }
        assert_eq!(Era::from_label("Silent Era"), None);
    }
}
