use serde::{Deserialize, Serialize};

/// A movie as returned by TMDB. Favorites persist the full record so a saved
/// title stays viewable even if the provider later drops it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Movie {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: u64,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<Genre>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<Credits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<Videos>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CastMember {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub profile_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Video {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub site: String,
    #[serde(rename = "type")]
    pub video_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Videos {
    #[serde(default)]
    pub results: Vec<Video>,
}

/// Paginated envelope used by TMDB list endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Page<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: u32,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            page: 1,
            total_pages: 0,
            total_results: 0,
        }
    }
}

impl Movie {
    /// Minimal record, mostly useful for fixtures and hand-built favorites.
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            overview: String::new(),
            poster_path: None,
            backdrop_path: None,
            release_date: String::new(),
            vote_average: 0.0,
            vote_count: 0,
            popularity: 0.0,
            genre_ids: None,
            genres: None,
            runtime: None,
            credits: None,
            videos: None,
        }
    }

    /// First `max` billed cast members, empty when credits were not appended.
    pub fn main_cast(&self, max: usize) -> Vec<CastMember> {
        self.credits
            .as_ref()
            .map(|c| c.cast.iter().take(max).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_result_without_optional_parts() {
        let raw = r#"{
            "id": 27205,
            "title": "Inception",
            "overview": "Cobb steals secrets.",
            "poster_path": "/poster.jpg",
            "backdrop_path": null,
            "release_date": "2010-07-15",
            "vote_average": 8.4,
            "vote_count": 36000,
            "popularity": 95.2,
            "genre_ids": [28, 878]
        }"#;
        let movie: Movie = serde_json::from_str(raw).unwrap();
        assert_eq!(movie.id, 27205);
        assert_eq!(movie.poster_path.as_deref(), Some("/poster.jpg"));
        assert!(movie.backdrop_path.is_none());
        assert_eq!(movie.genre_ids, Some(vec![28, 878]));
        assert!(movie.credits.is_none());

        let back = serde_json::to_value(&movie).unwrap();
        assert!(back.get("credits").is_none());
        assert!(back.get("videos").is_none());
    }

    #[test]
    fn parses_appended_detail() {
        let raw = r#"{
            "id": 157336,
            "title": "Interstellar",
            "overview": "",
            "release_date": "2014-11-05",
            "vote_average": 8.4,
            "vote_count": 34000,
            "popularity": 120.0,
            "runtime": 169,
            "genres": [{"id": 12, "name": "Adventure"}],
            "credits": {"cast": [
                {"id": 1, "name": "Matthew McConaughey", "character": "Cooper", "profile_path": null},
                {"id": 2, "name": "Anne Hathaway", "character": "Brand", "profile_path": "/a.jpg"}
            ]},
            "videos": {"results": [
                {"id": "v1", "key": "zSWdZVtXT7E", "name": "Trailer", "site": "YouTube", "type": "Trailer"}
            ]}
        }"#;
        let movie: Movie = serde_json::from_str(raw).unwrap();
        assert_eq!(movie.runtime, Some(169));
        assert_eq!(movie.main_cast(1).len(), 1);
        assert_eq!(movie.main_cast(5)[1].character, "Brand");
        assert_eq!(movie.videos.unwrap().results[0].video_type, "Trailer");
    }
}
