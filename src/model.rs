//! Festival domain entities.
//!
//! Films, sections and screenings are festival-scoped; cities, theaters and
//! screens are shared across festivals through the common cache and carry a
//! `new` flag until a later run loads them back from that cache.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{Duration, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScraperError};

/// Audience marker for screenings open to the public.
pub const AUDIENCE_PUBLIC: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediumCategory {
    Films,
    CombinedProgrammes,
    Events,
}

impl MediumCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediumCategory::Films => "films",
            MediumCategory::CombinedProgrammes => "combinations",
            MediumCategory::Events => "events",
        }
    }
}

/// How a screened film appears inside a combination program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenedFilmType {
    PartOfCombination,
    ScreenedBefore,
    ScreenedAfter,
    DirectlyCombined,
}

#[derive(Debug, Clone)]
pub struct Film {
    pub film_id: u32,
    /// Display order, reassigned by sort title when the films file is written.
    pub seq_nr: u32,
    pub title: String,
    pub sort_title: String,
    pub title_language: String,
    pub url: String,
    pub duration: Duration,
    pub medium_category: MediumCategory,
    pub subsection_id: Option<u32>,
}

/// Descriptive content for one film. At most one per film id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilmInfo {
    pub film_id: u32,
    pub description: String,
    pub article: String,
    pub metadata: BTreeMap<String, String>,
    /// Combination programs this film is screened as part of.
    pub combination_films: Vec<u32>,
    /// Films this one screens inside itself, if it is a combination program.
    pub screened_films: Vec<ScreenedFilm>,
}

/// Denormalized snapshot of a film as listed inside a combination program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenedFilm {
    pub film_id: u32,
    pub title: String,
    pub description: String,
    pub screened_film_type: ScreenedFilmType,
}

impl ScreenedFilm {
    pub fn new(
        film_id: u32,
        title: &str,
        description: &str,
        screened_film_type: ScreenedFilmType,
    ) -> Result<Self> {
        if title.trim().is_empty() {
            return Err(ScraperError::Identity(format!(
                "screened film #{film_id} constructed with empty title"
            )));
        }
        Ok(Self {
            film_id,
            title: title.to_string(),
            description: description.to_string(),
            screened_film_type,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub section_id: u32,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subsection {
    pub subsection_id: u32,
    pub section_id: u32,
    pub name: String,
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub city_id: u32,
    pub name: String,
    pub country: String,
    /// Discovered this run, pending review before merge into the common cache.
    pub new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theater {
    pub theater_id: u32,
    pub city_id: u32,
    pub parse_name: String,
    pub abbreviation: String,
    pub new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screen {
    pub screen_id: u32,
    pub theater_id: u32,
    /// Empty for a theater-level placeholder screen.
    pub parse_name: String,
    pub abbreviation: String,
    pub new: bool,
}

impl Screen {
    /// A placeholder stands in when a page only resolved the theater.
    pub fn is_placeholder(&self) -> bool {
        self.parse_name.is_empty()
    }
}

/// One screening slot.
///
/// Identity is `(film, screen, start, end)`; two screenings sharing those
/// four fields are the same screening no matter where they were parsed from.
#[derive(Debug, Clone)]
pub struct Screening {
    pub film_id: u32,
    pub screen_id: u32,
    pub start_dt: NaiveDateTime,
    pub end_dt: NaiveDateTime,
    pub subtitles: String,
    pub q_and_a: String,
    pub extra: String,
    pub audience: String,
    pub combination_program_id: Option<u32>,
    pub sold_out: Option<bool>,
}

impl Screening {
    pub fn key(&self) -> (u32, u32, NaiveDateTime, NaiveDateTime) {
        (self.film_id, self.screen_id, self.start_dt, self.end_dt)
    }

    pub fn is_public(&self) -> bool {
        self.audience == AUDIENCE_PUBLIC
    }
}

impl PartialEq for Screening {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Screening {}

impl Hash for Screening {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

static DURATION_HM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:(\d+)\s*h(?:r|our)?s?)?\s*(?:(\d+)\s*(?:min(?:ute)?s?|m\b|[′']))?\s*$")
        .unwrap()
});
static DURATION_PLAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s*$").unwrap());

/// Parse duration strings as festival sites render them: "96 min", "96′",
/// "1h 36m", "1 hour", or a bare minute count. Returns `None` on anything
/// else; a malformed duration is a data-quality issue, not a fatal one.
pub fn parse_duration(text: &str) -> Option<Duration> {
    if let Some(caps) = DURATION_PLAIN.captures(text) {
        let minutes: i64 = caps[1].parse().ok()?;
        return Some(Duration::minutes(minutes));
    }
    let caps = DURATION_HM.captures(text)?;
    let hours: i64 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let minutes: i64 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    if caps.get(1).is_none() && caps.get(2).is_none() {
        return None;
    }
    Some(Duration::minutes(hours * 60 + minutes))
}

/// Render a duration the way the planner's films file expects it: `96′`.
pub fn render_duration(duration: &Duration) -> String {
    format!("{}\u{2032}", duration.num_minutes())
}
