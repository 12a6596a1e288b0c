//! Festival-scoped identity registry.
//!
//! `FestivalData` owns every canonical entity for one festival run and is
//! the only place IDs are minted. Site adapters never construct an entity
//! with a self-assigned ID; they ask the registry, which either returns the
//! entity previously created for the same natural key or appends a new one
//! under the next monotonic ID. Persisted id-maps seed the counters so that
//! re-running a scrape against updated HTML never renumbers entities.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::error::{Result, ScraperError};
use crate::model::{
    City, Film, FilmInfo, MediumCategory, Screen, Screening, Section, Subsection, Theater,
};
use crate::report::RunReport;
use crate::titles;

/// Natural key for film identity.
///
/// URL is the default: festival sites keep film URLs stable within an
/// edition. Sites that regenerate URLs between crawls key by title instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilmKey {
    Url(String),
    Title(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilmKeyPolicy {
    ByUrl,
    ByTitle,
}

pub struct FestivalData {
    key_policy: FilmKeyPolicy,

    films: Vec<Film>,
    film_id_by_key: HashMap<FilmKey, u32>,
    film_index_by_id: HashMap<u32, usize>,
    film_infos: HashMap<u32, FilmInfo>,
    next_film_id: u32,

    sections: Vec<Section>,
    section_id_by_name: HashMap<String, u32>,
    next_section_id: u32,

    subsections: Vec<Subsection>,
    subsection_id_by_key: HashMap<(u32, String), u32>,
    next_subsection_id: u32,

    cities: Vec<City>,
    city_id_by_key: HashMap<(String, String), u32>,
    next_city_id: u32,

    theaters: Vec<Theater>,
    theater_id_by_key: HashMap<(u32, String), u32>,
    next_theater_id: u32,

    screens: Vec<Screen>,
    screen_id_by_key: HashMap<(u32, String), u32>,
    next_screen_id: u32,

    screenings: Vec<Screening>,
    screening_keys: HashSet<(u32, u32, NaiveDateTime, NaiveDateTime)>,
}

impl FestivalData {
    pub fn new(key_policy: FilmKeyPolicy) -> Self {
        Self {
            key_policy,
            films: Vec::new(),
            film_id_by_key: HashMap::new(),
            film_index_by_id: HashMap::new(),
            film_infos: HashMap::new(),
            next_film_id: 1,
            sections: Vec::new(),
            section_id_by_name: HashMap::new(),
            next_section_id: 1,
            subsections: Vec::new(),
            subsection_id_by_key: HashMap::new(),
            next_subsection_id: 1,
            cities: Vec::new(),
            city_id_by_key: HashMap::new(),
            next_city_id: 1,
            theaters: Vec::new(),
            theater_id_by_key: HashMap::new(),
            next_theater_id: 1,
            screens: Vec::new(),
            screen_id_by_key: HashMap::new(),
            next_screen_id: 1,
            screenings: Vec::new(),
            screening_keys: HashSet::new(),
        }
    }

    pub fn film_key(&self, title: &str, url: &str) -> FilmKey {
        match self.key_policy {
            FilmKeyPolicy::ByUrl => FilmKey::Url(url.to_string()),
            FilmKeyPolicy::ByTitle => FilmKey::Title(title.to_string()),
        }
    }

    /// Look up or create the film for `(title, url)`.
    ///
    /// Calling twice with the same natural key returns the same film; the
    /// second call creates nothing. An empty title is an identity error.
    pub fn get_or_create_film(&mut self, title: &str, url: &str) -> Result<&mut Film> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ScraperError::Identity(format!(
                "film with empty title at url '{url}'"
            )));
        }
        let key = self.film_key(title, url);
        let film_id = match self.film_id_by_key.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.next_film_id;
                self.next_film_id += 1;
                self.film_id_by_key.insert(key, id);
                id
            }
        };
        // A key loaded from the persisted id-map has an ID reserved but no
        // materialized film yet.
        if !self.film_index_by_id.contains_key(&film_id) {
            let film = Film {
                film_id,
                seq_nr: 0,
                title: title.to_string(),
                sort_title: titles::sort_title(title, "en"),
                title_language: "en".to_string(),
                url: url.to_string(),
                duration: Duration::minutes(0),
                medium_category: MediumCategory::Films,
                subsection_id: None,
            };
            debug!("Created film: {} with id {}", film.title, film_id);
            self.film_index_by_id.insert(film_id, self.films.len());
            self.films.push(film);
        }
        let idx = self.film_index_by_id[&film_id];
        Ok(&mut self.films[idx])
    }

    /// Typed not-found branch; never creates.
    pub fn try_get_film_by_key(&self, key: &FilmKey) -> Option<&Film> {
        let id = self.film_id_by_key.get(key)?;
        self.film(*id)
    }

    pub fn try_get_film_id_by_url(&self, url: &str) -> Option<u32> {
        self.film_id_by_key
            .get(&FilmKey::Url(url.to_string()))
            .copied()
            .filter(|id| self.film_index_by_id.contains_key(id))
    }

    pub fn try_get_film_id_by_title(&self, title: &str) -> Option<u32> {
        self.films
            .iter()
            .find(|f| f.title == title)
            .map(|f| f.film_id)
    }

    pub fn film(&self, film_id: u32) -> Option<&Film> {
        self.film_index_by_id
            .get(&film_id)
            .map(|&idx| &self.films[idx])
    }

    pub fn film_mut(&mut self, film_id: u32) -> Option<&mut Film> {
        let idx = *self.film_index_by_id.get(&film_id)?;
        Some(&mut self.films[idx])
    }

    pub fn films(&self) -> &[Film] {
        &self.films
    }

    pub fn film_count(&self) -> usize {
        self.films.len()
    }

    /// Re-derive sort titles after title language updates.
    pub fn refresh_sort_title(&mut self, film_id: u32) {
        if let Some(idx) = self.film_index_by_id.get(&film_id).copied() {
            let film = &mut self.films[idx];
            film.sort_title = titles::sort_title(&film.title, &film.title_language);
        }
    }

    pub fn film_info(&self, film_id: u32) -> Option<&FilmInfo> {
        self.film_infos.get(&film_id)
    }

    /// Get or create the one `FilmInfo` for a film.
    pub fn film_info_mut(&mut self, film_id: u32) -> &mut FilmInfo {
        self.film_infos.entry(film_id).or_insert_with(|| FilmInfo {
            film_id,
            ..FilmInfo::default()
        })
    }

    pub fn film_infos(&self) -> impl Iterator<Item = &FilmInfo> {
        self.film_infos.values()
    }

    /// First-seen-wins by name. `None` name tolerates missing markup.
    pub fn get_section(&mut self, name: Option<&str>, color: &str) -> Option<u32> {
        let name = name?.trim();
        if name.is_empty() {
            return None;
        }
        if let Some(&id) = self.section_id_by_name.get(name) {
            return Some(id);
        }
        let id = self.next_section_id;
        self.next_section_id += 1;
        self.section_id_by_name.insert(name.to_string(), id);
        self.sections.push(Section {
            section_id: id,
            name: name.to_string(),
            color: color.to_string(),
        });
        debug!("Created section: {} with id {}", name, id);
        Some(id)
    }

    /// First-seen-wins by `(section, name)`; subsections with the same name
    /// under different sections stay distinct.
    pub fn get_subsection(
        &mut self,
        name: Option<&str>,
        url: &str,
        section_id: Option<u32>,
    ) -> Option<u32> {
        let name = name?.trim();
        let section_id = section_id?;
        if name.is_empty() {
            return None;
        }
        let key = (section_id, name.to_string());
        if let Some(&id) = self.subsection_id_by_key.get(&key) {
            return Some(id);
        }
        let id = self.next_subsection_id;
        self.next_subsection_id += 1;
        self.subsection_id_by_key.insert(key, id);
        self.subsections.push(Subsection {
            subsection_id: id,
            section_id,
            name: name.to_string(),
            description: String::new(),
            url: url.to_string(),
        });
        debug!("Created subsection: {} with id {}", name, id);
        Some(id)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn subsections(&self) -> &[Subsection] {
        &self.subsections
    }

    pub fn subsection(&self, subsection_id: u32) -> Option<&Subsection> {
        self.subsections
            .iter()
            .find(|s| s.subsection_id == subsection_id)
    }

    pub fn section(&self, section_id: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    pub fn get_city(&mut self, name: &str, country: &str) -> u32 {
        let key = (country.to_string(), name.to_string());
        if let Some(&id) = self.city_id_by_key.get(&key) {
            return id;
        }
        let id = self.next_city_id;
        self.next_city_id += 1;
        self.city_id_by_key.insert(key, id);
        self.cities.push(City {
            city_id: id,
            name: name.to_string(),
            country: country.to_string(),
            new: true,
        });
        debug!("Created city: {} with id {}", name, id);
        id
    }

    pub fn get_theater(&mut self, city_id: u32, parse_name: &str) -> u32 {
        let key = (city_id, parse_name.to_string());
        if let Some(&id) = self.theater_id_by_key.get(&key) {
            return id;
        }
        let id = self.next_theater_id;
        self.next_theater_id += 1;
        self.theater_id_by_key.insert(key, id);
        self.theaters.push(Theater {
            theater_id: id,
            city_id,
            parse_name: parse_name.to_string(),
            abbreviation: abbreviate(parse_name),
            new: true,
        });
        debug!("Created theater: {} with id {}", parse_name, id);
        id
    }

    /// Composes the coarser lookups: a screen needs its theater, a theater
    /// its city.
    pub fn get_screen(
        &mut self,
        city_id: u32,
        screen_parse_name: &str,
        theater_parse_name: &str,
        abbreviation: &str,
    ) -> u32 {
        let theater_id = self.get_theater(city_id, theater_parse_name);
        let key = (theater_id, screen_parse_name.to_string());
        if let Some(&id) = self.screen_id_by_key.get(&key) {
            return id;
        }
        let id = self.next_screen_id;
        self.next_screen_id += 1;
        self.screen_id_by_key.insert(key, id);
        self.screens.push(Screen {
            screen_id: id,
            theater_id,
            parse_name: screen_parse_name.to_string(),
            abbreviation: abbreviation.to_string(),
            new: true,
        });
        debug!("Created screen: {} with id {}", screen_parse_name, id);
        id
    }

    /// Screen standing in when a page only resolved the theater.
    pub fn get_placeholder_screen(&mut self, city_id: u32, theater_parse_name: &str) -> u32 {
        self.get_screen(city_id, "", theater_parse_name, "")
    }

    pub fn screen_is_placeholder(&self, screen_id: u32) -> bool {
        self.screen(screen_id).map_or(false, Screen::is_placeholder)
    }

    pub fn screen(&self, screen_id: u32) -> Option<&Screen> {
        self.screens.iter().find(|s| s.screen_id == screen_id)
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn theaters(&self) -> &[Theater] {
        &self.theaters
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }

    /// Set-semantics add: a screening equal on `(film, screen, start, end)`
    /// to one already registered is dropped. Returns whether it was added.
    pub fn add_screening(&mut self, screening: Screening) -> bool {
        if !self.screening_keys.insert(screening.key()) {
            return false;
        }
        self.screenings.push(screening);
        true
    }

    pub fn screenings(&self) -> &[Screening] {
        &self.screenings
    }

    /// Post-parse mutation access for the resolver. Identity fields may be
    /// rewritten here; the dedup key set is not maintained afterwards, so
    /// all `add_screening` calls must precede resolution.
    pub fn screenings_mut(&mut self) -> &mut [Screening] {
        &mut self.screenings
    }

    /// Load persisted id-maps and the cross-festival location caches.
    ///
    /// The film id-map is optional (a festival's first run has none); the
    /// common cache files are required and reported as data-quality errors
    /// when absent.
    pub fn load_id_maps(
        &mut self,
        common_dir: &Path,
        festival_dir: &Path,
        report: &mut RunReport,
    ) -> Result<()> {
        for row in read_rows(&festival_dir.join("film_ids.csv"), false, report)? {
            if row.len() < 3 {
                report.data_quality("id-map", format!("short film id-map row: {row:?}"));
                continue;
            }
            let film_id: u32 = match row[0].parse() {
                Ok(id) => id,
                Err(_) => {
                    report.data_quality("id-map", format!("bad film id '{}'", row[0]));
                    continue;
                }
            };
            let key = self.film_key(&row[1], &row[2]);
            self.film_id_by_key.insert(key, film_id);
            self.next_film_id = self.next_film_id.max(film_id + 1);
        }

        for row in read_rows(&common_dir.join("cities.csv"), true, report)? {
            if row.len() < 3 {
                continue;
            }
            let Ok(city_id) = row[0].parse::<u32>() else {
                continue;
            };
            self.city_id_by_key
                .insert((row[2].clone(), row[1].clone()), city_id);
            self.cities.push(City {
                city_id,
                name: row[1].clone(),
                country: row[2].clone(),
                new: false,
            });
            self.next_city_id = self.next_city_id.max(city_id + 1);
        }

        for row in read_rows(&common_dir.join("theaters.csv"), true, report)? {
            if row.len() < 4 {
                continue;
            }
            let (Ok(theater_id), Ok(city_id)) = (row[0].parse::<u32>(), row[1].parse::<u32>())
            else {
                continue;
            };
            self.theater_id_by_key
                .insert((city_id, row[2].clone()), theater_id);
            self.theaters.push(Theater {
                theater_id,
                city_id,
                parse_name: row[2].clone(),
                abbreviation: row[3].clone(),
                new: false,
            });
            self.next_theater_id = self.next_theater_id.max(theater_id + 1);
        }

        for row in read_rows(&common_dir.join("screens.csv"), true, report)? {
            if row.len() < 4 {
                continue;
            }
            let (Ok(screen_id), Ok(theater_id)) = (row[0].parse::<u32>(), row[1].parse::<u32>())
            else {
                continue;
            };
            self.screen_id_by_key
                .insert((theater_id, row[2].clone()), screen_id);
            self.screens.push(Screen {
                screen_id,
                theater_id,
                parse_name: row[2].clone(),
                abbreviation: row[3].clone(),
                new: false,
            });
            self.next_screen_id = self.next_screen_id.max(screen_id + 1);
        }

        Ok(())
    }
}

/// Theater abbreviation from word initials: "Eye Filmmuseum" -> "ef".
fn abbreviate(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|word| word.chars().next())
        .collect::<String>()
        .to_lowercase()
}

/// Read a `;`-delimited headerless file into rows.
///
/// Missing-but-optional is silent; missing-but-required is a data-quality
/// error. Both yield an empty row set rather than failing the run.
fn read_rows(path: &Path, required: bool, report: &mut RunReport) -> Result<Vec<Vec<String>>> {
    if !path.exists() {
        if required {
            report.data_quality("id-map", format!("required file missing: {}", path.display()));
        }
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AUDIENCE_PUBLIC;
    use chrono::NaiveDate;
    use std::fs;

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn get_or_create_film_is_idempotent() {
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        let id_first = data
            .get_or_create_film("Title A", "http://a")
            .unwrap()
            .film_id;
        assert_eq!(data.film_count(), 1);
        let id_second = data
            .get_or_create_film("Title A", "http://a")
            .unwrap()
            .film_id;
        assert_eq!(id_first, id_second);
        assert_eq!(data.film_count(), 1);
    }

    #[test]
    fn empty_title_is_identity_error() {
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        assert!(data.get_or_create_film("  ", "http://a").is_err());
    }

    #[test]
    fn title_policy_merges_on_title() {
        let mut data = FestivalData::new(FilmKeyPolicy::ByTitle);
        let first = data.get_or_create_film("Same", "http://a").unwrap().film_id;
        let second = data.get_or_create_film("Same", "http://b").unwrap().film_id;
        assert_eq!(first, second);
    }

    #[test]
    fn persisted_id_map_pins_film_ids() {
        let dir = tempfile::tempdir().unwrap();
        let festival_dir = dir.path().join("fest");
        let common_dir = dir.path().join("common");
        fs::create_dir_all(&festival_dir).unwrap();
        fs::create_dir_all(&common_dir).unwrap();
        fs::write(festival_dir.join("film_ids.csv"), "5;Title A;http://a\n").unwrap();

        let mut report = RunReport::new();
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        data.load_id_maps(&common_dir, &festival_dir, &mut report)
            .unwrap();

        let film = data.get_or_create_film("Title A", "http://a").unwrap();
        assert_eq!(film.film_id, 5);
        // A fresh key must mint past the persisted maximum
        let other = data.get_or_create_film("Other", "http://b").unwrap();
        assert_eq!(other.film_id, 6);
    }

    #[test]
    fn missing_required_cache_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new();
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        data.load_id_maps(dir.path(), dir.path(), &mut report).unwrap();
        // cities/theaters/screens were all required and absent
        assert_eq!(report.errors().len(), 3);
    }

    #[test]
    fn loaded_locations_are_not_new() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cities.csv"), "2;Amsterdam;nl\n").unwrap();
        fs::write(dir.path().join("theaters.csv"), "3;2;Tuschinski;t\n").unwrap();
        fs::write(dir.path().join("screens.csv"), "4;3;Zaal 2;t2\n").unwrap();

        let mut report = RunReport::new();
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        data.load_id_maps(dir.path(), dir.path(), &mut report).unwrap();

        let city_id = data.get_city("Amsterdam", "nl");
        assert_eq!(city_id, 2);
        assert!(!data.cities()[0].new);

        let screen_id = data.get_screen(city_id, "Zaal 2", "Tuschinski", "t2");
        assert_eq!(screen_id, 4);
        assert!(!data.screens()[0].new);

        // An unseen screen in a cached theater is new, with a fresh id
        let new_screen = data.get_screen(city_id, "Zaal 9", "Tuschinski", "t9");
        assert_eq!(new_screen, 5);
        assert!(data.screen(new_screen).unwrap().new);
    }

    #[test]
    fn sections_are_first_seen_wins() {
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        assert_eq!(data.get_section(None, "red"), None);
        let a = data.get_section(Some("Competition"), "red").unwrap();
        let b = data.get_section(Some("Competition"), "blue").unwrap();
        assert_eq!(a, b);
        assert_eq!(data.sections()[0].color, "red");
    }

    #[test]
    fn subsections_are_scoped_by_section() {
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        let docs = data.get_section(Some("Documentaries"), "red");
        let shorts = data.get_section(Some("Shorts"), "blue");
        let a = data.get_subsection(Some("Focus"), "http://a", docs).unwrap();
        let b = data.get_subsection(Some("Focus"), "http://b", shorts).unwrap();
        assert_ne!(a, b, "same name under different sections must not merge");
        let again = data.get_subsection(Some("Focus"), "http://c", docs).unwrap();
        assert_eq!(a, again);
    }

    #[test]
    fn screening_dedup_is_set_semantics() {
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        let screening = Screening {
            film_id: 1,
            screen_id: 1,
            start_dt: dt(20, 0),
            end_dt: dt(21, 0),
            subtitles: String::new(),
            q_and_a: String::new(),
            extra: String::new(),
            audience: AUDIENCE_PUBLIC.to_string(),
            combination_program_id: None,
            sold_out: None,
        };
        assert!(data.add_screening(screening.clone()));
        let mut dup = screening;
        dup.subtitles = "en".to_string();
        assert!(!data.add_screening(dup));
        assert_eq!(data.screenings().len(), 1);
    }

    #[test]
    fn film_info_is_at_most_one_per_film() {
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        data.film_info_mut(7).description = "first".to_string();
        data.film_info_mut(7).metadata.insert("k".into(), "v".into());
        assert_eq!(data.film_infos().count(), 1);
        assert_eq!(data.film_info(7).unwrap().description, "first");
    }
}
