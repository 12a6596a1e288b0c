//! IDFA site adapter.
//!
//! Two page grammars: the a-z collection listing, which yields one card
//! per film with title, duration and section, and the film detail page,
//! which yields descriptive content, screenings with a nested location
//! block, and combination-program links in either direction (a "part of"
//! link upward, or a composition listing downward).

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use tracing::info;

use crate::config::FestivalConfig;
use crate::error::Result;
use crate::fetch::PageSource;
use crate::model::{parse_duration, MediumCategory, ScreenedFilmType, AUDIENCE_PUBLIC};
use crate::parser::{normalize_ws, PageHandler, PageParser, StateStack, Tag};
use crate::registry::FestivalData;
use crate::report::RunReport;
use crate::resolver::{CombinationClaim, CombinationLinks, ScreenedListing};

pub const FESTIVAL: &str = "idfa";

/// Fallback screening length when neither an end time nor a film duration
/// was parsed.
const DEFAULT_SCREENING_MINUTES: i64 = 90;

pub struct IdfaAdapter {
    base_url: String,
    city: String,
    country: String,
}

impl IdfaAdapter {
    pub fn new(config: &FestivalConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            city: config.city.clone(),
            country: config.country.clone(),
        }
    }

    fn az_url(&self) -> String {
        format!("{}/en/collection/a-z", self.base_url)
    }

    fn absolute_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}{}", self.base_url, href)
        }
    }
}

#[async_trait]
impl crate::adapters::SiteAdapter for IdfaAdapter {
    fn festival(&self) -> &'static str {
        FESTIVAL
    }

    async fn run(
        &self,
        pages: &dyn PageSource,
        data: &mut FestivalData,
        links: &mut CombinationLinks,
        report: &mut RunReport,
    ) -> Result<()> {
        let az_html = pages.get(&self.az_url()).await?;
        let visited = {
            let handler = AzPageHandler::new(self, data, report);
            let mut parser = PageParser::new("idfa-az", AzState::Idle, handler);
            parser.feed(&az_html);
            parser.into_handler().visited
        };
        report.pages_parsed += 1;
        info!(films = visited.len(), "a-z listing parsed");

        for (film_id, url) in visited {
            let html = match pages.get(&url).await {
                Ok(html) => html,
                Err(err) => {
                    report.data_quality(FESTIVAL, format!("cannot fetch {url}: {err}"));
                    continue;
                }
            };
            let handler = FilmPageHandler::new(self, film_id, data, links, report);
            let mut parser = PageParser::new("idfa-film", FilmState::Idle, handler);
            parser.feed(&html);
            parser.into_handler().finish();
            report.pages_parsed += 1;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AzState {
    Idle,
    InCard,
    InTitle,
    InDuration,
    InSection,
    InSubsection,
}

/// One film card being collected from the a-z listing.
#[derive(Default)]
struct CardDraft {
    url: String,
    title: String,
    title_language: String,
    duration_text: String,
    section_name: String,
    section_color: String,
    subsection_name: String,
    subsection_url: String,
    medium: Option<MediumCategory>,
}

struct AzPageHandler<'a> {
    adapter: &'a IdfaAdapter,
    data: &'a mut FestivalData,
    report: &'a mut RunReport,
    draft: CardDraft,
    visited: Vec<(u32, String)>,
}

impl<'a> AzPageHandler<'a> {
    fn new(
        adapter: &'a IdfaAdapter,
        data: &'a mut FestivalData,
        report: &'a mut RunReport,
    ) -> Self {
        Self {
            adapter,
            data,
            report,
            draft: CardDraft::default(),
            visited: Vec::new(),
        }
    }

    fn finish_card(&mut self) -> Result<()> {
        let title = normalize_ws(&self.draft.title);
        if title.is_empty() {
            self.report
                .data_quality(FESTIVAL, "film card without a title, skipped".to_string());
            return Ok(());
        }
        if self.draft.url.is_empty() {
            self.report.data_quality(
                FESTIVAL,
                format!("film card '{title}' without a detail link, skipped"),
            );
            return Ok(());
        }

        let film = self.data.get_or_create_film(&title, &self.draft.url)?;
        let film_id = film.film_id;
        if !self.draft.title_language.is_empty() {
            film.title_language = self.draft.title_language.clone();
        }
        if let Some(medium) = self.draft.medium {
            film.medium_category = medium;
        }
        let duration_text = normalize_ws(&self.draft.duration_text);
        match parse_duration(&duration_text) {
            Some(duration) => film.duration = duration,
            None if !duration_text.is_empty() => {
                self.report.data_quality(
                    FESTIVAL,
                    format!("unparseable duration '{duration_text}' for '{title}'"),
                );
            }
            None => {}
        }
        self.data.refresh_sort_title(film_id);

        let section_name = normalize_ws(&self.draft.section_name);
        let section_id = self.data.get_section(
            (!section_name.is_empty()).then_some(section_name.as_str()),
            &self.draft.section_color,
        );
        let subsection_name = normalize_ws(&self.draft.subsection_name);
        let subsection_id = self.data.get_subsection(
            (!subsection_name.is_empty()).then_some(subsection_name.as_str()),
            &self.draft.subsection_url,
            section_id,
        );
        if let Some(film) = self.data.film_mut(film_id) {
            film.subsection_id = subsection_id;
        }

        self.visited.push((film_id, self.draft.url.clone()));
        Ok(())
    }
}

impl<'a> PageHandler for AzPageHandler<'a> {
    type State = AzState;

    fn on_open_tag(&mut self, stack: &mut StateStack<AzState>, tag: &Tag) {
        match (stack.current(), tag.name.as_str()) {
            (AzState::Idle, "article") if tag.has_class("film-card") => {
                self.draft = CardDraft::default();
                // Talks and other side events share the card markup
                if tag.attr("data-medium") == Some("event") {
                    self.draft.medium = Some(MediumCategory::Events);
                }
                stack.push(AzState::InCard);
            }
            (AzState::InCard, "a") => {
                if tag.has_class("subsection") {
                    if let Some(href) = tag.attr("href") {
                        self.draft.subsection_url = self.adapter.absolute_url(href);
                    }
                    stack.push(AzState::InSubsection);
                } else if let Some(href) = tag.attr("href") {
                    if href.contains("/film/") {
                        self.draft.url = self.adapter.absolute_url(href);
                    }
                }
            }
            (AzState::InCard, "h2") if tag.has_class("title") => {
                stack.push(AzState::InTitle);
            }
            (AzState::InCard, "span") if tag.has_class("duration") => {
                stack.push(AzState::InDuration);
            }
            (AzState::InCard, "span") if tag.has_class("section") => {
                self.draft.section_color = tag.attr("data-color").unwrap_or_default().to_string();
                stack.push(AzState::InSection);
            }
            (AzState::InCard, "span") if tag.has_class("language") => {
                if let Some(lang) = tag.attr("lang") {
                    self.draft.title_language = lang.to_string();
                }
            }
            _ => {}
        }
    }

    fn on_close_tag(&mut self, stack: &mut StateStack<AzState>, name: &str) {
        match (stack.current(), name) {
            (AzState::InTitle, "h2")
            | (AzState::InDuration, "span")
            | (AzState::InSection, "span")
            | (AzState::InSubsection, "a") => stack.pop(),
            (AzState::InCard, "article") => {
                if let Err(err) = self.finish_card() {
                    // Identity errors are adapter bugs, not page drift
                    self.report.data_quality(FESTIVAL, err.to_string());
                }
                stack.pop();
            }
            _ => {}
        }
    }

    fn on_text(&mut self, stack: &mut StateStack<AzState>, text: &str) {
        match stack.current() {
            AzState::InTitle => self.draft.title.push_str(text),
            AzState::InDuration => self.draft.duration_text.push_str(text),
            AzState::InSection => self.draft.section_name.push_str(text),
            AzState::InSubsection => self.draft.subsection_name.push_str(text),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilmState {
    Idle,
    InDescription,
    InArticle,
    InSpecs,
    InSpecTerm,
    InSpecValue,
    InScreenings,
    InScreening,
    InLocation,
    InTheater,
    InScreen,
    InPartOf,
    InComposition,
    InScreenedFilm,
    InScreenedTitle,
    InScreenedDescription,
}

#[derive(Default)]
struct ScreeningDraft {
    start_text: String,
    end_text: String,
    theater: String,
    screen_name: String,
    screen_abbr: String,
    audience: String,
    q_and_a: String,
    subtitles: String,
    sold_out: Option<bool>,
}

#[derive(Default)]
struct ScreenedDraft {
    title: String,
    description: String,
    kind: Option<ScreenedFilmType>,
}

struct FilmPageHandler<'a> {
    adapter: &'a IdfaAdapter,
    film_id: u32,
    data: &'a mut FestivalData,
    links: &'a mut CombinationLinks,
    report: &'a mut RunReport,
    description: String,
    article: String,
    spec_term: String,
    spec_value: String,
    metadata: Vec<(String, String)>,
    screening: ScreeningDraft,
    screened: ScreenedDraft,
    title_language: Option<String>,
}

impl<'a> FilmPageHandler<'a> {
    fn new(
        adapter: &'a IdfaAdapter,
        film_id: u32,
        data: &'a mut FestivalData,
        links: &'a mut CombinationLinks,
        report: &'a mut RunReport,
    ) -> Self {
        Self {
            adapter,
            film_id,
            data,
            links,
            report,
            description: String::new(),
            article: String::new(),
            spec_term: String::new(),
            spec_value: String::new(),
            metadata: Vec::new(),
            screening: ScreeningDraft::default(),
            screened: ScreenedDraft::default(),
            title_language: None,
        }
    }

    fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
            .ok()
    }

    fn finish_screening(&mut self) {
        let draft = std::mem::take(&mut self.screening);
        let Some(start_dt) = Self::parse_datetime(&draft.start_text) else {
            self.report.data_quality(
                FESTIVAL,
                format!("screening without start time for film #{}", self.film_id),
            );
            return;
        };
        let end_dt = match Self::parse_datetime(&draft.end_text) {
            Some(end) => end,
            None => {
                let film_minutes = self
                    .data
                    .film(self.film_id)
                    .map(|f| f.duration.num_minutes())
                    .unwrap_or(0);
                let minutes = if film_minutes > 0 {
                    film_minutes
                } else {
                    DEFAULT_SCREENING_MINUTES
                };
                start_dt + Duration::minutes(minutes)
            }
        };

        let theater = normalize_ws(&draft.theater);
        if theater.is_empty() {
            self.report.data_quality(
                FESTIVAL,
                format!("screening without location for film #{}", self.film_id),
            );
            return;
        }
        let city_id = self.data.get_city(&self.adapter.city, &self.adapter.country);
        let screen_name = normalize_ws(&draft.screen_name);
        let screen_id = if screen_name.is_empty() {
            // Room unknown; resolution may repair this from a screened film
            self.data.get_placeholder_screen(city_id, &theater)
        } else {
            self.data
                .get_screen(city_id, &screen_name, &theater, &draft.screen_abbr)
        };

        let audience = if draft.audience.is_empty() {
            AUDIENCE_PUBLIC.to_string()
        } else {
            draft.audience
        };
        let added = self.data.add_screening(crate::model::Screening {
            film_id: self.film_id,
            screen_id,
            start_dt,
            end_dt,
            subtitles: draft.subtitles,
            q_and_a: draft.q_and_a,
            extra: String::new(),
            audience,
            combination_program_id: None,
            sold_out: draft.sold_out,
        });
        if added {
            self.report.screenings_added += 1;
        } else {
            self.report.duplicate_screenings += 1;
        }
    }

    fn finish_screened_film(&mut self) {
        let draft = std::mem::take(&mut self.screened);
        let title = normalize_ws(&draft.title);
        if title.is_empty() {
            self.report.data_quality(
                FESTIVAL,
                format!("screened film without title in program #{}", self.film_id),
            );
            return;
        }
        self.links.listings.push(ScreenedListing {
            main_film_id: self.film_id,
            title,
            description: normalize_ws(&draft.description),
            kind: draft.kind.unwrap_or(ScreenedFilmType::PartOfCombination),
        });
    }

    /// Commit page-level content once the whole document has been fed.
    fn finish(self) {
        let description = normalize_ws(&self.description);
        let article = self.article.trim().to_string();
        if !description.is_empty() || !article.is_empty() || !self.metadata.is_empty() {
            let info = self.data.film_info_mut(self.film_id);
            if !description.is_empty() {
                info.description = description;
            }
            if !article.is_empty() {
                info.article = article;
            }
            for (key, value) in self.metadata {
                info.metadata.insert(key, value);
            }
        }
        if let Some(language) = self.title_language {
            if let Some(film) = self.data.film_mut(self.film_id) {
                film.title_language = language;
            }
            self.data.refresh_sort_title(self.film_id);
        }
    }

    fn screened_kind(tag: &Tag) -> Option<ScreenedFilmType> {
        match tag.attr("data-kind") {
            Some("part") => Some(ScreenedFilmType::PartOfCombination),
            Some("before") => Some(ScreenedFilmType::ScreenedBefore),
            Some("after") => Some(ScreenedFilmType::ScreenedAfter),
            Some("with") => Some(ScreenedFilmType::DirectlyCombined),
            _ => None,
        }
    }
}

impl<'a> PageHandler for FilmPageHandler<'a> {
    type State = FilmState;

    fn on_open_tag(&mut self, stack: &mut StateStack<FilmState>, tag: &Tag) {
        match (stack.current(), tag.name.as_str()) {
            (FilmState::Idle, "div") if tag.has_class("film-detail") => {
                if let Some(lang) = tag.attr("data-film-language") {
                    self.title_language = Some(lang.to_string());
                }
            }
            (FilmState::Idle, "p") if tag.has_class("description") => {
                stack.push(FilmState::InDescription);
            }
            (FilmState::Idle, "div") if tag.has_class("article") => {
                stack.push(FilmState::InArticle);
            }
            (FilmState::Idle, "dl") if tag.has_class("specs") => {
                stack.push(FilmState::InSpecs);
            }
            (FilmState::InSpecs, "dt") => {
                self.spec_term.clear();
                stack.push(FilmState::InSpecTerm);
            }
            (FilmState::InSpecs, "dd") => {
                self.spec_value.clear();
                stack.push(FilmState::InSpecValue);
            }
            (FilmState::Idle, "section") if tag.has_class("screenings") => {
                stack.push(FilmState::InScreenings);
            }
            (FilmState::InScreenings, "div") if tag.has_class("screening") => {
                self.screening = ScreeningDraft {
                    audience: tag.attr("data-audience").unwrap_or_default().to_string(),
                    ..ScreeningDraft::default()
                };
                stack.push(FilmState::InScreening);
            }
            (FilmState::InScreening, "time") => {
                if let Some(datetime) = tag.attr("datetime") {
                    if tag.has_class("start") {
                        self.screening.start_text = datetime.to_string();
                    } else if tag.has_class("end") {
                        self.screening.end_text = datetime.to_string();
                    }
                }
            }
            (FilmState::InScreening, "div") if tag.has_class("location") => {
                stack.push(FilmState::InLocation);
            }
            (FilmState::InScreening, "span") if tag.has_class("sold-out") => {
                self.screening.sold_out = Some(true);
            }
            (FilmState::InScreening, "span") if tag.has_class("qa") => {
                self.screening.q_and_a = "Q&A".to_string();
            }
            (FilmState::InScreening, "span") if tag.has_class("subtitles") => {
                if let Some(language) = tag.attr("data-language") {
                    self.screening.subtitles = language.to_string();
                }
            }
            (FilmState::InLocation, "span") if tag.has_class("theater") => {
                stack.push(FilmState::InTheater);
            }
            (FilmState::InLocation, "span") if tag.has_class("screen") => {
                self.screening.screen_abbr =
                    tag.attr("data-abbr").unwrap_or_default().to_string();
                stack.push(FilmState::InScreen);
            }
            (FilmState::Idle, "section") if tag.has_class("part-of") => {
                stack.push(FilmState::InPartOf);
            }
            (FilmState::InPartOf, "a") => {
                if let Some(href) = tag.attr("href") {
                    self.links.claims.push(CombinationClaim {
                        film_id: self.film_id,
                        main_url: self.adapter.absolute_url(href),
                        kind: Self::screened_kind(tag)
                            .unwrap_or(ScreenedFilmType::PartOfCombination),
                    });
                }
            }
            (FilmState::Idle, "section") if tag.has_class("composition") => {
                stack.push(FilmState::InComposition);
            }
            (FilmState::InComposition, "div") if tag.has_class("screened-film") => {
                self.screened = ScreenedDraft {
                    kind: Self::screened_kind(tag),
                    ..ScreenedDraft::default()
                };
                stack.push(FilmState::InScreenedFilm);
            }
            (FilmState::InScreenedFilm, "h3") if tag.has_class("title") => {
                stack.push(FilmState::InScreenedTitle);
            }
            (FilmState::InScreenedFilm, "p") if tag.has_class("description") => {
                stack.push(FilmState::InScreenedDescription);
            }
            _ => {}
        }
    }

    fn on_close_tag(&mut self, stack: &mut StateStack<FilmState>, name: &str) {
        match (stack.current(), name) {
            (FilmState::InDescription, "p")
            | (FilmState::InArticle, "div")
            | (FilmState::InSpecTerm, "dt")
            | (FilmState::InSpecs, "dl")
            | (FilmState::InScreenings, "section")
            | (FilmState::InLocation, "div")
            | (FilmState::InTheater, "span")
            | (FilmState::InScreen, "span")
            | (FilmState::InPartOf, "section")
            | (FilmState::InComposition, "section")
            | (FilmState::InScreenedTitle, "h3")
            | (FilmState::InScreenedDescription, "p") => stack.pop(),
            (FilmState::InSpecValue, "dd") => {
                let term = normalize_ws(&self.spec_term);
                let value = normalize_ws(&self.spec_value);
                if !term.is_empty() && !value.is_empty() {
                    self.metadata.push((term, value));
                }
                stack.pop();
            }
            (FilmState::InScreening, "div") => {
                self.finish_screening();
                stack.pop();
            }
            (FilmState::InScreenedFilm, "div") => {
                self.finish_screened_film();
                stack.pop();
            }
            _ => {}
        }
    }

    fn on_text(&mut self, stack: &mut StateStack<FilmState>, text: &str) {
        match stack.current() {
            FilmState::InDescription => self.description.push_str(text),
            FilmState::InArticle => self.article.push_str(text),
            FilmState::InSpecTerm => self.spec_term.push_str(text),
            FilmState::InSpecValue => self.spec_value.push_str(text),
            FilmState::InTheater => self.screening.theater.push_str(text),
            FilmState::InScreen => self.screening.screen_name.push_str(text),
            FilmState::InScreenedTitle => self.screened.title.push_str(text),
            FilmState::InScreenedDescription => self.screened.description.push_str(text),
            _ => {}
        }
    }
}
