//! Combination-program resolution.
//!
//! Festival sites describe combination programs inconsistently: sometimes
//! the program's own page lists its screened films, sometimes each screened
//! film's page names the program it belongs to, sometimes both. Adapters
//! only record what each page literally said, into a [`CombinationLinks`]
//! value owned by the run; this pass runs once after every adapter has
//! finished and turns those fragments into consistent bidirectional links,
//! then repairs screen and duration data the program pages tend to omit.

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use tracing::{debug, info};

use crate::model::{MediumCategory, ScreenedFilm, ScreenedFilmType};
use crate::registry::FestivalData;
use crate::report::RunReport;

/// Changeover allowance between screened films, applied once per screened
/// film when a combination program's own duration was never stated.
pub const COMBINATION_JUNCTION_MINUTES: i64 = 4;

/// "This film's page said it is part of combination program `main_url`."
#[derive(Debug, Clone)]
pub struct CombinationClaim {
    pub film_id: u32,
    pub main_url: String,
    pub kind: ScreenedFilmType,
}

/// "This combination program's page listed a screened film by title."
#[derive(Debug, Clone)]
pub struct ScreenedListing {
    pub main_film_id: u32,
    pub title: String,
    pub description: String,
    pub kind: ScreenedFilmType,
}

/// Link fragments accumulated during parsing, consumed by [`resolve`].
///
/// Owned by the run and passed into adapters by reference; nothing here
/// survives past resolution, so state can never leak between festival runs.
#[derive(Debug, Default)]
pub struct CombinationLinks {
    pub claims: Vec<CombinationClaim>,
    pub listings: Vec<ScreenedListing>,
}

impl CombinationLinks {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Run the resolution pass. Assumes every adapter for the run has finished;
/// against a partially-populated registry it produces fewer links, never
/// wrong ones.
pub fn resolve(data: &mut FestivalData, links: CombinationLinks, report: &mut RunReport) {
    let mut partners_by_main: HashMap<u32, Vec<(u32, ScreenedFilmType)>> = HashMap::new();

    // Step 1: direct links from screened-film pages.
    for claim in &links.claims {
        match data.try_get_film_id_by_url(&claim.main_url) {
            Some(main_id) if main_id != claim.film_id => {
                push_partner(&mut partners_by_main, main_id, claim.film_id, claim.kind);
            }
            Some(_) => {}
            None => {
                report.unmatched_screened_films += 1;
                report.data_quality(
                    "resolver",
                    format!(
                        "film #{} claims combination at unknown url {}",
                        claim.film_id, claim.main_url
                    ),
                );
            }
        }
    }

    // ...and from combination pages listing their screened films. Titles
    // that match nothing fall back to description equality before the link
    // is given up on.
    for listing in &links.listings {
        let matched = data
            .try_get_film_id_by_title(&listing.title)
            .or_else(|| match_by_description(data, &listing.description));
        match matched {
            Some(film_id) if film_id != listing.main_film_id => {
                push_partner(&mut partners_by_main, listing.main_film_id, film_id, listing.kind);
            }
            Some(_) => {}
            None => {
                report.unmatched_screened_films += 1;
                report.data_quality(
                    "resolver",
                    format!(
                        "no film matches screened title '{}' in combination #{}",
                        listing.title, listing.main_film_id
                    ),
                );
            }
        }
    }

    collapse_mutual_pairs(data, &mut partners_by_main);
    materialize_back_links(data, &partners_by_main, report);
    link_coinciding_screenings(data, &partners_by_main);
    repair_placeholder_screens(data, &partners_by_main, report);
    repair_zero_durations(data, &partners_by_main, report);

    info!(
        combinations = partners_by_main.len(),
        "combination resolution finished"
    );
}

fn push_partner(
    partners_by_main: &mut HashMap<u32, Vec<(u32, ScreenedFilmType)>>,
    main_id: u32,
    film_id: u32,
    kind: ScreenedFilmType,
) {
    let partners = partners_by_main.entry(main_id).or_default();
    if !partners.iter().any(|(id, k)| *id == film_id && *k == kind) {
        partners.push((film_id, kind));
    }
}

fn match_by_description(data: &FestivalData, description: &str) -> Option<u32> {
    if description.trim().is_empty() {
        return None;
    }
    data.film_infos()
        .find(|info| info.description == description)
        .map(|info| info.film_id)
}

/// Step 2: when two films each name the other as their only partner with
/// the same type, they are one symmetric pair described from both sides.
/// The longer film is the container; a combination program's runtime is
/// never shorter than any single constituent. Equal durations keep the
/// lower film id as main so re-runs stay deterministic.
fn collapse_mutual_pairs(
    data: &FestivalData,
    partners_by_main: &mut HashMap<u32, Vec<(u32, ScreenedFilmType)>>,
) {
    let mut drop_keys = Vec::new();
    for (&a, partners) in partners_by_main.iter() {
        if partners.len() != 1 {
            continue;
        }
        let (b, kind) = partners[0];
        let Some(back) = partners_by_main.get(&b) else {
            continue;
        };
        if back.len() != 1 || back[0] != (a, kind) {
            continue;
        }
        let (dur_a, dur_b) = match (data.film(a), data.film(b)) {
            (Some(fa), Some(fb)) => (fa.duration, fb.duration),
            _ => continue,
        };
        let a_is_main = dur_a > dur_b || (dur_a == dur_b && a < b);
        if a_is_main {
            drop_keys.push(b);
        } else {
            drop_keys.push(a);
        }
    }
    for key in drop_keys {
        debug!("mutual pair collapsed, dropping #{key} as main");
        partners_by_main.remove(&key);
    }
}

/// Step 3: write the bidirectional links into FilmInfo on both sides.
fn materialize_back_links(
    data: &mut FestivalData,
    partners_by_main: &HashMap<u32, Vec<(u32, ScreenedFilmType)>>,
    report: &mut RunReport,
) {
    for (&main_id, partners) in partners_by_main {
        for &(film_id, kind) in partners {
            let (title, description) = match data.film(film_id) {
                Some(film) => (
                    film.title.clone(),
                    data.film_info(film_id)
                        .map(|info| info.description.clone())
                        .unwrap_or_default(),
                ),
                None => continue,
            };
            let snapshot = match ScreenedFilm::new(film_id, &title, &description, kind) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    report.data_quality("resolver", err.to_string());
                    continue;
                }
            };
            let main_info = data.film_info_mut(main_id);
            if !main_info
                .screened_films
                .iter()
                .any(|s| s.film_id == film_id && s.screened_film_type == kind)
            {
                main_info.screened_films.push(snapshot);
            }
            let partner_info = data.film_info_mut(film_id);
            if !partner_info.combination_films.contains(&main_id) {
                partner_info.combination_films.push(main_id);
            }
        }
        if let Some(main) = data.film_mut(main_id) {
            if main.medium_category == MediumCategory::Films {
                main.medium_category = MediumCategory::CombinedProgrammes;
            }
        }
    }
}

/// A screened film's own screening that coincides with one of its
/// program's screenings belongs to that program.
fn link_coinciding_screenings(
    data: &mut FestivalData,
    partners_by_main: &HashMap<u32, Vec<(u32, ScreenedFilmType)>>,
) {
    let mut assignments: Vec<(usize, u32)> = Vec::new();
    for (&main_id, partners) in partners_by_main {
        let partner_ids: HashSet<u32> = partners.iter().map(|(id, _)| *id).collect();
        let main_starts: HashSet<_> = data
            .screenings()
            .iter()
            .filter(|s| s.film_id == main_id)
            .map(|s| s.start_dt)
            .collect();
        for (idx, screening) in data.screenings().iter().enumerate() {
            if partner_ids.contains(&screening.film_id)
                && main_starts.contains(&screening.start_dt)
                && screening.combination_program_id.is_none()
            {
                assignments.push((idx, main_id));
            }
        }
    }
    for (idx, main_id) in assignments {
        data.screenings_mut()[idx].combination_program_id = Some(main_id);
    }
}

/// Step 4: a combination screening that only resolved a theater-level
/// placeholder screen copies the screen from a screened film's screening at
/// the identical start time. Program listings routinely omit the room that
/// the individual film's listing carries.
fn repair_placeholder_screens(
    data: &mut FestivalData,
    partners_by_main: &HashMap<u32, Vec<(u32, ScreenedFilmType)>>,
    report: &mut RunReport,
) {
    let mut repairs: Vec<(usize, u32)> = Vec::new();
    for (&main_id, partners) in partners_by_main {
        let partner_ids: HashSet<u32> = partners.iter().map(|(id, _)| *id).collect();
        for (idx, screening) in data.screenings().iter().enumerate() {
            if screening.film_id != main_id || !data.screen_is_placeholder(screening.screen_id) {
                continue;
            }
            let donor = data.screenings().iter().find(|other| {
                partner_ids.contains(&other.film_id)
                    && other.start_dt == screening.start_dt
                    && !data.screen_is_placeholder(other.screen_id)
            });
            if let Some(donor) = donor {
                repairs.push((idx, donor.screen_id));
            }
        }
    }
    for (idx, screen_id) in repairs {
        debug!("repaired screen on combination screening");
        data.screenings_mut()[idx].screen_id = screen_id;
        report.screens_repaired += 1;
    }
}

/// Step 5: a program page that never stated a duration gets the sum of its
/// screened films plus the changeover allowance per screened film.
fn repair_zero_durations(
    data: &mut FestivalData,
    partners_by_main: &HashMap<u32, Vec<(u32, ScreenedFilmType)>>,
    report: &mut RunReport,
) {
    for (&main_id, partners) in partners_by_main {
        let needs_repair = data
            .film(main_id)
            .map_or(false, |film| film.duration.num_minutes() == 0);
        if !needs_repair {
            continue;
        }
        let mut total = Duration::minutes(0);
        for (film_id, _) in partners {
            if let Some(partner) = data.film(*film_id) {
                total = total + partner.duration + Duration::minutes(COMBINATION_JUNCTION_MINUTES);
            }
        }
        if total.num_minutes() > 0 {
            if let Some(main) = data.film_mut(main_id) {
                main.duration = total;
            }
            report.durations_repaired += 1;
        }
    }
}
