//! Serialization of the resolved data model.
//!
//! The written files are the binding contract with the downstream planner:
//! `;`-delimited CSV with the exact column orders below, plus one YAML file
//! for descriptive film content. Id-maps and the `new_*` review files share
//! the same row shapes the registry loads.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::model::{render_duration, Film, ScreenedFilm};
use crate::registry::FestivalData;

/// A film can be planned when at least one of its screenings is public.
fn film_is_eligible(data: &FestivalData, film: &Film) -> bool {
    data.screenings()
        .iter()
        .any(|s| s.film_id == film.film_id && s.is_public())
}

/// Write every output artifact for the run into `festival_dir`.
///
/// Takes the registry mutably: display order (`seq_nr`) is assigned here,
/// by sort title, just before the films file is written.
pub fn write_all(data: &mut FestivalData, festival_dir: &Path) -> Result<()> {
    fs::create_dir_all(festival_dir)?;
    write_films(data, &festival_dir.join("films.csv"))?;
    write_screenings(data, &festival_dir.join("screenings.csv"))?;
    write_sections(data, &festival_dir.join("sections.csv"))?;
    write_subsections(data, &festival_dir.join("subsections.csv"))?;
    write_film_info(data, &festival_dir.join("filminfo.yml"))?;
    write_new_locations(data, festival_dir)?;
    dump_film_id_map(data, &festival_dir.join("film_ids.csv"))?;
    info!(dir = %festival_dir.display(), "outputs written");
    Ok(())
}

fn delimited_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)?)
}

fn write_films(data: &mut FestivalData, path: &Path) -> Result<()> {
    let mut eligible: Vec<u32> = data
        .films()
        .iter()
        .filter(|film| film_is_eligible(data, film))
        .map(|film| film.film_id)
        .collect();
    eligible.sort_by(|a, b| {
        let fa = data.film(*a).expect("eligible film exists");
        let fb = data.film(*b).expect("eligible film exists");
        fa.sort_title.cmp(&fb.sort_title).then(fa.film_id.cmp(&fb.film_id))
    });
    for (seq, film_id) in eligible.iter().enumerate() {
        if let Some(film) = data.film_mut(*film_id) {
            film.seq_nr = seq as u32 + 1;
        }
    }

    let mut writer = delimited_writer(path)?;
    writer.write_record([
        "seqnr",
        "filmid",
        "sort",
        "title",
        "titlelanguage",
        "section",
        "duration",
        "mediumcategory",
        "url",
    ])?;
    for film_id in eligible {
        let film = data.film(film_id).expect("eligible film exists");
        let section_name = film
            .subsection_id
            .and_then(|id| data.subsection(id))
            .and_then(|sub| data.section(sub.section_id))
            .map(|section| section.name.clone())
            .unwrap_or_default();
        writer.write_record([
            film.seq_nr.to_string(),
            film.film_id.to_string(),
            film.sort_title.clone(),
            film.title.clone(),
            film.title_language.clone(),
            section_name,
            render_duration(&film.duration),
            film.medium_category.as_str().to_string(),
            film.url.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_screenings(data: &FestivalData, path: &Path) -> Result<()> {
    let mut writer = delimited_writer(path)?;
    writer.write_record([
        "film_id",
        "screen_id",
        "start_time",
        "end_time",
        "combination_id",
        "subtitles",
        "qanda",
        "extra",
        "sold_out",
    ])?;
    for screening in data.screenings() {
        if !screening.is_public() {
            continue;
        }
        let film = match data.film(screening.film_id) {
            Some(film) => film,
            None => continue,
        };
        if !film_is_eligible(data, film) {
            continue;
        }
        writer.write_record([
            screening.film_id.to_string(),
            screening.screen_id.to_string(),
            screening.start_dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            screening.end_dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            screening
                .combination_program_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            screening.subtitles.clone(),
            screening.q_and_a.clone(),
            screening.extra.clone(),
            screening
                .sold_out
                .map(|sold| sold.to_string())
                .unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_sections(data: &FestivalData, path: &Path) -> Result<()> {
    let mut writer = delimited_writer(path)?;
    for section in data.sections() {
        writer.write_record([
            section.section_id.to_string(),
            section.name.clone(),
            section.color.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_subsections(data: &FestivalData, path: &Path) -> Result<()> {
    let mut writer = delimited_writer(path)?;
    for subsection in data.subsections() {
        writer.write_record([
            subsection.subsection_id.to_string(),
            subsection.section_id.to_string(),
            subsection.name.clone(),
            subsection.description.clone(),
            subsection.url.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct FilmInfoDump<'a> {
    metadata: BTreeMap<u32, &'a BTreeMap<String, String>>,
    screened_films: BTreeMap<u32, &'a [ScreenedFilm]>,
    combinations: BTreeMap<u32, &'a [u32]>,
}

fn write_film_info(data: &FestivalData, path: &Path) -> Result<()> {
    let mut dump = FilmInfoDump {
        metadata: BTreeMap::new(),
        screened_films: BTreeMap::new(),
        combinations: BTreeMap::new(),
    };
    for info in data.film_infos() {
        if !info.metadata.is_empty() {
            dump.metadata.insert(info.film_id, &info.metadata);
        }
        if !info.screened_films.is_empty() {
            dump.screened_films
                .insert(info.film_id, info.screened_films.as_slice());
        }
        if !info.combination_films.is_empty() {
            dump.combinations
                .insert(info.film_id, info.combination_films.as_slice());
        }
    }
    fs::write(path, serde_yaml::to_string(&dump)?)?;
    Ok(())
}

/// Entities discovered this run, for human review before they are merged
/// into the shared location cache.
fn write_new_locations(data: &FestivalData, festival_dir: &Path) -> Result<()> {
    let mut writer = delimited_writer(&festival_dir.join("new_cities.csv"))?;
    for city in data.cities().iter().filter(|c| c.new) {
        writer.write_record([
            city.city_id.to_string(),
            city.name.clone(),
            city.country.clone(),
        ])?;
    }
    writer.flush()?;

    let mut writer = delimited_writer(&festival_dir.join("new_theaters.csv"))?;
    for theater in data.theaters().iter().filter(|t| t.new) {
        writer.write_record([
            theater.theater_id.to_string(),
            theater.city_id.to_string(),
            theater.parse_name.clone(),
            theater.abbreviation.clone(),
        ])?;
    }
    writer.flush()?;

    let mut writer = delimited_writer(&festival_dir.join("new_screens.csv"))?;
    for screen in data.screens().iter().filter(|s| s.new) {
        writer.write_record([
            screen.screen_id.to_string(),
            screen.theater_id.to_string(),
            screen.parse_name.clone(),
            screen.abbreviation.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn dump_film_id_map(data: &FestivalData, path: &Path) -> Result<()> {
    let mut writer = delimited_writer(path)?;
    for film in data.films() {
        writer.write_record([
            film.film_id.to_string(),
            film.title.clone(),
            film.url.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Screening, AUDIENCE_PUBLIC};
    use crate::registry::FilmKeyPolicy;
    use chrono::{Duration, NaiveDate};

    fn public_screening(film_id: u32, screen_id: u32) -> Screening {
        let start = NaiveDate::from_ymd_opt(2026, 11, 20)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        Screening {
            film_id,
            screen_id,
            start_dt: start,
            end_dt: start + Duration::minutes(96),
            subtitles: "en".to_string(),
            q_and_a: String::new(),
            extra: String::new(),
            audience: AUDIENCE_PUBLIC.to_string(),
            combination_program_id: None,
            sold_out: Some(false),
        }
    }

    #[test]
    fn films_file_orders_by_sort_title_and_assigns_seq_nr() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);

        let zebra = data.get_or_create_film("Zebra", "http://z").unwrap();
        zebra.duration = Duration::minutes(96);
        let zebra = zebra.film_id;
        let apple = data.get_or_create_film("The Apple", "http://a").unwrap();
        apple.duration = Duration::minutes(80);
        let apple = apple.film_id;
        // No screenings: ineligible, must not be written
        data.get_or_create_film("Hidden", "http://h").unwrap();

        let city = data.get_city("Amsterdam", "nl");
        let screen = data.get_screen(city, "Zaal 1", "Tuschinski", "t1");
        data.add_screening(public_screening(zebra, screen));
        data.add_screening(public_screening(apple, screen));

        write_all(&mut data, dir.path()).unwrap();

        let films = fs::read_to_string(dir.path().join("films.csv")).unwrap();
        let lines: Vec<&str> = films.lines().collect();
        assert_eq!(
            lines[0],
            "seqnr;filmid;sort;title;titlelanguage;section;duration;mediumcategory;url"
        );
        assert_eq!(lines.len(), 3);
        // "The Apple" sorts under a, ahead of "Zebra"
        assert!(lines[1].starts_with(&format!("1;{apple};apple;The Apple;en;;80\u{2032};films;")));
        assert!(lines[2].starts_with(&format!("2;{zebra};zebra;Zebra;en;;96\u{2032};films;")));
        assert_eq!(data.film(apple).unwrap().seq_nr, 1);
    }

    #[test]
    fn screenings_file_uses_iso_datetimes() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        let film = data.get_or_create_film("A", "http://a").unwrap().film_id;
        let city = data.get_city("Amsterdam", "nl");
        let screen = data.get_screen(city, "Zaal 1", "Tuschinski", "t1");
        data.add_screening(public_screening(film, screen));

        write_all(&mut data, dir.path()).unwrap();

        let screenings = fs::read_to_string(dir.path().join("screenings.csv")).unwrap();
        let lines: Vec<&str> = screenings.lines().collect();
        assert_eq!(
            lines[0],
            "film_id;screen_id;start_time;end_time;combination_id;subtitles;qanda;extra;sold_out"
        );
        assert_eq!(
            lines[1],
            format!("{film};{screen};2026-11-20 20:00:00;2026-11-20 21:36:00;;en;;;false")
        );
    }

    #[test]
    fn new_location_files_exclude_cached_entities() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cities.csv"), "1;Amsterdam;nl\n").unwrap();
        fs::write(dir.path().join("theaters.csv"), "").unwrap();
        fs::write(dir.path().join("screens.csv"), "").unwrap();

        let mut report = crate::report::RunReport::new();
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        data.load_id_maps(dir.path(), dir.path(), &mut report).unwrap();

        data.get_city("Amsterdam", "nl");
        data.get_city("Rotterdam", "nl");

        let out = dir.path().join("out");
        write_all(&mut data, &out).unwrap();
        let cities = fs::read_to_string(out.join("new_cities.csv")).unwrap();
        assert_eq!(cities, "2;Rotterdam;nl\n");
    }

    #[test]
    fn film_info_yaml_has_three_top_level_maps() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
        let info = data.film_info_mut(3);
        info.metadata.insert("Director".into(), "X".into());
        data.film_info_mut(9)
            .combination_films
            .push(3);

        write_all(&mut data, dir.path()).unwrap();
        let yaml = fs::read_to_string(dir.path().join("filminfo.yml")).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let metadata = value.get("metadata").unwrap().as_mapping().unwrap();
        assert!(metadata
            .iter()
            .any(|(key, _)| key == &serde_yaml::Value::from(3)));
        let combinations = value.get("combinations").unwrap().as_mapping().unwrap();
        assert!(combinations
            .iter()
            .any(|(key, _)| key == &serde_yaml::Value::from(9)));
        assert!(value.get("screened_films").is_some());
    }
}
