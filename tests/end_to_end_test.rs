use anyhow::Result;
use std::fs;

use filmfest_scraper::adapters::create_adapter;
use filmfest_scraper::config::{FestivalConfig, PathsConfig};
use filmfest_scraper::fetch::DirPageSource;
use filmfest_scraper::output;
use filmfest_scraper::registry::{FestivalData, FilmKeyPolicy};
use filmfest_scraper::report::RunReport;
use filmfest_scraper::resolver::{self, CombinationLinks};

const BASE: &str = "https://festival.example.org";

const AZ_PAGE: &str = r##"
  <main class="collection">
    <article class="film-card">
      <a href="/en/film/10/shorts-night"><h2 class="title">Shorts Night Omnibus</h2></a>
      <span class="section" data-color="#202040">Shorts</span>
    </article>
    <article class="film-card">
      <a href="/en/film/11/short-one"><h2 class="title">Short One</h2></a>
      <span class="duration">20 min</span>
      <span class="section" data-color="#202040">Shorts</span>
    </article>
    <article class="film-card">
      <a href="/en/film/12/short-two"><h2 class="title">Short Two</h2></a>
      <span class="duration">15 min</span>
      <span class="section" data-color="#202040">Shorts</span>
    </article>
  </main>
"##;

// The program's own page knows its screened films but only a theater-level
// location and no duration.
const OMNIBUS_PAGE: &str = r#"
  <div class="film-detail">
    <p class="description">An evening of shorts.</p>
    <section class="screenings">
      <div class="screening" data-audience="public">
        <time class="start" datetime="2026-11-22T20:00">Sun 20:00</time>
        <div class="location">
          <span class="theater">Tuschinski</span>
        </div>
      </div>
    </section>
    <section class="composition">
      <div class="screened-film" data-kind="part">
        <h3 class="title">Short One</h3>
        <p class="description">First short.</p>
      </div>
      <div class="screened-film" data-kind="part">
        <h3 class="title">Short Two</h3>
        <p class="description">Second short.</p>
      </div>
    </section>
  </div>
"#;

const SHORT_ONE_PAGE: &str = r#"
  <div class="film-detail">
    <p class="description">First short.</p>
    <section class="screenings">
      <div class="screening" data-audience="public">
        <time class="start" datetime="2026-11-22T20:00">Sun 20:00</time>
        <time class="end" datetime="2026-11-22T20:20">20:20</time>
        <div class="location">
          <span class="theater">Tuschinski</span>
          <span class="screen" data-abbr="t3">Room 3</span>
        </div>
      </div>
    </section>
  </div>
"#;

const SHORT_TWO_PAGE: &str = r#"
  <div class="film-detail">
    <p class="description">Second short.</p>
    <section class="screenings">
      <div class="screening" data-audience="public">
        <time class="start" datetime="2026-11-22T20:00">Sun 20:00</time>
        <time class="end" datetime="2026-11-22T20:35">20:35</time>
        <div class="location">
          <span class="theater">Tuschinski</span>
          <span class="screen" data-abbr="t3">Room 3</span>
        </div>
      </div>
    </section>
  </div>
"#;

#[tokio::test]
async fn full_festival_run_produces_planner_files() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let config = FestivalConfig {
        festival: "idfa".to_string(),
        edition: "2026".to_string(),
        base_url: BASE.to_string(),
        country: "nl".to_string(),
        city: "Amsterdam".to_string(),
        paths: PathsConfig {
            plan_dir: temp.path().join("plandata"),
            common_dir: temp.path().join("common"),
        },
    };

    let cache = config.cache_dir();
    DirPageSource::seed(&cache, &format!("{BASE}/en/collection/a-z"), AZ_PAGE)?;
    DirPageSource::seed(&cache, &format!("{BASE}/en/film/10/shorts-night"), OMNIBUS_PAGE)?;
    DirPageSource::seed(&cache, &format!("{BASE}/en/film/11/short-one"), SHORT_ONE_PAGE)?;
    DirPageSource::seed(&cache, &format!("{BASE}/en/film/12/short-two"), SHORT_TWO_PAGE)?;

    let festival_dir = config.festival_dir();
    fs::create_dir_all(&festival_dir)?;
    fs::create_dir_all(config.common_dir())?;

    let mut report = RunReport::new();
    let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
    data.load_id_maps(config.common_dir(), &festival_dir, &mut report)?;

    let adapter = create_adapter(&config).expect("idfa adapter exists");
    let pages = DirPageSource::new(cache.clone());
    let mut links = CombinationLinks::new();
    adapter
        .run(&pages, &mut data, &mut links, &mut report)
        .await?;
    resolver::resolve(&mut data, links, &mut report);
    output::write_all(&mut data, &festival_dir)?;

    let omnibus = data
        .try_get_film_id_by_title("Shorts Night Omnibus")
        .expect("omnibus parsed");
    let short_one = data.try_get_film_id_by_title("Short One").unwrap();
    let short_two = data.try_get_film_id_by_title("Short Two").unwrap();

    // Exactly three eligible films, in sort order
    let films = fs::read_to_string(festival_dir.join("films.csv"))?;
    let lines: Vec<&str> = films.lines().collect();
    assert_eq!(lines.len(), 4, "header plus three films: {films}");
    assert!(lines[1].contains(";Short One;"));
    assert!(lines[2].contains(";Short Two;"));
    assert!(lines[3].contains(";Shorts Night Omnibus;"));

    // The program's duration was repaired: 20 + 4 + 15 + 4 minutes
    let omnibus_row = lines
        .iter()
        .find(|l| l.contains(";Shorts Night Omnibus;"))
        .unwrap();
    assert!(
        omnibus_row.contains(";43\u{2032};combinations;"),
        "repaired duration and category in: {omnibus_row}"
    );

    // The program's screening got the room the shorts' listings carried
    let room3 = data
        .screens()
        .iter()
        .find(|s| s.parse_name == "Room 3")
        .expect("Room 3 registered")
        .screen_id;
    let screenings = fs::read_to_string(festival_dir.join("screenings.csv"))?;
    let omnibus_screening = screenings
        .lines()
        .find(|l| l.starts_with(&format!("{omnibus};")))
        .expect("omnibus screening written");
    assert!(
        omnibus_screening.starts_with(&format!("{omnibus};{room3};2026-11-22 20:00:00;")),
        "repaired screen in: {omnibus_screening}"
    );

    // The shorts' coinciding screenings reference their program
    for short in [short_one, short_two] {
        let row = screenings
            .lines()
            .find(|l| l.starts_with(&format!("{short};")))
            .expect("short screening written");
        assert!(
            row.contains(&format!(";{omnibus};")),
            "combination id in: {row}"
        );
    }

    // Back-links landed on both sides
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&fs::read_to_string(festival_dir.join("filminfo.yml"))?)?;
    let screened = yaml
        .get("screened_films")
        .and_then(|m| m.as_mapping())
        .expect("screened_films map");
    assert_eq!(screened.len(), 1);
    let combinations = yaml
        .get("combinations")
        .and_then(|m| m.as_mapping())
        .expect("combinations map");
    assert_eq!(combinations.len(), 2);

    Ok(())
}

#[tokio::test]
async fn second_run_keeps_film_ids_stable() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let config = FestivalConfig {
        festival: "idfa".to_string(),
        edition: "2026".to_string(),
        base_url: BASE.to_string(),
        country: "nl".to_string(),
        city: "Amsterdam".to_string(),
        paths: PathsConfig {
            plan_dir: temp.path().join("plandata"),
            common_dir: temp.path().join("common"),
        },
    };

    let cache = config.cache_dir();
    DirPageSource::seed(&cache, &format!("{BASE}/en/collection/a-z"), AZ_PAGE)?;
    DirPageSource::seed(&cache, &format!("{BASE}/en/film/10/shorts-night"), OMNIBUS_PAGE)?;
    DirPageSource::seed(&cache, &format!("{BASE}/en/film/11/short-one"), SHORT_ONE_PAGE)?;
    DirPageSource::seed(&cache, &format!("{BASE}/en/film/12/short-two"), SHORT_TWO_PAGE)?;

    let festival_dir = config.festival_dir();
    fs::create_dir_all(&festival_dir)?;
    fs::create_dir_all(config.common_dir())?;

    let pages = DirPageSource::new(cache.clone());
    let adapter = create_adapter(&config).expect("idfa adapter exists");

    let mut report = RunReport::new();
    let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
    data.load_id_maps(config.common_dir(), &festival_dir, &mut report)?;
    let mut links = CombinationLinks::new();
    adapter
        .run(&pages, &mut data, &mut links, &mut report)
        .await?;
    resolver::resolve(&mut data, links, &mut report);
    output::write_all(&mut data, &festival_dir)?;

    let first_ids: Vec<u32> = data.films().iter().map(|f| f.film_id).collect();

    // A fresh registry seeded from the dumped id-map must assign the same
    // ids in a re-crawl, regardless of discovery order
    let mut report = RunReport::new();
    let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
    data.load_id_maps(config.common_dir(), &festival_dir, &mut report)?;
    let mut links = CombinationLinks::new();
    adapter
        .run(&pages, &mut data, &mut links, &mut report)
        .await?;

    let second_ids: Vec<u32> = data.films().iter().map(|f| f.film_id).collect();
    assert_eq!(first_ids, second_ids);

    Ok(())
}
