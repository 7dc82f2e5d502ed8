//! Source side of a harvest: page retrieval, event-list extraction and fact parsing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use otd_core::{Fact, RawFragment, TargetDay};
use otd_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "otd-adapters";

pub const DEFAULT_BASE_URL: &str = "https://en.wikipedia.org/wiki";

/// Separates the year from the description in every event entry (U+2013).
pub const ENTRY_SEPARATOR: &str = " – ";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading fixture page {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Retrieves the raw page for one calendar day.
#[async_trait]
pub trait PageSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_page(&self, run_id: Uuid, day: TargetDay) -> Result<String, SourceError>;
}

pub fn page_url(base_url: &str, day: TargetDay) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), day.page_slug())
}

#[derive(Debug, Clone)]
pub struct WikipediaSource {
    base_url: String,
    http: Arc<HttpFetcher>,
}

impl WikipediaSource {
    pub fn new(base_url: impl Into<String>, http: Arc<HttpFetcher>) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }
}

#[async_trait]
impl PageSource for WikipediaSource {
    fn source_id(&self) -> &'static str {
        "wikipedia"
    }

    async fn fetch_page(&self, run_id: Uuid, day: TargetDay) -> Result<String, SourceError> {
        let url = page_url(&self.base_url, day);
        Ok(self.http.fetch_text(run_id, self.source_id(), &url).await?)
    }
}

/// Reads pages saved as `{dir}/{Month}_{day}.html`.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    dir: PathBuf,
}

impl FixtureSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn page_path(&self, day: TargetDay) -> PathBuf {
        self.dir.join(format!("{}.html", day.page_slug()))
    }
}

#[async_trait]
impl PageSource for FixtureSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_page(&self, _run_id: Uuid, day: TargetDay) -> Result<String, SourceError> {
        let path = self.page_path(day);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SourceError::Fixture { path, source })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("expected event list at <ul> #{index} but the page has {found}")]
    MissingRegion { index: usize, found: usize },
    #[error("invalid selector: {0}")]
    Selector(String),
}

/// Days whose event list sits at a different `<ul>` position than usual.
const REGION_OVERRIDES: &[((u32, u32), usize)] = &[((2, 29), 3)];

const DEFAULT_EVENT_REGION: usize = 1;

/// Zero-based position of the event list among all `<ul>` elements of the page.
pub fn event_region_index(day: TargetDay) -> usize {
    REGION_OVERRIDES
        .iter()
        .find(|((month, dom), _)| *month == day.month() && *dom == day.day())
        .map(|(_, index)| *index)
        .unwrap_or(DEFAULT_EVENT_REGION)
}

/// Lifts the text of each entry of the day's event list, in page order.
pub fn extract_fragments(day: TargetDay, html: &str) -> Result<Vec<RawFragment>, ExtractError> {
    let document = Html::parse_document(html);
    let lists = Selector::parse("ul").map_err(|e| ExtractError::Selector(e.to_string()))?;
    let index = event_region_index(day);

    let regions: Vec<ElementRef<'_>> = document.select(&lists).collect();
    let region = regions.get(index).ok_or(ExtractError::MissingRegion {
        index,
        found: regions.len(),
    })?;

    Ok(region
        .children()
        .filter_map(|child| {
            if let Some(element) = ElementRef::wrap(child) {
                Some(element.text().collect::<String>())
            } else {
                child.value().as_text().map(|text| text.to_string())
            }
        })
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .map(|text| RawFragment::new(day, text))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("found a malformed entry")]
    Malformed,
    #[error("found a year containing letters: [{year}]")]
    NonNumericYear { year: String },
    #[error("unable to create date from year [{year}], month [{month}], day [{day}]")]
    InvalidDate { year: String, month: u32, day: u32 },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::NonNumericYear { .. } => "non_numeric_year",
            Self::InvalidDate { .. } => "invalid_date",
        }
    }
}

pub fn parse_fragment(fragment: &RawFragment) -> Result<Fact, Rejection> {
    let Some((year_text, description)) = fragment.text.split_once(ENTRY_SEPARATOR) else {
        return Err(Rejection::Malformed);
    };

    // BC and circa years are written with letters; they are skipped, not coerced.
    if year_text.chars().any(char::is_alphabetic) {
        return Err(Rejection::NonNumericYear {
            year: year_text.to_string(),
        });
    }

    let day = fragment.day;
    let invalid = || Rejection::InvalidDate {
        year: year_text.to_string(),
        month: day.month(),
        day: day.day(),
    };
    let year: i32 = year_text.trim().parse().map_err(|_| invalid())?;
    Fact::on(day, year, description).ok_or_else(invalid)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFragment {
    pub fragment: RawFragment,
    pub reason: Rejection,
}

/// Facts and rejections for one day, each in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDay {
    pub facts: Vec<Fact>,
    pub rejected: Vec<RejectedFragment>,
}

pub fn parse_fragments(fragments: Vec<RawFragment>) -> ParsedDay {
    let mut parsed = ParsedDay::default();
    for fragment in fragments {
        match parse_fragment(&fragment) {
            Ok(fact) => parsed.facts.push(fact),
            Err(reason) => parsed.rejected.push(RejectedFragment { fragment, reason }),
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture_page(name: &str) -> String {
        let path = workspace_root().join("fixtures/pages").join(name);
        fs::read_to_string(&path).expect("read fixture page")
    }

    fn day(month: u32, dom: u32) -> TargetDay {
        TargetDay::new(month, dom).unwrap()
    }

    fn fragment(text: &str) -> RawFragment {
        RawFragment::new(day(7, 20), text)
    }

    #[test]
    fn page_url_uses_unpadded_month_day() {
        assert_eq!(
            page_url(DEFAULT_BASE_URL, day(7, 4)),
            "https://en.wikipedia.org/wiki/July_4"
        );
        assert_eq!(
            page_url("http://localhost:8080/wiki/", day(2, 29)),
            "http://localhost:8080/wiki/February_29"
        );
    }

    #[test]
    fn leap_day_uses_its_own_region() {
        assert_eq!(event_region_index(day(2, 29)), 3);
        assert_eq!(event_region_index(day(2, 28)), 1);
        assert_eq!(event_region_index(day(3, 1)), 1);
    }

    #[test]
    fn extracts_ordinary_day_event_list() {
        let fragments = extract_fragments(day(7, 20), &fixture_page("July_20.html")).unwrap();
        let texts: Vec<_> = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "1969 – Apollo 11 lands on the Moon.",
                "1944 – Claus von Stauffenberg's bomb fails to kill Adolf Hitler.",
                "c. 1000 – A comet is recorded over the northern sky.",
                "No separator in this entry",
                "1881 – Sitting Bull surrenders at Fort Buford.",
            ]
        );
        assert!(fragments.iter().all(|f| f.day == day(7, 20)));
    }

    #[test]
    fn extracts_leap_day_from_later_region() {
        let fragments = extract_fragments(day(2, 29), &fixture_page("February_29.html")).unwrap();
        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].text.starts_with("1504 – "));
    }

    #[test]
    fn missing_region_is_a_structure_error() {
        let html = "<html><body><ul><li>only navigation</li></ul></body></html>";
        assert_eq!(
            extract_fragments(day(7, 20), html),
            Err(ExtractError::MissingRegion { index: 1, found: 1 })
        );
    }

    #[test]
    fn parses_year_and_description() {
        let fact = parse_fragment(&fragment("1969 – Apollo 11 lands on the Moon.")).unwrap();
        assert_eq!(fact.year, 1969);
        assert_eq!(fact.description, "Apollo 11 lands on the Moon.");
    }

    #[test]
    fn splits_on_first_separator_only() {
        let fact = parse_fragment(&fragment("1920 – Treaty signed – later annulled")).unwrap();
        assert_eq!(fact.description, "Treaty signed – later annulled");
    }

    #[test]
    fn missing_separator_is_malformed() {
        assert_eq!(
            parse_fragment(&fragment("no dash here")),
            Err(Rejection::Malformed)
        );
        assert_eq!(
            parse_fragment(&fragment("1969 - ascii hyphen")),
            Err(Rejection::Malformed)
        );
    }

    #[test]
    fn lettered_years_are_rejected_whatever_the_description() {
        for text in ["abcd – something", "c. 1000 – 1969", "44 BC – Caesar", "1969a – typo"] {
            assert!(
                matches!(
                    parse_fragment(&fragment(text)),
                    Err(Rejection::NonNumericYear { .. })
                ),
                "{text}"
            );
        }
    }

    #[test]
    fn impossible_dates_are_rejected() {
        let leap = RawFragment::new(day(2, 29), "1900 – Not a leap year");
        assert_eq!(
            parse_fragment(&leap),
            Err(Rejection::InvalidDate {
                year: "1900".into(),
                month: 2,
                day: 29
            })
        );
        assert_eq!(parse_fragment(&fragment("0 – year zero")).unwrap_err().code(), "invalid_date");
        assert_eq!(parse_fragment(&fragment(" – blank year")).unwrap_err().code(), "invalid_date");
    }

    #[test]
    fn parse_fragments_keeps_page_order() {
        let parsed = parse_fragments(vec![
            fragment("1881 – b"),
            fragment("nonsense"),
            fragment("1969 – a"),
        ]);
        let years: Vec<_> = parsed.facts.iter().map(|f| f.year).collect();
        assert_eq!(years, vec![1881, 1969]);
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].fragment.text, "nonsense");
    }

    #[tokio::test]
    async fn fixture_source_reads_and_reports_missing_pages() {
        let source = FixtureSource::new(workspace_root().join("fixtures/pages"));
        let page = source.fetch_page(Uuid::new_v4(), day(7, 20)).await.unwrap();
        assert!(page.contains("Apollo 11"));

        let empty = tempfile::tempdir().expect("tempdir");
        let source = FixtureSource::new(empty.path());
        let err = source.fetch_page(Uuid::new_v4(), day(1, 1)).await.unwrap_err();
        assert!(matches!(err, SourceError::Fixture { .. }));
    }
}
