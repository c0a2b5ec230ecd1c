//! Best-effort bibliographic metadata from raw paper text.
//!
//! Every field is filled by an ordered list of independent heuristics; the
//! first heuristic that returns a value wins and the rest are not consulted.
//! Nothing here fails: a field with no match keeps its placeholder.

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

use crate::models::PaperMetadata;

const TITLE_SCAN_LINES: usize = 50;
const TITLE_MIN_CHARS: usize = 10;
const TITLE_MAX_CHARS: usize = 200;
const AUTHOR_SCAN_CHARS: usize = 2_000;
const YEAR_SCAN_CHARS: usize = 3_000;

const TITLE_STOPWORDS: [&str; 10] = [
    "abstract",
    "introduction",
    "figure",
    "table",
    "section",
    "journal",
    "vol",
    "pp",
    "copyright",
    "http",
];

const FULL_NAME_LIST: &str = r"([A-Z][a-z]+ [A-Z][a-z]+(?:, [A-Z][a-z]+ [A-Z][a-z]+)*)";
const INITIAL_SURNAME_LIST: &str = r"([A-Z]\. [A-Z][a-z]+(?:, [A-Z]\. [A-Z][a-z]+)*)";
const SURNAME_INITIAL_LIST: &str = r"([A-Z][a-z]+, [A-Z]\.(?:, [A-Z][a-z]+, [A-Z]\.)*)";
const PUBLICATION_YEAR: &str = r"\b(?:19|20)\d{2}\b";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Title,
    Authors,
    Year,
}

/// A single named extractor for one metadata field.
#[derive(Clone, Copy)]
pub struct Heuristic {
    pub name: &'static str,
    pub field: MetadataField,
    extract: fn(&str) -> Option<String>,
}

impl Heuristic {
    pub fn apply(&self, text: &str) -> Option<String> {
        (self.extract)(text)
    }
}

impl std::fmt::Debug for Heuristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heuristic")
            .field("name", &self.name)
            .field("field", &self.field)
            .finish()
    }
}

/// Heuristics in priority order.
pub const HEURISTICS: [Heuristic; 5] = [
    Heuristic {
        name: "title_line",
        field: MetadataField::Title,
        extract: title_line,
    },
    Heuristic {
        name: "full_name_list",
        field: MetadataField::Authors,
        extract: full_name_list,
    },
    Heuristic {
        name: "initial_surname_list",
        field: MetadataField::Authors,
        extract: initial_surname_list,
    },
    Heuristic {
        name: "surname_initial_list",
        field: MetadataField::Authors,
        extract: surname_initial_list,
    },
    Heuristic {
        name: "publication_year",
        field: MetadataField::Year,
        extract: publication_year,
    },
];

pub fn extract_paper_metadata(text: &str) -> PaperMetadata {
    let mut metadata = PaperMetadata {
        extracted_at: Some(Utc::now()),
        ..PaperMetadata::default()
    };

    if let Some(title) = first_match(MetadataField::Title, text) {
        metadata.title = title;
    }
    if let Some(authors) = first_match(MetadataField::Authors, text) {
        metadata.authors = authors;
    }
    if let Some(year) = first_match(MetadataField::Year, text) {
        metadata.year = year;
    }

    metadata
}

pub fn first_match(field: MetadataField, text: &str) -> Option<String> {
    HEURISTICS
        .iter()
        .filter(|heuristic| heuristic.field == field)
        .find_map(|heuristic| heuristic.apply(text))
}

fn title_line(text: &str) -> Option<String> {
    text.lines()
        .take(TITLE_SCAN_LINES)
        .map(str::trim)
        .find(|line| looks_like_title(line))
        .map(str::to_string)
}

fn looks_like_title(line: &str) -> bool {
    let length = line.chars().count();
    if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&length) {
        return false;
    }

    let starts_upper = line.chars().next().is_some_and(char::is_uppercase);
    let lowered = line.to_lowercase();

    starts_upper
        && !is_shouting(line)
        && !TITLE_STOPWORDS.iter().any(|word| lowered.contains(word))
        && !line.ends_with(['.', ',', ';'])
        && !line.chars().any(char::is_numeric)
}

/// True when the line has cased letters and none of them are lowercase.
fn is_shouting(line: &str) -> bool {
    let mut has_cased = false;
    for c in line.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased
}

fn full_name_list(text: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    capture_in_prefix(&RE, FULL_NAME_LIST, text, AUTHOR_SCAN_CHARS)
}

fn initial_surname_list(text: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    capture_in_prefix(&RE, INITIAL_SURNAME_LIST, text, AUTHOR_SCAN_CHARS)
}

fn surname_initial_list(text: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    capture_in_prefix(&RE, SURNAME_INITIAL_LIST, text, AUTHOR_SCAN_CHARS)
}

fn publication_year(text: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    capture_in_prefix(&RE, PUBLICATION_YEAR, text, YEAR_SCAN_CHARS)
}

fn capture_in_prefix(
    cell: &OnceLock<Option<Regex>>,
    pattern: &str,
    text: &str,
    max_chars: usize,
) -> Option<String> {
    let regex = cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()?;
    let haystack = char_prefix(text, max_chars);
    regex.captures(haystack).and_then(|captures| {
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|found| found.as_str().to_string())
    })
}

fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
