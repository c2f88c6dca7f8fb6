//! URL / filesystem path → human-readable phrase.
//!
//! `http://host/dir/DesertSky%20Bus%20Distribution.xls` becomes
//! `Desert Sky Bus Distribution`: take the URL path (or the whole input when
//! it is a plain path), percent-decode it, keep the final segment's base
//! name, then split it into words on separators, case changes, and
//! letter/non-letter transitions.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::Url;

use senseindex_shared::{Result, SenseIndexError};

/// Normalize a URL or path into a phrase.
///
/// Returns `None` for blank input, for input whose path cannot be decoded
/// as UTF-8, and when nothing but separators remains.
pub fn normalize(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let path = extract_path(input);
    let decoded = match decode_path(&path) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(input, error = %e, "skipping value that cannot be decoded");
            return None;
        }
    };

    let phrase = split_words(base_name(&decoded));
    if phrase.is_empty() { None } else { Some(phrase) }
}

/// The path component of a hierarchical URL, or the input itself.
///
/// Single-letter schemes are Windows drive letters (`C:\docs\a.doc`), and
/// non-hierarchical inputs like `Report: final.doc` are not URLs either.
fn extract_path(input: &str) -> String {
    match Url::parse(input) {
        Ok(url) if url.scheme().len() > 1 && !url.cannot_be_a_base() => url.path().to_string(),
        _ => input.to_string(),
    }
}

/// Percent-decode as UTF-8. `+` stays a literal plus.
fn decode_path(path: &str) -> Result<String> {
    urlencoding::decode(path)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| SenseIndexError::Decoding(format!("'{path}': {e}")))
}

/// Final path segment without its extension.
fn base_name(path: &str) -> &str {
    let file = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file.rfind('.') {
        Some(idx) if idx > 0 => &file[..idx],
        _ => file,
    }
}

// ---------------------------------------------------------------------------
// Word splitting
// ---------------------------------------------------------------------------

static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_@=]").expect("separator regex"));

/// `HTMLFile` → `HTML File`
static ACRONYM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z])([A-Z][a-z])").expect("acronym regex"));

/// `fooBar` → `foo Bar`
static CAMEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^A-Z])([A-Z])").expect("camel regex"));

static LETTER_THEN_OTHER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z])([^A-Za-z])").expect("letter/other regex"));

static OTHER_THEN_LETTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^A-Za-z])([A-Za-z])").expect("other/letter regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Insert word boundaries into a base name and collapse whitespace.
///
/// Every pass only inserts spaces, so running them in sequence and then
/// collapsing whitespace gives the same phrase as inserting all boundaries
/// at once.
pub fn split_words(base: &str) -> String {
    let text = SEPARATOR_RE.replace_all(base, " ");
    let text = ACRONYM_RE.replace_all(&text, "$1 $2");
    let text = CAMEL_RE.replace_all(&text, "$1 $2");
    let text = LETTER_THEN_OTHER_RE.replace_all(&text, "$1 $2");
    let text = OTHER_THEN_LETTER_RE.replace_all(&text, "$1 $2");

    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}
