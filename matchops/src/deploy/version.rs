//! Release version format

use std::sync::LazyLock;

use regex::Regex;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("version regex"));

/// `MAJOR.MINOR.PATCH`, digits only, no prefix or suffix
pub fn is_valid_version(version: &str) -> bool {
    VERSION_RE.is_match(version)
}
