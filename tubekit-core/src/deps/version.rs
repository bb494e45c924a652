//! Release version parsing and ordering.
//!
//! Release tags are dotted numbers with an optional `v` prefix and an optional
//! suffix (`2024.03.10`, `v1.10.0`, `7.1-tessus`). Components are compared
//! numerically and missing trailing components count as zero, so `1.2` equals
//! `1.2.0` and `1.2.0` sorts before `1.10.0`.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Invalid version: {0:?}")]
    Invalid(String),
}

/// Parsed release version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    parts: Vec<u64>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        // Stop at the first suffix separator
        let numeric = body.split(['-', '+', ' ', '_']).next().unwrap_or_default();

        let parts = numeric
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionError::Invalid(input.to_string()))?;

        if parts.is_empty() {
            return Err(VersionError::Invalid(input.to_string()));
        }

        Ok(Self { parts })
    }

    fn component(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.parts.iter().map(u64::to_string).collect();
        write!(f, "{}", joined.join("."))
    }
}

/// Compare two version strings.
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}

/// Whether `installed` should be replaced by `latest`.
///
/// Nothing installed always needs an update; an empty remote tag never
/// triggers one. Tags that aren't dotted numbers (rolling builds such as
/// `latest` or `N-118000-g...`) are compared for equality.
pub fn needs_update(installed: &str, latest: &str) -> bool {
    let (installed, latest) = (installed.trim(), latest.trim());
    if installed.is_empty() {
        return true;
    }
    if latest.is_empty() {
        return false;
    }
    match compare(installed, latest) {
        Ok(ordering) => ordering == Ordering::Less,
        Err(_) => installed != latest,
    }
}
