//! Semantic version handling for API gating and dependency checks.

use std::fmt;
use std::str::FromStr;

use crate::error::VersionError;

/// A parsed `MAJOR.MINOR.PATCH` version.
///
/// Prerelease and build suffixes are accepted on input and ignored by
/// the compatibility rule: two versions are compatible when the majors
/// match and the candidate's `(minor, patch)` is at least the required
/// one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(semver::Version);

impl Version {
    /// Whether this version satisfies `required` as a minimum.
    ///
    /// Same major, and `(minor, patch)` lexicographically at or above
    /// the required pair.
    pub fn compatible(&self, required: &Version) -> bool {
        self.0.major == required.0.major
            && (self.0.minor, self.0.patch) >= (required.0.minor, required.0.patch)
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        semver::Version::parse(input)
            .map(Version)
            .map_err(|source| VersionError {
                input: input.to_string(),
                source,
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
