//! Lenient semantic version handling for plugin compatibility checks.

use std::fmt;

use semver::Version;

/// A plugin version parsed from metadata.
///
/// Parsing never fails: malformed input yields a sentinel that is
/// incompatible with every requirement, so a plugin shipping a broken
/// version string can never satisfy anyone's dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginVersion {
    parsed: Option<Version>,
}

impl PluginVersion {
    /// Parse a `MAJOR.MINOR.PATCH[-pre][+build]` string.
    pub fn parse(text: &str) -> Self {
        Self {
            parsed: Version::parse(text.trim()).ok(),
        }
    }

    /// Whether the input parsed as a well-formed version.
    pub fn is_valid(&self) -> bool {
        self.parsed.is_some()
    }

    /// Whether this version satisfies `minimum` under the caret rule:
    /// same major version, and `(minor, patch)` not earlier than the
    /// minimum's.
    pub fn compatible(&self, minimum: &str) -> bool {
        let Some(have) = &self.parsed else {
            return false;
        };
        let Ok(want) = Version::parse(minimum.trim()) else {
            return false;
        };
        have.major == want.major && (have.minor, have.patch) >= (want.minor, want.patch)
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parsed {
            Some(version) => version.fmt(f),
            None => f.write_str("invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_compatible() {
        assert!(PluginVersion::parse("1.0.0").compatible("1.0.0"));
    }

    #[test]
    fn later_minor_and_patch_are_compatible() {
        assert!(PluginVersion::parse("1.2.0").compatible("1.0.0"));
        assert!(PluginVersion::parse("1.0.3").compatible("1.0.1"));
        assert!(PluginVersion::parse("1.1.0").compatible("1.0.9"));
    }

    #[test]
    fn earlier_minor_or_patch_is_not() {
        assert!(!PluginVersion::parse("1.0.0").compatible("1.1.0"));
        assert!(!PluginVersion::parse("1.1.0").compatible("1.1.1"));
    }

    #[test]
    fn major_must_match_exactly() {
        assert!(!PluginVersion::parse("2.0.0").compatible("1.0.0"));
        assert!(!PluginVersion::parse("1.9.9").compatible("2.0.0"));
    }

    #[test]
    fn pre_release_and_build_tags_parse() {
        let version = PluginVersion::parse("1.2.3-beta.1+build42");
        assert!(version.is_valid());
        assert!(version.compatible("1.2.3"));
    }

    #[test]
    fn malformed_input_is_incompatible_with_everything() {
        let bad = PluginVersion::parse("not-a-version");
        assert!(!bad.is_valid());
        assert!(!bad.compatible("0.0.0"));
        assert!(!bad.compatible("not-a-version"));
        // and nothing is compatible with a malformed requirement
        assert!(!PluginVersion::parse("1.0.0").compatible("garbage"));
    }

    #[test]
    fn whitespace_is_tolerated() {
        assert!(PluginVersion::parse(" 1.0.0 ").compatible("1.0.0"));
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(PluginVersion::parse("1.2.3").to_string(), "1.2.3");
        assert_eq!(PluginVersion::parse("???").to_string(), "invalid");
    }
}
