use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// The largest accepted major component.
const MAJOR_MAX: u64 = 9999;
/// The largest accepted minor and revision components.
const MINOR_MAX: u64 = 99;
/// The largest accepted stage level.
const LEVEL_MAX: u64 = 255;

/// The pre-release stage of a [`Version`].
///
/// Stages order a version's maturity: a development build of `1.0` precedes
/// its alpha, which precedes its beta, which precedes its release
/// candidates, which precede the release itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReleaseStage {
    /// `d`, e.g. `1.0d7`
    Development,
    /// `a`, e.g. `1.0a2`
    Alpha,
    /// `b`, e.g. `1.0b13`
    Beta,
    /// `fc` (or the legacy `f`), e.g. `1.0fc1`
    Candidate,
    /// No suffix, e.g. `1.0`
    Release,
}

impl ReleaseStage {
    fn suffix(self) -> &'static str {
        match self {
            Self::Development => "d",
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::Candidate => "fc",
            Self::Release => "",
        }
    }
}

/// A kext bundle version such as `1.2.3` or `10.4b12`.
///
/// The canonical string form is `major[.minor[.revision]][stage level]`
/// where the stage is one of `d`, `a`, `b`, `fc` and releases carry no
/// suffix. Component ranges match the historical format: the major part is
/// capped at four digits, minor and revision at two, the stage level at
/// 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    major: u16,
    minor: u8,
    revision: u8,
    stage: ReleaseStage,
    level: u8,
}

impl Version {
    /// Create a release version from its numeric components.
    ///
    /// # Panics
    ///
    /// When a component exceeds its canonical range.
    pub fn new(major: u64, minor: u64, revision: u64) -> Self {
        assert!(major <= MAJOR_MAX, "major component out of range: {major}");
        assert!(minor <= MINOR_MAX, "minor component out of range: {minor}");
        assert!(
            revision <= MINOR_MAX,
            "revision component out of range: {revision}"
        );
        Self {
            major: major as u16,
            minor: minor as u8,
            revision: revision as u8,
            stage: ReleaseStage::Release,
            level: 0,
        }
    }

    /// Set the pre-release stage and level.
    ///
    /// # Panics
    ///
    /// When the level exceeds its canonical range, or when a level is given
    /// for [`ReleaseStage::Release`].
    #[must_use]
    pub fn with_stage(mut self, stage: ReleaseStage, level: u64) -> Self {
        assert!(level <= LEVEL_MAX, "stage level out of range: {level}");
        assert!(
            stage != ReleaseStage::Release || level == 0,
            "release versions carry no stage level"
        );
        self.stage = stage;
        self.level = level as u8;
        self
    }

    pub fn major(&self) -> u64 {
        u64::from(self.major)
    }

    pub fn minor(&self) -> u64 {
        u64::from(self.minor)
    }

    pub fn revision(&self) -> u64 {
        u64::from(self.revision)
    }

    pub fn stage(&self) -> ReleaseStage {
        self.stage
    }

    pub fn level(&self) -> u64 {
        u64::from(self.level)
    }

    /// Whether this is a release version (no stage suffix).
    pub fn is_release(&self) -> bool {
        self.stage == ReleaseStage::Release
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.revision, self.stage, self.level).cmp(&(
            other.major,
            other.minor,
            other.revision,
            other.stage,
            other.level,
        ))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    /// Trailing zero components are elided: `1.0.0` renders as `1`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if self.minor != 0 || self.revision != 0 {
            write!(f, ".{}", self.minor)?;
        }
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        if self.stage != ReleaseStage::Release {
            write!(f, "{}{}", self.stage.suffix(), self.level)?;
        }
        Ok(())
    }
}

/// An error when parsing a [`Version`] string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    #[error("version string is empty")]
    Empty,
    #[error("unexpected character {found:?} in version {version:?}")]
    UnexpectedCharacter { version: String, found: char },
    #[error("component {component} of version {version:?} exceeds {max}")]
    ComponentTooLarge {
        version: String,
        component: &'static str,
        max: u64,
    },
    #[error("stage suffix in version {version:?} is missing its level")]
    MissingStageLevel { version: String },
    #[error("trailing input after version {version:?}")]
    TrailingInput { version: String },
}

/// Consume a leading run of ASCII digits, enforcing a cap.
fn parse_component(
    s: &mut &str,
    version: &str,
    component: &'static str,
    max: u64,
) -> Result<Option<u64>, VersionParseError> {
    let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return Ok(None);
    }
    let (head, tail) = s.split_at(digits);
    // Caps are small enough that more than five digits always overflows.
    let value = head
        .parse::<u64>()
        .ok()
        .filter(|value| *value <= max)
        .ok_or_else(|| VersionParseError::ComponentTooLarge {
            version: version.to_string(),
            component,
            max,
        })?;
    *s = tail;
    Ok(Some(value))
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        if version.is_empty() {
            return Err(VersionParseError::Empty);
        }
        let mut s = version;

        let major = parse_component(&mut s, version, "major", MAJOR_MAX)?.ok_or_else(|| {
            VersionParseError::UnexpectedCharacter {
                version: version.to_string(),
                found: version.chars().next().unwrap_or_default(),
            }
        })?;
        let mut minor = 0;
        let mut revision = 0;
        if let Some(rest) = s.strip_prefix('.') {
            s = rest;
            minor = parse_component(&mut s, version, "minor", MINOR_MAX)?.ok_or_else(|| {
                VersionParseError::UnexpectedCharacter {
                    version: version.to_string(),
                    found: s.chars().next().unwrap_or('.'),
                }
            })?;
            if let Some(rest) = s.strip_prefix('.') {
                s = rest;
                revision =
                    parse_component(&mut s, version, "revision", MINOR_MAX)?.ok_or_else(|| {
                        VersionParseError::UnexpectedCharacter {
                            version: version.to_string(),
                            found: s.chars().next().unwrap_or('.'),
                        }
                    })?;
            }
        }

        let stage = if let Some(rest) = s.strip_prefix("fc") {
            s = rest;
            Some(ReleaseStage::Candidate)
        } else if let Some(rest) = s.strip_prefix('f') {
            // Legacy single-letter spelling of a final candidate.
            s = rest;
            Some(ReleaseStage::Candidate)
        } else if let Some(rest) = s.strip_prefix('d') {
            s = rest;
            Some(ReleaseStage::Development)
        } else if let Some(rest) = s.strip_prefix('a') {
            s = rest;
            Some(ReleaseStage::Alpha)
        } else if let Some(rest) = s.strip_prefix('b') {
            s = rest;
            Some(ReleaseStage::Beta)
        } else {
            None
        };

        let (stage, level) = match stage {
            Some(stage) => {
                let level = parse_component(&mut s, version, "stage level", LEVEL_MAX)?
                    .ok_or_else(|| VersionParseError::MissingStageLevel {
                        version: version.to_string(),
                    })?;
                (stage, level)
            }
            None => (ReleaseStage::Release, 0),
        };

        if !s.is_empty() {
            return Err(VersionParseError::TrailingInput {
                version: version.to_string(),
            });
        }

        Ok(Self {
            major: major as u16,
            minor: minor as u8,
            revision: revision as u8,
            stage,
            level: level as u8,
        })
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn parse_canonical_versions() {
        let versions = [
            ("1", Version::new(1, 0, 0)),
            ("1.0", Version::new(1, 0, 0)),
            ("1.0.0", Version::new(1, 0, 0)),
            ("10.4.2", Version::new(10, 4, 2)),
            ("9999.99.99", Version::new(9999, 99, 99)),
            (
                "1.0d7",
                Version::new(1, 0, 0).with_stage(ReleaseStage::Development, 7),
            ),
            (
                "2.1a1",
                Version::new(2, 1, 0).with_stage(ReleaseStage::Alpha, 1),
            ),
            (
                "2.1.3b255",
                Version::new(2, 1, 3).with_stage(ReleaseStage::Beta, 255),
            ),
            (
                "3.0fc2",
                Version::new(3, 0, 0).with_stage(ReleaseStage::Candidate, 2),
            ),
            (
                "3.0f2",
                Version::new(3, 0, 0).with_stage(ReleaseStage::Candidate, 2),
            ),
        ];
        for (string, expected) in versions {
            assert_eq!(
                Version::from_str(string).as_ref(),
                Ok(&expected),
                "{string} should parse"
            );
        }
    }

    #[test]
    fn parse_rejects_malformed_versions() {
        let versions = [
            "", ".", "1.", "1..2", "a1", "1.0c1", "1.0d", "1.0fc", "-1", "1.0.0.0", "1 .0",
            "10000", "1.100", "1.0.100", "1.0b256", "1.0b1x",
        ];
        for string in versions {
            assert!(
                Version::from_str(string).is_err(),
                "{string:?} should not parse"
            );
        }
    }

    #[test]
    fn ordering_within_a_release() {
        let ordered = ["1.0d1", "1.0d2", "1.0a1", "1.0b1", "1.0b2", "1.0fc1", "1.0"];
        let parsed: Vec<Version> = ordered
            .iter()
            .map(|s| Version::from_str(s).unwrap())
            .collect();
        for pair in parsed.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn ordering_across_releases() {
        let newer = Version::from_str("2.0d1").unwrap();
        let older = Version::from_str("1.9.9").unwrap();
        assert!(older < newer);
        assert!(Version::from_str("1.0").unwrap() < Version::from_str("1.0.1d1").unwrap());
    }

    #[test]
    fn display_is_canonical() {
        let cases = [
            ("1.0.0", "1"),
            ("1.2.0", "1.2"),
            ("1.2.3", "1.2.3"),
            ("1.0.3", "1.0.3"),
            ("1.0d7", "1d7"),
            ("2.1.3b4", "2.1.3b4"),
            ("3.0f2", "3fc2"),
        ];
        for (input, rendered) in cases {
            assert_eq!(Version::from_str(input).unwrap().to_string(), rendered);
        }
    }

    #[test]
    fn display_round_trips() {
        for string in ["1", "1.2", "1.2.3", "1.2.3b4", "10fc1", "9999.99.99d255"] {
            let version = Version::from_str(string).unwrap();
            assert_eq!(Version::from_str(&version.to_string()), Ok(version));
        }
    }

    #[test]
    fn serde_uses_the_string_form() {
        let version = Version::from_str("1.2.3b4").unwrap();
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"1.2.3b4\"");
        assert_eq!(serde_json::from_str::<Version>(&json).unwrap(), version);
    }
}
