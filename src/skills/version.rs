//! Skill versions and version tokens.
//!
//! Versions are dot-separated non-negative integers compared numerically
//! component by component. Missing trailing components count as zero, so
//! `1.10` sorts after `1.9.0` and `2` equals `2.0.0`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::DefinitionError;

/// The literal token that selects the greatest registered version.
pub const LATEST: &str = "latest";

// ============================================================================
// SkillVersion
// ============================================================================

/// A parsed skill version.
///
/// Keeps the original text for display while ordering, equality and hashing
/// use the numeric components with trailing zeros ignored.
#[derive(Debug, Clone)]
pub struct SkillVersion {
    raw: String,
    parts: Vec<u64>,
}

impl SkillVersion {
    /// Parse a version string such as `"1.2.0"`.
    pub fn parse(raw: &str) -> Result<Self, DefinitionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DefinitionError::InvalidVersion(raw.to_string()));
        }
        let parts = trimmed
            .split('.')
            .map(|p| {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(DefinitionError::InvalidVersion(raw.to_string()));
                }
                p.parse::<u64>()
                    .map_err(|_| DefinitionError::InvalidVersion(raw.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: trimmed.to_string(),
            parts,
        })
    }

    /// The version as written in the definition.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric components as parsed.
    pub fn components(&self) -> &[u64] {
        &self.parts
    }

    /// Components with trailing zeros removed.
    fn significant(&self) -> &[u64] {
        let len = self
            .parts
            .iter()
            .rposition(|&p| p != 0)
            .map_or(0, |i| i + 1);
        &self.parts[..len]
    }
}

impl Ord for SkillVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for SkillVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SkillVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SkillVersion {}

impl Hash for SkillVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl fmt::Display for SkillVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SkillVersion {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SkillVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SkillVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // YAML documents often write `version: 1.0` which arrives as a float.
        let value = VersionText::deserialize(deserializer)?;
        let text = match value {
            VersionText::Text(s) => s,
            VersionText::Int(n) => n.to_string(),
            VersionText::Float(f) => f.to_string(),
        };
        SkillVersion::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionText {
    Text(String),
    Int(u64),
    Float(f64),
}

// ============================================================================
// VersionToken
// ============================================================================

/// A requested version: either `"latest"` or an explicit version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum VersionToken {
    /// Greatest registered version.
    #[default]
    Latest,
    /// A specific version, kept as text so unknown or malformed versions can
    /// be reported back as not found.
    Exact(String),
}

impl VersionToken {
    /// Build an explicit token.
    pub fn exact(version: impl Into<String>) -> Self {
        VersionToken::Exact(version.into())
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, VersionToken::Latest)
    }
}

impl From<&str> for VersionToken {
    fn from(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(LATEST) {
            VersionToken::Latest
        } else {
            VersionToken::Exact(trimmed.to_string())
        }
    }
}

impl From<String> for VersionToken {
    fn from(s: String) -> Self {
        VersionToken::from(s.as_str())
    }
}

impl From<&SkillVersion> for VersionToken {
    fn from(v: &SkillVersion) -> Self {
        VersionToken::Exact(v.as_str().to_string())
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::Latest => f.write_str(LATEST),
            VersionToken::Exact(v) => f.write_str(v),
        }
    }
}

impl Serialize for VersionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = VersionText::deserialize(deserializer)?;
        Ok(match value {
            VersionText::Text(s) => VersionToken::from(s),
            VersionText::Int(n) => VersionToken::Exact(n.to_string()),
            VersionText::Float(f) => VersionToken::Exact(f.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> SkillVersion {
        SkillVersion::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("1.2.0") < v("1.10.0"));
        assert!(v("2.0.0") > v("1.10.0"));
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("2"), v("2.0.0"));
        assert!(v("1.0.1") > v("1"));
        assert_eq!(v("1.0").as_str(), "1.0");
    }

    #[test]
    fn test_equal_versions_hash_alike() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(v("3.1"));
        assert!(set.contains(&v("3.1.0")));
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(SkillVersion::parse("1.x.0").is_err());
        assert!(SkillVersion::parse("").is_err());
        assert!(SkillVersion::parse("1..0").is_err());
        assert!(SkillVersion::parse("v1.0.0").is_err());
    }

    #[test]
    fn test_deserialize_yaml_float_version() {
        let parsed: SkillVersion = serde_yaml::from_str("1.5").unwrap();
        assert_eq!(parsed, v("1.5.0"));
        let parsed: SkillVersion = serde_yaml::from_str("\"1.5.2\"").unwrap();
        assert_eq!(parsed.as_str(), "1.5.2");
    }

    #[test]
    fn test_version_token_parsing() {
        assert_eq!(VersionToken::from("latest"), VersionToken::Latest);
        assert_eq!(VersionToken::from("LATEST"), VersionToken::Latest);
        assert_eq!(VersionToken::from(""), VersionToken::Latest);
        assert_eq!(VersionToken::from("1.2.3"), VersionToken::exact("1.2.3"));

        let token: VersionToken = serde_json::from_str("\"latest\"").unwrap();
        assert!(token.is_latest());
        assert_eq!(serde_json::to_string(&VersionToken::exact("2.0.0")).unwrap(), "\"2.0.0\"");
    }
}
