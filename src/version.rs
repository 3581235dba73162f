/*!
Dotted numeric version identifiers

Versions are compared component by component as integers, so `1.10` sorts
after `1.9`. Missing trailing components count as zero: `2.0 == 2.0.0`.
*/
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::*;

/// A parsed version string such as `1.3.10`
#[derive(Debug, Clone)]
pub struct VersionIdentifier {
    parts: Vec<u64>,
}

impl VersionIdentifier {
    /// Parse a dotted numeric version, accepting an optional leading `v`
    ///
    /// * Errors:
    ///     * Resolution - empty or non-numeric component
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if trimmed.is_empty() {
            bail!(Error::Resolution, "Empty version string: {:?}", s);
        }
        let parts = trimmed
            .split('.')
            .map(|p| {
                p.parse::<u64>().map_err(|_| {
                    format_err!(Error::Resolution, "Invalid version component {:?} in {:?}", p, s)
                })
            })
            .collect::<Result<Vec<u64>>>()?;
        Ok(Self { parts })
    }

    /// Numeric components, as written
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    fn component(&self, i: usize) -> u64 {
        self.parts.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for VersionIdentifier {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Ord for VersionIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for VersionIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionIdentifier {}

impl fmt::Display for VersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = self
            .parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&s)
    }
}

/// Compare two version strings numerically
///
/// * Errors:
///     * Resolution - either string is not a dotted numeric version
pub fn compare(current: &str, latest: &str) -> Result<Ordering> {
    Ok(VersionIdentifier::parse(current)?.cmp(&VersionIdentifier::parse(latest)?))
}

/// Check if `latest` is newer than `current`
pub fn bump_is_greater(current: &str, latest: &str) -> Result<bool> {
    Ok(compare(current, latest)? == Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_not_lexical() {
        assert_eq!(Ordering::Less, compare("1.9.0", "1.10.0").unwrap());
        assert_eq!(Ordering::Less, compare("1.9", "1.10").unwrap());
    }

    #[test]
    fn missing_components_are_zero() {
        assert_eq!(Ordering::Equal, compare("2.0", "2.0.0").unwrap());
        assert_eq!(Ordering::Greater, compare("1.2.3", "1.2").unwrap());
        assert_eq!(
            VersionIdentifier::parse("3").unwrap(),
            VersionIdentifier::parse("3.0.0.0").unwrap()
        );
    }

    #[test]
    fn leading_v_is_accepted() {
        assert_eq!(Ordering::Equal, compare("v1.3.10", "1.3.10").unwrap());
        assert_eq!("1.3.10", VersionIdentifier::parse("v1.3.10").unwrap().to_string());
    }

    #[test]
    fn bump_detection() {
        assert!(bump_is_greater("1.3.9", "1.3.10").unwrap());
        assert!(!bump_is_greater("1.3.10", "1.3.10").unwrap());
        assert!(!bump_is_greater("2.0", "1.99.99").unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(VersionIdentifier::parse("").is_err());
        assert!(VersionIdentifier::parse("v").is_err());
        assert!(VersionIdentifier::parse("1..2").is_err());
        assert!(VersionIdentifier::parse("1.2-beta").is_err());
        assert!(VersionIdentifier::parse("latest").is_err());
    }
}
