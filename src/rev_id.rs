//! Revision identifiers of the form `<generation>-<digest>`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Generation of a revision, the number of edits since the root of its tree.
pub type Generation = u32;

/// Identifier of a single revision of a document.
///
/// Ordering is total: the generation is compared numerically first, ties are
/// broken by comparing the digests as byte strings. Every replica computing
/// the winner of a conflict relies on this exact ordering.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId {
    // field order matters for the derived `Ord`
    generation: Generation,
    digest: String,
}

/// A string that is not a valid revision id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed revision id {0:?}")]
pub struct MalformedRevisionId(pub String);

impl RevisionId {
    /// Create a revision id from its parts.
    ///
    /// Returns an error for generation `0` or an empty digest.
    pub fn new(
        generation: Generation,
        digest: impl Into<String>,
    ) -> Result<Self, MalformedRevisionId> {
        let digest = digest.into();
        if generation == 0 || digest.is_empty() {
            return Err(MalformedRevisionId(format!("{generation}-{digest}")));
        }
        Ok(Self { generation, digest })
    }

    /// Parse a revision id, splitting on the first `-`.
    pub fn parse(s: &str) -> Result<Self, MalformedRevisionId> {
        let malformed = || MalformedRevisionId(s.to_string());
        let (generation, digest) = s.split_once('-').ok_or_else(malformed)?;
        // `u32::from_str` accepts a leading `+`, revision ids do not
        if generation.is_empty() || !generation.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let generation = generation.parse().map_err(|_| malformed())?;
        Self::new(generation, digest).map_err(|_| malformed())
    }

    /// The generation of this revision.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The digest suffix, everything after the first `-`.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.digest)
    }
}

impl fmt::Debug for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionId({self})")
    }
}

impl FromStr for RevisionId {
    type Err = MalformedRevisionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = MalformedRevisionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RevisionId> for String {
    fn from(value: RevisionId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_and_format() {
        let id: RevisionId = "12-abc-def".parse().unwrap();
        assert_eq!(id.generation(), 12);
        assert_eq!(id.digest(), "abc-def");
        assert_eq!(id.to_string(), "12-abc-def");
    }

    #[test]
    fn parse_rejects_malformed() {
        let malformed = [
            "",
            "abc",
            "-abc",
            "1-",
            "x-abc",
            "+1-abc",
            "0-abc",
            "99999999999-abc",
            " 1-abc",
        ];
        for s in malformed {
            assert!(RevisionId::parse(s).is_err(), "{s:?} should not parse");
        }
    }

    #[test]
    fn ordering() {
        let a = RevisionId::parse("2-bbb").unwrap();
        let b = RevisionId::parse("2-ccc").unwrap();
        let c = RevisionId::parse("10-aaa").unwrap();
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }

    #[test]
    fn serde_as_string() {
        let id = RevisionId::parse("3-deadbeef").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"3-deadbeef\"");
        let back: RevisionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<RevisionId>("\"nope\"").is_err());
    }

    fn arb_rev_id() -> impl Strategy<Value = RevisionId> {
        (1u32..50, "[0-9a-f]{1,6}").prop_map(|(g, d)| RevisionId::new(g, d).unwrap())
    }

    proptest! {
        #[test]
        fn compare_is_antisymmetric(a in arb_rev_id(), b in arb_rev_id()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
        }

        #[test]
        fn compare_is_transitive(a in arb_rev_id(), b in arb_rev_id(), c in arb_rev_id()) {
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }

        #[test]
        fn compare_matches_generation_then_digest(a in arb_rev_id(), b in arb_rev_id()) {
            let expected = a
                .generation()
                .cmp(&b.generation())
                .then_with(|| a.digest().as_bytes().cmp(b.digest().as_bytes()));
            prop_assert_eq!(a.cmp(&b), expected);
        }

        #[test]
        fn display_parse_roundtrip(a in arb_rev_id()) {
            prop_assert_eq!(RevisionId::parse(&a.to_string()).unwrap(), a);
        }
    }
}
