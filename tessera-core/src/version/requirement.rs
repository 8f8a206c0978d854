//! Version requirements and constraint satisfaction
//!
//! Every variant is a pure predicate over [`VersionSpec`] expressed through
//! [`compare`], so `satisfies` always agrees with direct comparison.
//! Pre-release exclusion is a selection policy and lives in the resolver.

use super::{compare, ParseError, VersionSpec};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A constraint on acceptable versions of an asset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRequirement {
    /// `=1.2.3`
    Exact(VersionSpec),
    /// `>1.2.3`
    GreaterThan(VersionSpec),
    /// `>=1.2.3`
    GreaterOrEqual(VersionSpec),
    /// `<1.2.3`
    LessThan(VersionSpec),
    /// `<=1.2.3`
    LessOrEqual(VersionSpec),
    /// `^1.2.3`: same major, at least the given minor.patch
    Compatible(VersionSpec),
    /// `~1.2.3`: same major.minor, at least the given patch
    Tilde(VersionSpec),
    /// `>=1.2.0, <2.0.0` and the other bound combinations
    Range {
        lower: VersionSpec,
        lower_inclusive: bool,
        upper: VersionSpec,
        upper_inclusive: bool,
    },
    /// `*`
    Wildcard,
}

impl VersionRequirement {
    /// Check whether `version` meets this requirement
    pub fn satisfies(&self, version: &VersionSpec) -> bool {
        match self {
            Self::Exact(v) => compare(version, v) == Ordering::Equal,
            Self::GreaterThan(v) => compare(version, v) == Ordering::Greater,
            Self::GreaterOrEqual(v) => compare(version, v) != Ordering::Less,
            Self::LessThan(v) => compare(version, v) == Ordering::Less,
            Self::LessOrEqual(v) => compare(version, v) != Ordering::Greater,
            Self::Compatible(v) => {
                version.major() == v.major() && compare(version, v) != Ordering::Less
            }
            Self::Tilde(v) => {
                version.major() == v.major()
                    && version.minor() == v.minor()
                    && compare(version, v) != Ordering::Less
            }
            Self::Range {
                lower,
                lower_inclusive,
                upper,
                upper_inclusive,
            } => {
                let above = match compare(version, lower) {
                    Ordering::Greater => true,
                    Ordering::Equal => *lower_inclusive,
                    Ordering::Less => false,
                };
                let below = match compare(version, upper) {
                    Ordering::Less => true,
                    Ordering::Equal => *upper_inclusive,
                    Ordering::Greater => false,
                };
                above && below
            }
            Self::Wildcard => true,
        }
    }

    /// The pre-release version this requirement names explicitly, if any
    ///
    /// Only an `Exact` requirement can opt a pre-release into selection.
    pub fn exact_prerelease(&self) -> Option<&VersionSpec> {
        match self {
            Self::Exact(v) if v.is_prerelease() => Some(v),
            _ => None,
        }
    }

    /// Parse a requirement expression
    ///
    /// Supports:
    /// - Wildcard: `*`
    /// - Exact: `1.2.3` or `=1.2.3`
    /// - Comparators: `>1.2.3`, `>=1.2.3`, `<1.2.3`, `<=1.2.3`
    /// - Caret (compatible): `^1.2` means >=1.2.0 and same major
    /// - Tilde (patch-level): `~1.2` means >=1.2.0 <1.3.0
    /// - Range: a lower and an upper comparator joined by a comma
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "empty requirement"));
        }

        let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [single] => parse_comparator(single, input),
            [first, second] => {
                let a = parse_comparator(first, input)?;
                let b = parse_comparator(second, input)?;
                range_from_bounds(a, b).ok_or_else(|| {
                    invalid(input, "a range needs one lower bound and one upper bound")
                })
            }
            _ => Err(invalid(input, "at most two comparators are supported")),
        }
    }
}

fn invalid(input: &str, reason: &str) -> ParseError {
    ParseError::InvalidRequirement {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_comparator(expr: &str, original: &str) -> Result<VersionRequirement, ParseError> {
    if expr == "*" {
        return Ok(VersionRequirement::Wildcard);
    }

    // Two-character operators must be checked before their one-character prefixes
    let (op, rest) = [">=", "<=", ">", "<", "=", "^", "~"]
        .iter()
        .find_map(|op| expr.strip_prefix(op).map(|rest| (*op, rest)))
        .unwrap_or(("", expr));

    let version = parse_partial(rest.trim(), original)?;
    Ok(match op {
        ">=" => VersionRequirement::GreaterOrEqual(version),
        "<=" => VersionRequirement::LessOrEqual(version),
        ">" => VersionRequirement::GreaterThan(version),
        "<" => VersionRequirement::LessThan(version),
        "^" => VersionRequirement::Compatible(version),
        "~" => VersionRequirement::Tilde(version),
        _ => VersionRequirement::Exact(version),
    })
}

/// Parse `1`, `1.2` or a full version, filling missing components with zero
fn parse_partial(input: &str, original: &str) -> Result<VersionSpec, ParseError> {
    let core_end = input
        .find(|c: char| c == '-' || c == '+')
        .unwrap_or(input.len());
    let components = input[..core_end].split('.').count();

    let normalized = match components {
        1 | 2 if core_end != input.len() => {
            return Err(invalid(
                original,
                "pre-release and build labels need a full MAJOR.MINOR.PATCH version",
            ));
        }
        1 => format!("{input}.0.0"),
        2 => format!("{input}.0"),
        _ => input.to_string(),
    };

    VersionSpec::parse(&normalized).map_err(|e| invalid(original, &e.to_string()))
}

fn range_from_bounds(a: VersionRequirement, b: VersionRequirement) -> Option<VersionRequirement> {
    use VersionRequirement::*;

    let lower = |r: &VersionRequirement| match r {
        GreaterThan(v) => Some((v.clone(), false)),
        GreaterOrEqual(v) => Some((v.clone(), true)),
        _ => None,
    };
    let upper = |r: &VersionRequirement| match r {
        LessThan(v) => Some((v.clone(), false)),
        LessOrEqual(v) => Some((v.clone(), true)),
        _ => None,
    };

    let ((lower, lower_inclusive), (upper, upper_inclusive)) =
        match (lower(&a), upper(&b), lower(&b), upper(&a)) {
            (Some(l), Some(u), _, _) => (l, u),
            (_, _, Some(l), Some(u)) => (l, u),
            _ => return None,
        };

    Some(Range {
        lower,
        lower_inclusive,
        upper,
        upper_inclusive,
    })
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "={v}"),
            Self::GreaterThan(v) => write!(f, ">{v}"),
            Self::GreaterOrEqual(v) => write!(f, ">={v}"),
            Self::LessThan(v) => write!(f, "<{v}"),
            Self::LessOrEqual(v) => write!(f, "<={v}"),
            Self::Compatible(v) => write!(f, "^{v}"),
            Self::Tilde(v) => write!(f, "~{v}"),
            Self::Range {
                lower,
                lower_inclusive,
                upper,
                upper_inclusive,
            } => {
                let lo = if *lower_inclusive { ">=" } else { ">" };
                let hi = if *upper_inclusive { "<=" } else { "<" };
                write!(f, "{lo}{lower}, {hi}{upper}")
            }
            Self::Wildcard => f.write_str("*"),
        }
    }
}

impl FromStr for VersionRequirement {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionRequirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRequirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionSpec {
        VersionSpec::parse(s).unwrap()
    }

    fn req(s: &str) -> VersionRequirement {
        VersionRequirement::parse(s).unwrap()
    }

    fn sample_versions() -> Vec<VersionSpec> {
        [
            "0.0.1", "0.9.9", "1.0.0-alpha", "1.0.0", "1.1.0", "1.2.0-rc.1", "1.2.0", "1.2.5",
            "1.3.0", "1.9.0", "2.0.0-beta", "2.0.0", "2.1.3", "10.0.0",
        ]
        .iter()
        .map(|s| v(s))
        .collect()
    }

    #[test]
    fn test_parse_operator_forms() {
        assert_eq!(req("*"), VersionRequirement::Wildcard);
        assert_eq!(req("1.2.3"), VersionRequirement::Exact(v("1.2.3")));
        assert_eq!(req("=1.2.3"), VersionRequirement::Exact(v("1.2.3")));
        assert_eq!(req(">1.2.3"), VersionRequirement::GreaterThan(v("1.2.3")));
        assert_eq!(req(">= 1.2.3"), VersionRequirement::GreaterOrEqual(v("1.2.3")));
        assert_eq!(req("<2"), VersionRequirement::LessThan(v("2.0.0")));
        assert_eq!(req("<=1.4"), VersionRequirement::LessOrEqual(v("1.4.0")));
        assert_eq!(req("^1.2"), VersionRequirement::Compatible(v("1.2.0")));
        assert_eq!(req("~1.2"), VersionRequirement::Tilde(v("1.2.0")));
        assert_eq!(
            req(">=1.2.0, <2.0.0"),
            VersionRequirement::Range {
                lower: v("1.2.0"),
                lower_inclusive: true,
                upper: v("2.0.0"),
                upper_inclusive: false,
            }
        );
        // Bound order does not matter
        assert_eq!(req("<=3.0.0, >1.0.0"), req(">1.0.0, <=3.0.0"));
    }

    #[test]
    fn test_parse_rejects_bad_expressions() {
        for input in [
            "",
            "   ",
            ">=1.0.0, >=2.0.0",
            "<1.0.0, <2.0.0",
            ">1, <2, <3",
            "^1.2-beta",
            "~abc",
            "=>1.0.0",
        ] {
            assert!(
                matches!(
                    VersionRequirement::parse(input),
                    Err(ParseError::InvalidRequirement { .. })
                ),
                "expected '{input}' to be rejected"
            );
        }
    }

    #[test]
    fn test_display_reparses_to_same_requirement() {
        let inputs = [
            "*",
            "=1.0.0-rc.1",
            ">1.0.0",
            "<=2.0.0",
            "^0.3.1",
            "~4.5.6",
            ">1.0.0, <=1.5.0",
        ];
        for input in inputs {
            let parsed = req(input);
            assert_eq!(parsed.to_string(), input);
            assert_eq!(req(&parsed.to_string()), parsed);
        }
    }

    #[test]
    fn test_satisfies_agrees_with_compare() {
        use super::VersionRequirement as R;

        let versions = sample_versions();
        for bound in &versions {
            for x in &versions {
                let ord = compare(x, bound);
                assert_eq!(R::Exact(bound.clone()).satisfies(x), ord == Ordering::Equal);
                assert_eq!(R::GreaterThan(bound.clone()).satisfies(x), ord == Ordering::Greater);
                assert_eq!(R::GreaterOrEqual(bound.clone()).satisfies(x), ord != Ordering::Less);
                assert_eq!(R::LessThan(bound.clone()).satisfies(x), ord == Ordering::Less);
                assert_eq!(R::LessOrEqual(bound.clone()).satisfies(x), ord != Ordering::Greater);
                assert!(R::Wildcard.satisfies(x));
            }
        }
    }

    #[test]
    fn test_compatible_and_tilde() {
        let caret = req("^1.2.0");
        assert!(caret.satisfies(&v("1.2.0")));
        assert!(caret.satisfies(&v("1.9.9")));
        assert!(!caret.satisfies(&v("1.1.9")));
        assert!(!caret.satisfies(&v("2.0.0")));

        let tilde = req("~1.2.3");
        assert!(tilde.satisfies(&v("1.2.3")));
        assert!(tilde.satisfies(&v("1.2.99")));
        assert!(!tilde.satisfies(&v("1.3.0")));
        assert!(!tilde.satisfies(&v("1.2.2")));
    }

    #[test]
    fn test_range_picks_expected_members() {
        let range = req(">=1.2.0, <2.0.0");
        let members: Vec<String> = ["1.1.0", "1.3.0", "1.9.0", "2.0.0"]
            .iter()
            .map(|s| v(s))
            .filter(|x| range.satisfies(x))
            .map(|x| x.to_string())
            .collect();
        assert_eq!(members, vec!["1.3.0", "1.9.0"]);

        let inclusive = req(">1.0.0, <=2.0.0");
        assert!(!inclusive.satisfies(&v("1.0.0")));
        assert!(inclusive.satisfies(&v("2.0.0")));
    }

    #[test]
    fn test_exact_prerelease_opt_in() {
        assert_eq!(req("=2.0.0-beta").exact_prerelease(), Some(&v("2.0.0-beta")));
        assert_eq!(req("=2.0.0").exact_prerelease(), None);
        assert_eq!(req(">=2.0.0-beta").exact_prerelease(), None);
    }
}
