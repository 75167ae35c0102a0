use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// `major.minor.patch`; missing parts read as zero and suffixes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?").ok())
        .as_ref()
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    pub fn parse(input: &str) -> Option<Version> {
        let captures = version_pattern()?.captures(input.trim())?;
        let part = |i: usize| -> Option<u64> {
            match captures.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };
        Some(Version {
            major: part(1)?,
            minor: part(2)?,
            patch: part(3)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
