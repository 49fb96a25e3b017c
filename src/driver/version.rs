use std::fmt;

/// Semantic version reported by the driver in its `numtrackers` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemVer {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a leading `major[.minor[.patch]]`, missing parts are 0.
    /// Parsing stops at the first character that does not fit, so
    /// `0.6.0-rc1` reads as 0.6.0. `None` when there is no leading digit.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = [0u32; 3];
        let mut idx = 0;
        let mut any_digit = false;
        let mut chars = s.trim().chars().peekable();
        while let Some(c) = chars.next() {
            if let Some(digit) = c.to_digit(10) {
                parts[idx] = parts[idx].checked_mul(10)?.checked_add(digit)?;
                any_digit = true;
            } else if c == '.' && idx < 2 && chars.peek().is_some() {
                idx += 1;
            } else {
                break;
            }
        }
        any_digit.then(|| Self::new(parts[0], parts[1], parts[2]))
    }

    pub fn is_zero(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch == 0
    }

    /// 0.0.0 is never compatible. Before 1.0 the minor version must match,
    /// after that the major version.
    pub fn compatible(&self, other: &SemVer) -> bool {
        if self.is_zero() || other.is_zero() {
            return false;
        }
        if self.major == 0 && other.major == 0 {
            return self.minor == other.minor;
        }
        self.major == other.major
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
