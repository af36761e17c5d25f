//! Hash-range matching, ported from `storage/router/range.go`: a rule's
//! range is either an exact hex prefix or an inclusive hex prefix range,
//! compared case-insensitively (internally normalized to uppercase).
use super::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Range {
    Exact(String),
    Between(String, String),
}

impl Range {
    /// Parse `"<start>"` or `"<start>:<end>"`, both hex. An exact range has
    /// no colon; a between-range requires `start` and `end` of equal length.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let mut parts = s.splitn(2, ':');
        let start = parts.next().unwrap_or_default();
        if start.is_empty() || !start.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Config(format!("invalid range {s:?}")));
        }
        let start = start.to_ascii_uppercase();
        match parts.next() {
            None => Ok(Range::Exact(start)),
            Some(end) => {
                if end.is_empty() || !end.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(Error::Config(format!("invalid range {s:?}")));
                }
                let end = end.to_ascii_uppercase();
                if end.len() != start.len() {
                    return Err(Error::Config(format!(
                        "invalid range {s:?}: start/end length mismatch"
                    )));
                }
                Ok(Range::Between(start, end))
            }
        }
    }

    /// Whether hex key `h` falls within this range. Only the prefix of `h`
    /// matching the range's own length is compared.
    pub fn contains(&self, h: &str) -> bool {
        match self {
            Range::Exact(prefix) => {
                if h.len() < prefix.len() {
                    return false;
                }
                h[..prefix.len()].eq_ignore_ascii_case(prefix)
            }
            Range::Between(start, end) => {
                if h.len() < start.len() {
                    return false;
                }
                let head = h[..start.len()].to_ascii_uppercase();
                head.as_str() >= start.as_str() && head.as_str() <= end.as_str()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exact_match_is_case_insensitive() {
        let r = Range::parse("ab").unwrap();
        assert!(r.contains("ABcdef"));
        assert!(r.contains("abcdef"));
        assert!(!r.contains("ac0000"));
    }

    #[test]
    fn between_match_respects_bounds() {
        let r = Range::parse("00:FF").unwrap();
        assert!(r.contains("00abcd"));
        assert!(r.contains("ffabcd"));
        assert!(r.contains("8f0000"));
    }

    #[test]
    fn mismatched_length_is_rejected() {
        assert!(Range::parse("00:FFF").is_err());
    }
}
