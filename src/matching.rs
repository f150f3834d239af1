use crate::constants::ROR_PREFIX;

/// Matches a single pattern against a candidate string. Patterns without `*`
/// require exact, case-sensitive equality; `*` matches any substring,
/// including the empty one.
pub fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == candidate;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let last = segments.len() - 1;
    let mut rest = candidate;
    for (i, segment) in segments.iter().enumerate() {
        if i == 0 {
            // First segment is anchored at the start
            match rest.strip_prefix(segment) {
                Some(remainder) => rest = remainder,
                None => return false,
            }
        } else if i == last {
            // Last segment is anchored at the end
            return segment.is_empty() || rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

/// True when the candidate matches at least one pattern. A missing candidate
/// never matches.
pub fn match_patterns(candidate: Option<&str>, patterns: &[String]) -> bool {
    match candidate {
        Some(name) => patterns.iter().any(|p| pattern_matches(p, name)),
        None => false,
    }
}

/// Bare suffix of a ROR identifier. Identifiers already stored without the
/// URL prefix pass through unchanged, so both the query builder and the
/// agent matcher see the same value for either input form.
pub fn ror_suffix(ror: &str) -> &str {
    ror.strip_prefix(ROR_PREFIX).unwrap_or(ror)
}

/// Whitespace-delimited token count, used for title statistics.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
