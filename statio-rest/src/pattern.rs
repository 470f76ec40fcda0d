//! Route pattern matching: `/a/{key}/b?x={k2}&y=literal`.

use std::collections::HashMap;

/// Extracts `name` from a `{name}` placeholder segment.
fn replaceable(segment: &str) -> Option<&str> {
    if segment.len() >= 2 && segment.starts_with('{') && segment.ends_with('}') {
        Some(&segment[1..segment.len() - 1])
    } else {
        None
    }
}

fn paths_match(pattern: &str, path: &str, matches: &mut HashMap<String, String>) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();

    if pattern_segments.len() != path_segments.len() {
        return false;
    }

    for (wanted, actual) in pattern_segments.iter().zip(&path_segments) {
        if wanted == actual {
            continue;
        }
        match replaceable(wanted) {
            Some(key) => {
                matches.insert(key.to_string(), actual.to_string());
            }
            None => return false,
        }
    }
    true
}

fn queries_match(pattern: &str, query: &str, matches: &mut HashMap<String, String>) -> bool {
    let pattern_parameters: Vec<&str> = pattern.split('&').collect();
    let query_parameters: Vec<&str> = query.split('&').collect();

    if pattern_parameters.len() != query_parameters.len() {
        return false;
    }

    for (wanted, actual) in pattern_parameters.iter().zip(&query_parameters) {
        let wanted_parts: Vec<&str> = wanted.split('=').collect();
        let actual_parts: Vec<&str> = actual.split('=').collect();

        if wanted_parts.len() != actual_parts.len() {
            return false;
        }

        match (wanted_parts.as_slice(), actual_parts.as_slice()) {
            ([key], [actual_key]) if key == actual_key => {}
            ([key, value], [actual_key, actual_value]) if key == actual_key => {
                if let Some(name) = replaceable(value) {
                    matches.insert(name.to_string(), actual_value.to_string());
                } else if value != actual_value {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

/// Whether `path` (with optional query string) matches `pattern`, filling
/// `matches` with captured placeholder values.
pub(crate) fn pattern_matches(
    pattern: &str,
    path: &str,
    matches: &mut HashMap<String, String>,
) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('?').collect();
    let path_parts: Vec<&str> = path.split('?').collect();

    match (pattern_parts.as_slice(), path_parts.as_slice()) {
        ([pattern_path], [actual_path]) => paths_match(pattern_path, actual_path, matches),
        ([pattern_path, pattern_query], [actual_path, actual_query]) => {
            paths_match(pattern_path, actual_path, matches)
                && queries_match(pattern_query, actual_query, matches)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
        let mut matches = HashMap::new();
        pattern_matches(pattern, path, &mut matches).then_some(matches)
    }

    #[test]
    fn placeholders_capture_single_segments() {
        let matches = matched("/entities/{entityId}", "/entities/100").unwrap();
        assert_eq!(matches["entityId"], "100");

        assert!(matched("/entities/{entityId}", "/entities/100/x").is_none());
        assert!(matched("/entities/{entityId}", "/items/100").is_none());
    }

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(matched("/entities", "/entities").is_some());
        assert!(matched("/entities", "/entities/").is_none());
    }

    #[test]
    fn query_placeholders_and_literals_both_participate() {
        let matches = matched("/users?id={userId}&role=admin", "/users?id=bob&role=admin").unwrap();
        assert_eq!(matches["userId"], "bob");

        assert!(matched("/users?id={userId}&role=admin", "/users?id=bob&role=guest").is_none());
        assert!(matched("/users?id={userId}", "/users").is_none());
    }

    #[test]
    fn query_parameter_counts_must_agree() {
        assert!(matched("/u?a={x}", "/u?a=1&b=2").is_none());
        assert!(matched("/u?a={x}&b=2", "/u?a=1").is_none());
    }
}
