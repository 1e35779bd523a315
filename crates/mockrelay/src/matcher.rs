//! Request/rule matching engine.
//!
//! Resolution filters to enabled rules, stable-sorts by priority descending,
//! and returns the first rule whose method, URL pattern, and header/query
//! conditions all pass. Ties on priority keep store insertion order, so
//! resolution outcomes are reproducible across re-sorts.

use crate::mock::types::{
    ConditionOperator, ConditionValue, MatchRule, RequestDescriptor, Rule, UrlMatchType,
};
use regex::Regex;

/// Select the best rule for a request, or `None` when nothing matches.
///
/// A miss is not an error; the caller proceeds with the real request.
pub fn resolve<'a>(rules: &'a [Rule], req: &RequestDescriptor) -> Option<&'a Rule> {
    let mut candidates: Vec<&Rule> = rules.iter().filter(|r| r.enabled).collect();
    // Stable sort: equal priorities preserve original (insertion) order.
    candidates.sort_by_key(|r| std::cmp::Reverse(r.priority));
    candidates.into_iter().find(|r| rule_matches(r, req))
}

/// Whether a single rule fully matches the request.
pub fn rule_matches(rule: &Rule, req: &RequestDescriptor) -> bool {
    if rule.method != "*" && !rule.method.eq_ignore_ascii_case(&req.method) {
        return false;
    }
    match &rule.match_rule {
        Some(match_rule) => advanced_matches(rule, match_rule, req),
        // Legacy rules match on literal URL equality only.
        None => rule.url == req.url,
    }
}

fn advanced_matches(rule: &Rule, match_rule: &MatchRule, req: &RequestDescriptor) -> bool {
    let url_ok = match &match_rule.url {
        Some(url) => url_matches(&url.pattern, url.match_type, &req.url),
        // No URL condition in the matcher: fall back to the rule's own URL.
        None => rule.url == req.url,
    };
    if !url_ok {
        return false;
    }

    let headers_ok = match_rule.headers.iter().all(|cond| {
        let actual = header_value(req, &cond.key);
        condition_matches(&cond.value, cond.operator, actual)
    });
    if !headers_ok {
        return false;
    }

    match_rule.query.iter().all(|cond| {
        let actual = req.query.get(&cond.key).map(String::as_str);
        if cond.operator == ConditionOperator::Exists {
            return actual.is_some();
        }
        condition_matches(&cond.value, cond.operator, actual)
    })
}

/// Header lookup is case-insensitive on the key.
fn header_value<'a>(req: &'a RequestDescriptor, key: &str) -> Option<&'a str> {
    req.headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Evaluate a URL pattern of the given type against the request URL.
///
/// Malformed regex degrades to no-match rather than failing the resolution.
pub fn url_matches(pattern: &str, match_type: UrlMatchType, url: &str) -> bool {
    match match_type {
        UrlMatchType::Exact => pattern == url,
        UrlMatchType::Prefix => url.starts_with(pattern),
        UrlMatchType::Wildcard => match Regex::new(&wildcard_to_regex(pattern)) {
            Ok(re) => re.is_match(url),
            Err(_) => false,
        },
        UrlMatchType::Regex => match Regex::new(pattern) {
            Ok(re) => re.is_match(url),
            Err(_) => false,
        },
    }
}

/// Translate a wildcard pattern into an anchored regex: `**` spans path
/// separators and may be empty, a single `*` needs at least one non-`/`
/// character.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                out.push_str(".*");
            } else {
                out.push_str("[^/]+");
            }
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    out.push('$');
    out
}

fn condition_matches(
    expected: &ConditionValue,
    operator: ConditionOperator,
    actual: Option<&str>,
) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    let candidates: Vec<&str> = match expected {
        ConditionValue::One(v) => vec![v.as_str()],
        ConditionValue::Many(vs) => vs.iter().map(String::as_str).collect(),
    };
    match operator {
        ConditionOperator::Equals => candidates.iter().any(|v| *v == actual),
        ConditionOperator::Contains => candidates.iter().any(|v| actual.contains(v)),
        ConditionOperator::StartsWith => candidates.iter().any(|v| actual.starts_with(v)),
        ConditionOperator::EndsWith => candidates.iter().any(|v| actual.ends_with(v)),
        ConditionOperator::Regex => candidates
            .iter()
            .any(|v| Regex::new(v).map(|re| re.is_match(actual)).unwrap_or(false)),
        // Presence was already established above.
        ConditionOperator::Exists => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn rule(value: serde_json::Value) -> Rule {
        let mut rule: Rule = serde_json::from_value(value).unwrap();
        rule.ensure_id();
        rule
    }

    fn get(url: &str) -> RequestDescriptor {
        RequestDescriptor {
            url: url.to_string(),
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_legacy_literal_match() {
        let rules = vec![rule(json!({
            "url": "/api/users", "method": "GET", "type": "static", "body": null
        }))];
        assert!(resolve(&rules, &get("/api/users")).is_some());
        assert!(resolve(&rules, &get("/api/users/1")).is_none());
    }

    #[test]
    fn test_method_is_case_insensitive() {
        let rules = vec![rule(json!({
            "url": "/x", "method": "post", "type": "static", "body": null
        }))];
        let mut req = get("/x");
        req.method = "POST".to_string();
        assert!(resolve(&rules, &req).is_some());
        req.method = "GET".to_string();
        assert!(resolve(&rules, &req).is_none());
    }

    #[test]
    fn test_wildcard_method_matches_anything() {
        let rules = vec![rule(json!({
            "url": "/x", "method": "*", "type": "static", "body": null
        }))];
        let mut req = get("/x");
        req.method = "PATCH".to_string();
        assert!(resolve(&rules, &req).is_some());
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let rules = vec![rule(json!({
            "url": "/x", "method": "GET", "enabled": false, "type": "static", "body": null
        }))];
        assert!(resolve(&rules, &get("/x")).is_none());
    }

    #[test]
    fn test_priority_wins_over_insertion_order() {
        let rules = vec![
            rule(json!({
                "id": "low", "url": "/x", "method": "GET", "priority": 1,
                "type": "static", "body": null
            })),
            rule(json!({
                "id": "high", "url": "/x", "method": "GET", "priority": 5,
                "type": "static", "body": null
            })),
        ];
        assert_eq!(resolve(&rules, &get("/x")).unwrap().id, "high");
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let rules = vec![
            rule(json!({
                "id": "first", "url": "/x", "method": "GET", "type": "static", "body": null
            })),
            rule(json!({
                "id": "second", "url": "/x", "method": "GET", "type": "static", "body": null
            })),
        ];
        assert_eq!(resolve(&rules, &get("/x")).unwrap().id, "first");
    }

    #[test]
    fn test_single_star_does_not_cross_segments() {
        let rules = vec![rule(json!({
            "id": "w", "url": "/api/*", "method": "GET", "type": "static", "body": null,
            "matchRule": {"url": {"pattern": "/api/*", "type": "wildcard"}}
        }))];
        assert!(resolve(&rules, &get("/api/x")).is_some());
        assert!(resolve(&rules, &get("/api/x/y")).is_none());
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let rules = vec![rule(json!({
            "id": "w", "url": "/api/**", "method": "GET", "type": "static", "body": null,
            "matchRule": {"url": {"pattern": "/api/**", "type": "wildcard"}}
        }))];
        assert!(resolve(&rules, &get("/api/x")).is_some());
        assert!(resolve(&rules, &get("/api/x/y")).is_some());
    }

    #[test]
    fn test_wildcard_is_anchored() {
        assert!(!url_matches("/api/*", UrlMatchType::Wildcard, "/v2/api/x"));
        assert!(!url_matches("/api/*", UrlMatchType::Wildcard, "/api/"));
        assert!(url_matches("/api/", UrlMatchType::Wildcard, "/api/"));
    }

    #[test]
    fn test_single_star_requires_nonempty_segment() {
        // `*` must consume at least one character; `**` may match nothing.
        assert!(!url_matches("/api/*", UrlMatchType::Wildcard, "/api/"));
        assert!(url_matches("/api/*", UrlMatchType::Wildcard, "/api/x"));
        assert!(url_matches("/api/**", UrlMatchType::Wildcard, "/api/"));
        assert!(!url_matches("/a/*/b", UrlMatchType::Wildcard, "/a//b"));
        assert!(url_matches("/a/*/b", UrlMatchType::Wildcard, "/a/x/b"));
    }

    #[test]
    fn test_prefix_match() {
        let rules = vec![rule(json!({
            "id": "p", "url": "/api", "method": "GET", "type": "static", "body": null,
            "matchRule": {"url": {"pattern": "/api", "type": "prefix"}}
        }))];
        assert!(resolve(&rules, &get("/api/deep/path")).is_some());
        assert!(resolve(&rules, &get("/v2/api")).is_none());
    }

    #[test]
    fn test_malformed_regex_never_matches() {
        assert!(!url_matches("([unclosed", UrlMatchType::Regex, "/anything"));
        let rules = vec![rule(json!({
            "id": "r", "url": "/x", "method": "GET", "type": "static", "body": null,
            "matchRule": {"url": {"pattern": "([unclosed", "type": "regex"}}
        }))];
        assert!(resolve(&rules, &get("/x")).is_none());
    }

    #[test]
    fn test_priority_scenario_specific_beats_pattern() {
        let rules = vec![
            rule(json!({
                "id": "pattern", "url": "/users/:id", "method": "GET", "priority": 0,
                "type": "static", "body": null,
                "matchRule": {"url": {"pattern": "^/users/[^/]+$", "type": "regex"}}
            })),
            rule(json!({
                "id": "literal", "url": "/users/1", "method": "GET", "priority": 10,
                "type": "static", "body": null
            })),
        ];
        assert_eq!(resolve(&rules, &get("/users/1")).unwrap().id, "literal");
        // Other ids still fall through to the pattern rule.
        assert_eq!(resolve(&rules, &get("/users/42")).unwrap().id, "pattern");
    }

    #[test]
    fn test_header_conditions_are_anded() {
        let rules = vec![rule(json!({
            "id": "h", "url": "/x", "method": "GET", "type": "static", "body": null,
            "matchRule": {
                "url": {"pattern": "/x", "type": "exact"},
                "headers": [
                    {"key": "Content-Type", "value": "json", "operator": "contains"},
                    {"key": "X-Token", "value": "secret", "operator": "equals"}
                ]
            }
        }))];

        let mut req = get("/x");
        req.headers
            .insert("content-type".to_string(), "application/json".to_string());
        assert!(resolve(&rules, &req).is_none());

        req.headers
            .insert("x-token".to_string(), "secret".to_string());
        assert!(resolve(&rules, &req).is_some());
    }

    #[test]
    fn test_equals_accepts_list_membership() {
        let mut query = HashMap::new();
        query.insert("env".to_string(), "staging".to_string());
        let req = RequestDescriptor {
            url: "/x".to_string(),
            method: "GET".to_string(),
            query,
            ..Default::default()
        };
        let rules = vec![rule(json!({
            "id": "q", "url": "/x", "method": "GET", "type": "static", "body": null,
            "matchRule": {
                "url": {"pattern": "/x", "type": "exact"},
                "query": [{"key": "env", "value": ["dev", "staging"], "operator": "equals"}]
            }
        }))];
        assert!(resolve(&rules, &req).is_some());
    }

    #[test]
    fn test_query_exists_checks_presence_only() {
        let rules = vec![rule(json!({
            "id": "q", "url": "/x", "method": "GET", "type": "static", "body": null,
            "matchRule": {
                "url": {"pattern": "/x", "type": "exact"},
                "query": [{"key": "debug", "value": "", "operator": "exists"}]
            }
        }))];
        assert!(resolve(&rules, &get("/x")).is_none());

        let mut query = HashMap::new();
        query.insert("debug".to_string(), "whatever".to_string());
        let req = RequestDescriptor {
            url: "/x".to_string(),
            method: "GET".to_string(),
            query,
            ..Default::default()
        };
        assert!(resolve(&rules, &req).is_some());
    }

    #[test]
    fn test_starts_ends_with_operators() {
        assert!(condition_matches(
            &ConditionValue::One("/api".to_string()),
            ConditionOperator::StartsWith,
            Some("/api/v1")
        ));
        assert!(condition_matches(
            &ConditionValue::One(".json".to_string()),
            ConditionOperator::EndsWith,
            Some("/data.json")
        ));
        assert!(!condition_matches(
            &ConditionValue::One("x".to_string()),
            ConditionOperator::Contains,
            None
        ));
    }

    #[test]
    fn test_regex_operator_malformed_is_no_match() {
        assert!(!condition_matches(
            &ConditionValue::One("([".to_string()),
            ConditionOperator::Regex,
            Some("anything")
        ));
        assert!(condition_matches(
            &ConditionValue::One(r"^v\d+$".to_string()),
            ConditionOperator::Regex,
            Some("v12")
        ));
    }

    #[test]
    fn test_resolved_rule_is_always_enabled_and_matching() {
        let rules = vec![
            rule(json!({
                "id": "off", "url": "/x", "method": "GET", "enabled": false, "priority": 99,
                "type": "static", "body": null
            })),
            rule(json!({
                "id": "wrong-method", "url": "/x", "method": "POST", "priority": 50,
                "type": "static", "body": null
            })),
            rule(json!({
                "id": "ok", "url": "/x", "method": "GET", "type": "static", "body": null
            })),
        ];
        let matched = resolve(&rules, &get("/x")).unwrap();
        assert!(matched.enabled);
        assert_eq!(matched.id, "ok");
    }
}
