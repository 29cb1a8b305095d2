//! Fuzzy element lookup: a textual query against the clickable vocabulary
//! (`a`, `button`, `[role=button]`), scored across several text sources.

use crate::dom::{DomTree, build_path, is_visible};
use crate::snapshot::{LABEL_TEXT_MAX, is_button_like, tidy_text};
use crate::types::ElementSummary;

/// Bounds on how many matches a single `find` may return.
pub const FIND_MIN: usize = 1;
pub const FIND_MAX: usize = 50;

const EXACT_BONUS: i32 = 20;
const SUBSTRING_BONUS: i32 = 10;
const PREFIX_BONUS: i32 = 3;
const DOMAIN_BONUS: i32 = 2;

#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub matches: Vec<ElementSummary>,
    /// Count of all scored candidates, before truncation to `max`.
    pub total: usize,
}

/// Pull the needle out of a query: an optional `:contains('text')` fragment
/// wins; otherwise the raw query minus a leading type prefix. Lowercased
/// either way.
pub fn parse_query(query: &str) -> String {
    let q = query.trim().to_lowercase();
    if let Some(start) = q.find(":contains('") {
        let rest = &q[start + ":contains('".len()..];
        if let Some(end) = rest.find("')") {
            return rest[..end].to_string();
        }
    }
    for prefix in ["button:", "link:", "input:", "a:"] {
        if let Some(stripped) = q.strip_prefix(prefix) {
            return stripped.trim().to_string();
        }
    }
    q
}

/// Rank visible clickable candidates against `query` and return the top
/// `max` (clamped to [1, 50]) as summaries. Scoring sums, per text source
/// (visible text, aria-label, title): +20 exact, +10 substring, +3 prefix.
/// Bonuses are cumulative, so an exact match also earns the substring and
/// prefix bonuses. Small fixed biases favor appointment/lab-report targets.
/// Ties break toward shorter visible text.
pub fn find(tree: &DomTree, query: &str, max: usize) -> FindResult {
    let needle = parse_query(query);
    if needle.is_empty() {
        return FindResult::default();
    }
    let max = max.clamp(FIND_MIN, FIND_MAX);

    let mut scored: Vec<(i32, usize, ElementSummary)> = Vec::new();
    for (id, node) in tree.iter() {
        if !is_button_like(node) || !is_visible(node) {
            continue;
        }
        let visible_text = tidy_text(&node.text, LABEL_TEXT_MAX);
        let mut sources = vec![visible_text.clone()];
        sources.extend(node.attr("aria-label").map(str::to_owned));
        sources.extend(node.attr("title").map(str::to_owned));

        let mut score = 0;
        for source in &sources {
            let lowered = source.to_lowercase();
            if lowered == needle {
                score += EXACT_BONUS;
            }
            if lowered.contains(&needle) {
                score += SUBSTRING_BONUS;
            }
            if lowered.starts_with(&needle) {
                score += PREFIX_BONUS;
            }
        }
        let combined = sources.join(" ").to_lowercase();
        if combined.contains("appointment") {
            score += DOMAIN_BONUS;
        }
        if ["lab", "report", "result"].iter().any(|k| combined.contains(k)) {
            score += DOMAIN_BONUS;
        }
        if score == 0 {
            continue;
        }

        let summary = ElementSummary {
            text: visible_text.clone(),
            selector: build_path(tree, id).unwrap_or_default(),
            href: node.href().map(str::to_owned),
            aria_label: node.attr("aria-label").map(str::to_owned),
            ..Default::default()
        };
        scored.push((score, visible_text.chars().count(), summary));
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    let total = scored.len();
    let matches = scored.into_iter().take(max).map(|(_, _, s)| s).collect();
    FindResult { matches, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DomTree;
    use crate::testutil::el;
    use crate::types::FIND_DEFAULT_LIMIT;

    fn tree(root: crate::testutil::NodeBuilder) -> DomTree {
        DomTree::from_root(root.build())
    }

    #[test]
    fn query_parsing_handles_contains_and_prefixes() {
        assert_eq!(parse_query("button:contains('Book Now')"), "book now");
        assert_eq!(parse_query("link: Lab Results"), "lab results");
        assert_eq!(parse_query("  Pay Bill  "), "pay bill");
        assert_eq!(parse_query(""), "");
    }

    #[test]
    fn exact_match_outranks_substring_match() {
        let t = tree(
            el("body")
                .child(el("button").id("long").text("Pay Bill and view history"))
                .child(el("button").id("exact").text("Pay Bill")),
        );
        let result = find(&t, "pay bill", 10);
        assert_eq!(result.matches[0].selector, "#exact");
        assert_eq!(result.matches[1].selector, "#long");
        assert!(result.matches.len() == 2);
    }

    #[test]
    fn scores_accumulate_across_text_sources() {
        let t = tree(
            el("body")
                .child(el("button").id("plain").text("Start"))
                .child(
                    el("button")
                        .id("labeled")
                        .text("Start")
                        .attr("aria-label", "Start")
                        .attr("title", "Start"),
                ),
        );
        let result = find(&t, "start", 10);
        // three exact sources beat one
        assert_eq!(result.matches[0].selector, "#labeled");
    }

    #[test]
    fn ties_break_toward_shorter_visible_text() {
        let t = tree(
            el("body")
                .child(el("a").id("longer").text("Book Appointment online today").attr("href", "/a"))
                .child(el("a").id("short").text("Book Appointment now").attr("href", "/b")),
        );
        let result = find(&t, "book appointment", 10);
        assert_eq!(result.matches[0].selector, "#short");
    }

    #[test]
    fn invisible_and_zero_score_candidates_drop() {
        let t = tree(
            el("body")
                .child(el("button").id("hidden").text("Book").style("none", "visible", 1.0))
                .child(el("button").id("other").text("Cancel visit")),
        );
        let result = find(&t, "book", 10);
        assert!(result.matches.is_empty());
        assert_eq!(result.total, 0);
    }

    #[test]
    fn total_reports_pre_truncation_count() {
        let mut body = el("body");
        for i in 0..9 {
            body = body.child(el("button").id(format!("b{i}")).text("Book slot"));
        }
        let result = find(&tree(body), "book", 3);
        assert_eq!(result.matches.len(), 3);
        assert_eq!(result.total, 9);
    }

    #[test]
    fn max_is_clamped_into_bounds() {
        let mut body = el("body");
        for i in 0..60 {
            body = body.child(el("button").id(format!("b{i}")).text("Book"));
        }
        let t = tree(body);
        assert_eq!(find(&t, "book", 0).matches.len(), 1);
        assert_eq!(find(&t, "book", 500).matches.len(), FIND_MAX);
        let _ = FIND_DEFAULT_LIMIT; // default applied at the dispatch layer
    }

    #[test]
    fn role_button_divs_are_candidates() {
        let t = tree(
            el("body").child(
                el("div")
                    .id("fake")
                    .attr("role", "button")
                    .text("Download report"),
            ),
        );
        let result = find(&t, "download", 5);
        assert_eq!(result.matches[0].selector, "#fake");
    }
}
