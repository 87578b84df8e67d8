//! Property-based tests for the DOM and trace oracles.
//!
//! Fragments are generated from tags the HTML parser never re-nests, so the
//! parsed tree always mirrors the generated one.

use polyprobe::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

const TAGS: &[&str] = &["div", "span", "section", "em", "code"];
const ATTRS: &[&str] = &["id", "title", "class", "data-role"];

#[derive(Debug, Clone)]
enum Fragment {
    Text(String),
    Element {
        tag: &'static str,
        attrs: BTreeMap<&'static str, String>,
        children: Vec<Fragment>,
    },
}

/// Adjacent text would merge differently depending on the separator.
fn merge_text(nodes: Vec<Fragment>) -> Vec<Fragment> {
    let mut out: Vec<Fragment> = Vec::new();
    for node in nodes {
        match (out.last_mut(), node) {
            (Some(Fragment::Text(prev)), Fragment::Text(next)) => prev.push_str(&next),
            (_, node) => out.push(node),
        }
    }
    out
}

fn fragment() -> impl Strategy<Value = Fragment> {
    let leaf = "[a-z0-9 .,]{0,12}".prop_map(Fragment::Text);
    leaf.prop_recursive(3, 24, 4, |inner| {
        (
            prop::sample::select(TAGS.to_vec()),
            prop::collection::btree_map(prop::sample::select(ATTRS.to_vec()), "[a-z0-9 ]{0,8}", 0..3),
            prop::collection::vec(inner, 0..4),
        )
            .prop_map(|(tag, attrs, children)| Fragment::Element {
                tag,
                attrs,
                children: merge_text(children),
            })
    })
}

fn fragments() -> impl Strategy<Value = Vec<Fragment>> {
    prop::collection::vec(fragment(), 1..4).prop_map(merge_text)
}

fn render(nodes: &[Fragment], sep: &str, reverse_attrs: bool) -> String {
    nodes
        .iter()
        .map(|node| render_node(node, sep, reverse_attrs))
        .collect::<Vec<_>>()
        .join(sep)
}

fn render_node(node: &Fragment, sep: &str, reverse_attrs: bool) -> String {
    match node {
        Fragment::Text(text) => text.clone(),
        Fragment::Element { tag, attrs, children } => {
            let mut pairs: Vec<_> = attrs.iter().collect();
            if reverse_attrs {
                pairs.reverse();
            }
            let attrs: String = pairs
                .into_iter()
                .map(|(name, value)| format!(" {name}=\"{value}\""))
                .collect();
            format!("<{tag}{attrs}>{}</{tag}>", render(children, sep, reverse_attrs))
        }
    }
}

// === DOM Normalization Properties ===

proptest! {
    /// Normalizing canonical output changes nothing.
    #[test]
    fn prop_normalization_is_idempotent(nodes in fragments()) {
        let normalizer = HtmlNormalizer::new();
        let first = normalizer.normalize(&render(&nodes, "", false));
        let second = normalizer.normalize(first.as_str());
        prop_assert_eq!(first.as_str(), second.as_str());
    }

    /// Indentation between tags is not significant.
    #[test]
    fn prop_inter_tag_whitespace_ignored(nodes in fragments()) {
        let normalizer = HtmlNormalizer::new();
        let compact = normalizer.normalize(&render(&nodes, "", false));
        let spaced = normalizer.normalize(&render(&nodes, "\n    ", false));
        prop_assert_eq!(compact, spaced);
    }

    /// Source attribute order is not significant.
    #[test]
    fn prop_attribute_order_ignored(nodes in fragments()) {
        let comparator = DomComparator::new(HtmlNormalizer::new());
        let result = comparator.compare(&render(&nodes, "", true), &render(&nodes, "", false));
        prop_assert!(result.is_equal());
    }

    /// A masked attribute compares equal whatever its value.
    #[test]
    fn prop_masked_attribute_matches_any_value(
        left in "[a-z0-9]{1,10}",
        right in "[a-z0-9]{1,10}"
    ) {
        let mut table = BTreeMap::new();
        table.insert("id".to_string(), IgnorePolicyKind::Mask("[a-z0-9]+".to_string()));
        let policy = IgnorePolicy::compile(&table).unwrap();
        let comparator = DomComparator::new(HtmlNormalizer::new().with_policy(policy));
        let actual = format!("<ruffle-embed id=\"{left}\"></ruffle-embed>");
        let golden = format!("<ruffle-embed id=\"{right}\"></ruffle-embed>");
        prop_assert!(comparator.compare(&actual, &golden).is_equal());
    }
}

// === Trace Comparison Properties ===

proptest! {
    /// A transcript always equals itself.
    #[test]
    fn prop_trace_equals_itself(lines in prop::collection::vec("[a-z %0-9/.()]{0,16}", 0..12)) {
        let transcript = Transcript::from_text(&lines.join("\n"));
        prop_assert!(TraceComparator::new().compare(&transcript, &transcript).is_equal());
    }

    /// The reported index is the first line that differs.
    #[test]
    fn prop_first_difference_is_reported(
        lines in prop::collection::vec("[a-z0-9 ]{0,10}", 1..12),
        pick in any::<prop::sample::Index>()
    ) {
        let index = pick.index(lines.len());
        let mut changed = lines.clone();
        changed[index].push('!');

        let expected = Transcript::from_text(&lines.join("\n"));
        let actual = Transcript::from_text(&changed.join("\n"));
        let result = TraceComparator::new().compare(&actual, &expected);
        let mismatch = result.diff().unwrap();
        prop_assert_eq!(mismatch.index, index);
        prop_assert_eq!(mismatch.actual.as_deref(), Some(changed[index].as_str()));
    }

    /// A trace cut short reports a missing line, not a different one.
    #[test]
    fn prop_truncated_trace_reports_end(
        lines in prop::collection::vec("[a-z0-9]{1,10}", 2..12)
    ) {
        let expected = Transcript::from_text(&lines.join("\n"));
        let actual = Transcript::from_text(&lines[..lines.len() - 1].join("\n"));
        let result = TraceComparator::new().compare(&actual, &expected);
        let mismatch = result.diff().unwrap();
        prop_assert_eq!(mismatch.index, lines.len() - 1);
        prop_assert!(mismatch.actual.is_none());
    }
}
