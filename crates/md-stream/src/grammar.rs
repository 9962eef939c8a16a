//! The grammar collaborator: raw markup in, typed elements out.

use std::collections::HashSet;

use crate::element::{Element, Inline, MediaRef, TocEntry};
use crate::error::GrammarError;

/// Everything a grammar extracts from a piece of text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrammarOutput {
    pub elements: Vec<Element>,
    pub attachments: Vec<MediaRef>,
    pub headings: Vec<TocEntry>,
}

impl GrammarOutput {
    /// Build the output for a list of elements, collecting the images and
    /// top-level headings it contains.
    pub fn from_elements(elements: Vec<Element>) -> Self {
        let mut attachments = Vec::new();
        collect_media(&elements, &mut attachments);
        let headings = collect_headings(&elements);
        Self {
            elements,
            attachments,
            headings,
        }
    }
}

/// Turns raw markup into elements.
///
/// Implementations must be pure: the same text (under the same
/// configuration) always yields the same output. Incremental re-parsing
/// relies on this.
pub trait Grammar: Send + Sync {
    fn parse(&self, text: &str) -> Result<GrammarOutput, GrammarError>;
}

/// Top-level headings, in document order.
///
/// Entry ids are unique within the list: a repeated slug gets a `-1`,
/// `-2`, ... suffix, see [`unique_anchors`].
pub fn collect_headings(elements: &[Element]) -> Vec<TocEntry> {
    let headings: Vec<_> = elements
        .iter()
        .filter_map(|e| match e {
            Element::Heading { id, level, text } => Some((id.as_str(), *level, text)),
            _ => None,
        })
        .collect();

    let anchors = unique_anchors(headings.iter().map(|(id, _, _)| *id));
    headings
        .into_iter()
        .zip(anchors)
        .map(|((_, level, text), id)| TocEntry {
            id,
            level,
            title: text.plain_text(),
        })
        .collect()
}

/// Make heading slugs unique in document order.
///
/// The first occurrence keeps its slug; later ones take the first free
/// `slug-N`. A suffixed id never collides with a literal title like
/// "Example 1" appearing elsewhere.
pub fn unique_anchors<'a>(slugs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut used = HashSet::new();
    let mut out = Vec::new();
    for slug in slugs {
        let mut anchor = slug.to_string();
        let mut n = 0;
        while used.contains(&anchor) {
            n += 1;
            anchor = format!("{slug}-{n}");
        }
        used.insert(anchor.clone());
        out.push(anchor);
    }
    out
}

/// Every image referenced anywhere in the tree.
pub fn collect_media(elements: &[Element], out: &mut Vec<MediaRef>) {
    for element in elements {
        match element {
            Element::Image { source, alt } => out.push(MediaRef {
                source: source.clone(),
                alt: alt.clone(),
            }),
            Element::Text(text) | Element::Heading { text, .. } => {
                for run in &text.runs {
                    if let Inline::Image { alt, url } = run {
                        out.push(MediaRef {
                            source: url.clone(),
                            alt: alt.clone(),
                        });
                    }
                }
            }
            _ => {
                for slot in element.child_slots() {
                    collect_media(slot, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::MarkdownGrammar;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repeated_headings_get_unique_ids() {
        let output = MarkdownGrammar::new()
            .parse("## Example\n\none\n\n## Example\n\n## Example 1\n\n## Example\n")
            .unwrap();
        let ids: Vec<&str> = output.headings.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["example", "example-1", "example-1-1", "example-2"]);
        assert!(output.headings.iter().all(|h| h.title.starts_with("Example")));
    }

    #[test]
    fn test_unique_anchors() {
        assert_eq!(unique_anchors(["a", "b", "a", "a"]), vec!["a", "b", "a-1", "a-2"]);
        assert!(unique_anchors(Vec::<&str>::new()).is_empty());
    }
}
