//! Tests for streaming parser behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{
    Chunking, DocumentParser, Element, Error, Grammar, GrammarError, GrammarOutput,
    IncrementalParser, MarkdownGrammar, PendingKind, StyledText, DEFAULT_WINDOW,
};

const DOCUMENT: &str = "# Streaming report

An intro paragraph with **bold**, a [link](https://example.com) and
an inline formula $e^{i\\pi} + 1 = 0$ that wraps onto a second line.

## Code

```rust
fn main() {
    println!(\"hi\");
}
```

| name | value |
|------|-------|
| a    | 1     |
| b    | 2     |

- first item
- second item
  - nested item
- third item

> quoted text
> > deeper quote

$$
\\int_0^1 x^2 \\, dx
$$

<details>
<summary>More</summary>

Hidden paragraph.

</details>

![diagram](diagram.png)

---

Closing words, done.
";

fn grammar() -> Arc<dyn Grammar> {
    Arc::new(MarkdownGrammar::new())
}

fn one_shot(text: &str) -> Vec<Element> {
    MarkdownGrammar::new().parse(text).unwrap().elements
}

/// Split `text` into chunks of 1..=max chars.
fn random_chunks(text: &str, seed: u64, max: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let n = rng.random_range(1..=max).min(chars.len() - i);
        out.push(chars[i..i + n].iter().collect());
        i += n;
    }
    out
}

#[test]
fn test_one_chunk_matches_grammar() {
    let mut parser = IncrementalParser::new(grammar());
    parser.push(DOCUMENT).unwrap();
    parser.finish().unwrap();

    assert_eq!(parser.elements(), one_shot(DOCUMENT).as_slice());
    assert_eq!(parser.elements().len(), 12);
}

#[test]
fn test_every_step_equals_parse_of_safe_prefix() {
    for seed in 0..8 {
        let mut parser = IncrementalParser::new(grammar());
        for chunk in random_chunks(DOCUMENT, seed, 9) {
            parser.push(&chunk).unwrap();

            let cursor = parser.cursor();
            let expected = one_shot(&cursor.buffered_text[..cursor.last_safe_position]);
            assert_eq!(
                parser.elements(),
                expected.as_slice(),
                "seed {} diverged at offset {}",
                seed,
                cursor.last_safe_position
            );
            assert!(
                !parser
                    .elements()
                    .iter()
                    .any(|e| matches!(e, Element::RawBlock { .. })),
                "no unterminated construct may surface mid-stream"
            );
        }
        parser.finish().unwrap();
        assert_eq!(parser.elements(), one_shot(DOCUMENT).as_slice());
    }
}

#[test]
fn test_eventual_consistency_small_window() {
    let mut parser = IncrementalParser::with_window(grammar(), 0);
    for chunk in random_chunks(DOCUMENT, 42, 4) {
        parser.push(&chunk).unwrap();
    }
    parser.finish().unwrap();
    assert_eq!(parser.elements(), one_shot(DOCUMENT).as_slice());
}

#[test]
fn test_eventual_consistency_with_modules() {
    for seed in 0..4 {
        let mut doc = DocumentParser::new(
            grammar(),
            DEFAULT_WINDOW,
            Chunking::Modules { min_chars: 64 },
        );
        for chunk in random_chunks(DOCUMENT, seed, 16) {
            doc.push(&chunk).unwrap();
        }
        doc.finish().unwrap();

        assert_eq!(doc.elements(), one_shot(DOCUMENT).as_slice());
        assert_eq!(doc.parser().cursor().buffered_text, DOCUMENT);
    }
}

#[test]
fn test_headings_and_attachments() {
    let mut doc = DocumentParser::new(grammar(), DEFAULT_WINDOW, Chunking::Direct);
    doc.push(DOCUMENT).unwrap();
    doc.finish().unwrap();

    let ids: Vec<String> = doc.headings().into_iter().map(|h| h.id).collect();
    assert_eq!(ids, vec!["streaming-report", "code"]);

    let sources: Vec<String> = doc.attachments().into_iter().map(|m| m.source).collect();
    assert_eq!(sources, vec!["diagram.png"]);
}

#[test]
fn test_fence_is_pending_until_closed() {
    let mut parser = IncrementalParser::new(grammar());
    parser.push("```python\nprint(1)\n").unwrap();

    assert_eq!(
        crate::detect_pending(&parser.cursor().buffered_text),
        Some(PendingKind::CodeFence)
    );
    assert!(parser.elements().is_empty());
    assert_eq!(parser.cursor().last_safe_position, 0);

    parser.push("```\n").unwrap();
    assert_eq!(
        parser.elements(),
        &[Element::CodeBlock {
            language: Some("python".to_string()),
            raw: "print(1)\n".to_string()
        }]
    );
}

#[test]
fn test_table_is_pending_until_blank_line() {
    let mut parser = IncrementalParser::new(grammar());
    parser.push("| a | b |\n|---|---|\n| 1 | 2 |\n").unwrap();
    assert!(parser.elements().is_empty());

    parser.push("\n").unwrap();
    assert!(matches!(parser.elements(), [Element::Table { rows, .. }] if rows.len() == 1));
}

/// Fails the first `failures` calls, then behaves like the markdown
/// grammar.
struct FlakyGrammar {
    failures: AtomicUsize,
    inner: MarkdownGrammar,
}

impl Grammar for FlakyGrammar {
    fn parse(&self, text: &str) -> Result<GrammarOutput, GrammarError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(GrammarError::Rejected("flaky".to_string()));
        }
        self.inner.parse(text)
    }
}

#[test]
fn test_grammar_failure_does_not_advance() {
    let flaky = Arc::new(FlakyGrammar {
        failures: AtomicUsize::new(1),
        inner: MarkdownGrammar::new(),
    });
    let mut parser = IncrementalParser::new(flaky);

    let err = parser.push("first\n\n").unwrap_err();
    assert!(matches!(err, Error::Grammar { start: 0, end: 7, .. }));
    assert_eq!(parser.cursor().last_safe_position, 0);
    assert!(parser.elements().is_empty());

    // The failed region is retried together with the new text
    let delta = parser.push("second\n").unwrap();
    assert_eq!(delta.parse_start, 0);
    assert_eq!(parser.elements().len(), 2);
}

#[test]
fn test_persistent_failure_flushed_raw_at_end() {
    let broken = Arc::new(FlakyGrammar {
        failures: AtomicUsize::new(usize::MAX),
        inner: MarkdownGrammar::new(),
    });
    let mut parser = IncrementalParser::new(broken);

    assert!(parser.push("some *text*\n").is_err());
    parser.finish().unwrap();

    assert_eq!(
        parser.elements(),
        &[Element::RawBlock {
            text: "some *text*".to_string()
        }]
    );
}

#[test]
fn test_nesting_limit_is_a_grammar_error() {
    let mut parser = IncrementalParser::new(Arc::new(MarkdownGrammar::with_max_depth(1)));
    let err = parser.push("> > too deep\n\n").unwrap_err();
    assert!(matches!(
        err,
        Error::Grammar {
            source: GrammarError::NestingTooDeep(1),
            ..
        }
    ));
}

#[test]
fn test_realistic_llm_stream() {
    let tokens = [
        "Here's", " a", " quick", " example", ":\n\n", "```", "rust", "\n", "let", " x", " = 1;",
        "\n", "```", "\n\n", "Hope", " that", " helps", "!",
    ];

    let mut parser = IncrementalParser::new(grammar());
    let mut seen = Vec::new();
    for token in tokens {
        parser.push(token).unwrap();
        seen.push(parser.elements().len());
    }
    parser.finish().unwrap();

    // Counts only ever grow while the code block streams
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "counts: {:?}", seen);
    assert_eq!(
        parser.elements(),
        &[
            Element::Text(StyledText::plain("Here's a quick example:")),
            Element::CodeBlock {
                language: Some("rust".to_string()),
                raw: "let x = 1;\n".to_string()
            },
            Element::Text(StyledText::plain("Hope that helps!")),
        ]
    );
}
