use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::Record;

// ── Default selectors ────────────────────────────────────────────────────────

// Class names are generated by the site's build tooling and change without
// notice. Keep them here and nowhere else.
pub const DEFAULT_TEXT_BLOCK: &str = "div.css-175oi2r > div[data-testid='tweetText']";
pub const DEFAULT_CONTENT: &str = "span.css-1jxf684.r-bcqeeo.r-1ttztb7.r-qvutc0.r-poiln3";
pub const DEFAULT_CONTAINER: &str = "article";
pub const DEFAULT_ACCOUNT: &str = "WuBlockchain";

static ACCOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("invalid account name `{0}`")]
    InvalidAccount(String),
}

// ── Selector configuration ───────────────────────────────────────────────────

/// Markup-specific pieces of the extractor, kept as plain strings so they can
/// come from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSet {
    /// Block holding the text of one post.
    pub text_block: String,
    /// Elements inside the text block whose text makes up the content.
    pub content: String,
    /// Closest ancestor that wraps the whole post, link included.
    pub container: String,
    /// Account whose status links carry the post id.
    pub account: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            text_block: DEFAULT_TEXT_BLOCK.to_string(),
            content: DEFAULT_CONTENT.to_string(),
            container: DEFAULT_CONTAINER.to_string(),
            account: DEFAULT_ACCOUNT.to_string(),
        }
    }
}

impl SelectorSet {
    pub fn compile(&self) -> Result<Extractor, ExtractionError> {
        if !ACCOUNT_RE.is_match(&self.account) {
            return Err(ExtractionError::InvalidAccount(self.account.clone()));
        }

        let status_prefix = format!("/{}/status/", self.account);
        let status_link = parse_selector(&format!("a[href^='{}']", status_prefix))?;
        let status_id = Regex::new(&format!(r"^{}(\d+)", regex::escape(&status_prefix)))
            .map_err(|e| ExtractionError::InvalidAccount(format!("{}: {}", self.account, e)))?;

        Ok(Extractor {
            text_block: parse_selector(&self.text_block)?,
            content: parse_selector(&self.content)?,
            container: parse_selector(&self.container)?,
            status_link,
            status_id,
        })
    }
}

fn parse_selector(source: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(source).map_err(|e| ExtractionError::InvalidSelector {
        selector: source.to_string(),
        reason: e.to_string(),
    })
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Compiled form of a [`SelectorSet`]. Holds no per-document state, so one
/// instance is shared by every request.
#[derive(Debug)]
pub struct Extractor {
    text_block: Selector,
    content: Selector,
    container: Selector,
    status_link: Selector,
    status_id: Regex,
}

impl Extractor {
    /// Pull every post out of `html` in document order.
    ///
    /// Text blocks without a container, without a status link, or whose first
    /// status link carries no numeric id are skipped.
    pub fn extract(&self, html: &str) -> Vec<Record> {
        let document = Html::parse_document(html);
        let mut records = Vec::new();

        for block in document.select(&self.text_block) {
            let content: String = block
                .select(&self.content)
                .flat_map(|el| el.text())
                .collect();

            let Some(container) = self.closest_container(block) else {
                continue;
            };

            if let Some(id) = self.status_id_in(container) {
                records.push(Record { id, content });
            }
        }

        tracing::debug!(count = records.len(), "extracted records");
        records
    }

    fn closest_container<'a>(&self, el: ElementRef<'a>) -> Option<ElementRef<'a>> {
        std::iter::once(el)
            .chain(el.ancestors().filter_map(ElementRef::wrap))
            .find(|candidate| self.container.matches(candidate))
    }

    // Only the first status link counts, even if a later one would match.
    fn status_id_in(&self, container: ElementRef<'_>) -> Option<String> {
        let href = container.select(&self.status_link).next()?.value().attr("href")?;
        self.status_id
            .captures(href)
            .map(|cap| cap[1].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMELINE: &str = include_str!("testdata/timeline.html");

    fn post(id: &str, text: &str) -> String {
        format!(
            r#"<article>
                 <a href="/WuBlockchain/status/{id}"><time>1h</time></a>
                 <div class="css-175oi2r">
                   <div data-testid="tweetText">
                     <span class="css-1jxf684 r-bcqeeo r-1ttztb7 r-qvutc0 r-poiln3">{text}</span>
                   </div>
                 </div>
               </article>"#
        )
    }

    fn page(body: &str) -> String {
        format!("<html><head><title>t</title></head><body>{}</body></html>", body)
    }

    fn extractor() -> Extractor {
        SelectorSet::default().compile().unwrap()
    }

    fn record(id: &str, content: &str) -> Record {
        Record {
            id: id.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_extracts_posts_in_document_order() {
        let html = page(&[post("101", "first"), post("202", "second"), post("303", "third")].concat());
        let records = extractor().extract(&html);
        assert_eq!(
            records,
            vec![record("101", "first"), record("202", "second"), record("303", "third")]
        );
    }

    #[test]
    fn test_post_without_status_link_is_skipped() {
        let orphan = r#"<article>
              <a href="/someone_else/status/999">x</a>
              <div class="css-175oi2r"><div data-testid="tweetText">
                <span class="css-1jxf684 r-bcqeeo r-1ttztb7 r-qvutc0 r-poiln3">no link</span>
              </div></div>
            </article>"#;

        let with_link = page(&[post("1", "a"), post("2", "b")].concat());
        let without_link = page(&[post("1", "a"), orphan.to_string()].concat());

        let ex = extractor();
        assert_eq!(ex.extract(&with_link).len(), 2);
        assert_eq!(ex.extract(&without_link), vec![record("1", "a")]);
    }

    #[test]
    fn test_non_numeric_first_link_skips_post() {
        let html = page(
            r#"<article>
                 <a href="/WuBlockchain/status/latest">x</a>
                 <a href="/WuBlockchain/status/42">y</a>
                 <div class="css-175oi2r"><div data-testid="tweetText">
                   <span class="css-1jxf684 r-bcqeeo r-1ttztb7 r-qvutc0 r-poiln3">text</span>
                 </div></div>
               </article>"#,
        );
        assert!(extractor().extract(&html).is_empty());
    }

    #[test]
    fn test_id_stops_at_first_non_digit() {
        let html = page(&post("1234567890/photo/1", "pic"));
        assert_eq!(extractor().extract(&html), vec![record("1234567890", "pic")]);
    }

    #[test]
    fn test_text_block_outside_container_is_skipped() {
        let html = page(
            r#"<div class="css-175oi2r"><div data-testid="tweetText">
                 <span class="css-1jxf684 r-bcqeeo r-1ttztb7 r-qvutc0 r-poiln3">loose</span>
               </div></div>
               <a href="/WuBlockchain/status/5">x</a>"#,
        );
        assert!(extractor().extract(&html).is_empty());
    }

    #[test]
    fn test_content_concatenates_matching_spans_untrimmed() {
        let html = page(
            r#"<article>
                 <a href="/WuBlockchain/status/7">x</a>
                 <div class="css-175oi2r"><div data-testid="tweetText">
                   <span class="css-1jxf684 r-bcqeeo r-1ttztb7 r-qvutc0 r-poiln3">Hello </span><a href="/hashtag/BTC">#BTC</a><span class="css-1jxf684 r-bcqeeo r-1ttztb7 r-qvutc0 r-poiln3"> world</span>
                 </div></div>
               </article>"#,
        );
        assert_eq!(extractor().extract(&html), vec![record("7", "Hello  world")]);
    }

    #[test]
    fn test_missing_content_span_gives_empty_content() {
        let html = page(
            r#"<article>
                 <a href="/WuBlockchain/status/8">x</a>
                 <div class="css-175oi2r"><div data-testid="tweetText"><img alt="emoji"></div></div>
               </article>"#,
        );
        assert_eq!(extractor().extract(&html), vec![record("8", "")]);
    }

    #[test]
    fn test_text_block_requires_direct_parent_div() {
        let html = page(
            r#"<article>
                 <a href="/WuBlockchain/status/9">x</a>
                 <div class="css-175oi2r"><section><div data-testid="tweetText">
                   <span class="css-1jxf684 r-bcqeeo r-1ttztb7 r-qvutc0 r-poiln3">nested</span>
                 </div></section></div>
               </article>"#,
        );
        assert!(extractor().extract(&html).is_empty());
    }

    #[test]
    fn test_duplicates_are_preserved() {
        let html = page(&[post("11", "same"), post("11", "same")].concat());
        assert_eq!(
            extractor().extract(&html),
            vec![record("11", "same"), record("11", "same")]
        );
    }

    #[test]
    fn test_no_matches_yields_empty_list() {
        let html = page("<main><p>Something went wrong. Try reloading.</p></main>");
        assert!(extractor().extract(&html).is_empty());
        assert!(extractor().extract("").is_empty());
    }

    #[test]
    fn test_malformed_html_does_not_fail() {
        let html = format!("<html><body><div><article>{}</div></span><p><<>", post("12", "ok"));
        assert_eq!(extractor().extract(&html), vec![record("12", "ok")]);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let ex = extractor();
        let first = ex.extract(TIMELINE);
        let second = ex.extract(TIMELINE);
        assert_eq!(first, second);
    }

    #[test]
    fn test_timeline_fixture() {
        let records = extractor().extract(TIMELINE);
        assert_eq!(
            records,
            vec![
                record("1846531998273876214", "Bitcoin spot ETFs saw net inflows of $458M yesterday."),
                record("1846520011765309481", "Exchange reserves hit a new low."),
            ]
        );
    }

    #[test]
    fn test_custom_account() {
        let selectors = SelectorSet {
            account: "other_acct".to_string(),
            ..SelectorSet::default()
        };
        let ex = selectors.compile().unwrap();
        let html = page(&post("3", "mine").replace("WuBlockchain", "other_acct"));
        assert_eq!(ex.extract(&html), vec![record("3", "mine")]);
        assert!(ex.extract(&page(&post("4", "theirs"))).is_empty());
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let selectors = SelectorSet {
            text_block: "div[".to_string(),
            ..SelectorSet::default()
        };
        match selectors.compile() {
            Err(ExtractionError::InvalidSelector { selector, .. }) => assert_eq!(selector, "div["),
            other => panic!("expected InvalidSelector, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_account_is_reported() {
        for account in ["", "with space", "quote'd", "far_too_long_for_a_handle"] {
            let selectors = SelectorSet {
                account: account.to_string(),
                ..SelectorSet::default()
            };
            assert!(matches!(
                selectors.compile(),
                Err(ExtractionError::InvalidAccount(_))
            ));
        }
    }
}
