use scraper::{Html, Selector};
use url::Url;

/// An anchor discovered on a page: the resolved target plus the trimmed
/// visible text, which the crawler matches against its exclusion list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: Url,
    pub text: String,
}

/// Extracts in-scope anchors from a page, preserving document order.
///
/// Relative hrefs are resolved against `base_url`. Fragment-only links point
/// back at the same page and are skipped; malformed hrefs are dropped.
/// Only http/https targets on the base URL's host are returned.
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Link> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let Ok(target) = base_url.join(href) else {
            continue;
        };
        if target.scheme() != "http" && target.scheme() != "https" {
            continue;
        }
        if target.host_str() != base_url.host_str() {
            continue;
        }

        let text = element.text().collect::<String>().trim().to_string();
        links.push(Link { url: target, text });
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs/intro").unwrap()
    }

    #[test]
    fn resolves_relative_hrefs_in_document_order() {
        let html = r#"
            <html><body>
                <a href="/guide">Guide</a>
                <a href="advanced">Advanced</a>
                <a href="https://example.com/api">API</a>
            </body></html>
        "#;
        let links = extract_links(html, &base());
        let urls: Vec<String> = links.iter().map(|l| l.url.to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/guide",
                "https://example.com/docs/advanced",
                "https://example.com/api",
            ]
        );
    }

    #[test]
    fn trims_link_text() {
        let html = r#"<a href="/a">  Spaced  Out  </a>"#;
        let links = extract_links(html, &base());
        assert_eq!(links[0].text, "Spaced  Out");
    }

    #[test]
    fn skips_fragment_only_links() {
        let html = r##"<a href="#section">Jump</a><a href="/real">Real</a>"##;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url.path(), "/real");
    }

    #[test]
    fn skips_offsite_and_non_http_links() {
        let html = r#"
            <a href="https://other.com/page">Elsewhere</a>
            <a href="mailto:a@example.com">Mail</a>
            <a href="javascript:void(0)">JS</a>
            <a href="/here">Here</a>
        "#;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text, "Here");
    }

    #[test]
    fn drops_malformed_hrefs() {
        let html = r#"<a href="http://[bad">Broken</a><a href="/ok">Ok</a>"#;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url.path(), "/ok");
    }

    #[test]
    fn keeps_duplicate_anchors_as_a_sequence() {
        // Dedup is the crawler's job; the extractor reports document order.
        let html = r#"<a href="/a">One</a><a href="/a">Two</a>"#;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 2);
    }
}
