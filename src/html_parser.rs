use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use url::Url;

use crate::config::RenameRule;
use crate::css_parser::{url_reference, CSS_URL};
use crate::origin::Origin;

/// Quoted or bare value of `attr` on any of `tags`.
fn tag_attribute(tags: &str, attr: &str) -> Regex {
    Regex::new(&format!(
        r#"(?i)<(?:{})\b[^>]*?\s{}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
        tags, attr
    ))
    .expect("tag attribute pattern is a valid regex")
}

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| tag_attribute("img", "src"));
static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| tag_attribute("link", "href"));
static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| tag_attribute("script", "src"));
static MEDIA_SRC: LazyLock<Regex> = LazyLock::new(|| tag_attribute("audio|source", "src"));

static STYLE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\sstyle\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("STYLE_ATTR is a valid static regex pattern")
});

/// `href="/x"` or `src='/x'`, but not a protocol-relative `//host`.
static ROOT_ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(href|src)(\s*=\s*)(["'])/([^/])"#)
        .expect("ROOT_ABSOLUTE is a valid static regex pattern")
});

fn attribute_value<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    (1..=3).find_map(|i| caps.get(i)).map(|m| m.as_str())
}

#[derive(Debug, Clone)]
pub struct HtmlParser {
    origin: Origin,
    rename: RenameRule,
    anchor_asset: Regex,
}

impl HtmlParser {
    pub fn new(origin: Origin, rename: RenameRule, anchor_extensions: &[String]) -> Result<Self> {
        // Longest first so `woff2` wins over `woff` in unquoted values.
        let mut extensions: Vec<String> =
            anchor_extensions.iter().map(|ext| regex::escape(ext)).collect();
        extensions.sort_by(|a, b| b.len().cmp(&a.len()));
        let extensions = extensions.join("|");
        let value = format!(r#"[^"'\s>]*\.(?:{})(?:[?#][^"'\s>]*)?"#, extensions);
        let anchor_asset = Regex::new(&format!(
            r#"(?i)<a\b[^>]*?\shref\s*=\s*(?:"({value})"|'({value})'|({value}))"#,
            value = value
        ))
        .context("Failed to build anchor asset pattern")?;

        Ok(Self {
            origin,
            rename,
            anchor_asset,
        })
    }

    /// Every in-scope resource the page references, canonicalized and
    /// deduplicated. Malformed markup only means fewer matches.
    pub fn extract_assets(&self, html_content: &str, page_url: &Url) -> BTreeSet<Url> {
        let mut assets = BTreeSet::new();

        for pattern in [&*IMG_SRC, &*LINK_HREF, &*SCRIPT_SRC, &*MEDIA_SRC, &self.anchor_asset] {
            for caps in pattern.captures_iter(html_content) {
                if let Some(url) =
                    attribute_value(&caps).and_then(|raw| self.origin.normalize(page_url, raw))
                {
                    assets.insert(url);
                }
            }
        }

        // Background images in inline styles
        for style in STYLE_ATTR.captures_iter(html_content) {
            let Some(declarations) = attribute_value(&style) else {
                continue;
            };
            let declarations = html_escape::decode_html_entities(declarations);
            for caps in CSS_URL.captures_iter(&declarations) {
                if let Some(url) =
                    url_reference(&caps).and_then(|raw| self.origin.normalize(page_url, raw))
                {
                    assets.insert(url);
                }
            }
        }

        assets
    }

    /// Make a page at the site root relocatable: absolute origin references
    /// become `./`, root-absolute `href`/`src` values become `./`-relative,
    /// and the dynamic page name becomes its static name. Applying it twice
    /// is the same as applying it once.
    pub fn rewrite_links(&self, html_content: &str) -> String {
        self.rewrite_links_from(html_content, "./")
    }

    /// Same as `rewrite_links` for a file whose way back to the site root is
    /// `root` (`../` one directory down).
    pub fn rewrite_links_from(&self, html_content: &str, root: &str) -> String {
        let relative = self.origin.relativize(html_content, root);
        let relative = ROOT_ABSOLUTE.replace_all(&relative, |caps: &Captures| {
            format!("{}{}{}{}{}", &caps[1], &caps[2], &caps[3], root, &caps[4])
        });
        self.rename.apply(&relative).into_owned()
    }
}
