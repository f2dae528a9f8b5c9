use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;
use url::Url;

use crate::local_path::{root_prefix, PathMapper};
use crate::origin::Origin;

/// `url(...)` with a double-quoted, single-quoted or bare reference.
pub(crate) static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^'"\s)]*))\s*\)"#)
        .expect("CSS_URL is a valid static regex pattern")
});

/// The reference inside a `CSS_URL` match, without quotes or padding.
pub(crate) fn url_reference<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    (1..=3)
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

/// Bytes that cannot appear raw in an unquoted `url()` or would be read as
/// URL syntax rather than part of a file name. Non-ASCII is always encoded.
const CSS_URL_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\\');

/// A `url(...)` reference as written in a stylesheet and the origin URL it
/// resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub raw: String,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct CssParser {
    origin: Origin,
    paths: PathMapper,
    asset_extensions: Vec<String>,
}

impl CssParser {
    pub fn new(origin: Origin, paths: PathMapper, asset_extensions: &[String]) -> Self {
        Self {
            origin,
            paths,
            asset_extensions: asset_extensions.to_vec(),
        }
    }

    /// Collect image and font references from a stylesheet, resolved against
    /// the stylesheet's own URL. Each raw spelling appears once.
    pub fn extract_assets(&self, css_content: &str, css_url: &Url) -> Vec<AssetRef> {
        let mut seen = HashSet::new();
        let mut refs = Vec::new();

        for caps in CSS_URL.captures_iter(css_content) {
            let Some(raw) = url_reference(&caps) else {
                continue;
            };
            let Some(url) = self.origin.normalize(css_url, raw) else {
                continue;
            };
            if !self.is_asset(&url) || !seen.insert(raw) {
                continue;
            }
            refs.push(AssetRef {
                raw: raw.to_string(),
                url,
            });
        }

        refs
    }

    fn is_asset(&self, url: &Url) -> bool {
        Path::new(url.path())
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.asset_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    /// Point every `url(...)` in `refs` at the saved copy of its asset,
    /// relative to the directory of `css_local_path`, then relativize any
    /// absolute origin reference left over.
    pub fn rewrite_urls(
        &self,
        css_content: &str,
        css_local_path: &str,
        refs: &[AssetRef],
    ) -> String {
        let css_dir = containing_dir(css_local_path);
        let targets: HashMap<&str, String> = refs
            .iter()
            .map(|r| {
                let asset_path = self.paths.local_path_for(&r.url);
                (r.raw.as_str(), relative_from(css_dir, &asset_path))
            })
            .collect();

        let rewritten = CSS_URL.replace_all(css_content, |caps: &Captures| {
            match url_reference(caps).and_then(|raw| targets.get(raw)) {
                Some(target) => format!("url({})", target),
                None => caps[0].to_string(),
            }
        });

        self.origin
            .relativize(&rewritten, &root_prefix(css_local_path))
            .into_owned()
    }

    /// Rewrite a stylesheet already sitting in the output tree, resolving its
    /// references against the origin URL its local path stands for.
    pub fn relocate(&self, css_content: &str, css_local_path: &str) -> Result<String> {
        let css_url = self
            .origin
            .page_url(css_local_path.trim_start_matches("./"))
            .with_context(|| format!("Failed to map stylesheet path to URL: {}", css_local_path))?;
        let refs = self.extract_assets(css_content, &css_url);
        Ok(self.rewrite_urls(css_content, css_local_path, &refs))
    }
}

fn containing_dir(local_path: &str) -> &Path {
    Path::new(local_path.trim_start_matches("./"))
        .parent()
        .unwrap_or_else(|| Path::new(""))
}

/// Path from `dir` to the saved file at `target`, percent-encoded so that a
/// browser decoding it lands on that exact file name.
fn relative_from(dir: &Path, target: &str) -> String {
    let target = Path::new(target.trim_start_matches("./"));
    let relative = pathdiff::diff_paths(target, dir).unwrap_or_else(|| target.to_path_buf());
    relative
        .to_string_lossy()
        .replace('\\', "/")
        .split('/')
        .map(|segment| utf8_percent_encode(segment, CSS_URL_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OriginConfig, RenameRule, SiteConfig};

    fn parser() -> CssParser {
        let origin = Origin::new(&OriginConfig {
            host: "example.com".to_string(),
            aliases: vec![],
        })
        .unwrap();
        CssParser::new(
            origin,
            PathMapper::new(RenameRule::default()),
            &SiteConfig::default().css_asset_extensions,
        )
    }

    fn css_url() -> Url {
        Url::parse("https://example.com/assets/css/site.css").unwrap()
    }

    #[test]
    fn test_extracts_all_quoting_styles() {
        let css = r#"
            .a { background: url("../img/a.png") no-repeat; }
            .b { background-image: url('../img/b.jpg'); }
            .c { background: url( ../img/c.gif ); }
            @font-face { src: url(/fonts/x.woff2) format("woff2"), url("/fonts/x.TTF"); }
        "#;

        let refs = parser().extract_assets(css, &css_url());
        let urls: Vec<&str> = refs.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/assets/img/a.png",
                "https://example.com/assets/img/b.jpg",
                "https://example.com/assets/img/c.gif",
                "https://example.com/fonts/x.woff2",
                "https://example.com/fonts/x.TTF",
            ]
        );
        assert_eq!(refs[2].raw, "../img/c.gif");
    }

    #[test]
    fn test_skips_non_assets_and_foreign_hosts() {
        let css = r#"
            @import url("other.css");
            .a { background: url(data:image/png;base64,AAAA); }
            .b { background: url(https://cdn.other.com/bg.png); }
            .c { behavior: url(/htc/fix.htc); }
            .d { background: url(); }
        "#;
        assert!(parser().extract_assets(css, &css_url()).is_empty());
    }

    #[test]
    fn test_same_raw_reference_is_listed_once() {
        let css = ".a { background: url(bg.png) } \
                   .b { background: url('bg.png') } \
                   .c { background: url(./bg.png) }";
        let refs = parser().extract_assets(css, &css_url());
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, refs[1].url);
    }

    #[test]
    fn test_rewrite_relative_to_stylesheet_dir() {
        let parser = parser();
        let css = ".hero { background: url('/img/bg.png'); } .x { background: url(../img/x.png); }";
        let refs = parser.extract_assets(css, &css_url());
        let rewritten = parser.rewrite_urls(css, "./assets/css/site.css", &refs);

        assert_eq!(
            rewritten,
            ".hero { background: url(../../img/bg.png); } .x { background: url(../img/x.png); }"
        );

        // Resolving the rewritten reference from the stylesheet's folder lands
        // on the asset's saved path.
        let resolved = Url::parse("file:///out/assets/css/site.css")
            .unwrap()
            .join("../../img/bg.png")
            .unwrap();
        assert_eq!(resolved.path(), "/out/img/bg.png");
    }

    #[test]
    fn test_rewrite_at_site_root_and_fallback() {
        let parser = parser();
        let root_css = Url::parse("https://example.com/style.css").unwrap();
        let css = "a { background: url(\"img/a.png\"); } \
                   b { background: url(https://example.com/misc/x.cur); }";
        let refs = parser.extract_assets(css, &root_css);
        let rewritten = parser.rewrite_urls(css, "./style.css", &refs);
        assert_eq!(
            rewritten,
            "a { background: url(img/a.png); } b { background: url(./misc/x.cur); }"
        );

        let nested = "b { background: url(https://example.com/misc/x.cur); }";
        assert_eq!(
            parser.rewrite_urls(nested, "./assets/css/site.css", &[]),
            "b { background: url(../../misc/x.cur); }"
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let parser = parser();
        let css = ".a { background: url(https://example.com/img/a.png) } \
                   .b { background: url(\"../img/b.png\") }";
        let once = parser.relocate(css, "./assets/css/site.css").unwrap();
        let twice = parser.relocate(&once, "./assets/css/site.css").unwrap();
        assert_eq!(
            once,
            ".a { background: url(../../img/a.png) } .b { background: url(../img/b.png) }"
        );
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rewrite_encodes_decoded_file_names() {
        let parser = parser();
        let css = concat!(
            ".a { background: url('../img/a b.png') } ",
            r#".b { background: url("/img/a%20(1).png") }"#
        );
        let once = parser.relocate(css, "./assets/css/site.css").unwrap();
        assert_eq!(
            once,
            ".a { background: url(../img/a%20b.png) } \
             .b { background: url(../../img/a%20%281%29.png) }"
        );
        assert_eq!(parser.relocate(&once, "./assets/css/site.css").unwrap(), once);

        // Decoding the rewritten reference gives the name the file is saved under.
        let refs = parser.extract_assets(css, &css_url());
        assert_eq!(parser.paths.local_path_for(&refs[0].url), "./assets/img/a b.png");
        let resolved = Url::parse("file:///out/assets/css/site.css")
            .unwrap()
            .join("../img/a%20b.png")
            .unwrap();
        let on_disk = percent_encoding::percent_decode_str(resolved.path()).decode_utf8_lossy();
        assert_eq!(on_disk, "/out/assets/img/a b.png");
    }

    #[test]
    fn test_relative_targets_are_encoded() {
        let dir = Path::new("assets/css");
        assert_eq!(relative_from(dir, "./img/a.png"), "../../img/a.png");
        assert_eq!(relative_from(dir, "./img/photo 1.jpg"), "../../img/photo%201.jpg");
        assert_eq!(relative_from(dir, "./img/\u{915}.jpg"), "../../img/%E0%A4%95.jpg");
        assert_eq!(relative_from(Path::new(""), "./fonts/100%.woff"), "fonts/100%25.woff");
    }
}
