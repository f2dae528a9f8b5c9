use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SiteConfig;
use crate::css_parser::CssParser;
use crate::fetch::Fetch;
use crate::file_manager::FileManager;
use crate::html_parser::HtmlParser;
use crate::local_path::{root_prefix, PathClaims, PathMapper};
use crate::origin::Origin;

/// Origin URLs discovered so far, kept sorted so downloads run in a
/// deterministic order.
pub type AssetSet = BTreeSet<Url>;

/// What one run fetched and saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub pages: usize,
    pub html_assets: usize,
    pub css_assets: usize,
    /// Resources skipped after a failed fetch or write.
    pub failed: usize,
    /// Resources skipped because their local path was already taken.
    pub collisions: usize,
}

impl fmt::Display for MirrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} page(s), {} HTML asset(s), {} CSS asset(s)",
            self.pages, self.html_assets, self.css_assets
        )?;
        if self.failed > 0 || self.collisions > 0 {
            write!(f, " ({} failed, {} path collision(s))", self.failed, self.collisions)?;
        }
        Ok(())
    }
}

/// A stylesheet saved during the HTML-asset phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedStylesheet {
    pub url: Url,
    pub local_path: String,
}

/// Whether a saved resource is CSS, judged by its file name or the
/// `Content-Type` it was served with.
pub fn is_stylesheet(local_path: &str, content_type: Option<&str>) -> bool {
    let is_css = |m: &mime::Mime| m.type_() == mime::TEXT && m.subtype() == mime::CSS;

    mime_guess::from_path(local_path).iter().any(|m| is_css(&m))
        || content_type
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .map(|m| is_css(&m))
            .unwrap_or(false)
}

/// Drives the three phases: pages, assets found in pages, assets found in
/// the stylesheets among those.
pub struct SiteMirror<F> {
    config: SiteConfig,
    origin: Origin,
    paths: PathMapper,
    html_parser: HtmlParser,
    css_parser: CssParser,
    file_manager: FileManager,
    fetcher: F,
    show_progress: bool,
}

impl<F: Fetch> SiteMirror<F> {
    pub fn new(config: SiteConfig, output_dir: &Path, fetcher: F) -> Result<Self> {
        config.validate()?;

        let origin = Origin::new(&config.origin)?;
        let paths = PathMapper::new(config.rename.clone());
        let html_parser = HtmlParser::new(
            origin.clone(),
            config.rename.clone(),
            &config.anchor_asset_extensions,
        )?;
        let css_parser =
            CssParser::new(origin.clone(), paths.clone(), &config.css_asset_extensions);
        let file_manager = FileManager::new(output_dir)?;

        Ok(Self {
            config,
            origin,
            paths,
            html_parser,
            css_parser,
            file_manager,
            fetcher,
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    pub async fn mirror_website(&self) -> Result<MirrorSummary> {
        info!(
            origin = %self.origin.base_url(),
            output = ?self.file_manager.base_dir(),
            pages = self.config.pages.len(),
            "starting mirror"
        );

        let mut summary = MirrorSummary::default();
        let mut claims = PathClaims::new();
        let mut fetched = HashSet::new();

        let assets = self
            .fetch_pages(AssetSet::new(), &mut claims, &mut summary)
            .await?;
        info!(assets = assets.len(), "pages done");

        let stylesheets = self
            .fetch_html_assets(&assets, &mut claims, &mut fetched, &mut summary)
            .await;
        info!(stylesheets = stylesheets.len(), "HTML assets done");

        self.fetch_css_assets(&stylesheets, &mut claims, &mut fetched, &mut summary)
            .await;
        info!(%summary, "mirror finished");

        Ok(summary)
    }

    /// Page phase. Saves each rewritten page and returns `assets` extended
    /// with everything the pages reference, minus the pages themselves.
    async fn fetch_pages(
        &self,
        mut assets: AssetSet,
        claims: &mut PathClaims,
        summary: &mut MirrorSummary,
    ) -> Result<AssetSet> {
        let mut page_urls = Vec::with_capacity(self.config.pages.len());

        for page in &self.config.pages {
            let page_url = self.origin.page_url(page)?;
            page_urls.push(page_url.clone());

            let fetched = match self.fetcher.fetch(&page_url).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    warn!(page = %page, error = %err, "failed to fetch page, skipping");
                    summary.failed += 1;
                    continue;
                }
            };

            let html = String::from_utf8_lossy(&fetched.body);
            let local_path = self.paths.local_path_for(&page_url);
            if let Err(collision) = claims.claim(&local_path, &page_url) {
                warn!(%collision, "skipping page");
                summary.collisions += 1;
                continue;
            }

            let rewritten = self
                .html_parser
                .rewrite_links_from(&html, &root_prefix(&local_path));
            match self.file_manager.save_file(&local_path, rewritten.as_bytes()) {
                Ok(_) => {
                    debug!(page = %page, path = %local_path, "saved page");
                    summary.pages += 1;
                }
                Err(err) => {
                    warn!(page = %page, error = %err, "failed to save page");
                    summary.failed += 1;
                }
            }

            assets.extend(self.html_parser.extract_assets(&html, &page_url));
        }

        // A page linked as a resource (e.g. rel="canonical") must not be
        // overwritten by its raw, unrewritten copy.
        for page_url in &page_urls {
            assets.remove(page_url);
        }

        Ok(assets)
    }

    /// HTML-asset phase. Returns the stylesheets that were saved.
    async fn fetch_html_assets(
        &self,
        assets: &AssetSet,
        claims: &mut PathClaims,
        fetched: &mut HashSet<Url>,
        summary: &mut MirrorSummary,
    ) -> Vec<SavedStylesheet> {
        let progress = self.progress_bar(assets.len(), "assets");
        let mut stylesheets = Vec::new();

        for url in assets {
            progress.set_message(url.path().to_string());
            let saved = self.download(url, claims, fetched, summary).await;
            if let Some((local_path, content_type)) = saved {
                summary.html_assets += 1;
                if is_stylesheet(&local_path, content_type.as_deref()) {
                    stylesheets.push(SavedStylesheet {
                        url: url.clone(),
                        local_path,
                    });
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        stylesheets
    }

    /// CSS-asset phase. Downloads what each stylesheet references, then
    /// rewrites the stylesheet in place to point at the local copies.
    async fn fetch_css_assets(
        &self,
        stylesheets: &[SavedStylesheet],
        claims: &mut PathClaims,
        fetched: &mut HashSet<Url>,
        summary: &mut MirrorSummary,
    ) {
        let progress = self.progress_bar(stylesheets.len(), "stylesheets");

        for sheet in stylesheets {
            progress.set_message(sheet.local_path.clone());
            let css = match self.file_manager.read_to_string(&sheet.local_path) {
                Ok(css) => css,
                Err(err) => {
                    debug!(path = %sheet.local_path, error = %err, "cannot read back stylesheet");
                    progress.inc(1);
                    continue;
                }
            };

            let refs = self.css_parser.extract_assets(&css, &sheet.url);
            for asset in &refs {
                if fetched.contains(&asset.url) {
                    continue;
                }
                if self.download(&asset.url, claims, fetched, summary).await.is_some() {
                    summary.css_assets += 1;
                }
            }

            let rewritten = self.css_parser.rewrite_urls(&css, &sheet.local_path, &refs);
            if let Err(err) = self.file_manager.update_file(&sheet.local_path, &rewritten) {
                warn!(path = %sheet.local_path, error = %err, "failed to rewrite stylesheet");
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
    }

    /// Fetch one asset and save it at its local path. Failures are logged
    /// and counted; `None` means nothing was written.
    async fn download(
        &self,
        url: &Url,
        claims: &mut PathClaims,
        fetched: &mut HashSet<Url>,
        summary: &mut MirrorSummary,
    ) -> Option<(String, Option<String>)> {
        fetched.insert(url.clone());

        let local_path = self.paths.local_path_for(url);
        if let Err(collision) = claims.claim(&local_path, url) {
            warn!(%collision, "skipping asset");
            summary.collisions += 1;
            return None;
        }

        let resource = match self.fetcher.fetch(url).await {
            Ok(resource) => resource,
            Err(err) => {
                warn!(%url, error = %err, "asset fetch failed, skipping");
                summary.failed += 1;
                return None;
            }
        };

        if let Err(err) = self.file_manager.save_file(&local_path, &resource.body) {
            warn!(%url, error = %err, "failed to save asset");
            summary.failed += 1;
            return None;
        }

        debug!(%url, path = %local_path, bytes = resource.body.len(), "saved asset");
        Some((local_path, resource.content_type))
    }

    fn progress_bar(&self, len: usize, unit: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template(&format!(
            "{{spinner}} [{{bar:30}}] {{pos}}/{{len}} {} {{msg}}",
            unit
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(len as u64).with_style(style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OriginConfig;
    use crate::fetch::{FetchError, Fetched, MockFetch};
    use tempfile::tempdir;

    fn config() -> SiteConfig {
        SiteConfig {
            origin: OriginConfig {
                host: "example.com".to_string(),
                aliases: vec![],
            },
            pages: vec!["index.html".to_string(), "contact.php".to_string()],
            ..SiteConfig::default()
        }
    }

    fn respond(url: &Url) -> Result<Fetched, FetchError> {
        match url.path() {
            "/index.html" => Ok(Fetched::new(
                concat!(
                    r#"<link rel="stylesheet" href="/css/site.css">"#,
                    r#"<link rel="canonical" href="https://example.com/index.html">"#,
                    r#"<a href="contact.php">Contact</a><img src="img/logo.png">"#
                ),
                Some("text/html"),
            )),
            "/contact.php" => Ok(Fetched::new(
                r#"<img src="/img/logo.png?v=2">"#,
                Some("text/html"),
            )),
            "/css/site.css" => Ok(Fetched::new(
                "body { background: url(../img/logo.png) } h1 { background: url('../img/h1.png') }",
                Some("text/css"),
            )),
            "/img/logo.png" | "/img/h1.png" => Ok(Fetched::new(b"png".to_vec(), Some("image/png"))),
            _ => Err(FetchError::Status {
                url: url.clone(),
                status: 404,
            }),
        }
    }

    #[test]
    fn test_is_stylesheet() {
        assert!(is_stylesheet("./css/site.css", None));
        assert!(is_stylesheet("./css/SITE.CSS", Some("text/plain")));
        assert!(is_stylesheet("./theme.php", Some("text/css; charset=utf-8")));
        assert!(!is_stylesheet("./img/logo.png", Some("image/png")));
        assert!(!is_stylesheet("./js/app.js", None));
        assert!(!is_stylesheet("./download", Some("not a mime type")));
    }

    #[test]
    fn test_summary_display() {
        let mut summary = MirrorSummary {
            pages: 5,
            html_assets: 12,
            css_assets: 3,
            ..MirrorSummary::default()
        };
        assert_eq!(summary.to_string(), "5 page(s), 12 HTML asset(s), 3 CSS asset(s)");
        summary.failed = 1;
        assert!(summary.to_string().ends_with("(1 failed, 0 path collision(s))"));
    }

    #[tokio::test]
    async fn test_each_resource_is_fetched_once() {
        let mut fetcher = MockFetch::new();
        for path in [
            "/index.html",
            "/contact.php",
            "/css/site.css",
            "/img/logo.png",
            "/img/h1.png",
        ] {
            fetcher
                .expect_fetch()
                .withf(move |url: &Url| url.path() == path)
                .times(1)
                .returning(respond);
        }

        let temp_dir = tempdir().unwrap();
        let mirror = SiteMirror::new(config(), temp_dir.path(), fetcher).unwrap();
        let summary = mirror.mirror_website().await.unwrap();

        assert_eq!(
            summary,
            MirrorSummary {
                pages: 2,
                html_assets: 2,
                css_assets: 1,
                failed: 0,
                collisions: 0,
            }
        );

        let files = mirror.file_manager();
        assert_eq!(
            files.read_to_string("./index.html").unwrap(),
            concat!(
                r#"<link rel="stylesheet" href="./css/site.css">"#,
                r#"<link rel="canonical" href="./index.html">"#,
                r#"<a href="contact.html">Contact</a><img src="img/logo.png">"#
            )
        );
        assert!(files.file_exists("./contact.html"));
        assert!(!files.file_exists("./contact.php"));
        assert_eq!(
            files.read_to_string("./css/site.css").unwrap(),
            "body { background: url(../img/logo.png) } h1 { background: url(../img/h1.png) }"
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.pages.clear();
        let temp_dir = tempdir().unwrap();
        assert!(SiteMirror::new(config, temp_dir.path(), MockFetch::new()).is_err());
    }
}
