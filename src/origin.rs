use anyhow::{Context, Result};
use regex::{NoExpand, Regex};
use std::borrow::Cow;
use url::Url;

use crate::config::OriginConfig;

/// Schemes that can never be fetched, so they never enter an asset set.
const UNFETCHABLE_SCHEMES: [&str; 3] = ["data:", "mailto:", "tel:"];

/// The single site being mirrored, plus the host names that alias it.
///
/// Every in-scope reference collapses to one canonical `https://host/path`
/// form, so equal resources compare equal in a set.
#[derive(Debug, Clone)]
pub struct Origin {
    host: String,
    aliases: Vec<String>,
    base: Url,
    /// `http://host/`, `https://host/` and `//host/` for every host name.
    absolute_prefix: Regex,
    /// A quoted reference to the bare origin, e.g. `"https://host"`.
    quoted_bare: Regex,
}

impl Origin {
    pub fn new(config: &OriginConfig) -> Result<Self> {
        let base = Url::parse(&format!("https://{}/", config.host))
            .with_context(|| format!("Failed to parse origin host: {}", config.host))?;
        let host = base
            .host_str()
            .with_context(|| format!("Origin has no host: {}", config.host))?
            .to_string();

        let hosts = std::iter::once(host.as_str())
            .chain(config.aliases.iter().map(String::as_str))
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        let absolute_prefix = Regex::new(&format!(r"(?i)(?:https?:)?//(?:{})/", hosts))
            .context("Failed to build origin prefix pattern")?;
        let quoted_bare = Regex::new(&format!(r#"(?i)(["'])(?:https?:)?//(?:{})(["'])"#, hosts))
            .context("Failed to build bare origin pattern")?;

        Ok(Self {
            host,
            aliases: config.aliases.clone(),
            base,
            absolute_prefix,
            quoted_bare,
        })
    }

    /// The canonical host followed by its aliases.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.host.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// `https://host/`
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn is_origin_host(&self, host: &str) -> bool {
        self.hosts().any(|h| h.eq_ignore_ascii_case(host))
    }

    /// Origin URL for a path relative to the site root, e.g. a page name.
    pub fn page_url(&self, page: &str) -> Result<Url> {
        self.base
            .join(page.trim_start_matches('/'))
            .with_context(|| format!("Failed to build URL for page: {}", page))
    }

    /// Resolve `raw` against the document it appeared in and canonicalize it.
    ///
    /// Returns `None` for unfetchable schemes, unparseable references and
    /// anything hosted elsewhere.
    pub fn normalize(&self, document_url: &Url, raw: &str) -> Option<Url> {
        let decoded = html_escape::decode_html_entities(raw);
        let reference = decoded.trim();
        if reference.is_empty() || reference.starts_with('#') {
            return None;
        }

        let lowered = reference.to_ascii_lowercase();
        if UNFETCHABLE_SCHEMES.iter().any(|s| lowered.starts_with(s)) {
            return None;
        }

        let resolved = document_url.join(reference).ok()?;
        if !matches!(resolved.scheme(), "http" | "https") {
            return None;
        }
        if !self.is_origin_host(resolved.host_str()?) {
            return None;
        }

        Some(self.canonicalize(&resolved))
    }

    /// Replace absolute references to the origin with `root`, which must end
    /// in `/` (`./` for a page at the site root, `../../` two levels down).
    pub fn relativize<'t>(&self, text: &'t str, root: &str) -> Cow<'t, str> {
        let text = self.absolute_prefix.replace_all(text, NoExpand(root));
        if !self.quoted_bare.is_match(&text) {
            return text;
        }
        let rewritten = self
            .quoted_bare
            .replace_all(&text, |caps: &regex::Captures| {
                format!("{}{}{}", &caps[1], root, &caps[2])
            })
            .into_owned();
        Cow::Owned(rewritten)
    }

    /// Force `https`, the canonical host, no port, query or fragment.
    pub fn canonicalize(&self, url: &Url) -> Url {
        let mut canonical = self.base.clone();
        canonical.set_path(url.path());
        canonical
    }
}
