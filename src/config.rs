use anyhow::{Context, Result};
use serde::Deserialize;
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::fetch::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("origin host must not be empty")]
    EmptyHost,
    #[error("page list must not be empty")]
    NoPages,
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error(
        "rename rule must map a plain file name to a different one (got {from:?} -> {to:?})"
    )]
    InvalidRename { from: String, to: String },
}

/// Everything that changed between runs of the mirror: the origin, the
/// page list, the rename rule and the asset extension lists.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub origin: OriginConfig,
    pub pages: Vec<String>,
    pub rename: RenameRule,
    pub anchor_asset_extensions: Vec<String>,
    pub css_asset_extensions: Vec<String>,
    pub text_extensions: Vec<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    pub host: String,
    /// Other host names that serve the same site.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// The single dynamic-page to static-page file name substitution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenameRule {
    pub from: String,
    pub to: String,
}

/// Characters that can continue a file name. A rename only applies where
/// `from` is bounded on both sides by something else.
fn is_file_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '~' | '%')
}

impl RenameRule {
    /// Replace every standalone occurrence of `from` with `to`.
    /// `mycontact.php` or `contact.php5` are left alone.
    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let mut out = String::new();
        let mut copied = 0;

        for (start, _) in text.match_indices(self.from.as_str()) {
            let end = start + self.from.len();
            let before = text[..start].chars().next_back();
            let after = text[end..].chars().next();
            if before.is_some_and(is_file_name_char) || after.is_some_and(is_file_name_char) {
                continue;
            }
            out.push_str(&text[copied..start]);
            out.push_str(&self.to);
            copied = end;
        }

        if copied == 0 {
            return Cow::Borrowed(text);
        }
        out.push_str(&text[copied..]);
        Cow::Owned(out)
    }

    /// Both sides are non-empty plain file names and `to` never contains
    /// `from`, so applying the rule twice equals applying it once.
    fn is_valid(&self) -> bool {
        let plain = |name: &str| !name.is_empty() && name.chars().all(is_file_name_char);
        plain(&self.from) && plain(&self.to) && !self.to.contains(self.from.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
}

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; SitePreserver/1.0; +https://github.com/uttardakshinvvs/vvsharma)";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: OriginConfig::default(),
            pages: strings(&[
                "index.html",
                "biography.html",
                "gallery.html",
                "video.html",
                "contact.php",
            ]),
            rename: RenameRule::default(),
            anchor_asset_extensions: strings(&[
                "pdf", "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "woff", "woff2", "ttf",
                "otf", "mp3", "wav", "ogg", "m4a",
            ]),
            css_asset_extensions: strings(&[
                "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "bmp", "avif", "woff", "woff2",
                "ttf", "otf", "eot",
            ]),
            text_extensions: strings(&["html", "htm", "css", "js", "xml", "txt", "json"]),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            host: "vvsharma.in".to_string(),
            aliases: vec!["www.vvsharma.in".to_string()],
        }
    }
}

impl Default for RenameRule {
    fn default() -> Self {
        Self {
            from: "contact.php".to_string(),
            to: "contact.html".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_secs: 2,
        }
    }
}

impl SiteConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SiteConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config.normalized())
    }

    /// Lower-case host names and strip leading dots from extensions.
    pub fn normalized(mut self) -> Self {
        self.origin.host = self.origin.host.trim().to_ascii_lowercase();
        for alias in &mut self.origin.aliases {
            *alias = alias.trim().to_ascii_lowercase();
        }
        for list in [
            &mut self.anchor_asset_extensions,
            &mut self.css_asset_extensions,
            &mut self.text_extensions,
        ] {
            for ext in list.iter_mut() {
                *ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            }
            list.retain(|ext| !ext.is_empty());
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.origin.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.pages.is_empty() {
            return Err(ConfigError::NoPages);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !self.rename.is_valid() {
            return Err(ConfigError::InvalidRename {
                from: self.rename.from.clone(),
                to: self.rename.to.clone(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_unit: Duration::from_secs(self.retry.backoff_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
