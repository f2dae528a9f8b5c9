use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::SiteConfig;

#[derive(Parser, Debug)]
#[command(
    name = "site-preserver",
    about = "Mirror a small website into a relocatable static copy",
    version,
    long_about = "Downloads a fixed list of pages plus the images, stylesheets, scripts, fonts, \
                  audio and documents they reference. Rewrites links to relative form so the \
                  copy can be served from any directory."
)]
pub struct PreserveCommand {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the pages and their assets into the output directory
    Mirror(MirrorArgs),
    /// Re-apply the link rewrites to every text file in the output directory
    Postprocess(SiteArgs),
}

#[derive(Args, Debug)]
pub struct SiteArgs {
    /// JSON config file (origin, pages, rename rule, extension lists)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory for the mirrored site
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Origin host to mirror; replaces the configured host and its aliases
    #[arg(long)]
    pub origin: Option<String>,
}

#[derive(Args, Debug)]
pub struct MirrorArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    /// Page to fetch, relative to the site root. Repeat to list several;
    /// replaces the configured page list
    #[arg(short, long = "page")]
    pub pages: Vec<String>,

    /// User agent string to use for requests
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Timeout for requests in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Attempts per resource before it is skipped
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Run the postprocess pass once mirroring is done
    #[arg(long)]
    pub postprocess: bool,

    /// Show a progress bar while downloading assets
    #[arg(long)]
    pub progress: bool,
}

impl SiteArgs {
    pub fn load_config(&self) -> Result<SiteConfig> {
        let mut config = match &self.config {
            Some(path) => SiteConfig::from_file(path)?,
            None => SiteConfig::default(),
        };

        if let Some(origin) = &self.origin {
            config.origin.host = origin.clone();
            config.origin.aliases.clear();
        }

        Ok(config.normalized())
    }
}

impl MirrorArgs {
    pub fn load_config(&self) -> Result<SiteConfig> {
        let mut config = self.site.load_config()?;

        if !self.pages.is_empty() {
            config.pages = self.pages.clone();
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }

        Ok(config)
    }
}
