//! Second pass over the whole output tree. Re-applies the link rewrites to
//! every text file, including files an earlier run or another tool left
//! behind, so no absolute origin reference survives.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::SiteConfig;
use crate::css_parser::CssParser;
use crate::file_manager::FileManager;
use crate::html_parser::HtmlParser;
use crate::local_path::{root_prefix, PathMapper};
use crate::mirror::is_stylesheet;
use crate::origin::Origin;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostprocessSummary {
    pub scanned: usize,
    pub rewritten: usize,
}

pub struct Postprocessor {
    html_parser: HtmlParser,
    css_parser: CssParser,
    file_manager: FileManager,
    text_extensions: Vec<String>,
}

impl Postprocessor {
    pub fn new(config: &SiteConfig, output_dir: &Path) -> Result<Self> {
        config.validate()?;

        let origin = Origin::new(&config.origin)?;
        let paths = PathMapper::new(config.rename.clone());
        let html_parser = HtmlParser::new(
            origin.clone(),
            config.rename.clone(),
            &config.anchor_asset_extensions,
        )?;
        let css_parser = CssParser::new(origin, paths, &config.css_asset_extensions);

        Ok(Self {
            html_parser,
            css_parser,
            file_manager: FileManager::new(output_dir)?,
            text_extensions: config.text_extensions.clone(),
        })
    }

    /// The rewritten form of one file's content. Stylesheets get the
    /// `url(...)`-aware rewrite; everything else the page rewrite.
    pub fn rewrite(&self, local_path: &str, content: &str) -> Result<String> {
        if is_stylesheet(local_path, None) {
            self.css_parser.relocate(content, local_path)
        } else {
            Ok(self
                .html_parser
                .rewrite_links_from(content, &root_prefix(local_path)))
        }
    }

    pub fn run(&self) -> PostprocessSummary {
        let mut summary = PostprocessSummary::default();

        for local_path in self.file_manager.files_with_extensions(&self.text_extensions) {
            summary.scanned += 1;

            let content = match self.file_manager.read_to_string(&local_path) {
                Ok(content) => content,
                Err(err) => {
                    debug!(path = %local_path, error = %err, "skipping unreadable file");
                    continue;
                }
            };

            let rewritten = match self.rewrite(&local_path, &content) {
                Ok(rewritten) => rewritten,
                Err(err) => {
                    warn!(path = %local_path, error = %err, "cannot rewrite file");
                    continue;
                }
            };

            match self.file_manager.update_file(&local_path, &rewritten) {
                Ok(true) => {
                    debug!(path = %local_path, "rewrote file");
                    summary.rewritten += 1;
                }
                Ok(false) => {}
                Err(err) => warn!(path = %local_path, error = %err, "failed to write file"),
            }
        }

        info!(scanned = summary.scanned, rewritten = summary.rewritten, "postprocess finished");
        summary
    }
}
