use anyhow::Result;
use clap::Parser;
use colored::*;
use std::path::Path;

use site_preserver::cli::{Command, PreserveCommand};
use site_preserver::{logging, HttpFetcher, Postprocessor, RetryingFetcher, SiteConfig, SiteMirror};

#[tokio::main]
async fn main() -> Result<()> {
    let args = PreserveCommand::parse();
    logging::init()?;

    match args.command {
        Command::Mirror(mirror_args) => {
            let config = mirror_args.load_config()?;
            let output_dir = mirror_args.site.output_dir.as_path();

            let fetcher = RetryingFetcher::new(
                HttpFetcher::new(&config.user_agent, config.timeout())?,
                config.retry_policy(),
            );
            let mirror = SiteMirror::new(config.clone(), output_dir, fetcher)?
                .with_progress(mirror_args.progress);

            let summary = mirror.mirror_website().await?;
            println!("✅ Fetched {}", summary.to_string().green());

            if mirror_args.postprocess {
                postprocess(&config, output_dir)?;
            }
        }
        Command::Postprocess(site_args) => {
            let config = site_args.load_config()?;
            postprocess(&config, &site_args.output_dir)?;
        }
    }

    Ok(())
}

fn postprocess(config: &SiteConfig, output_dir: &Path) -> Result<()> {
    let summary = Postprocessor::new(config, output_dir)?.run();
    println!(
        "🔗 Postprocess link rewrite done: {} of {} file(s) changed",
        summary.rewritten.to_string().cyan(),
        summary.scanned
    );
    Ok(())
}
