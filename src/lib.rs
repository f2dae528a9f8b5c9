pub mod cli;
pub mod config;
pub mod css_parser;
pub mod fetch;
pub mod file_manager;
pub mod html_parser;
pub mod local_path;
pub mod logging;
pub mod mirror;
pub mod origin;
pub mod postprocess;

// Re-export main types for convenience
pub use cli::{Command, PreserveCommand};
pub use config::{ConfigError, SiteConfig};
pub use css_parser::{AssetRef, CssParser};
pub use fetch::{Fetch, FetchError, Fetched, HttpFetcher, RetryPolicy, RetryingFetcher};
pub use file_manager::FileManager;
pub use html_parser::HtmlParser;
pub use local_path::{PathClaims, PathCollision, PathMapper};
pub use mirror::{MirrorSummary, SiteMirror};
pub use origin::Origin;
pub use postprocess::{PostprocessSummary, Postprocessor};
