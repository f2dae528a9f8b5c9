use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The output tree. Every path handed in is a `./`-prefixed local path as
/// produced by `PathMapper`.
#[derive(Clone)]
pub struct FileManager {
    base_dir: PathBuf,
}

impl FileManager {
    pub fn new(base_dir: &Path) -> Result<Self> {
        let base_dir = base_dir.to_path_buf();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create base directory: {:?}", base_dir))?;

        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute location of a local path under the base directory.
    pub fn resolve(&self, local_path: &str) -> PathBuf {
        let mut path = self.base_dir.clone();
        for segment in local_path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            path.push(segment);
        }
        path
    }

    pub fn save_file(&self, local_path: &str, content: &[u8]) -> Result<PathBuf> {
        let file_path = self.resolve(local_path);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        fs::write(&file_path, content)
            .with_context(|| format!("Failed to write to file: {:?}", file_path))?;

        Ok(file_path)
    }

    pub fn read_to_string(&self, local_path: &str) -> Result<String> {
        let file_path = self.resolve(local_path);
        fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read file: {:?}", file_path))
    }

    /// Write `content` only if it differs from what is on disk. Returns
    /// whether the file changed.
    pub fn update_file(&self, local_path: &str, content: &str) -> Result<bool> {
        match self.read_to_string(local_path) {
            Ok(existing) if existing == content => Ok(false),
            _ => self.save_file(local_path, content.as_bytes()).map(|_| true),
        }
    }

    pub fn file_exists(&self, local_path: &str) -> bool {
        self.resolve(local_path).is_file()
    }

    /// Local paths (`./`-prefixed, `/`-separated) of every file whose
    /// extension is in `extensions`, sorted.
    pub fn files_with_extensions(&self, extensions: &[String]) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(&self.base_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
                    .unwrap_or(false)
            })
            .filter_map(|e| self.local_path_of(e.path()))
            .collect();
        files.sort();
        files
    }

    fn local_path_of(&self, file_path: &Path) -> Option<String> {
        let relative = file_path.strip_prefix(&self.base_dir).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("./{}", segments.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_creates_intermediate_directories() {
        let temp_dir = tempdir().unwrap();
        let file_manager = FileManager::new(temp_dir.path()).unwrap();

        let saved = file_manager
            .save_file("./assets/css/site.css", b"body { color: red; }")
            .unwrap();

        assert_eq!(saved, temp_dir.path().join("assets").join("css").join("site.css"));
        assert_eq!(fs::read(&saved).unwrap(), b"body { color: red; }");
        assert!(file_manager.file_exists("./assets/css/site.css"));
        assert!(!file_manager.file_exists("./assets/css"));
    }

    #[test]
    fn test_read_missing_file_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let file_manager = FileManager::new(temp_dir.path()).unwrap();
        assert!(file_manager.read_to_string("./nope.css").is_err());
    }

    #[test]
    fn test_update_file_skips_identical_content() {
        let temp_dir = tempdir().unwrap();
        let file_manager = FileManager::new(temp_dir.path()).unwrap();

        assert!(file_manager.update_file("./index.html", "<p>a</p>").unwrap());
        assert!(!file_manager.update_file("./index.html", "<p>a</p>").unwrap());
        assert!(file_manager.update_file("./index.html", "<p>b</p>").unwrap());
        assert_eq!(file_manager.read_to_string("./index.html").unwrap(), "<p>b</p>");
    }

    #[test]
    fn test_files_with_extensions() {
        let temp_dir = tempdir().unwrap();
        let file_manager = FileManager::new(temp_dir.path()).unwrap();

        for path in ["./index.html", "./css/a.CSS", "./img/a.png", "./js/x/app.js"] {
            file_manager.save_file(path, b"x").unwrap();
        }

        let extensions = ["html".to_string(), "css".to_string(), "js".to_string()];
        let found = file_manager.files_with_extensions(&extensions);
        assert_eq!(found, vec!["./css/a.CSS", "./index.html", "./js/x/app.js"]);
    }
}
