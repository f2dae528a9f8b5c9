use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

use crate::config::RenameRule;

/// A second origin URL mapped onto a local path another URL already owns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{rejected} maps to {local_path}, already written for {owner}")]
pub struct PathCollision {
    pub local_path: String,
    pub owner: Url,
    pub rejected: Url,
}

/// Maps canonical origin URLs onto `./`-prefixed paths in the output tree.
#[derive(Debug, Clone)]
pub struct PathMapper {
    rename: RenameRule,
}

impl PathMapper {
    pub fn new(rename: RenameRule) -> Self {
        Self { rename }
    }

    /// `https://host/img/foo.jpg` -> `./img/foo.jpg`
    ///
    /// Segments are percent-decoded (`photo%201.jpg` -> `photo 1.jpg`), since
    /// a static server decodes the request path before it looks for the file.
    pub fn local_path_for(&self, url: &Url) -> String {
        let mut path = url
            .path()
            .trim_start_matches('/')
            .split('/')
            .map(decode_segment)
            .collect::<Vec<_>>()
            .join("/");

        // A directory URL would otherwise map onto a directory.
        if path.is_empty() || path.ends_with('/') {
            path.push_str("index.html");
        }

        format!("./{}", self.rename_file_name(&path))
    }

    /// Apply the rename rule to the last segment of a `/`-separated path.
    pub fn rename_file_name(&self, path: &str) -> String {
        let (dir, file) = match path.rfind('/') {
            Some(idx) => path.split_at(idx + 1),
            None => ("", path),
        };

        if file == self.rename.from {
            format!("{}{}", dir, self.rename.to)
        } else {
            path.to_string()
        }
    }
}

/// A segment that decodes to a separator or a dot segment would change the
/// tree shape, so it stays encoded.
fn decode_segment(segment: &str) -> Cow<'_, str> {
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    if decoded.contains(&['/', '\\', '\0'][..]) || decoded == "." || decoded == ".." {
        Cow::Borrowed(segment)
    } else {
        decoded
    }
}

/// Relative prefix from the directory of `local_path` back to the output
/// root: `./` at the root, one `../` per directory level below it.
pub fn root_prefix(local_path: &str) -> String {
    match local_path.trim_start_matches("./").matches('/').count() {
        0 => "./".to_string(),
        depth => "../".repeat(depth),
    }
}

/// Local paths written during one run and the URL each was written for.
#[derive(Debug, Default)]
pub struct PathClaims {
    owners: HashMap<String, Url>,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `url` as the owner of `local_path`. Claiming the same pair again
    /// is fine; a different URL for an owned path is a collision.
    pub fn claim(&mut self, local_path: &str, url: &Url) -> Result<(), PathCollision> {
        match self.owners.get(local_path) {
            Some(owner) if owner == url => Ok(()),
            Some(owner) => Err(PathCollision {
                local_path: local_path.to_string(),
                owner: owner.clone(),
                rejected: url.clone(),
            }),
            None => {
                self.owners.insert(local_path.to_string(), url.clone());
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
