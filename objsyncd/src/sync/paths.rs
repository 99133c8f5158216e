use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_LOCAL_DIR_NAME: &str = "objsync_dir";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("remote prefix is empty")]
    EmptyPrefix,
    #[error("cannot resolve local directory {path:?}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Collapses trailing separators so the prefix ends with exactly one `/`.
pub fn normalize_prefix(prefix: &str) -> Result<String, PathError> {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(PathError::EmptyPrefix);
    }
    Ok(format!("{trimmed}/"))
}

/// Trailing component of a key, used as the local file name.
///
/// Directory placeholders (`"data/"`) and names that would escape the local
/// directory (`"."`, `".."`) have no usable base name.
pub fn base_name(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

/// Makes `dir` absolute against the current directory. An empty path falls
/// back to [`DEFAULT_LOCAL_DIR_NAME`].
pub fn resolve_local_dir(dir: &Path) -> Result<PathBuf, PathError> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(DEFAULT_LOCAL_DIR_NAME)
    } else {
        dir
    };
    std::path::absolute(dir).map_err(|source| PathError::Resolve {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_gets_single_trailing_separator() {
        assert_eq!(normalize_prefix("images").unwrap(), "images/");
        assert_eq!(normalize_prefix("images/").unwrap(), "images/");
        assert_eq!(normalize_prefix("a/b///").unwrap(), "a/b/");
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(matches!(normalize_prefix(""), Err(PathError::EmptyPrefix)));
        assert!(matches!(normalize_prefix("//"), Err(PathError::EmptyPrefix)));
    }

    #[test]
    fn base_name_is_last_component() {
        assert_eq!(base_name("images/2024/a.json"), Some("a.json"));
        assert_eq!(base_name("a.json"), Some("a.json"));
        assert_eq!(base_name("images/"), None);
        assert_eq!(base_name("images/.."), None);
    }

    #[test]
    fn local_dir_is_made_absolute() {
        let resolved = resolve_local_dir(Path::new("data/in")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("data/in"));

        let fallback = resolve_local_dir(Path::new("")).unwrap();
        assert!(fallback.ends_with(DEFAULT_LOCAL_DIR_NAME));
    }
}
