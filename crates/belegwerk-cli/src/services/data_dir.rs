// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::{Path, PathBuf};

use belegwerk_core::error::Result;

/// Default application data directory (not created).
pub fn default_data_dir() -> PathBuf {
    dirs_fallback().join("belegwerk")
}

/// Create `dir` and the sub-directories the services expect inside it.
pub fn ensure_layout(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir.join("objects"))?;
    std::fs::create_dir_all(dir.join("output"))?;
    Ok(())
}

fn dirs_fallback() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        ensure_layout(&root).unwrap();
        assert!(root.join("objects").is_dir());
        assert!(root.join("output").is_dir());
    }

    #[test]
    fn default_dir_is_named_after_the_app() {
        assert!(default_data_dir().ends_with("belegwerk"));
    }
}
