// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Mapping from a source path to the output paths the compiler produces
//! for it.

use anyhow::{Context, Result};
use log::debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const DECLARATION_SOURCES: &[&str] = &[".d.ts", ".d.mts", ".d.cts"];

/// (source extension, emitted extensions)
const SUFFIX_TABLE: &[(&str, &[&str])] = &[
    ("ts", &[".js", ".d.ts", ".js.map", ".d.ts.map"]),
    ("tsx", &[".js", ".d.ts", ".js.map", ".d.ts.map"]),
    ("mts", &[".mjs", ".d.mts", ".mjs.map", ".d.mts.map"]),
    ("cts", &[".cjs", ".d.cts", ".cjs.map", ".d.cts.map"]),
    ("js", &[".js", ".d.ts"]),
    ("jsx", &[".js", ".d.ts"]),
    ("mjs", &[".mjs", ".d.mts"]),
    ("cjs", &[".cjs", ".d.cts"]),
];

/// Output paths, relative to the output directory, that may exist for the
/// given source path (relative to the source directory).
///
/// Declaration sources, assets and directories map to themselves.
pub fn candidate_outputs(relative: &Path) -> Vec<PathBuf> {
    let Some(file_name) = relative.file_name().and_then(|n| n.to_str()) else {
        return vec![relative.to_path_buf()];
    };
    if DECLARATION_SOURCES.iter().any(|s| file_name.ends_with(s)) {
        return vec![relative.to_path_buf()];
    }

    let Some((stem, extension)) = file_name.rsplit_once('.') else {
        return vec![relative.to_path_buf()];
    };
    match SUFFIX_TABLE.iter().find(|(ext, _)| *ext == extension) {
        Some((_, outputs)) if !stem.is_empty() => outputs
            .iter()
            .map(|suffix| relative.with_file_name(format!("{stem}{suffix}")))
            .collect(),
        _ => vec![relative.to_path_buf()],
    }
}

/// Delete every existing output of a removed source. Directories are
/// removed recursively. Returns how many outputs were deleted.
pub fn remove_outputs(out_dir: &Path, relative: &Path) -> Result<usize> {
    let mut removed = 0;
    for candidate in candidate_outputs(relative) {
        let target = out_dir.join(&candidate);
        let metadata = match std::fs::symlink_metadata(&target) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to stat {}", target.display()));
            }
        };

        let result = if metadata.is_dir() {
            std::fs::remove_dir_all(&target)
        } else {
            std::fs::remove_file(&target)
        };
        match result {
            Ok(()) => {
                debug!("removed stale output {}", target.display());
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", target.display()));
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(path: &str) -> Vec<String> {
        candidate_outputs(Path::new(path))
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_typescript_sources() {
        assert_eq!(
            outputs("a.ts"),
            vec!["a.js", "a.d.ts", "a.js.map", "a.d.ts.map"]
        );
        assert_eq!(
            outputs("web/view.tsx"),
            vec!["web/view.js", "web/view.d.ts", "web/view.js.map", "web/view.d.ts.map"]
        );
        assert_eq!(
            outputs("esm.mts"),
            vec!["esm.mjs", "esm.d.mts", "esm.mjs.map", "esm.d.mts.map"]
        );
        assert_eq!(
            outputs("cjs.cts"),
            vec!["cjs.cjs", "cjs.d.cts", "cjs.cjs.map", "cjs.d.cts.map"]
        );
    }

    #[test]
    fn test_javascript_sources() {
        assert_eq!(outputs("lib/a.js"), vec!["lib/a.js", "lib/a.d.ts"]);
        assert_eq!(outputs("a.jsx"), vec!["a.js", "a.d.ts"]);
        assert_eq!(outputs("a.mjs"), vec!["a.mjs", "a.d.mts"]);
        assert_eq!(outputs("a.cjs"), vec!["a.cjs", "a.d.cts"]);
    }

    #[test]
    fn test_identity_mappings() {
        assert_eq!(outputs("types/global.d.ts"), vec!["types/global.d.ts"]);
        assert_eq!(outputs("config/app.json"), vec!["config/app.json"]);
        assert_eq!(outputs("views"), vec!["views"]);
        assert_eq!(outputs(".ts"), vec![".ts"]);
    }

    #[test]
    fn test_remove_outputs_deletes_existing_candidates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "x").unwrap();
        std::fs::write(dir.path().join("a.d.ts"), "x").unwrap();
        std::fs::write(dir.path().join("b.js"), "x").unwrap();

        assert_eq!(remove_outputs(dir.path(), Path::new("a.ts")).unwrap(), 2);
        assert!(!dir.path().join("a.js").exists());
        assert!(!dir.path().join("a.d.ts").exists());
        assert!(dir.path().join("b.js").exists());
    }

    #[test]
    fn test_remove_outputs_without_outputs() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(remove_outputs(dir.path(), Path::new("gone.ts")).unwrap(), 0);
    }

    #[test]
    fn test_remove_outputs_directory() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        std::fs::create_dir_all(assets.join("img")).unwrap();
        std::fs::write(assets.join("img/logo.png"), "png").unwrap();

        assert_eq!(remove_outputs(dir.path(), Path::new("assets")).unwrap(), 1);
        assert!(!assets.exists());
    }
}
