//! Site definition loading from TOML files.
//!
//! This module handles loading site definitions from the `site-definitions/` directory.

use crate::{
    definition::SiteDefinition,
    error::{Result, SiteError},
};
use harvest_core::SiteId;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Loader for site definitions from TOML files.
pub struct SiteLoader {
    /// Base directory containing site definitions
    definitions_dir: PathBuf,
}

impl SiteLoader {
    /// Create a new loader with the given definitions directory.
    ///
    /// # Errors
    /// Returns error if the directory doesn't exist.
    pub fn new(definitions_dir: impl Into<PathBuf>) -> Result<Self> {
        let definitions_dir = definitions_dir.into();

        if !definitions_dir.is_dir() {
            return Err(SiteError::DirectoryNotFound {
                path: definitions_dir.display().to_string(),
            });
        }

        Ok(Self { definitions_dir })
    }

    /// Create a loader using the default definitions directory.
    ///
    /// Looks for `site-definitions/` relative to the workspace root.
    pub fn with_default_dir() -> Result<Self> {
        let mut current_dir = std::env::current_dir()?;

        loop {
            let cargo_toml = current_dir.join("Cargo.toml");
            if let Ok(contents) = std::fs::read_to_string(&cargo_toml) {
                if contents.contains("[workspace]") {
                    return Self::new(current_dir.join("site-definitions"));
                }
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Self::new(PathBuf::from("site-definitions"))
    }

    /// Directory this loader reads from.
    #[must_use]
    pub fn definitions_dir(&self) -> &Path {
        &self.definitions_dir
    }

    /// Load a single site definition by ID.
    ///
    /// # Errors
    /// Returns error if the definition file doesn't exist, can't be read, or is invalid.
    pub fn load(&self, site_id: &SiteId) -> Result<SiteDefinition> {
        let filename = format!("{}.toml", site_id.as_str());
        let path = Self::find_file(&self.definitions_dir, &filename)?.ok_or_else(|| {
            SiteError::NotFound {
                site_id: site_id.to_string(),
            }
        })?;

        let definition = Self::load_from_path(&path)?;
        definition.validate()?;

        debug!(site_id = %site_id, name = %definition.name(), "loaded site definition");

        Ok(definition)
    }

    /// Load all site definitions from the definitions directory.
    ///
    /// Invalid definitions are logged as warnings and skipped.
    pub fn load_all(&self) -> Result<Vec<SiteDefinition>> {
        let mut definitions = Vec::new();

        Self::walk_and_load_recursive(&self.definitions_dir, &mut definitions)?;

        info!(
            count = definitions.len(),
            dir = %self.definitions_dir.display(),
            "loaded site definitions"
        );

        Ok(definitions)
    }

    fn walk_and_load_recursive(dir: &Path, definitions: &mut Vec<SiteDefinition>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                Self::walk_and_load_recursive(&path, definitions)?;
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some("toml") {
                continue;
            }

            match Self::load_from_path(&path).and_then(|d| d.validate().map(|()| d)) {
                Ok(definition) => definitions.push(definition),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping invalid site definition"
                    );
                }
            }
        }

        Ok(())
    }

    /// Recursively search for a file by name.
    fn find_file(dir: &Path, filename: &str) -> Result<Option<PathBuf>> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                if let Some(found) = Self::find_file(&path, filename)? {
                    return Ok(Some(found));
                }
            } else if path.file_name().and_then(|s| s.to_str()) == Some(filename) {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    fn load_from_path(path: &Path) -> Result<SiteDefinition> {
        let contents = std::fs::read_to_string(path).map_err(|source| SiteError::LoadError {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| SiteError::ParseError {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SITE_1688: &str = include_str!("../../../site-definitions/1688.toml");
    const SITE_AMAZON: &str = include_str!("../../../site-definitions/amazon.toml");

    fn write_definition(dir: &Path, subdir: &str, name: &str, contents: &str) -> PathBuf {
        let target = dir.join(subdir);
        std::fs::create_dir_all(&target).expect("create definition dir");
        let path = target.join(name);
        std::fs::write(&path, contents).expect("write definition");
        path
    }

    #[test]
    fn test_loader_new_with_nonexistent_dir() {
        assert!(matches!(
            SiteLoader::new("/nonexistent/site-definitions"),
            Err(SiteError::DirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_load_single_site() {
        let temp_dir = TempDir::new().expect("create temp dir");
        write_definition(temp_dir.path(), "cn", "1688.toml", SITE_1688);

        let loader = SiteLoader::new(temp_dir.path()).expect("create loader");
        let site_id = SiteId::new("1688").expect("valid site ID");
        let definition = loader.load(&site_id).expect("load site definition");

        assert_eq!(definition.id(), &site_id);
        assert_eq!(definition.storage.ids_key, "ids");
        assert_eq!(definition.pagination.page_param.as_deref(), Some("beginPage"));
    }

    #[test]
    fn test_load_nonexistent_site() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let loader = SiteLoader::new(temp_dir.path()).expect("create loader");
        let site_id = SiteId::new("nowhere").expect("valid site ID");

        assert!(matches!(
            loader.load(&site_id),
            Err(SiteError::NotFound { .. })
        ));
    }

    #[test]
    fn test_load_all_skips_invalid() {
        let temp_dir = TempDir::new().expect("create temp dir");
        write_definition(temp_dir.path(), "", "1688.toml", SITE_1688);
        write_definition(temp_dir.path(), "us", "amazon.toml", SITE_AMAZON);
        write_definition(temp_dir.path(), "", "broken.toml", "not toml [[[");
        write_definition(
            temp_dir.path(),
            "",
            "invalid.toml",
            &SITE_AMAZON.replace("https://www.amazon.com/dp/{id}", "https://www.amazon.com/"),
        );
        write_definition(temp_dir.path(), "", "notes.txt", "ignored");

        let loader = SiteLoader::new(temp_dir.path()).expect("create loader");
        let definitions = loader.load_all().expect("load all definitions");

        assert_eq!(definitions.len(), 2);
    }
}
