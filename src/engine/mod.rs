//! Execution engine for marionette
//!
//! The engine orchestrates:
//! 1. Loading - Read the catalog file and validate it against the registry
//! 2. Previewing - Simulate the run and show what would change
//! 3. Executing - Apply the catalog, persist state and write the report

pub mod differ;
pub mod executor;
pub mod inspect;

use anyhow::{Context, Result};
use reconcile::{Catalog, ResourceDecl, TypeRegistry};
use std::path::Path;

use crate::manifest;

pub use executor::{ApplyOptions, apply};

/// Read a catalog file into validated declarations
pub fn load_decls(path: &Path) -> Result<Vec<ResourceDecl>> {
    let decls = manifest::load(path)?;
    if decls.is_empty() {
        log::warn!("{} declares no resources", path.display());
    }
    Ok(decls)
}

pub fn build_catalog(registry: &TypeRegistry, decls: Vec<ResourceDecl>) -> Result<Catalog> {
    let count = decls.len();
    let catalog = Catalog::from_decls(registry, decls).context("Invalid catalog")?;
    log::info!("Catalog has {count} resources");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_reference_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("site.toml");
        fs::write(
            &path,
            "[[resource]]\ntype = \"service\"\ntitle = \"sshd\"\nrequire = \"File[/nope]\"\n",
        )
        .unwrap();

        let decls = load_decls(&path).unwrap();
        let err = build_catalog(&registry(), decls).unwrap_err();
        assert!(format!("{err:#}").starts_with("Invalid catalog"));
    }

    #[test]
    fn test_unknown_type_is_invalid() {
        let decls = vec![ResourceDecl::new("cron", "backup")];
        assert!(build_catalog(&registry(), decls).is_err());
    }
}
