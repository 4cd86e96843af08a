//! Compiled catalog files
//!
//! A catalog is a TOML document with one `[[resource]]` table per resource.
//! `type` and `title` are required; every other key is an attribute:
//!
//! ```toml
//! [[resource]]
//! type = "file"
//! title = "/etc/motd"
//! content = "hello\n"
//! mode = "0644"
//!
//! [[resource]]
//! type = "service"
//! title = "sshd"
//! ensure = "running"
//! subscribe = ["File[/etc/motd]"]
//! ```

use reconcile::ResourceDecl;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not read catalog {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{path}: resource #{index} has an empty {field}")]
    Empty {
        path: PathBuf,
        index: usize,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    resource: Vec<ResourceDecl>,
}

/// Read every resource declaration from a catalog file
pub fn load(path: &Path) -> Result<Vec<ResourceDecl>, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let decls = parse(&content, path)?;
    log::debug!("Loaded {} declarations from {}", decls.len(), path.display());
    Ok(decls)
}

pub fn parse(content: &str, path: &Path) -> Result<Vec<ResourceDecl>, ManifestError> {
    let file: CatalogFile = toml::from_str(content).map_err(|e| ManifestError::Parse {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;

    file.resource
        .into_iter()
        .enumerate()
        .map(|(index, mut decl)| {
            let empty = |field| ManifestError::Empty {
                path: path.to_path_buf(),
                index: index + 1,
                field,
            };
            if decl.type_name.trim().is_empty() {
                return Err(empty("type"));
            }
            if decl.title.trim().is_empty() {
                return Err(empty("title"));
            }
            decl.type_name = decl.type_name.to_lowercase();
            Ok(decl)
        })
        .collect()
}
