//! `file` resources: plain files and directories
//!
//! Content is compared by blake3 checksum (`{blake3}<hex>`), so large files
//! are never held twice in memory and reports stay small. Owners and groups
//! may be given by name or id; names are resolved through `/etc/passwd` and
//! `/etc/group`, read once per transaction.

use anyhow::{Context, Result, bail};
use reconcile::{
    Catalog, Confine, Listing, ParamSpec, PropertySpec, Provider, ProviderContext, ProviderDescriptor,
    Resource, ResourceDecl, ResourceRef, TypeDescriptor, Value,
};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use walkdir::WalkDir;

use super::munge_bool;

const CHECKSUM_PREFIX: &str = "{blake3}";
const PASSWD: &str = "/etc/passwd";
const GROUP: &str = "/etc/group";

/// Attributes a recursing directory hands to the files it generates
const INHERITED: &[&str] = &["owner", "group", "mode", "force"];

pub fn descriptor() -> TypeDescriptor {
    TypeDescriptor::new("file", "path")
        .doc("Files and directories, their content, ownership and permissions")
        .namevar_munge(munge_path)
        .property(
            PropertySpec::ensure()
                .munge(munge_file_ensure)
                .value_event("directory", "directory_created"),
        )
        .property(PropertySpec::new("content").event("file_changed"))
        .property(PropertySpec::new("owner").event("inode_changed"))
        .property(PropertySpec::new("group").event("inode_changed"))
        .property(
            PropertySpec::new("mode")
                .munge(munge_mode)
                .event("inode_changed"),
        )
        .parameter(ParamSpec::new("recurse").munge(munge_bool))
        .parameter(ParamSpec::new("recurselimit").munge(munge_recurselimit))
        .parameter(ParamSpec::new("purge").munge(munge_bool))
        .parameter(ParamSpec::new("force").munge(munge_bool))
        .autorequire(parent_directories)
        .generator(generate_children)
}

pub fn providers() -> Vec<ProviderDescriptor> {
    vec![ProviderDescriptor::new("posix", "file", posix).confine(Confine::Feature("posix"))]
}

fn posix() -> Box<dyn Provider> {
    Box::new(PosixFile)
}

// ============================================================================
// Validation
// ============================================================================

/// Paths must be absolute; trailing slashes are dropped
fn munge_path(raw: &Value) -> Result<Value, String> {
    let path = raw.to_string();
    if !Path::new(&path).is_absolute() {
        return Err(format!("File paths must be fully qualified, not '{path}'"));
    }
    let trimmed = path.trim_end_matches('/');
    Ok(Value::from(if trimmed.is_empty() { "/" } else { trimmed }))
}

fn munge_file_ensure(raw: &Value) -> Result<Value, String> {
    match raw.as_str() {
        Some("absent") => Ok(Value::Absent),
        Some("present") => Ok(Value::Present),
        Some(kind @ ("file" | "directory")) => Ok(Value::from(kind)),
        _ => Err(format!(
            "'{raw}' is not one of file, directory, present, absent"
        )),
    }
}

/// Normalise to four octal digits, e.g. `644` to `0644`
pub fn munge_mode(raw: &Value) -> Result<Value, String> {
    let digits = match raw {
        Value::Integer(i) if *i >= 0 => i.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(format!("'{raw}' is not a valid file mode")),
    };
    let valid = (3..=4).contains(&digits.len()) && digits.chars().all(|c| ('0'..='7').contains(&c));
    if !valid {
        return Err(format!("'{raw}' is not a valid file mode"));
    }
    Ok(Value::from(format!("{digits:0>4}")))
}

fn munge_recurselimit(raw: &Value) -> Result<Value, String> {
    raw.as_i64()
        .filter(|n| *n >= 0)
        .map(Value::Integer)
        .ok_or_else(|| format!("'{raw}' is not a valid recursion limit"))
}

fn parse_mode(value: &Value) -> Result<u32> {
    let text = value.to_string();
    u32::from_str_radix(&text, 8).with_context(|| format!("'{text}' is not a valid file mode"))
}

fn format_mode(mode: u32) -> String {
    format!("{:04o}", mode & 0o7777)
}

// ============================================================================
// Relationships
// ============================================================================

/// Every ancestor directory managed in the same catalog
fn parent_directories(resource: &Resource) -> Vec<ResourceRef> {
    Path::new(&resource.name)
        .ancestors()
        .skip(1)
        .map(|dir| ResourceRef::new("file", dir.display().to_string()))
        .collect()
}

/// Add search bits wherever read bits are set; directories get this
/// treatment so `0644` stays traversable
fn with_search_bits(mode: u32) -> u32 {
    let mut mode = mode;
    for (read, search) in [(0o400, 0o100), (0o040, 0o010), (0o004, 0o001)] {
        if mode & read != 0 {
            mode |= search;
        }
    }
    mode
}

/// Whether a declared file lives somewhere below `dir`
fn holds_declared(catalog: &Catalog, dir: &Path) -> bool {
    catalog.resources().iter().any(|r| {
        let path = Path::new(&r.name);
        r.type_name() == "file" && r.generated_by.is_none() && path != dir && path.starts_with(dir)
    })
}

/// Declarations for everything below a recursing directory
///
/// With `purge`, anything not declared elsewhere in the catalog is marked
/// absent. Directories holding declared files are kept, and the contents of
/// a purged directory go with it.
fn generate_children(resource: &Resource, catalog: &Catalog) -> Result<Vec<ResourceDecl>> {
    if !resource.param_bool("recurse") || resource.deleting() {
        return Ok(Vec::new());
    }
    let root = Path::new(&resource.name);
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let purge = resource.param_bool("purge");
    let mut walker = WalkDir::new(root).min_depth(1).follow_links(false).sort_by_file_name();
    if let Some(limit) = resource.param("recurselimit").and_then(Value::as_i64) {
        walker = walker.max_depth(usize::try_from(limit).unwrap_or(usize::MAX));
    }

    let mut children = Vec::new();
    let mut entries = walker.into_iter();
    while let Some(entry) = entries.next() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let mut decl = ResourceDecl::new("file", entry.path().display().to_string());

        for name in INHERITED {
            let value = resource.should(name).or_else(|| resource.param(name));
            if let Some(value) = value {
                decl = decl.with(name, value.clone());
            }
        }
        if purge && !holds_declared(catalog, entry.path()) {
            decl = decl.with("ensure", "absent");
            if entry.file_type().is_dir() {
                entries.skip_current_dir();
            }
        }
        children.push(decl);
    }
    log::debug!(
        "{resource}: generated {} child file resources",
        children.len()
    );
    Ok(children)
}

// ============================================================================
// Provider
// ============================================================================

#[derive(Debug, Default)]
struct PosixFile;

impl PosixFile {
    fn apply_metadata(ctx: &mut ProviderContext<'_>, resource: &Resource, path: &Path) -> Result<()> {
        if let Some(mode) = resource.should("mode") {
            set_mode(path, mode)?;
        }
        let owner = resource.should("owner").map(|o| resolve_id(ctx, PASSWD, o)).transpose()?;
        let group = resource.should("group").map(|g| resolve_id(ctx, GROUP, g)).transpose()?;
        if owner.is_some() || group.is_some() {
            std::os::unix::fs::chown(path, owner, group)
                .with_context(|| format!("Failed to change ownership of {}", path.display()))?;
        }
        Ok(())
    }

    fn create(ctx: &mut ProviderContext<'_>, resource: &Resource, path: &Path, kind: &Value) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.is_dir()
        {
            bail!(
                "Cannot create {}; parent directory {} does not exist",
                path.display(),
                parent.display()
            );
        }

        if kind.as_str() == Some("directory") {
            fs::create_dir(path)
                .with_context(|| format!("Failed to create directory {}", path.display()))?;
        } else {
            let content = resource.should("content").map(ToString::to_string).unwrap_or_default();
            fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Self::apply_metadata(ctx, resource, path)
    }

    fn remove(resource: &Resource, path: &Path) -> Result<()> {
        let metadata = fs::symlink_metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if metadata.is_dir() {
            if !resource.param_bool("force") {
                bail!("Not removing directory {}; use 'force' to override", path.display());
            }
            fs::remove_dir_all(path)
                .with_context(|| format!("Failed to remove directory {}", path.display()))
        } else {
            fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))
        }
    }

    fn sync_ensure(ctx: &mut ProviderContext<'_>, resource: &Resource, path: &Path, should: &Value) -> Result<()> {
        let current = fs::symlink_metadata(path).ok();
        match (should, current) {
            (Value::Absent, Some(_)) => Self::remove(resource, path),
            (Value::Absent, None) => Ok(()),
            (_, None) => Self::create(ctx, resource, path, should),
            (_, Some(metadata)) => {
                // Switching between file and directory replaces the object
                if metadata.is_dir() && !resource.param_bool("force") {
                    bail!(
                        "Could not replace directory {} with a file; use 'force' to override",
                        path.display()
                    );
                }
                Self::remove(resource, path)?;
                Self::create(ctx, resource, path, should)
            }
        }
    }
}

impl Provider for PosixFile {
    fn retrieve(
        &mut self,
        _ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
    ) -> Result<Value> {
        let path = Path::new(&resource.name);
        let Ok(metadata) = fs::symlink_metadata(path) else {
            return Ok(Value::Absent);
        };
        let value = match property {
            "ensure" if metadata.is_dir() => Value::from("directory"),
            "ensure" if metadata.file_type().is_symlink() => Value::from("link"),
            "ensure" => Value::from("file"),
            "content" if metadata.is_file() => Value::from(checksum_file(path)?),
            "content" => Value::Absent,
            "owner" => Value::Integer(i64::from(metadata.uid())),
            "group" => Value::Integer(i64::from(metadata.gid())),
            "mode" => Value::from(format_mode(metadata.mode())),
            other => bail!("file has no property '{other}'"),
        };
        Ok(value)
    }

    fn sync(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Result<Option<String>> {
        let path = Path::new(&resource.name);
        match property {
            "ensure" => Self::sync_ensure(ctx, resource, path, should)?,
            "content" => {
                if path.is_dir() {
                    bail!("Cannot set content on directory {}", path.display());
                }
                fs::write(path, should.to_string())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            "owner" => {
                let uid = resolve_id(ctx, PASSWD, should)?;
                std::os::unix::fs::chown(path, Some(uid), None)
                    .with_context(|| format!("Failed to set owner of {}", path.display()))?;
            }
            "group" => {
                let gid = resolve_id(ctx, GROUP, should)?;
                std::os::unix::fs::chown(path, None, Some(gid))
                    .with_context(|| format!("Failed to set group of {}", path.display()))?;
            }
            "mode" => set_mode(path, should)?,
            other => bail!("file has no property '{other}'"),
        }
        Ok(None)
    }

    fn canonicalize(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        _resource: &Resource,
        property: &str,
        value: &Value,
    ) -> Value {
        match property {
            "content" => match value {
                Value::String(s) if s.starts_with(CHECKSUM_PREFIX) => value.clone(),
                Value::String(s) => Value::from(checksum(s.as_bytes())),
                other => other.clone(),
            },
            "owner" | "group" => {
                let table = if property == "owner" { PASSWD } else { GROUP };
                lookup_id(ctx, table, value)
                    .map_or_else(|| value.clone(), |id| Value::Integer(i64::from(id)))
            }
            _ => value.clone(),
        }
    }

    fn canonicalize_should(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Value {
        let is_dir = Path::new(&resource.name).is_dir();
        if property == "mode"
            && is_dir
            && let Ok(mode) = parse_mode(should)
        {
            return Value::from(format_mode(with_search_bits(mode)));
        }
        self.canonicalize(ctx, resource, property, should)
    }

    fn describe_change(
        &mut self,
        _ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        _is: &Value,
        should: &Value,
    ) -> Option<String> {
        if property != "content" {
            return None;
        }
        let Value::String(new) = should else {
            return None;
        };
        let old = fs::read_to_string(&resource.name).unwrap_or_default();
        let diff = similar::TextDiff::from_lines(&old, new);
        Some(
            diff.unified_diff()
                .context_radius(3)
                .header(&resource.name, &resource.name)
                .to_string(),
        )
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn checksum(bytes: &[u8]) -> String {
    format!("{CHECKSUM_PREFIX}{}", blake3::hash(bytes).to_hex())
}

fn checksum_file(path: &Path) -> Result<String> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(checksum(&content))
}

fn set_mode(path: &Path, mode: &Value) -> Result<()> {
    let mut mode = parse_mode(mode)?;
    if path.is_dir() {
        mode = with_search_bits(mode);
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set mode of {}", path.display()))
}

/// Parse `name:x:id:...` lines from passwd or group files into name to id
pub fn parse_id_table(content: &str) -> Listing {
    content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let id = fields.nth(1)?;
            (!name.is_empty()).then(|| (name.to_string(), id.to_string()))
        })
        .collect()
}

fn lookup_id(ctx: &mut ProviderContext<'_>, table: &str, value: &Value) -> Option<u32> {
    if let Some(id) = value.as_i64() {
        return u32::try_from(id).ok();
    }
    let name = value.as_str()?;
    let listing = ctx
        .cache
        .get_or_load(table, || {
            let content = fs::read_to_string(table).with_context(|| format!("Failed to read {table}"))?;
            Ok(parse_id_table(&content))
        })
        .map_err(|e| log::debug!("{e:#}"))
        .ok()?;
    listing.get(name)?.parse().ok()
}

fn resolve_id(ctx: &mut ProviderContext<'_>, table: &str, value: &Value) -> Result<u32> {
    lookup_id(ctx, table, value).with_context(|| {
        let kind = if table == PASSWD { "user" } else { "group" };
        format!("Could not find {kind} {value}")
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{registry, testing::RecordingRunner};
    use reconcile::{
        ChangeStatus, EventStatus, MemoryStorage, NoProgress, Report, StaticProbe, Transaction,
        TransactionOptions, ValidationError,
    };
    use tempfile::TempDir;

    fn probe() -> StaticProbe {
        StaticProbe::new().with_feature("posix")
    }

    fn apply(decls: Vec<ResourceDecl>, noop: bool) -> Report {
        let registry = registry();
        let catalog = Catalog::from_decls(&registry, decls).unwrap();
        let runner = RecordingRunner::new();
        let probe = probe();
        let mut storage = MemoryStorage::new();
        Transaction::new(catalog, &registry, &runner, &probe, &mut storage)
            .with_options(TransactionOptions {
                noop,
                show_diff: true,
                ..TransactionOptions::default()
            })
            .evaluate(&mut NoProgress)
            .unwrap()
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    fn path_str(path: &Path) -> String {
        path.display().to_string()
    }

    #[test]
    fn test_munge_mode() {
        assert_eq!(munge_mode(&Value::from("644")), Ok(Value::from("0644")));
        assert_eq!(munge_mode(&Value::Integer(755)), Ok(Value::from("0755")));
        assert_eq!(munge_mode(&Value::from("2775")), Ok(Value::from("2775")));
        assert!(munge_mode(&Value::from("0999")).is_err());
        assert!(munge_mode(&Value::from("rw-r--r--")).is_err());
    }

    #[test]
    fn test_search_bits() {
        assert_eq!(with_search_bits(0o644), 0o755);
        assert_eq!(with_search_bits(0o600), 0o700);
        assert_eq!(with_search_bits(0o640), 0o750);
    }

    #[test]
    fn test_parse_id_table() {
        let table = parse_id_table("root:x:0:0:root:/root:/bin/bash\n# comment\nwww-data:x:33:33::/var/www:/usr/sbin/nologin\n");
        assert_eq!(table["root"], "0");
        assert_eq!(table["www-data"], "33");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_parent_directories() {
        let registry = registry();
        let catalog = Catalog::from_decls(
            &registry,
            vec![
                ResourceDecl::new("file", "/srv/app/config.toml"),
                ResourceDecl::new("file", "/srv").with("ensure", "directory"),
            ],
        )
        .unwrap();
        let edges: Vec<_> = catalog.relationships().iter().map(|r| (r.source.0, r.target.0)).collect();
        assert_eq!(edges, vec![(1, 0)]);
    }

    #[test]
    fn test_mode_change_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let decl = ResourceDecl::new("file", path_str(&path))
            .with("ensure", "file")
            .with("mode", "0644");
        let report = apply(vec![decl.clone()], false);

        assert_eq!(report.exit_status(), 2);
        assert_eq!(mode_of(&path), 0o644);
        let status = &report.resource_statuses[0];
        assert_eq!(status.change_count, 1);
        assert_eq!(status.changes[0].message, "mode changed '0600' to '0644'");
        assert_eq!(status.events[0].name, "inode_changed");

        // Second run finds nothing to do
        let report = apply(vec![decl], false);
        assert_eq!(report.exit_status(), 0);
        assert!(report.resource_statuses[0].events.is_empty());
    }

    #[test]
    fn test_create_with_content_and_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motd");
        let report = apply(
            vec![
                ResourceDecl::new("file", path_str(&path))
                    .with("ensure", "file")
                    .with("content", "hello\n")
                    .with("mode", "0640"),
            ],
            false,
        );

        assert_eq!(report.exit_status(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        assert_eq!(mode_of(&path), 0o640);
        let status = &report.resource_statuses[0];
        assert_eq!(status.events[0].name, "file_created");
        assert_eq!(status.changes[0].message, "created");
    }

    #[test]
    fn test_content_change_reports_checksums_and_diff() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motd");
        fs::write(&path, "old\n").unwrap();

        let report = apply(
            vec![ResourceDecl::new("file", path_str(&path)).with("content", "new\n")],
            true,
        );

        assert_eq!(fs::read_to_string(&path).unwrap(), "old\n");
        let change = &report.resource_statuses[0].changes[0];
        assert_eq!(change.status, ChangeStatus::Noop);
        assert_eq!(change.should, Value::from(checksum(b"new\n")));
        assert_eq!(change.is, Some(Value::from(checksum(b"old\n"))));
        let diff = change.detail.as_deref().unwrap();
        assert!(diff.contains("-old"));
        assert!(diff.contains("+new"));
        assert_eq!(report.resource_statuses[0].events[0].status, EventStatus::Noop);
    }

    #[test]
    fn test_directory_creation_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf.d");
        let report = apply(
            vec![ResourceDecl::new("file", path_str(&path)).with("ensure", "directory")],
            false,
        );
        assert!(path.is_dir());
        assert_eq!(report.resource_statuses[0].events[0].name, "directory_created");
    }

    #[test]
    fn test_directory_mode_gains_search_bits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared");
        fs::create_dir(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).unwrap();

        let decl = ResourceDecl::new("file", path_str(&path)).with("mode", "0644");
        let report = apply(vec![decl.clone()], false);
        assert_eq!(mode_of(&path), 0o755);
        assert_eq!(
            report.resource_statuses[0].changes[0].message,
            "mode changed '0700' to '0755'"
        );

        assert_eq!(apply(vec![decl], false).exit_status(), 0);
    }

    #[test]
    fn test_missing_parent_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("f");
        let report = apply(
            vec![ResourceDecl::new("file", path_str(&path)).with("ensure", "file")],
            false,
        );
        assert_eq!(report.exit_status(), 4);
        assert!(report.resource_statuses[0].changes[0].message.contains("parent directory"));
    }

    #[test]
    fn test_remove_directory_needs_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d");
        fs::create_dir(&path).unwrap();

        let decl = ResourceDecl::new("file", path_str(&path)).with("ensure", "absent");
        let report = apply(vec![decl.clone()], false);
        assert_eq!(report.exit_status(), 4);
        assert!(path.exists());

        let report = apply(vec![decl.with("force", true)], false);
        assert_eq!(report.exit_status(), 2);
        assert!(!path.exists());
        assert_eq!(report.resource_statuses[0].events[0].name, "file_removed");
    }

    #[test]
    fn test_absent_file_stays_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone");
        let report = apply(
            vec![
                ResourceDecl::new("file", path_str(&path))
                    .with("ensure", "absent")
                    .with("mode", "0644"),
            ],
            false,
        );
        assert_eq!(report.exit_status(), 0);
        assert!(report.resource_statuses[0].changes.is_empty());
    }

    #[test]
    fn test_owner_by_current_uid_is_in_sync() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "x").unwrap();
        let uid = fs::metadata(&path).unwrap().uid();
        let report = apply(
            vec![ResourceDecl::new("file", path_str(&path)).with("owner", i64::from(uid))],
            false,
        );
        assert_eq!(report.exit_status(), 0);
    }

    #[test]
    fn test_recurse_manages_children() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("site");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("sub").join("b.txt"), "b").unwrap();
        for path in [root.join("a.txt"), root.join("sub").join("b.txt")] {
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        }
        fs::set_permissions(root.join("sub"), fs::Permissions::from_mode(0o700)).unwrap();

        let report = apply(
            vec![
                ResourceDecl::new("file", path_str(&root))
                    .with("ensure", "directory")
                    .with("recurse", true)
                    .with("mode", "0644"),
            ],
            false,
        );

        assert_eq!(report.exit_status(), 2);
        assert_eq!(mode_of(&root.join("a.txt")), 0o644);
        assert_eq!(mode_of(&root.join("sub").join("b.txt")), 0o644);
        assert_eq!(mode_of(&root.join("sub")), 0o755);
        assert_eq!(report.resource_statuses.len(), 4);
    }

    #[test]
    fn test_purge_removes_unmanaged_children() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("conf.d");
        fs::create_dir_all(root.join("old")).unwrap();
        fs::write(root.join("keep.conf"), "keep").unwrap();
        fs::write(root.join("stale.conf"), "stale").unwrap();

        let report = apply(
            vec![
                ResourceDecl::new("file", path_str(&root))
                    .with("ensure", "directory")
                    .with("recurse", true)
                    .with("recurselimit", 1_i64)
                    .with("purge", true)
                    .with("force", true),
                ResourceDecl::new("file", path_str(&root.join("keep.conf")))
                    .with("content", "keep"),
            ],
            false,
        );

        assert_eq!(report.exit_status(), 2);
        assert!(root.join("keep.conf").exists());
        assert!(!root.join("stale.conf").exists());
        assert!(!root.join("old").exists());
    }

    #[test]
    fn test_purge_keeps_directories_holding_declared_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("conf.d");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("stale.conf"), "stale").unwrap();
        fs::write(root.join("old.conf"), "old").unwrap();
        let keep = root.join("sub").join("keep.conf");

        let decls = vec![
            ResourceDecl::new("file", path_str(&root))
                .with("ensure", "directory")
                .with("recurse", true)
                .with("purge", true),
            ResourceDecl::new("file", path_str(&keep)).with("content", "keep"),
        ];
        let report = apply(decls.clone(), false);

        assert_eq!(report.exit_status(), 2);
        assert_eq!(fs::read_to_string(&keep).unwrap(), "keep");
        assert!(!root.join("sub").join("stale.conf").exists());
        assert!(!root.join("old.conf").exists());

        let report = apply(decls, false);
        assert_eq!(report.exit_status(), 0);
        assert!(keep.exists());
    }

    #[test]
    fn test_purge_does_not_force_directory_removal() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("conf.d");
        fs::create_dir_all(root.join("old")).unwrap();
        fs::write(root.join("old").join("inner.conf"), "x").unwrap();

        let report = apply(
            vec![
                ResourceDecl::new("file", path_str(&root))
                    .with("ensure", "directory")
                    .with("recurse", true)
                    .with("purge", true),
            ],
            false,
        );

        assert_eq!(report.exit_status(), 4);
        assert!(root.join("old").join("inner.conf").exists());
        let old = report
            .status_for(&format!("File[{}]", path_str(&root.join("old"))))
            .unwrap();
        assert!(old.failed);
        // Contents of a purged directory are not generated separately
        assert_eq!(report.resource_statuses.len(), 2);
    }

    #[test]
    fn test_munge_path() {
        assert_eq!(munge_path(&Value::from("/etc/app/")), Ok(Value::from("/etc/app")));
        assert_eq!(munge_path(&Value::from("/")), Ok(Value::from("/")));
        assert!(munge_path(&Value::from("etc/app")).is_err());
    }

    #[test]
    fn test_relative_path_is_rejected_when_building_catalog() {
        let err = Catalog::from_decls(
            &registry(),
            vec![ResourceDecl::new("file", "relative/path").with("ensure", "file")],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidValue {
                resource: "File[relative/path]".to_string(),
                attribute: "path".to_string(),
                message: "File paths must be fully qualified, not 'relative/path'".to_string(),
            }
        );
    }
}
