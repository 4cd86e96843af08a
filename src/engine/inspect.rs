//! Read-only views: the relationship graph and the type registry

use anyhow::Result;
use colored::Colorize;
use reconcile::{METAPARAMS, Probe, TypeRegistry};
use std::path::Path;

use crate::config::Settings;
use crate::facts::SystemProbe;
use crate::resource;
use crate::ui;

/// Print the relationship graph of a catalog in DOT format
pub fn graph(catalog: &Path) -> Result<()> {
    let registry = resource::registry();
    let catalog = super::build_catalog(&registry, super::load_decls(catalog)?)?;
    let graph = catalog.relationship_graph();
    log::debug!(
        "Graph has {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );
    print!("{}", graph.to_dot());
    Ok(())
}

/// One provider line of the types listing
#[derive(Debug, PartialEq, Eq)]
struct ProviderLine {
    name: &'static str,
    default: bool,
    /// Reasons it cannot run here; empty when suitable
    unsuitable: Vec<String>,
}

fn provider_lines(registry: &TypeRegistry, type_name: &str, probe: &dyn Probe) -> Vec<ProviderLine> {
    registry
        .providers_for(type_name)
        .into_iter()
        .map(|provider| ProviderLine {
            name: provider.name,
            default: provider.default_specificity(probe) > 0,
            unsuitable: provider.failed_confines(probe),
        })
        .collect()
}

/// List registered types with the providers usable on this machine
pub fn types() -> Result<()> {
    let settings = Settings::load()?;
    let probe = SystemProbe::gather(&settings.facts);
    let registry = resource::registry();

    ui::header("Facts");
    for (name, value) in probe.facts() {
        ui::kv(name, value);
    }

    ui::header("Metaparameters");
    ui::dim("Accepted by every resource type");
    println!("  {}", METAPARAMS.join(", "));

    for descriptor in registry.types() {
        ui::header(descriptor.name);
        if !descriptor.doc.is_empty() {
            ui::dim(descriptor.doc);
        }
        ui::kv("namevar", descriptor.namevar);
        let properties: Vec<&str> = descriptor.properties().map(|p| p.name).collect();
        ui::kv("properties", &properties.join(", "));
        let parameters: Vec<&str> = descriptor.parameters().iter().map(|p| p.name).collect();
        if !parameters.is_empty() {
            ui::kv("parameters", &parameters.join(", "));
        }

        for line in provider_lines(&registry, descriptor.name, &probe) {
            let marker = if line.default { " (default)" } else { "" };
            if line.unsuitable.is_empty() {
                println!("  {} {}{}", "✓".green(), line.name, marker.cyan());
            } else {
                println!(
                    "  {} {} {}",
                    "✗".red(),
                    line.name,
                    line.unsuitable.join("; ").dimmed()
                );
            }
        }
    }
    Ok(())
}
