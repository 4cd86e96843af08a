//! Relationship graph for ordering and cycle reporting
//!
//! Node indices equal catalog arena indices, so ties in the topological
//! sort are broken by declaration order.

use crate::catalog::{Catalog, EdgeKind};
use crate::error::CycleError;
use crate::resource::ResourceId;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

/// A directed graph of resources; an edge `a -> b` means `a` runs first
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceId, EdgeKind>,
    labels: Vec<String>,
}

impl DependencyGraph {
    pub fn build(catalog: &Catalog) -> Self {
        let mut graph = DiGraph::with_capacity(catalog.len(), catalog.relationships().len());
        let mut labels = Vec::with_capacity(catalog.len());
        for resource in catalog.resources() {
            graph.add_node(resource.id);
            labels.push(resource.to_string());
        }
        for rel in catalog.relationships() {
            graph.add_edge(
                NodeIndex::new(rel.source.index()),
                NodeIndex::new(rel.target.index()),
                rel.kind,
            );
        }
        Self { graph, labels }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn label(&self, node: NodeIndex) -> String {
        self.labels
            .get(node.index())
            .cloned()
            .unwrap_or_else(|| format!("#{}", node.index()))
    }

    /// Every cycle as a path of references, first element repeated last
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        for mut component in tarjan_scc(&self.graph) {
            component.sort();
            let Some(&start) = component.first() else {
                continue;
            };
            if component.len() == 1 {
                if self.graph.contains_edge(start, start) {
                    cycles.push(vec![self.label(start), self.label(start)]);
                }
                continue;
            }
            cycles.push(self.cycle_path(start, &component));
        }
        cycles.sort();
        cycles
    }

    /// Shortest path from `start` back to itself within one component
    fn cycle_path(&self, start: NodeIndex, component: &[NodeIndex]) -> Vec<String> {
        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::from([start]);
        let mut last = None;

        'search: while let Some(node) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .collect();
            next.sort();
            for n in next {
                if n == start {
                    last = Some(node);
                    break 'search;
                }
                if seen.insert(n) {
                    parent.insert(n, node);
                    queue.push_back(n);
                }
            }
        }

        let mut path = vec![self.label(start)];
        let mut node = last.unwrap_or(start);
        let mut reversed = Vec::new();
        while node != start {
            reversed.push(self.label(node));
            node = parent.get(&node).copied().unwrap_or(start);
        }
        path.extend(reversed.into_iter().rev());
        path.push(self.label(start));
        path
    }

    /// Fail with every cycle found
    pub fn check_acyclic(&self) -> Result<(), CycleError> {
        let cycles = self.cycles();
        if cycles.is_empty() {
            Ok(())
        } else {
            Err(CycleError { cycles })
        }
    }

    /// Kahn's algorithm; ready nodes are taken in declaration order
    pub fn toposort(&self) -> Result<Vec<ResourceId>, CycleError> {
        let mut in_degree: Vec<usize> = vec![0; self.graph.node_count()];
        for edge in self.graph.edge_references() {
            in_degree[edge.target().index()] += 1;
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(ResourceId(index));
            for edge in self.graph.edges(NodeIndex::new(index)) {
                let target = edge.target().index();
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        if order.len() != in_degree.len() {
            return Err(CycleError {
                cycles: self.cycles(),
            });
        }
        Ok(order)
    }

    /// Direct predecessors of a resource, with the edge kind
    pub fn upstream(&self, id: ResourceId) -> Vec<(ResourceId, EdgeKind)> {
        let mut found: Vec<_> = self
            .graph
            .edges_directed(NodeIndex::new(id.index()), Direction::Incoming)
            .map(|e| (ResourceId(e.source().index()), *e.weight()))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found
    }

    /// Direct successors of a resource, with the edge kind
    pub fn downstream(&self, id: ResourceId) -> Vec<(ResourceId, EdgeKind)> {
        let mut found: Vec<_> = self
            .graph
            .edges_directed(NodeIndex::new(id.index()), Direction::Outgoing)
            .map(|e| (ResourceId(e.target().index()), *e.weight()))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found
    }

    /// Graphviz rendering
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph relationships {\n");
        for node in self.graph.node_indices() {
            let _ = writeln!(out, "    \"{}\";", escape(&self.label(node)));
        }
        for edge in self.graph.edge_references() {
            let style = match edge.weight() {
                EdgeKind::Require => "",
                EdgeKind::Notify => " [label=notify, style=dashed]",
                EdgeKind::Contain => " [label=contain, style=dotted]",
            };
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\"{style};",
                escape(&self.label(edge.source())),
                escape(&self.label(edge.target()))
            );
        }
        out.push_str("}\n");
        out
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
