//! Install ordering over the `depends` edges between a set of packages.

use std::collections::BTreeSet;

use petgraph::prelude::*;

use crate::metadb::package::*;

/// Edges point from a dependency to the package depending on it.
pub type DependencyGraph<'a> = StableDiGraph<&'a Package, ()>;

/// Builds the graph of `depends` edges within `packages`, dependencies outside the set are ignored.
pub fn build_dependency_graph<'a>(packages: &[&'a Package]) -> DependencyGraph<'a> {
	let mut graph = DependencyGraph::default();
	let nodes = packages.iter().map(|p| graph.add_node(*p)).collect::<Vec<_>>();

	for (dependent_index, dependent) in packages.iter().enumerate() {
		for rel in &dependent.depends {
			for (dependency_index, dependency) in packages.iter().enumerate() {
				if dependency_index != dependent_index && does_package_fulfill_relationship(dependency, rel) {
					graph.update_edge(nodes[dependency_index], nodes[dependent_index], ());
				}
			}
		}
	}

	graph
}

/// Orders `packages` so each comes after every package in the set satisfying its `depends`.
///
/// Returns indices into `packages`. Packages that are ready at the same time are ordered by
/// identifier, a dependency cycle is broken by taking the smallest remaining identifier.
pub fn dependency_order(packages: &[&Package]) -> Vec<usize> {
	let mut graph = build_dependency_graph(packages);
	let key = |graph: &DependencyGraph, i: NodeIndex| (graph[i].identifier.clone(), i);

	let mut ready = graph.node_indices()
		.filter(|i| graph.neighbors_directed(*i, Incoming).next().is_none())
		.map(|i| key(&graph, i))
		.collect::<BTreeSet<_>>();

	let mut order = Vec::<usize>::with_capacity(packages.len());

	while graph.node_count() > 0 {
		let next = match ready.pop_first() {
			Some((_, i)) => i,
			None => {
				/* Cycle, nothing without incoming edges remains */
				let Some((id, i)) = graph.node_indices().map(|i| key(&graph, i)).min() else { break };
				log::warn!("Dependency cycle found, ordering {} first", id);
				i
			},
		};

		let dependents = graph.neighbors_directed(next, Outgoing).collect::<Vec<_>>();
		graph.remove_node(next);
		order.push(next.index());

		for d in dependents {
			if graph.neighbors_directed(d, Incoming).next().is_none() {
				ready.insert(key(&graph, d));
			}
		}
	}

	order
}

#[cfg(test)]
mod test {
	use super::*;

	fn package(identifier: &str, depends: &[&str]) -> Package {
		let mut p = Package::new(identifier, "1.0");
		p.depends = depends.iter().map(|d| PackageDescriptor::any(*d).into()).collect();
		p
	}

	fn ordered(packages: &[Package]) -> Vec<String> {
		let refs = packages.iter().collect::<Vec<_>>();
		dependency_order(&refs).into_iter().map(|i| packages[i].identifier.identifier.clone()).collect()
	}

	#[test] fn dependencies_come_first() { assert_eq!(ordered(&[package("A", &["B"]), package("B", &[])]), ["B", "A"]) }
	#[test] fn ties_are_broken_by_identifier() { assert_eq!(ordered(&[package("C", &[]), package("A", &[]), package("B", &[])]), ["A", "B", "C"]) }
	#[test] fn diamond() { assert_eq!(ordered(&[package("A", &["B", "C"]), package("B", &["D"]), package("C", &["D"]), package("D", &[])]), ["D", "B", "C", "A"]) }
	#[test] fn cycles_still_produce_every_package() { assert_eq!(ordered(&[package("A", &["B"]), package("B", &["A"]), package("C", &[])]), ["C", "A", "B"]) }
}
