use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::relation::Relations;

/// Summary of the belongsTo graph structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedGraphSummary {
    pub nodes: usize,
    pub edges: usize,
}

/// Report for collection seed ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedGraphReport {
    pub summary: SeedGraphSummary,
    pub topo_order: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
    /// `(collection, target)` pairs whose belongsTo target is not a known collection.
    pub missing_targets: Vec<(String, String)>,
}

impl SeedGraphReport {
    pub fn is_valid(&self) -> bool {
        self.topo_order.is_some() && self.missing_targets.is_empty()
    }
}

/// Build a deterministic seed-order report from collections in registration order.
///
/// Each `belongsTo` relation adds an edge parent -> child, so parents precede
/// the collections that reference them. Ties are broken by registration order.
pub fn build_seed_graph_report<'a, I>(collections: I) -> SeedGraphReport
where
    I: IntoIterator<Item = (&'a str, &'a Relations)>,
{
    let collections: Vec<(&str, &Relations)> = collections.into_iter().collect();
    let position: HashMap<&str, usize> = collections
        .iter()
        .enumerate()
        .map(|(index, (name, _))| (*name, index))
        .collect();

    let mut graph: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    let mut missing_targets = Vec::new();

    for (index, (name, relations)) in collections.iter().enumerate() {
        graph.entry(index).or_default();
        for relation in relations.values().filter(|relation| relation.is_belongs_to()) {
            match position.get(relation.target.as_str()) {
                Some(parent) => {
                    graph.entry(*parent).or_default().insert(index);
                }
                None => missing_targets.push((name.to_string(), relation.target.clone())),
            }
        }
    }

    let nodes = graph.len();
    let edges = graph.values().map(|targets| targets.len()).sum();
    let summary = SeedGraphSummary { nodes, edges };
    let name_of = |index: usize| collections[index].0.to_string();

    match toposort(&graph) {
        Ok(order) => SeedGraphReport {
            summary,
            topo_order: Some(order.into_iter().map(name_of).collect()),
            cycle: None,
            missing_targets,
        },
        Err(cycle) => SeedGraphReport {
            summary,
            topo_order: None,
            cycle: Some(cycle.into_iter().map(name_of).collect()),
            missing_targets,
        },
    }
}

fn toposort(graph: &BTreeMap<usize, BTreeSet<usize>>) -> Result<Vec<usize>, Vec<usize>> {
    let mut indegree: BTreeMap<usize, usize> = graph.keys().map(|node| (*node, 0)).collect();

    for targets in graph.values() {
        for target in targets {
            *indegree.entry(*target).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .filter_map(|(node, count)| (*count == 0).then_some(*node))
        .collect();

    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = ready.pop_first() {
        order.push(node);

        if let Some(targets) = graph.get(&node) {
            for target in targets {
                if let Some(count) = indegree.get_mut(target) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(*target);
                    }
                }
            }
        }
    }

    if order.len() == graph.len() {
        Ok(order)
    } else {
        let cycle_nodes: Vec<usize> = indegree
            .into_iter()
            .filter_map(|(node, count)| (count > 0).then_some(node))
            .collect();
        Err(cycle_nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::Relation;

    fn relations(entries: &[(&str, Relation)]) -> Relations {
        entries
            .iter()
            .map(|(name, relation)| (name.to_string(), relation.clone()))
            .collect()
    }

    #[test]
    fn toposort_orders_parents_first() {
        let orders = relations(&[
            ("user", Relation::belongs_to("users", "userId")),
            ("product", Relation::belongs_to("products", "productId")),
        ]);
        let users = relations(&[("orders", Relation::has_many("orders", "userId"))]);
        let products = Relations::new();

        let report = build_seed_graph_report([
            ("orders", &orders),
            ("users", &users),
            ("products", &products),
        ]);
        let order = report.topo_order.expect("expected toposort");
        assert_eq!(order, vec!["users", "products", "orders"]);
        assert_eq!(report.summary, SeedGraphSummary { nodes: 3, edges: 2 });
    }

    #[test]
    fn toposort_reports_cycle() {
        let a = relations(&[("b", Relation::belongs_to("b", "bId"))]);
        let b = relations(&[("a", Relation::belongs_to("a", "aId"))]);
        let c = Relations::new();

        let report = build_seed_graph_report([("a", &a), ("b", &b), ("c", &c)]);
        assert!(report.topo_order.is_none());
        let cycle = report.cycle.expect("cycle");
        assert_eq!(cycle, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let categories = relations(&[("parent", Relation::belongs_to("categories", "parentId"))]);
        let report = build_seed_graph_report([("categories", &categories)]);
        assert!(!report.is_valid());
        assert_eq!(report.cycle, Some(vec!["categories".to_string()]));
    }

    #[test]
    fn records_unknown_targets() {
        let orders = relations(&[("user", Relation::belongs_to("users", "userId"))]);
        let report = build_seed_graph_report([("orders", &orders)]);
        assert_eq!(
            report.missing_targets,
            vec![("orders".to_string(), "users".to_string())]
        );
        assert!(!report.is_valid());
    }
}
