//! Deterministic table ordering from foreign-key edges.
//!
//! Depth-first traversal in upstream discovery order; post-order append
//! yields the insertion order (dependencies first), and the deletion order
//! is its exact reverse. Cycles are broken at the point of re-entry and
//! surface as warnings, never as failures.

use std::collections::HashMap;

use tracing::warn;

use crate::schema::ForeignKeyEdge;

/// The computed load plan for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    /// Topological order for population: referenced tables first.
    pub insertion_order: Vec<String>,

    /// Exact reverse of the insertion order; used for clearing and rollback.
    pub deletion_order: Vec<String>,

    /// Edges at which a cycle was broken, as (from, to).
    pub cycles: Vec<(String, String)>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InStack,
    Done,
}

/// Compute the table plan for the discovered table set.
///
/// `tables` is the upstream discovery order, which doubles as the tie-break
/// among siblings. Edges referencing tables outside the set are ignored.
pub fn plan(tables: &[String], edges: &[ForeignKeyEdge]) -> TablePlan {
    let mut referenced: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        if tables.iter().any(|t| t == &edge.references) {
            referenced
                .entry(edge.table.as_str())
                .or_default()
                .push(edge.references.as_str());
        }
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut cycles: Vec<(String, String)> = Vec::new();

    for table in tables {
        visit(table, &referenced, &mut marks, &mut order, &mut cycles);
    }

    for (from, to) in &cycles {
        warn!(
            "Cycle detected between {} and {}; load order within the cycle is best-effort",
            from, to
        );
    }

    let deletion_order: Vec<String> = order.iter().rev().cloned().collect();
    TablePlan {
        insertion_order: order,
        deletion_order,
        cycles,
    }
}

fn visit<'a>(
    table: &'a str,
    referenced: &HashMap<&'a str, Vec<&'a str>>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
    cycles: &mut Vec<(String, String)>,
) {
    match marks.get(table) {
        Some(Mark::Done) => return,
        Some(Mark::InStack) => return, // cycle broken at re-entry
        None => {}
    }

    marks.insert(table, Mark::InStack);

    if let Some(deps) = referenced.get(table) {
        for dep in deps {
            if marks.get(dep) == Some(&Mark::InStack) {
                cycles.push((table.to_string(), dep.to_string()));
                continue;
            }
            visit(dep, referenced, marks, order, cycles);
        }
    }

    marks.insert(table, Mark::Done);
    order.push(table.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(table: &str, references: &str) -> ForeignKeyEdge {
        ForeignKeyEdge {
            table: table.to_string(),
            references: references.to_string(),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_orders_dependencies_first() {
        // Discovery order fixed to users, orders, products, order_items.
        let tables = names(&["users", "orders", "products", "order_items"]);
        let edges = vec![
            edge("orders", "users"),
            edge("order_items", "orders"),
            edge("order_items", "products"),
        ];

        let plan = plan(&tables, &edges);
        assert_eq!(
            plan.insertion_order,
            names(&["users", "orders", "products", "order_items"])
        );
        assert!(plan.cycles.is_empty());
    }

    #[test]
    fn test_referenced_before_dependent_for_all_edges() {
        let tables = names(&["order_items", "orders", "users", "products"]);
        let edges = vec![
            edge("orders", "users"),
            edge("order_items", "orders"),
            edge("order_items", "products"),
        ];

        let plan = plan(&tables, &edges);
        for e in &edges {
            let dep = plan.insertion_order.iter().position(|t| t == &e.table);
            let referenced = plan.insertion_order.iter().position(|t| t == &e.references);
            assert!(
                referenced < dep,
                "{} must precede {}",
                e.references,
                e.table
            );
        }
    }

    #[test]
    fn test_deletion_order_is_exact_reverse() {
        let tables = names(&["a", "b", "c", "d"]);
        let edges = vec![edge("b", "a"), edge("d", "c")];

        let plan = plan(&tables, &edges);
        let mut reversed = plan.insertion_order.clone();
        reversed.reverse();
        assert_eq!(plan.deletion_order, reversed);
    }

    #[test]
    fn test_no_edges_preserves_discovery_order() {
        let tables = names(&["zeta", "alpha", "mid"]);
        let plan = plan(&tables, &[]);
        assert_eq!(plan.insertion_order, tables);
    }

    #[test]
    fn test_cycle_emits_both_members_in_discovery_order() {
        let tables = names(&["a", "b"]);
        let edges = vec![edge("a", "b"), edge("b", "a")];

        let plan = plan(&tables, &edges);
        assert_eq!(plan.insertion_order.len(), 2);
        assert!(plan.insertion_order.contains(&"a".to_string()));
        assert!(plan.insertion_order.contains(&"b".to_string()));
        assert_eq!(plan.cycles.len(), 1);
        // a recurses into b, b re-enters a: the cycle is recorded at (b, a)
        // and b completes first.
        assert_eq!(plan.insertion_order, names(&["b", "a"]));
        assert_eq!(plan.cycles[0], ("b".to_string(), "a".to_string()));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let tables = names(&["node"]);
        let edges = vec![edge("node", "node")];

        let plan = plan(&tables, &edges);
        assert_eq!(plan.insertion_order, names(&["node"]));
        assert_eq!(plan.cycles.len(), 1);
    }

    #[test]
    fn test_edges_to_unknown_tables_are_ignored() {
        let tables = names(&["orders"]);
        let edges = vec![edge("orders", "users")];

        let plan = plan(&tables, &edges);
        assert_eq!(plan.insertion_order, names(&["orders"]));
    }
}
