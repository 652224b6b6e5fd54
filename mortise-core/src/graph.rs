//! Dependency graph and load-order computation.

use thiserror::Error;

/// The dependency edges form a cycle; no load order exists.
#[derive(Debug, Error)]
#[error("dependency graph contains a cycle")]
pub struct CycleError;

/// One graph node: a plugin name plus the indices of the nodes it
/// depends on (its parents, which must load first).
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub parents: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unmarked,
    Temporary,
    Permanent,
}

/// A directed graph of plugin dependencies.
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Produce a parents-first ordering of the node names.
    ///
    /// Depth-first with three-colour marking; reaching a temporarily
    /// marked node means the edges loop back on themselves and no order
    /// exists. Ties follow the input node order.
    pub fn topological_sort(&self) -> Result<Vec<String>, CycleError> {
        let mut marks = vec![Mark::Unmarked; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        for id in 0..self.nodes.len() {
            if marks[id] == Mark::Unmarked {
                self.visit(id, &mut marks, &mut order)?;
            }
        }

        Ok(order)
    }

    fn visit(
        &self,
        id: usize,
        marks: &mut Vec<Mark>,
        order: &mut Vec<String>,
    ) -> Result<(), CycleError> {
        match marks[id] {
            Mark::Permanent => return Ok(()),
            Mark::Temporary => return Err(CycleError),
            Mark::Unmarked => {}
        }

        marks[id] = Mark::Temporary;
        for &parent in &self.nodes[id].parents {
            self.visit(parent, marks, order)?;
        }
        marks[id] = Mark::Permanent;
        order.push(self.nodes[id].name.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, parents: &[usize]) -> Node {
        Node {
            name: name.to_string(),
            parents: parents.to_vec(),
        }
    }

    fn index_of(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_empty_graph() {
        let order = Graph::new(Vec::new()).topological_sort().unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn test_single_chain() {
        // c depends on b depends on a
        let graph = Graph::new(vec![node("a", &[]), node("b", &[0]), node("c", &[1])]);
        let order = graph.topological_sort().unwrap();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn test_parents_always_precede_children() {
        let graph = Graph::new(vec![
            node("app", &[1, 2]),
            node("ui", &[3]),
            node("net", &[3]),
            node("base", &[]),
        ]);
        let order = graph.topological_sort().unwrap();
        assert_eq!(order.len(), 4);
        assert!(index_of(&order, "base") < index_of(&order, "ui"));
        assert!(index_of(&order, "base") < index_of(&order, "net"));
        assert!(index_of(&order, "ui") < index_of(&order, "app"));
        assert!(index_of(&order, "net") < index_of(&order, "app"));
    }

    #[test]
    fn test_independent_nodes_keep_input_order() {
        let graph = Graph::new(vec![node("x", &[]), node("y", &[]), node("z", &[])]);
        let order = graph.topological_sort().unwrap();
        assert_eq!(order, ["x", "y", "z"]);
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = Graph::new(vec![node("a", &[1]), node("b", &[0])]);
        assert!(graph.topological_sort().is_err());
    }

    #[test]
    fn test_self_cycle() {
        let graph = Graph::new(vec![node("a", &[0])]);
        assert!(graph.topological_sort().is_err());
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        // a is fine, but b <-> c loop through each other.
        let graph = Graph::new(vec![node("a", &[]), node("b", &[2]), node("c", &[1])]);
        assert!(graph.topological_sort().is_err());
    }
}
