use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::Node;
use crate::config::Region;
use crate::error::{LinkError, LinkResult};

/// Ordered set of nodes plus the short-lived "best node" choice.
pub struct NodePool {
    nodes: Vec<Arc<Node>>,
    /// Última elección y cuándo se hizo
    selection: Mutex<Option<(Arc<Node>, Instant)>>,
    window: Duration,
}

/// `None` (sin conexión) va siempre al final
fn by_penalty(a: &Option<i64>, b: &Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl NodePool {
    pub fn new(nodes: Vec<Arc<Node>>, window: Duration) -> Self {
        Self {
            nodes,
            selection: Mutex::new(None),
            window,
        }
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| n.identifier() == identifier).cloned()
    }

    /// Lowest-penalty connected node. The choice is reused for the
    /// selection window as long as that node stays connected.
    pub fn best_node(&self) -> LinkResult<Arc<Node>> {
        let mut selection = self.selection.lock();
        if let Some((node, chosen_at)) = selection.as_ref() {
            if chosen_at.elapsed() < self.window && node.is_connected() {
                return Ok(Arc::clone(node));
            }
        }

        let best = self.ranked(|_| true).into_iter().next().ok_or(LinkError::NoAvailableNode)?;
        debug!("🏆 Mejor nodo: {}", best.identifier());
        *selection = Some((Arc::clone(&best), Instant::now()));
        Ok(best)
    }

    /// Lowest-penalty connected node tagged with `region`.
    pub fn best_node_in_region(&self, region: Region) -> Option<Arc<Node>> {
        self.ranked(|node| node.descriptor().region == Some(region))
            .into_iter()
            .next()
    }

    /// First connected node in configuration order.
    pub fn first_connected(&self) -> LinkResult<Arc<Node>> {
        self.nodes
            .iter()
            .find(|n| n.is_connected())
            .cloned()
            .ok_or(LinkError::NoAvailableNode)
    }

    pub fn connected_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_connected()).count()
    }

    /// Connected nodes matching `filter`, lowest penalty first. Ties keep
    /// configuration order.
    fn ranked(&self, filter: impl Fn(&Node) -> bool) -> Vec<Arc<Node>> {
        let mut candidates: Vec<(Option<i64>, Arc<Node>)> = self
            .nodes
            .iter()
            .filter(|n| filter(n))
            .map(|n| (n.total_penalty(), Arc::clone(n)))
            .filter(|(penalty, _)| penalty.is_some())
            .collect();

        candidates.sort_by(|a, b| by_penalty(&a.0, &b.0));
        candidates.into_iter().map(|(_, node)| node).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeDescriptor;
    use crate::node::tests::{exhaust_retries, link_with, open, stats_frame};

    fn descriptors() -> Vec<NodeDescriptor> {
        vec![
            NodeDescriptor::new("a", 2333, "pw").with_id("A").with_region(Region::Eu),
            NodeDescriptor::new("b", 2333, "pw").with_id("B").with_region(Region::Eu),
            NodeDescriptor::new("c", 2333, "pw").with_id("C").with_region(Region::Usa),
        ]
    }

    #[tokio::test]
    async fn test_best_node_prefers_lowest_penalty() {
        let link = link_with(descriptors());
        let nodes = link.nodes().to_vec();
        let _rx: Vec<_> = nodes[..2].iter().map(open).collect();

        nodes[0].handle_message(&stats_frame(0.0, 5));
        nodes[1].handle_message(&stats_frame(0.0, 2));

        let pool = NodePool::new(nodes.clone(), Duration::ZERO);
        assert_eq!(pool.best_node().unwrap().identifier(), "B");
        assert_eq!(pool.first_connected().unwrap().identifier(), "A");
        assert_eq!(pool.connected_count(), 2);
    }

    #[tokio::test]
    async fn test_selection_is_cached_within_window() {
        let link = link_with(descriptors());
        let nodes = link.nodes().to_vec();
        let _rx: Vec<_> = nodes[..2].iter().map(open).collect();
        nodes[0].handle_message(&stats_frame(0.0, 1));
        nodes[1].handle_message(&stats_frame(0.0, 9));

        let pool = NodePool::new(nodes.clone(), Duration::from_secs(30));
        assert_eq!(pool.best_node().unwrap().identifier(), "A");

        // A empeora, pero la elección sigue vigente
        nodes[0].handle_message(&stats_frame(0.0, 50));
        assert_eq!(pool.best_node().unwrap().identifier(), "A");

        let fresh = NodePool::new(nodes, Duration::ZERO);
        assert_eq!(fresh.best_node().unwrap().identifier(), "B");
    }

    #[tokio::test]
    async fn test_cached_node_dropped_when_it_disconnects() {
        let link = link_with(descriptors());
        let nodes = link.nodes().to_vec();
        let _rx: Vec<_> = nodes[..2].iter().map(open).collect();
        nodes[0].handle_message(&stats_frame(0.0, 9));
        nodes[1].handle_message(&stats_frame(0.0, 1));

        let pool = NodePool::new(nodes.clone(), Duration::from_secs(30));
        assert_eq!(pool.best_node().unwrap().identifier(), "B");

        exhaust_retries(&nodes[1]);
        nodes[1].handle_close(1006, String::new());
        assert!(!nodes[1].is_connected());

        // Dentro de la ventana, pero B ya no sirve
        assert_eq!(pool.best_node().unwrap().identifier(), "A");
        assert_eq!(pool.best_node().unwrap().identifier(), "A");
    }

    #[tokio::test]
    async fn test_no_connected_nodes() {
        let link = link_with(descriptors());
        let pool = NodePool::new(link.nodes().to_vec(), Duration::from_secs(30));

        assert!(matches!(pool.best_node(), Err(LinkError::NoAvailableNode)));
        assert!(matches!(pool.first_connected(), Err(LinkError::NoAvailableNode)));
        assert!(pool.best_node_in_region(Region::Usa).is_none());
    }

    #[tokio::test]
    async fn test_region_filter() {
        let link = link_with(descriptors());
        let nodes = link.nodes().to_vec();
        let _rx: Vec<_> = nodes.iter().map(open).collect();

        let pool = NodePool::new(nodes, Duration::ZERO);
        assert_eq!(pool.best_node_in_region(Region::Usa).unwrap().identifier(), "C");
        assert_eq!(pool.best_node_in_region(Region::Eu).unwrap().identifier(), "A");
    }

    #[test]
    fn test_unconnected_sorts_last() {
        let mut penalties = vec![None, Some(30), Some(2), None];
        penalties.sort_by(by_penalty);
        assert_eq!(penalties, vec![Some(2), Some(30), None, None]);
    }
}
