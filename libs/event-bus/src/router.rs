use serde::Deserialize;

use crate::priority::QueueId;

/// Topic prefix → target queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub queue: QueueId,
}

/// Picks a priority queue for a topic: longest matching prefix wins,
/// unmatched topics go to `Realtime`.
#[derive(Debug, Clone, Default)]
pub struct QueueRouter {
    routes: Vec<Route>,
}

impl QueueRouter {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    pub fn resolve(&self, topic: &str) -> QueueId {
        self.routes
            .iter()
            .find(|r| topic.starts_with(&r.prefix))
            .map(|r| r.queue)
            .unwrap_or(QueueId::Realtime)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
