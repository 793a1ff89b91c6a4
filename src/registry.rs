use std::{
    collections::HashMap,
    task::{Context, Poll},
};

use tracing::{info, warn};

use crate::{error::Error, panel::Panel};

/// The live mapping from panel identity to open panel.
///
/// Owned by the event loop and lent to the router and health monitor;
/// contains only open panels. Inserted by a successful open, removed by
/// an explicit close, a broken link, or the shutdown-on-fault path.
#[derive(Default)]
pub(crate) struct Registry {
    panels: HashMap<String, Panel>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an open panel under its identity.
    ///
    /// A collision means the same device identity was opened again (for
    /// example after a replug); the superseded session is closed first so
    /// its descriptor does not leak.
    pub(crate) async fn insert(&mut self, panel: Panel) {
        let ident = panel.ident().to_string();

        if let Some(superseded) = self.panels.insert(ident.clone(), panel) {
            warn!(%ident, "Identity collision, closing the superseded session");
            superseded.close().await;
        }
    }

    pub(crate) fn get_mut(&mut self, ident: &str) -> Option<&mut Panel> {
        self.panels.get_mut(ident)
    }

    pub(crate) fn remove(&mut self, ident: &str) -> Option<Panel> {
        self.panels.remove(ident)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Panel> {
        self.panels.values()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.panels.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    /// Close and deregister every panel (server-shutdown failure path).
    pub(crate) async fn close_all(&mut self) {
        for (ident, panel) in self.panels.drain() {
            info!(%ident, "Closing panel");
            panel.close().await;
        }
    }

    /// Poll every panel's link for one unsolicited line.
    ///
    /// First ready wins, in iteration order; no fairness is promised
    /// across passes.
    pub(crate) fn poll_event(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<(String, Result<String, Error>)> {
        for (ident, panel) in self.panels.iter_mut() {
            if let Poll::Ready(item) = panel.poll_event(cx) {
                return Poll::Ready((ident.clone(), item));
            }
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::Timing;
    use std::time::Duration;

    fn test_timing() -> Timing {
        Timing {
            boot_delay: Duration::from_millis(10),
            init_delay: Duration::from_millis(20),
            retry_delay: Duration::from_millis(60),
        }
    }

    #[tokio::test]
    async fn collision_closes_then_replaces() {
        let mut registry = Registry::new();

        let first = Panel::open("mock:tray", test_timing()).await.unwrap();
        let second = Panel::open("mock:tray", test_timing()).await.unwrap();

        registry.insert(first).await;
        registry.insert(second).await;

        assert_eq!(registry.len(), 1);
        assert!(registry.get_mut("TRAYPANEL").is_some());
    }

    #[tokio::test]
    async fn remove_unknown_is_none() {
        let mut registry = Registry::new();

        assert!(registry.remove("GHOST_PANEL").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let mut registry = Registry::new();

        registry
            .insert(Panel::open("mock:tray", test_timing()).await.unwrap())
            .await;
        registry
            .insert(Panel::open("mock:door", test_timing()).await.unwrap())
            .await;
        assert_eq!(registry.len(), 2);

        registry.close_all().await;
        assert!(registry.is_empty());
    }
}
