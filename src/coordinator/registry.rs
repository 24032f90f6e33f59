//! Tab registry — the coordinator's per-tab connection state.

use std::collections::HashMap;

use crate::relay::{RelayHandle, TabId};

/// What the coordinator knows about one tab.
#[derive(Clone, Default)]
pub struct TabConnection {
    /// Control channel to the tab's capture agent, once attached.
    pub capture: Option<RelayHandle>,
    /// An inspector has announced itself and not withdrawn.
    pub inspector_ready: bool,
    pub url: Option<String>,
}

#[derive(Default)]
pub struct TabRegistry {
    tabs: HashMap<TabId, TabConnection>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tab: TabId) -> Option<&TabConnection> {
        self.tabs.get(&tab)
    }

    fn entry(&mut self, tab: TabId) -> &mut TabConnection {
        self.tabs.entry(tab).or_default()
    }

    /// Record a capture agent's control channel, replacing any previous one.
    pub fn attach_capture(&mut self, tab: TabId, capture: RelayHandle, url: &str) {
        let conn = self.entry(tab);
        conn.capture = Some(capture);
        conn.url = Some(url.to_string());
    }

    pub fn set_url(&mut self, tab: TabId, url: &str) {
        self.entry(tab).url = Some(url.to_string());
    }

    pub fn set_inspector_ready(&mut self, tab: TabId, ready: bool) {
        if !ready && !self.tabs.contains_key(&tab) {
            return;
        }
        self.entry(tab).inspector_ready = ready;
    }

    pub fn inspector_ready(&self, tab: TabId) -> bool {
        self.tabs.get(&tab).is_some_and(|c| c.inspector_ready)
    }

    pub fn capture(&self, tab: TabId) -> Option<RelayHandle> {
        self.tabs.get(&tab).and_then(|c| c.capture.clone())
    }

    pub fn remove(&mut self, tab: TabId) -> Option<TabConnection> {
        self.tabs.remove(&tab)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::channel;

    #[test]
    fn insertion_and_removal() {
        let mut registry = TabRegistry::new();
        let (handle, _inbox) = channel();
        registry.attach_capture(TabId(1), handle, "https://example.com/");
        registry.set_inspector_ready(TabId(1), true);

        assert!(registry.inspector_ready(TabId(1)));
        assert!(registry.capture(TabId(1)).is_some());
        assert_eq!(
            registry.get(TabId(1)).unwrap().url.as_deref(),
            Some("https://example.com/")
        );

        let removed = registry.remove(TabId(1)).unwrap();
        assert!(removed.inspector_ready);
        assert!(registry.is_empty());
        assert!(!registry.inspector_ready(TabId(1)));
    }

    #[test]
    fn withdrawing_an_unknown_tab_creates_nothing() {
        let mut registry = TabRegistry::new();
        registry.set_inspector_ready(TabId(5), false);
        assert!(registry.is_empty());
    }

    #[test]
    fn inspector_may_announce_before_capture_attaches() {
        let mut registry = TabRegistry::new();
        registry.set_inspector_ready(TabId(2), true);
        assert!(registry.capture(TabId(2)).is_none());
        assert_eq!(registry.len(), 1);
    }
}
