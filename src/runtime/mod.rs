//! Runtime — one process hosting the coordinator, the capture agents of
//! every open tab and any attached inspectors, all joined by the
//! in-process relay.
//!
//! The CLI replays scenarios through this and so do the end-to-end tests.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigError, RelayConfig};
use crate::coordinator::{Coordinator, CoordinatorHandle, TabEvent};
use crate::dom::page::{Page, SharedPage};
use crate::dom::Document;
use crate::inspector::{Inspector, InspectorOptions, Renderer};
use crate::lifecycle::{CaptureAgent, CaptureOptions};
use crate::mailbox::Storage;
use crate::relay::{self, RelayError, RelayResponse, TabId};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("tab {0} is not open")]
    UnknownTab(TabId),

    #[error("tab {0} is already open")]
    TabExists(TabId),

    #[error("tab {0} has no inspector attached")]
    NoInspector(TabId),

    #[error("relay: {0}")]
    Relay(#[from] RelayError),

    #[error("coordinator is not running")]
    CoordinatorGone,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

struct AttachedInspector {
    inspector: Arc<Inspector>,
    cancel: CancellationToken,
    task: JoinHandle<usize>,
}

struct OpenTab {
    page: SharedPage,
    cancel: CancellationToken,
    capture: JoinHandle<()>,
    inspector: Option<AttachedInspector>,
}

pub struct Runtime {
    config: RelayConfig,
    storage: Arc<Storage>,
    coordinator: CoordinatorHandle,
    coordinator_task: JoinHandle<()>,
    cancel: CancellationToken,
    tabs: HashMap<TabId, OpenTab>,
}

impl Runtime {
    /// Validate `config` and start the coordinator. Needs a tokio runtime.
    pub fn start(config: RelayConfig) -> RuntimeResult<Self> {
        config.validate()?;
        let storage = Arc::new(Storage::new(
            config.mailbox_backend.clone(),
            config.mailbox_capacity,
        ));
        let cancel = CancellationToken::new();
        let (coordinator, coordinator_task) =
            Coordinator::new(storage.clone(), config.restricted_schemes.clone())
                .spawn(config.query_timeout(), cancel.child_token());
        info!(backend = ?config.mailbox_backend, "runtime started");
        Ok(Self {
            config,
            storage,
            coordinator,
            coordinator_task,
            cancel,
            tabs: HashMap::new(),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Open a tab on `url` and start its capture agent.
    pub fn open_tab(
        &mut self,
        tab: TabId,
        url: &str,
        document: Document,
    ) -> RuntimeResult<SharedPage> {
        if self.tabs.contains_key(&tab) {
            return Err(RuntimeError::TabExists(tab));
        }
        let page = Page::new(url, document).shared();
        let (control, control_inbox) = relay::channel();
        let mut agent = CaptureAgent::new(
            tab,
            page.clone(),
            self.coordinator.relay_for(tab),
            CaptureOptions::from(&self.config),
        );
        let attached = self.coordinator.tab_event(TabEvent::Attached {
            tab,
            url: url.to_string(),
            capture: control.with_timeout(self.config.query_timeout()),
        });
        if !attached {
            return Err(RuntimeError::CoordinatorGone);
        }
        // Watchers go in before the first step can touch the page.
        agent.attach();
        let cancel = self.cancel.child_token();
        let capture = agent.spawn(control_inbox, cancel.clone());
        self.tabs.insert(
            tab,
            OpenTab {
                page: page.clone(),
                cancel,
                capture,
                inspector: None,
            },
        );
        info!(%tab, %url, "tab opened");
        Ok(page)
    }

    pub fn page(&self, tab: TabId) -> RuntimeResult<SharedPage> {
        self.tab(tab).map(|t| t.page.clone())
    }

    fn tab(&self, tab: TabId) -> RuntimeResult<&OpenTab> {
        self.tabs.get(&tab).ok_or(RuntimeError::UnknownTab(tab))
    }

    fn tab_mut(&mut self, tab: TabId) -> RuntimeResult<&mut OpenTab> {
        self.tabs.get_mut(&tab).ok_or(RuntimeError::UnknownTab(tab))
    }

    pub fn inspector_attached(&self, tab: TabId) -> bool {
        self.tabs.get(&tab).is_some_and(|t| t.inspector.is_some())
    }

    /// Attach an inspector to `tab`. It announces readiness and starts
    /// consuming the tab's mailbox. Replaces any inspector already there.
    pub async fn open_inspector(
        &mut self,
        tab: TabId,
        renderer: Arc<dyn Renderer>,
    ) -> RuntimeResult<()> {
        if self.inspector_attached(tab) {
            self.close_inspector(tab).await?;
        }
        let inspector = Arc::new(Inspector::new(
            tab,
            Arc::new(self.coordinator.relay_for(tab)),
            self.storage.clone(),
            renderer,
            InspectorOptions::from(&self.config),
        ));
        let open = self.tab_mut(tab)?;
        let cancel = open.cancel.child_token();
        let task = {
            let inspector = inspector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { inspector.run(cancel).await })
        };
        open.inspector = Some(AttachedInspector {
            inspector,
            cancel,
            task,
        });
        Ok(())
    }

    /// Stop the inspector's loops, then announce `devtools-closed`.
    /// Returns how many events it rendered.
    pub async fn close_inspector(&mut self, tab: TabId) -> RuntimeResult<usize> {
        let attached = self
            .tab_mut(tab)?
            .inspector
            .take()
            .ok_or(RuntimeError::NoInspector(tab))?;
        attached.cancel.cancel();
        let rendered = match attached.task.await {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(%tab, error = %e, "inspector task failed");
                0
            }
        };
        attached.inspector.withdraw().await;
        Ok(rendered)
    }

    /// Ask the tab's capture side to rebuild itself, as the inspector's
    /// reload control does.
    pub async fn request_reinit(&self, tab: TabId) -> RuntimeResult<RelayResponse> {
        let inspector = self
            .tab(tab)?
            .inspector
            .as_ref()
            .ok_or(RuntimeError::NoInspector(tab))?;
        Ok(inspector.inspector.request_reinit().await?)
    }

    /// Full navigation: swap the document, then report the completed load
    /// to the coordinator.
    pub fn navigate(&self, tab: TabId, url: &str, document: Document) -> RuntimeResult<()> {
        self.page(tab)?.lock().load(url, document);
        let delivered = self.coordinator.tab_event(TabEvent::NavigationCompleted {
            tab,
            url: url.to_string(),
        });
        if delivered {
            Ok(())
        } else {
            Err(RuntimeError::CoordinatorGone)
        }
    }

    /// In-page navigation; the coordinator is not involved.
    pub fn navigate_history(&self, tab: TabId, url: &str) -> RuntimeResult<()> {
        self.page(tab)?.lock().navigate_history(url);
        Ok(())
    }

    /// Extension install/update: every mailbox is cleared.
    pub fn install(&self) -> RuntimeResult<()> {
        if self.coordinator.tab_event(TabEvent::Installed) {
            Ok(())
        } else {
            Err(RuntimeError::CoordinatorGone)
        }
    }

    pub async fn close_tab(&mut self, tab: TabId) -> RuntimeResult<()> {
        if self.inspector_attached(tab) {
            self.close_inspector(tab).await?;
        }
        let open = self.tabs.remove(&tab).ok_or(RuntimeError::UnknownTab(tab))?;
        open.cancel.cancel();
        if let Err(e) = open.capture.await {
            warn!(%tab, error = %e, "capture task failed");
        }
        self.coordinator.tab_event(TabEvent::Closed { tab });
        info!(%tab, "tab closed");
        Ok(())
    }

    /// Close every tab and stop the coordinator.
    pub async fn shutdown(mut self) {
        let tabs: Vec<TabId> = self.tabs.keys().copied().collect();
        for tab in tabs {
            if let Err(e) = self.close_tab(tab).await {
                warn!(%tab, error = %e, "close on shutdown failed");
            }
        }
        self.cancel.cancel();
        if let Err(e) = self.coordinator_task.await {
            warn!(error = %e, "coordinator task failed");
        }
        info!("runtime stopped");
    }
}
