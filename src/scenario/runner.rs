use std::sync::Arc;
use std::time::Duration;

use indextree::NodeId;
use tracing::{debug, info};

use super::{build_document, Scenario, ScenarioError, ScenarioResult, Step};
use crate::dom::page::{Page, SharedPage};
use crate::inspector::Renderer;
use crate::relay::TabId;
use crate::runtime::Runtime;

/// Replays a scenario's steps against one tab of a `Runtime`.
pub struct ScenarioRunner<'a> {
    runtime: &'a mut Runtime,
    renderer: Arc<dyn Renderer>,
    tab: TabId,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(runtime: &'a mut Runtime, renderer: Arc<dyn Renderer>, tab: TabId) -> Self {
        Self {
            runtime,
            renderer,
            tab,
        }
    }

    /// Open the scenario's tab and apply every step in order.
    pub async fn run(&mut self, scenario: &Scenario) -> ScenarioResult<()> {
        let document = build_document(&scenario.document)?;
        self.runtime.open_tab(self.tab, &scenario.url, document)?;
        info!(
            tab = %self.tab,
            url = %scenario.url,
            steps = scenario.steps.len(),
            "replaying scenario"
        );
        for step in &scenario.steps {
            self.apply(step).await?;
        }
        Ok(())
    }

    /// Give in-flight events time to reach the inspector, then close it.
    /// Returns how many events the inspector rendered, if one was open.
    pub async fn finish(&mut self) -> ScenarioResult<Option<usize>> {
        let config = self.runtime.config();
        let drain = config.settle_delay() + config.poll_interval() * 2;
        tokio::time::sleep(drain).await;
        if !self.runtime.inspector_attached(self.tab) {
            return Ok(None);
        }
        Ok(Some(self.runtime.close_inspector(self.tab).await?))
    }

    pub async fn apply(&mut self, step: &Step) -> ScenarioResult<()> {
        debug!(tab = %self.tab, ?step, "step");
        match step {
            Step::Focus { id } => {
                let page = self.page()?;
                let mut page = page.lock();
                let node = find(&page, id)?;
                page.focus(node);
            }
            Step::Blur => {
                self.page()?.lock().blur();
            }
            Step::Key { key, modifiers } => {
                self.page()?.lock().key_down(key, *modifiers);
            }
            Step::SetAttribute { id, name, value } => {
                let page = self.page()?;
                let mut page = page.lock();
                let node = find(&page, id)?;
                page.set_attribute(node, name, value)?;
            }
            Step::RemoveAttribute { id, name } => {
                let page = self.page()?;
                let mut page = page.lock();
                let node = find(&page, id)?;
                page.remove_attribute(node, name)?;
            }
            Step::Insert { parent, node } => {
                let page = self.page()?;
                let mut page = page.lock();
                let parent = parent_of(&page, parent.as_deref())?;
                let built = page.build(|doc| node.build(doc))?;
                page.insert(parent, built)?;
            }
            Step::InsertText { parent, text } => {
                let page = self.page()?;
                let mut page = page.lock();
                let parent = parent_of(&page, parent.as_deref())?;
                page.insert_text(parent, text)?;
            }
            Step::Remove { id } => {
                let page = self.page()?;
                let mut page = page.lock();
                let node = find(&page, id)?;
                page.remove(node)?;
            }
            Step::Navigate {
                url,
                document: Some(nodes),
            } => {
                let document = build_document(nodes)?;
                self.runtime.navigate(self.tab, url, document)?;
            }
            Step::Navigate { url, document: None } => {
                self.runtime.navigate_history(self.tab, url)?;
            }
            Step::Ready => {
                self.runtime
                    .open_inspector(self.tab, self.renderer.clone())
                    .await?;
            }
            Step::Close => {
                let rendered = self.runtime.close_inspector(self.tab).await?;
                info!(tab = %self.tab, rendered, "inspector closed");
            }
            Step::Reinitialize => {
                let response = self.runtime.request_reinit(self.tab).await?;
                debug!(tab = %self.tab, ?response, "reinit requested");
            }
            Step::Detach => {
                self.page()?.lock().detach_all();
            }
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
        }
        // Let the capture agent pick the signal up before the next step.
        tokio::task::yield_now().await;
        Ok(())
    }

    fn page(&self) -> ScenarioResult<SharedPage> {
        Ok(self.runtime.page(self.tab)?)
    }
}

fn find(page: &Page, id: &str) -> ScenarioResult<NodeId> {
    page.document()
        .find_by_id(id)
        .ok_or_else(|| ScenarioError::NoSuchElement(id.to_string()))
}

fn parent_of(page: &Page, id: Option<&str>) -> ScenarioResult<NodeId> {
    match id {
        Some(id) => find(page, id),
        None => Ok(page.document().root()),
    }
}
