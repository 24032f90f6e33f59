//! Mailbox — the bounded rendezvous store between capture and inspection.
//!
//! Writers append, the consumer snapshots and then acknowledges by id.
//! Capacity is enforced by trimming the oldest entries. The mailbox itself
//! is at-least-once: a snapshot taken twice before `consume` returns the
//! same events twice, and exactly-once rendering is the consumer's job.
//!
//! `Storage` holds one mailbox per tab (the "named bucket"), shared by the
//! coordinator, which writes and resets, and the inspector, which reads
//! and acknowledges.

pub mod error;
pub mod wal;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::MailboxBackend;
use crate::event::Event;
use crate::relay::TabId;

pub use error::{MailboxError, MailboxResult};
pub use wal::WalMailbox;

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Store an event, trimming the oldest entries to stay within capacity.
    async fn append(&self, event: Event) -> MailboxResult<()>;

    /// Current contents, oldest first. Does not mutate.
    async fn snapshot(&self) -> MailboxResult<Vec<Event>>;

    /// Remove every entry whose id is in `ids`. Returns how many went.
    async fn consume(&self, ids: &HashSet<String>) -> MailboxResult<usize>;

    /// Drop everything.
    async fn clear(&self) -> MailboxResult<()>;

    fn capacity(&self) -> usize;
}

/// Ordered, capped event list shared by every backend.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false (and stores nothing) when the id is already present.
    pub fn append(&mut self, event: Event) -> bool {
        if self.events.iter().any(|e| e.id() == event.id()) {
            return false;
        }
        while self.events.len() + 1 > self.capacity {
            if let Some(trimmed) = self.events.pop_front() {
                debug!(event = %trimmed.id(), "mailbox full, trimmed oldest");
            }
        }
        self.events.push_back(event);
        true
    }

    pub fn consume(&mut self, ids: &HashSet<String>) -> usize {
        let before = self.events.len();
        self.events.retain(|e| !ids.contains(e.id()));
        before - self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Mailbox that lives only as long as the process.
pub struct MemoryMailbox {
    log: Mutex<EventLog>,
}

impl MemoryMailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Mutex::new(EventLog::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn append(&self, event: Event) -> MailboxResult<()> {
        self.log.lock().append(event);
        Ok(())
    }

    async fn snapshot(&self) -> MailboxResult<Vec<Event>> {
        Ok(self.log.lock().snapshot())
    }

    async fn consume(&self, ids: &HashSet<String>) -> MailboxResult<usize> {
        Ok(self.log.lock().consume(ids))
    }

    async fn clear(&self) -> MailboxResult<()> {
        self.log.lock().clear();
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.log.lock().capacity()
    }
}

/// Per-tab mailboxes, opened lazily on the configured backend.
pub struct Storage {
    backend: MailboxBackend,
    capacity: usize,
    buckets: Mutex<HashMap<TabId, Arc<dyn Mailbox>>>,
}

impl Storage {
    pub fn new(backend: MailboxBackend, capacity: usize) -> Self {
        Self {
            backend,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory(capacity: usize) -> Self {
        Self::new(MailboxBackend::Memory, capacity)
    }

    /// The tab's mailbox, opening (and for WAL, replaying) it on first use.
    pub fn get_or_open(&self, tab: TabId) -> MailboxResult<Arc<dyn Mailbox>> {
        let mut buckets = self.buckets.lock();
        if let Some(mailbox) = buckets.get(&tab) {
            return Ok(mailbox.clone());
        }
        let mailbox: Arc<dyn Mailbox> = match &self.backend {
            MailboxBackend::Memory => Arc::new(MemoryMailbox::new(self.capacity)),
            MailboxBackend::Wal { dir } => {
                std::fs::create_dir_all(dir)?;
                Arc::new(WalMailbox::open(&wal_path(dir, tab), self.capacity)?)
            }
        };
        info!(%tab, "mailbox opened");
        buckets.insert(tab, mailbox.clone());
        Ok(mailbox)
    }

    /// Empty one tab's mailbox. A WAL left behind by an earlier process
    /// for a tab not opened yet is deleted.
    pub async fn clear(&self, tab: TabId) -> MailboxResult<()> {
        let mailbox = {
            let buckets = self.buckets.lock();
            match (buckets.get(&tab), &self.backend) {
                (Some(mailbox), _) => Some(mailbox.clone()),
                (None, MailboxBackend::Wal { dir }) => {
                    remove_if_present(&wal_path(dir, tab))?;
                    None
                }
                (None, MailboxBackend::Memory) => None,
            }
        };
        match mailbox {
            Some(mailbox) => mailbox.clear().await,
            None => Ok(()),
        }
    }

    /// Empty every mailbox, including WAL files on disk for tabs this
    /// process never opened.
    pub async fn clear_all(&self) -> MailboxResult<()> {
        let all: Vec<Arc<dyn Mailbox>> = {
            let buckets = self.buckets.lock();
            if let MailboxBackend::Wal { dir } = &self.backend {
                let stale = unopened_wal_files(dir, &buckets)?;
                for path in &stale {
                    remove_if_present(path)?;
                }
                if !stale.is_empty() {
                    info!(removed = stale.len(), "removed mailbox logs of unopened tabs");
                }
            }
            buckets.values().cloned().collect()
        };
        for mailbox in all {
            mailbox.clear().await?;
        }
        Ok(())
    }

    /// Forget a closed tab's mailbox after emptying it.
    pub async fn remove(&self, tab: TabId) -> MailboxResult<()> {
        let mailbox = self.buckets.lock().remove(&tab);
        if let Some(mailbox) = mailbox {
            mailbox.clear().await?;
        }
        Ok(())
    }

    pub fn open_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.buckets.lock().keys().copied().collect();
        tabs.sort();
        tabs
    }
}

fn wal_path(dir: &Path, tab: TabId) -> PathBuf {
    dir.join(format!("tab-{tab}.wal"))
}

/// `tab-*.wal` files in `dir` that no open bucket owns.
fn unopened_wal_files(
    dir: &Path,
    open: &HashMap<TabId, Arc<dyn Mailbox>>,
) -> MailboxResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let owned: HashSet<PathBuf> = open.keys().map(|tab| wal_path(dir, *tab)).collect();
    let mut stale = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("tab-") && n.ends_with(".wal"));
        if is_log && !owned.contains(&path) {
            stale.push(path);
        }
    }
    Ok(stale)
}

fn remove_if_present(path: &Path) -> MailboxResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "mailbox log removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDetails, FocusDetails};

    fn event() -> Event {
        Event::new(
            None,
            EventDetails::Focus(FocusDetails { via_keyboard: true }),
        )
    }

    #[tokio::test]
    async fn appending_past_capacity_trims_oldest() {
        let mailbox = MemoryMailbox::new(1000);
        let events: Vec<Event> = (0..1001).map(|_| event()).collect();
        for e in &events {
            mailbox.append(e.clone()).await.unwrap();
        }
        let contents = mailbox.snapshot().await.unwrap();
        assert_eq!(contents.len(), 1000);
        assert_eq!(contents[0].id(), events[1].id());
        assert_eq!(contents[999].id(), events[1000].id());
        assert!(contents.iter().zip(&events[1..]).all(|(a, b)| a.id() == b.id()));
    }

    #[tokio::test]
    async fn snapshot_does_not_mutate() {
        let mailbox = MemoryMailbox::new(10);
        mailbox.append(event()).await.unwrap();
        let first = mailbox.snapshot().await.unwrap();
        let second = mailbox.snapshot().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mailbox.len(), 1);
    }

    #[tokio::test]
    async fn consume_removes_only_named_ids() {
        let mailbox = MemoryMailbox::new(10);
        let a = event();
        let b = event();
        mailbox.append(a.clone()).await.unwrap();
        mailbox.append(b.clone()).await.unwrap();

        let ids: HashSet<String> = [a.id().to_string(), "missing".to_string()].into();
        assert_eq!(mailbox.consume(&ids).await.unwrap(), 1);
        let left = mailbox.snapshot().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id(), b.id());
    }

    #[tokio::test]
    async fn duplicate_append_is_ignored() {
        let mailbox = MemoryMailbox::new(10);
        let a = event();
        mailbox.append(a.clone()).await.unwrap();
        mailbox.append(a).await.unwrap();
        assert_eq!(mailbox.len(), 1);
    }

    #[tokio::test]
    async fn storage_keeps_tabs_apart() {
        let storage = Storage::in_memory(10);
        let one = storage.get_or_open(TabId(1)).unwrap();
        let two = storage.get_or_open(TabId(2)).unwrap();
        one.append(event()).await.unwrap();
        two.append(event()).await.unwrap();

        storage.clear(TabId(1)).await.unwrap();
        assert!(one.snapshot().await.unwrap().is_empty());
        assert_eq!(two.snapshot().await.unwrap().len(), 1);

        storage.clear_all().await.unwrap();
        assert!(two.snapshot().await.unwrap().is_empty());
        assert_eq!(storage.open_tabs(), vec![TabId(1), TabId(2)]);
    }

    #[tokio::test]
    async fn storage_hands_out_the_same_bucket() {
        let storage = Storage::in_memory(10);
        let first = storage.get_or_open(TabId(4)).unwrap();
        first.append(event()).await.unwrap();
        let again = storage.get_or_open(TabId(4)).unwrap();
        assert_eq!(again.snapshot().await.unwrap().len(), 1);

        storage.remove(TabId(4)).await.unwrap();
        assert!(storage.open_tabs().is_empty());
        assert!(storage.get_or_open(TabId(4)).unwrap().snapshot().await.unwrap().is_empty());
    }

    fn wal_storage(dir: &Path) -> Storage {
        Storage::new(
            MailboxBackend::Wal {
                dir: dir.to_path_buf(),
            },
            10,
        )
    }

    #[tokio::test]
    async fn clear_all_removes_logs_from_an_earlier_run() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let earlier = wal_storage(dir.path());
            earlier.get_or_open(TabId(1)).unwrap().append(event()).await.unwrap();
            earlier.get_or_open(TabId(2)).unwrap().append(event()).await.unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        let storage = wal_storage(dir.path());
        let two = storage.get_or_open(TabId(2)).unwrap();
        assert_eq!(two.snapshot().await.unwrap().len(), 1);
        storage.clear_all().await.unwrap();

        assert!(two.snapshot().await.unwrap().is_empty());
        assert!(storage.get_or_open(TabId(1)).unwrap().snapshot().await.unwrap().is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn clear_reaches_an_unopened_tab_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let earlier = wal_storage(dir.path());
            earlier.get_or_open(TabId(3)).unwrap().append(event()).await.unwrap();
        }
        let storage = wal_storage(dir.path());
        storage.clear(TabId(3)).await.unwrap();
        assert!(storage.open_tabs().is_empty());
        assert!(storage.get_or_open(TabId(3)).unwrap().snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clearing_an_unopened_tab_is_a_no_op() {
        let storage = Storage::in_memory(10);
        storage.clear(TabId(9)).await.unwrap();
        assert!(storage.open_tabs().is_empty());
    }
}
