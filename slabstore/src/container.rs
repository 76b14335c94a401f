use std::{collections::BTreeMap, sync::Arc};

use cid::Cid;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    dataset::Dataset,
    directory::Directory,
    errors::{Error, Result},
    resolver::Resolver,
    session::{ContainerClaim, HandleGuard, Session, SessionShared},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerState {
    Open,
    Committed,
    Closed,
}

/// A named namespace of datasets.
///
/// A container becomes durable when it is first committed. Its directory is a log of
/// `Directory` nodes rooted at the container's name, growing as datasets are committed into it,
/// so a dataset committed after the container still shows up when the container is reopened.
///
/// A session holds at most one open handle per container name.
///
pub struct Container {
    shared: Arc<ContainerShared>,
    guard: Option<HandleGuard>,
    claim: Option<ContainerClaim>,
}

pub(crate) struct ContainerShared {
    pub name: String,
    pub resolver: Arc<Resolver>,
    registry: Mutex<Registry>,

    pub session: Arc<SessionShared>,

    /// Serializes appends to the directory log
    append_lock: futures::lock::Mutex<()>,
}

struct Registry {
    state: ContainerState,
    head: Option<Cid>,

    /// Dataset names in the durable directory, in the order they were recorded
    recorded: Vec<String>,

    /// Datasets handled through this container
    datasets: BTreeMap<String, Entry>,
}

#[derive(Clone, Copy)]
struct Entry {
    open: bool,
    committed: bool,
}

/// Check that `name` can be used for a container or dataset.
///
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        Err(Error::InvalidName(String::from(name)))
    } else {
        Ok(())
    }
}

impl Container {
    /// Create a new, empty container.
    ///
    /// If `name` is already in use in the backend, either as a container or by datasets, this
    /// fails with `AlreadyExists` unless `overwrite` is set, in which case the existing heads
    /// are removed.
    ///
    pub async fn create(session: &Session, name: &str, overwrite: bool) -> Result<Self> {
        session.shared().check_active()?;
        check_name(name)?;
        let claim = ContainerClaim::new(session.shared(), name)?;

        let resolver = session.resolver();
        let mut existing = resolver.list_heads(&format!("{name}/")).await?;
        if resolver.head(name).await?.is_some() {
            existing.push(String::from(name));
        }
        if !existing.is_empty() {
            if !overwrite {
                return Err(Error::AlreadyExists(String::from(name)));
            }
            for head in &existing {
                resolver.remove_head(head).await?;
            }
            warn!(container = name, removed = existing.len(), "overwrote existing container");
        }

        info!(container = name, "container created");

        Ok(Self::new(session, claim, ContainerState::Open, None, vec![]))
    }

    /// Open a committed container.
    ///
    pub async fn open(session: &Session, name: &str) -> Result<Self> {
        session.shared().check_active()?;
        check_name(name)?;
        let claim = ContainerClaim::new(session.shared(), name)?;

        let resolver = session.resolver();
        let head = resolver
            .head(name)
            .await?
            .ok_or_else(|| Error::NotFound(String::from(name)))?;
        let recorded = Directory::names(resolver, &head).await?;
        info!(container = name, datasets = recorded.len(), "container opened");

        Ok(Self::new(
            session,
            claim,
            ContainerState::Committed,
            Some(head),
            recorded,
        ))
    }

    fn new(
        session: &Session,
        claim: ContainerClaim,
        state: ContainerState,
        head: Option<Cid>,
        recorded: Vec<String>,
    ) -> Self {
        let shared = ContainerShared {
            name: String::from(claim.name()),
            resolver: Arc::clone(session.resolver()),
            registry: Mutex::new(Registry {
                state,
                head,
                recorded,
                datasets: BTreeMap::new(),
            }),
            session: Arc::clone(session.shared()),
            append_lock: futures::lock::Mutex::new(()),
        };

        Self {
            shared: Arc::new(shared),
            guard: Some(HandleGuard::new(session.shared())),
            claim: Some(claim),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ContainerState {
        self.shared.registry.lock().state
    }

    /// Record every committed dataset not yet in the directory, making the container durable.
    ///
    /// Can be called again: later commits only append datasets that are new since the last one.
    ///
    pub async fn commit(&mut self) -> Result<()> {
        self.shared.check_open()?;
        self.shared.append().await?;
        self.shared.registry.lock().state = ContainerState::Committed;
        info!(container = %self.shared.name, "container committed");

        Ok(())
    }

    /// Close the container. Every dataset handle opened through it must be closed first.
    ///
    pub fn close(&mut self) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        if registry.state == ContainerState::Closed {
            return Err(Error::UseAfterClose(self.shared.name.clone()));
        }
        let open = registry
            .datasets
            .iter()
            .filter(|(_, entry)| entry.open)
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        if !open.is_empty() {
            return Err(Error::OpenDatasetsAtClose(open));
        }
        if registry.state == ContainerState::Open {
            warn!(container = %self.shared.name, "container closed without being committed");
        }
        registry.state = ContainerState::Closed;
        drop(registry);

        self.guard = None;
        self.claim = None;
        info!(container = %self.shared.name, "container closed");

        Ok(())
    }

    /// Names of the datasets recorded in the durable directory, followed by those created
    /// through this handle and not yet recorded.
    ///
    pub fn dataset_names(&self) -> Result<Vec<String>> {
        let registry = self.shared.registry.lock();
        if registry.state == ContainerState::Closed {
            return Err(Error::UseAfterClose(self.shared.name.clone()));
        }
        let mut names = registry.recorded.clone();
        for name in registry.datasets.keys() {
            if !registry.recorded.contains(name) {
                names.push(name.clone());
            }
        }

        Ok(names)
    }

    /// Open a committed dataset for writing and reading.
    ///
    /// Only one handle per dataset may be open at a time.
    ///
    pub async fn open_dataset(&self, name: &str) -> Result<Dataset> {
        self.shared.check_open()?;
        check_name(name)?;
        if self.shared.is_open(name) {
            return Err(Error::AlreadyExists(self.shared.dataset_root(name)));
        }

        let resolver = &self.shared.resolver;
        let root = self.shared.dataset_root(name);
        let head = resolver
            .head(&root)
            .await?
            .ok_or_else(|| Error::NotFound(root.clone()))?;
        let commit = resolver.get_commit(&head).await?;
        let schema = resolver.get_schema(&commit.schema).await?;

        // Checked again, the lock having been released while loading
        self.shared.register(name, true)?;

        info!(dataset = %root, version = commit.version, "dataset opened");

        Ok(Dataset::reopen(
            self,
            (*schema).clone(),
            commit.schema,
            head,
            commit.version,
        ))
    }

    pub(crate) fn shared(&self) -> &Arc<ContainerShared> {
        &self.shared
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.guard.is_some() {
            warn!(container = %self.shared.name, "container dropped without being closed");
        }
    }
}

impl ContainerShared {
    pub fn dataset_root(&self, dataset: &str) -> String {
        format!("{}/{}", self.name, dataset)
    }

    pub fn check_open(&self) -> Result<()> {
        if self.registry.lock().state == ContainerState::Closed {
            Err(Error::UseAfterClose(self.name.clone()))
        } else {
            Ok(())
        }
    }

    pub fn is_committed(&self) -> bool {
        self.registry.lock().state == ContainerState::Committed
    }

    fn is_open(&self, dataset: &str) -> bool {
        self.registry
            .lock()
            .datasets
            .get(dataset)
            .map_or(false, |entry| entry.open)
    }

    /// Register an open handle for `dataset`.
    ///
    /// A new dataset (`committed` false) must not share a name with any dataset known to the
    /// container. An existing one must not already have an open handle.
    ///
    pub fn register(&self, dataset: &str, committed: bool) -> Result<()> {
        let mut registry = self.registry.lock();
        if registry.state == ContainerState::Closed {
            return Err(Error::UseAfterClose(self.name.clone()));
        }
        let taken = match registry.datasets.get(dataset) {
            Some(entry) => entry.open || !committed,
            None => !committed && registry.recorded.iter().any(|name| name == dataset),
        };
        if taken {
            return Err(Error::AlreadyExists(self.dataset_root(dataset)));
        }
        registry.datasets.insert(
            String::from(dataset),
            Entry {
                open: true,
                committed,
            },
        );

        Ok(())
    }

    pub fn mark_committed(&self, dataset: &str) {
        if let Some(entry) = self.registry.lock().datasets.get_mut(dataset) {
            entry.committed = true;
        }
    }

    /// Release the handle for `dataset`. A dataset that was never committed is forgotten.
    ///
    pub fn release(&self, dataset: &str) {
        let mut registry = self.registry.lock();
        let forget = match registry.datasets.get_mut(dataset) {
            Some(entry) => {
                entry.open = false;
                !entry.committed
            }
            None => false,
        };
        if forget {
            registry.datasets.remove(dataset);
        }
    }

    /// Append committed datasets missing from the directory log as one new log entry.
    ///
    /// The first append always writes an entry, even an empty one, so that a committed
    /// container has a head.
    ///
    pub async fn append(&self) -> Result<()> {
        let _lock = self.append_lock.lock().await;
        let (head, names) = {
            let registry = self.registry.lock();
            let names = registry
                .datasets
                .iter()
                .filter(|(name, entry)| entry.committed && !registry.recorded.contains(*name))
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>();

            (registry.head, names)
        };
        if names.is_empty() && head.is_some() {
            return Ok(());
        }

        let entry = Directory {
            container: self.name.clone(),
            datasets: names,
            prev: head,
        };
        let cid = self.resolver.save(&entry).await?;
        self.resolver.set_head(&self.name, &cid).await?;
        info!(container = %self.name, added = ?entry.datasets, "directory appended");

        let mut registry = self.registry.lock();
        registry.head = Some(cid);
        registry.recorded.extend(entry.datasets);

        Ok(())
    }
}
