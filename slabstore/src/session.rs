use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::info;

use crate::{
    config::Config,
    errors::{Error, Result},
    mapper::Mapper,
    resolver::Resolver,
};

/// Process level state: the resolver every handle stores through and a count of open handles.
///
/// Sessions are independent of one another, so initializing a second one can't disturb the
/// first. `finalize` refuses to run while any container or dataset handle is still open.
///
/// Within a session a container name has at most one open handle at a time.
///
pub struct Session {
    shared: Arc<SessionShared>,
}

pub(crate) struct SessionShared {
    pub resolver: Arc<Resolver>,
    open_handles: AtomicUsize,
    finalized: AtomicBool,

    /// Names of containers with an open handle
    containers: Mutex<HashSet<String>>,
}

impl SessionShared {
    pub fn check_active(&self) -> Result<()> {
        if self.finalized.load(Ordering::SeqCst) {
            Err(Error::UseAfterClose(String::from("session")))
        } else {
            Ok(())
        }
    }
}

impl Session {
    pub fn init(mapper: Box<dyn Mapper>, config: Config) -> Self {
        let resolver = Arc::new(Resolver::new(mapper, config.cache_bytes));
        info!(cache_bytes = config.cache_bytes, "session initialized");

        Self {
            shared: Arc::new(SessionShared {
                resolver,
                open_handles: AtomicUsize::new(0),
                finalized: AtomicBool::new(false),
                containers: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.shared.resolver
    }

    /// Number of container and dataset handles not yet closed or dropped
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// Shut the session down.
    ///
    /// Fails with `HandlesOutstanding` if handles are still open, in which case the session
    /// stays usable. After success, creating or opening containers fails with `UseAfterClose`.
    ///
    pub fn finalize(&mut self) -> Result<()> {
        self.shared.check_active()?;
        let open = self.open_handles();
        if open > 0 {
            return Err(Error::HandlesOutstanding(open));
        }
        self.shared.finalized.store(true, Ordering::SeqCst);
        info!("session finalized");

        Ok(())
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }
}

/// Registration of one open handle with its session, released on drop.
///
pub(crate) struct HandleGuard {
    session: Arc<SessionShared>,
}

impl HandleGuard {
    pub fn new(session: &Arc<SessionShared>) -> Self {
        session.open_handles.fetch_add(1, Ordering::SeqCst);
        Self {
            session: Arc::clone(session),
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.session.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive use of a container name within a session, released on drop.
///
pub(crate) struct ContainerClaim {
    session: Arc<SessionShared>,
    name: String,
}

impl ContainerClaim {
    pub fn new(session: &Arc<SessionShared>, name: &str) -> Result<Self> {
        if !session.containers.lock().insert(String::from(name)) {
            return Err(Error::AlreadyExists(String::from(name)));
        }

        Ok(Self {
            session: Arc::clone(session),
            name: String::from(name),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ContainerClaim {
    fn drop(&mut self) {
        self.session.containers.lock().remove(&self.name);
    }
}
