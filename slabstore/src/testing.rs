use std::{
    collections::{BTreeMap, HashMap},
    io::{self, Write},
    mem,
    pin::Pin,
    result,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use cid::{multihash::MultihashGeneric, Cid};
use futures::{
    io::{AsyncRead, AsyncWrite, Cursor, Error as AioError},
    task::{Context, Poll},
};
use multihash::{Hasher, Sha2_256};
use parking_lot::Mutex;

use crate::{
    config::Config,
    mapper::{Mapper, StoreWrite},
    resolver::Resolver,
    session::Session,
};

pub(crate) type AioResult<T> = result::Result<T, AioError>;

/// The SHA_256 multicodec code
const SHA2_256: u64 = 0x12;

/// A test implementation of Mapper that stores objects and roots in RAM
///
/// Clones share the same store, so a second session can be pointed at what a first session
/// wrote.
///
#[derive(Clone)]
pub(crate) struct MemoryMapper {
    store: Arc<MemoryStore>,
}

#[derive(Default)]
struct MemoryStore {
    objects: Mutex<HashMap<Cid, Vec<u8>>>,
    roots: Mutex<BTreeMap<String, Cid>>,
    fail_roots: AtomicBool,
    fail_container_roots: AtomicBool,
}

impl MemoryMapper {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
        }
    }

    /// Make every later `set_root` fail, as a backend that has gone away would
    pub fn fail_roots(&self, fail: bool) {
        self.store.fail_roots.store(fail, Ordering::SeqCst);
    }

    /// Make later `set_root` calls fail for container roots only, leaving dataset roots working
    pub fn fail_container_roots(&self, fail: bool) {
        self.store.fail_container_roots.store(fail, Ordering::SeqCst);
    }

    pub fn object_count(&self) -> usize {
        self.store.objects.lock().len()
    }
}

#[async_trait]
impl Mapper for MemoryMapper {
    async fn store(&self) -> Box<dyn StoreWrite + '_> {
        Box::new(MemoryMapperStoreWrite::new(self, false))
    }

    async fn hash(&self) -> Box<dyn StoreWrite + '_> {
        Box::new(MemoryMapperStoreWrite::new(self, true))
    }

    async fn load(&self, cid: &Cid) -> io::Result<Option<Box<dyn AsyncRead + Unpin + Send + '_>>> {
        let objects = self.store.objects.lock();
        Ok(objects.get(cid).map(|object| {
            Box::new(Cursor::new(object.clone())) as Box<dyn AsyncRead + Unpin + Send>
        }))
    }

    async fn size_of(&self, cid: &Cid) -> io::Result<Option<u64>> {
        let objects = self.store.objects.lock();
        Ok(objects.get(cid).map(|object| object.len() as u64))
    }

    async fn get_root(&self, name: &str) -> io::Result<Option<Cid>> {
        Ok(self.store.roots.lock().get(name).copied())
    }

    async fn set_root(&self, name: &str, cid: &Cid) -> io::Result<()> {
        let container = !name.contains('/');
        if self.store.fail_roots.load(Ordering::SeqCst)
            || (container && self.store.fail_container_roots.load(Ordering::SeqCst))
        {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "backend unavailable"));
        }
        self.store.roots.lock().insert(String::from(name), *cid);

        Ok(())
    }

    async fn remove_root(&self, name: &str) -> io::Result<()> {
        self.store.roots.lock().remove(name);

        Ok(())
    }

    async fn list_roots(&self, prefix: &str) -> io::Result<Vec<String>> {
        Ok(self
            .store
            .roots
            .lock()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

struct MemoryMapperStoreWrite<'a> {
    mapper: &'a MemoryMapper,
    buffer: Vec<u8>,
    hash: Sha2_256,
    hash_only: bool,
}

impl<'a> MemoryMapperStoreWrite<'a> {
    fn new(mapper: &'a MemoryMapper, hash_only: bool) -> Self {
        Self {
            mapper,
            buffer: Vec::new(),
            hash: Sha2_256::default(),
            hash_only,
        }
    }
}

impl<'a> AsyncWrite for MemoryMapperStoreWrite<'a> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<AioResult<usize>> {
        let result = self.buffer.write(buf);
        if let Ok(len) = result {
            self.hash.update(&buf[..len]);
        }

        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<AioResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<AioResult<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl<'a> StoreWrite for MemoryMapperStoreWrite<'a> {
    async fn finish(mut self: Box<Self>) -> io::Result<Cid> {
        let object = mem::take(&mut self.buffer);
        let digest = self.hash.finalize();
        let hash = MultihashGeneric::wrap(SHA2_256, digest)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        let cid = Cid::new_v1(SHA2_256, hash);

        if !self.hash_only {
            self.mapper.store.objects.lock().insert(cid, object);
        }

        Ok(cid)
    }
}

pub(crate) fn cid_for(data: &str) -> Cid {
    let mut hash = Sha2_256::default();
    hash.update(data.as_bytes());

    let digest = hash.finalize();
    let hash = MultihashGeneric::wrap(SHA2_256, digest).expect("Not really sure.");

    Cid::new_v1(SHA2_256, hash)
}

pub(crate) fn resolver() -> Arc<Resolver> {
    Arc::new(Resolver::new(Box::new(MemoryMapper::new()), 0))
}

pub(crate) fn session() -> Session {
    Session::init(Box::new(MemoryMapper::new()), Config::default())
}

/// A session over `mapper`, with caching disabled so every read goes to the store
pub(crate) fn session_over(mapper: &MemoryMapper) -> Session {
    Session::init(Box::new(mapper.clone()), Config { cache_bytes: 0 })
}
