use std::sync::Arc;

use cid::Cid;
use futures::{io::AsyncRead, AsyncWriteExt, FutureExt};
use tracing::debug;

use crate::{
    cache::{Cache, Cacheable},
    commit::{Chunk, CommitNode},
    directory::Directory,
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite},
    mapper::Mapper,
    node::{self, Node},
    schema::Schema,
};

const MAGIC_NUMBER: u16 = 0x51AB;
const FORMAT_VERSION: u32 = 0;

/// The `Resolver` manages storage and retrieval of nodes from a content addressed datastore
///
/// To store and load objects, a Resolver must be provided with a concrete `Mapper`
/// implementation. Loaded objects are stored in RAM in an LRU cache up to a specified size
/// limit, for fast re-retrieval of recently used objects. The resolver also fronts the
/// mapper's named roots, which hold the heads of container and dataset logs.
///
pub struct Resolver {
    mapper: Box<dyn Mapper>,
    cache: Cache<Cid, CacheItem>,
}

enum CacheItem {
    Chunk(Arc<Chunk>),
    Commit(Arc<CommitNode>),
    Directory(Arc<Directory>),
    Schema(Arc<Schema>),
}

impl CacheItem {
    fn ls(&self) -> Vec<(String, Cid)> {
        match self {
            CacheItem::Chunk(chunk) => chunk.ls(),
            CacheItem::Commit(commit) => commit.ls(),
            CacheItem::Directory(directory) => directory.ls(),
            CacheItem::Schema(schema) => schema.ls(),
        }
    }
}

impl Cacheable for CacheItem {
    fn size(&self) -> u64 {
        match self {
            CacheItem::Chunk(chunk) => chunk.size(),
            CacheItem::Commit(commit) => commit.size(),
            CacheItem::Directory(directory) => directory.size(),
            CacheItem::Schema(schema) => schema.size(),
        }
    }
}

pub struct LsEntry {
    pub cid: Cid,
    pub name: String,
    pub node_type: Option<&'static str>,
    pub size: Option<u64>,
}

impl Resolver {
    pub(crate) const HEADER_SIZE: u64 = 2 + 4 + 1;

    /// Create a new `Resolver`
    ///
    /// # Arguments
    ///
    /// * `mapper` - A boxed implementation of `Mapper`, which handles writing to and reading from
    ///   the underlying data store.
    /// * `cache_bytes` - The size limit, in bytes, for the LRU cache used by the resolver to hold
    ///   recently used objects in RAM.
    ///
    pub fn new(mapper: Box<dyn Mapper>, cache_bytes: u64) -> Self {
        let cache = Cache::new(cache_bytes);
        Self { mapper, cache }
    }

    pub(crate) async fn get_schema(self: &Arc<Resolver>, cid: &Cid) -> Result<Arc<Schema>> {
        match &*self.check_cache(cid).await? {
            CacheItem::Schema(schema) => Ok(Arc::clone(schema)),
            _ => Err(Error::BadFormat(format!("{cid} is not a schema"))),
        }
    }

    pub(crate) async fn get_chunk(self: &Arc<Resolver>, cid: &Cid) -> Result<Arc<Chunk>> {
        match &*self.check_cache(cid).await? {
            CacheItem::Chunk(chunk) => Ok(Arc::clone(chunk)),
            _ => Err(Error::BadFormat(format!("{cid} is not a chunk"))),
        }
    }

    pub(crate) async fn get_commit(self: &Arc<Resolver>, cid: &Cid) -> Result<Arc<CommitNode>> {
        match &*self.check_cache(cid).await? {
            CacheItem::Commit(commit) => Ok(Arc::clone(commit)),
            _ => Err(Error::BadFormat(format!("{cid} is not a commit"))),
        }
    }

    pub(crate) async fn get_directory(self: &Arc<Resolver>, cid: &Cid) -> Result<Arc<Directory>> {
        match &*self.check_cache(cid).await? {
            CacheItem::Directory(directory) => Ok(Arc::clone(directory)),
            _ => Err(Error::BadFormat(format!("{cid} is not a directory"))),
        }
    }

    async fn check_cache(self: &Arc<Resolver>, cid: &Cid) -> Result<Arc<CacheItem>> {
        let resolver = Arc::clone(self);
        let load = |cid: Cid| async move { resolver.retrieve(cid).await }.boxed();
        self.cache.get(cid, load).await
    }

    /// Store a node
    ///
    pub(crate) async fn save<O>(&self, node: &O) -> Result<Cid>
    where
        O: Node,
    {
        let mut stream = self.mapper.store().await;
        stream.write_u16(MAGIC_NUMBER).await?;
        stream.write_u32(FORMAT_VERSION).await?;
        stream.write_byte(O::NODE_TYPE).await?;
        node.save_to(&mut stream).await?;
        stream.close().await?;

        let cid = stream.finish().await?;
        debug!(cid = %cid, node_type = node::type_name(O::NODE_TYPE), "node stored");

        Ok(cid)
    }

    /// Compute the CID a node would be stored under, without storing it
    ///
    pub(crate) async fn hash<O>(&self, node: &O) -> Result<Cid>
    where
        O: Node,
    {
        let mut stream = self.mapper.hash().await;
        stream.write_u16(MAGIC_NUMBER).await?;
        stream.write_u32(FORMAT_VERSION).await?;
        stream.write_byte(O::NODE_TYPE).await?;
        node.save_to(&mut stream).await?;
        stream.close().await?;

        Ok(stream.finish().await?)
    }

    /// Store a node unless an identical one is already in the store
    ///
    pub(crate) async fn save_once<O>(&self, node: &O) -> Result<Cid>
    where
        O: Node,
    {
        let cid = self.hash(node).await?;
        if self.mapper.size_of(&cid).await?.is_some() {
            debug!(cid = %cid, "node already stored");
            return Ok(cid);
        }

        self.save(node).await
    }

    /// Retrieve a node
    ///
    async fn retrieve(self: &Arc<Resolver>, cid: Cid) -> Result<CacheItem> {
        let mut stream = self
            .mapper
            .load(&cid)
            .await?
            .ok_or_else(|| Error::NotFound(cid.to_string()))?;
        let node_type = Self::read_header(&mut stream).await?;
        let item = match node_type {
            node::NODE_SCHEMA => CacheItem::Schema(Arc::new(Schema::load_from(&mut stream).await?)),
            node::NODE_CHUNK => CacheItem::Chunk(Arc::new(Chunk::load_from(&mut stream).await?)),
            node::NODE_COMMIT => {
                CacheItem::Commit(Arc::new(CommitNode::load_from(&mut stream).await?))
            }
            node::NODE_DIRECTORY => {
                CacheItem::Directory(Arc::new(Directory::load_from(&mut stream).await?))
            }
            _ => {
                return Err(Error::BadFormat(format!(
                    "unrecognized node type {node_type} for {cid}"
                )));
            }
        };

        Ok(item)
    }

    async fn read_header(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<u8> {
        let magic_number = stream.read_u16().await?;
        if magic_number != MAGIC_NUMBER {
            return Err(Error::BadFormat(String::from("not a slabstore node")));
        }

        let version = stream.read_u32().await?;
        if version != FORMAT_VERSION {
            return Err(Error::BadFormat(format!("unrecognized format version {version}")));
        }

        Ok(stream.read_byte().await?)
    }

    /// List the nodes referenced by the node at `cid`
    ///
    pub async fn ls(self: &Arc<Resolver>, cid: &Cid) -> Result<Vec<LsEntry>> {
        let object = self.check_cache(cid).await?;
        let mut ls = Vec::new();
        for (name, cid) in object.ls() {
            let node_type = self.node_type_of(&cid).await?;
            let size = self.mapper.size_of(&cid).await?;
            ls.push(LsEntry {
                cid,
                name,
                node_type,
                size,
            });
        }

        Ok(ls)
    }

    async fn node_type_of(&self, cid: &Cid) -> Result<Option<&'static str>> {
        match self.mapper.load(cid).await? {
            None => Ok(None),
            Some(mut stream) => {
                let code = Self::read_header(&mut stream).await?;

                Ok(node::type_name(code))
            }
        }
    }

    pub(crate) async fn head(&self, name: &str) -> Result<Option<Cid>> {
        Ok(self.mapper.get_root(name).await?)
    }

    pub(crate) async fn set_head(&self, name: &str, cid: &Cid) -> Result<()> {
        self.mapper.set_root(name, cid).await?;
        debug!(root = name, cid = %cid, "head moved");

        Ok(())
    }

    pub(crate) async fn remove_head(&self, name: &str) -> Result<()> {
        Ok(self.mapper.remove_root(name).await?)
    }

    pub(crate) async fn list_heads(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.mapper.list_roots(prefix).await?)
    }
}
