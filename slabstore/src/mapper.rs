use std::io;

use async_trait::async_trait;
use cid::Cid;
use futures::{AsyncRead, AsyncWrite};

/// A trait for storing and loading data from an arbitrary content addressed store.
///
/// Objects are immutable and identified by CID. Roots are the only mutable state: named
/// pointers to objects, each replaced atomically by `set_root`.
///
#[async_trait]
pub trait Mapper: Send + Sync {
    /// Obtain an output stream for writing an object to the store.
    ///
    /// The CID for the object can be obtained from the `finish` method of the returned
    /// `StoreWrite` object.
    ///
    async fn store(&self) -> Box<dyn StoreWrite + '_>;

    /// Same as `store` but doesn't actually store the object, just computes its hash.
    ///
    async fn hash(&self) -> Box<dyn StoreWrite + '_>;

    /// Obtain an input stream for reading an object from the store.
    ///
    /// Should return `Option::None` if given `cid` isn't in the store.
    ///
    async fn load(&self, cid: &Cid) -> io::Result<Option<Box<dyn AsyncRead + Unpin + Send + '_>>>;

    /// Get the size, in bytes, of object identified by `cid`
    ///
    async fn size_of(&self, cid: &Cid) -> io::Result<Option<u64>>;

    /// Get the object a root currently points to, if the root exists.
    ///
    async fn get_root(&self, name: &str) -> io::Result<Option<Cid>>;

    /// Point a root at an object, creating the root if needed.
    ///
    /// Readers must observe either the old or the new value, never anything else, even if the
    /// process dies part way through.
    ///
    async fn set_root(&self, name: &str, cid: &Cid) -> io::Result<()>;

    /// Remove a root. Removing a root that doesn't exist is not an error.
    ///
    async fn remove_root(&self, name: &str) -> io::Result<()>;

    /// Names of all roots starting with `prefix`, sorted.
    ///
    async fn list_roots(&self, prefix: &str) -> io::Result<Vec<String>>;
}

#[async_trait]
pub trait StoreWrite: AsyncWrite + Unpin + Send {
    /// Close the output stream and return the `cid` for the newly written object.
    ///
    async fn finish(self: Box<Self>) -> io::Result<Cid>;
}
