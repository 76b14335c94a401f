use async_trait::async_trait;
use cid::Cid;
use futures::io::{AsyncRead, AsyncWrite};

use crate::errors::Result;

pub(crate) const NODE_SCHEMA: u8 = 1;
pub(crate) const NODE_CHUNK: u8 = 2;
pub(crate) const NODE_COMMIT: u8 = 3;
pub(crate) const NODE_DIRECTORY: u8 = 4;

/// A node in the storage DAG.
///
/// Nodes are immutable once saved and are addressed by the CID of their serialized form.
///
#[async_trait]
pub(crate) trait Node: Sized + Send + Sync {
    const NODE_TYPE: u8;

    /// Save an object into the DAG
    ///
    async fn save_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()>;

    /// Load an object from a stream
    async fn load_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self>;

    /// List other nodes referenced by this node
    fn ls(&self) -> Vec<(String, Cid)>;
}

pub(crate) fn type_name(code: u8) -> Option<&'static str> {
    match code {
        NODE_SCHEMA => Some("Schema"),
        NODE_CHUNK => Some("Chunk"),
        NODE_COMMIT => Some("Commit"),
        NODE_DIRECTORY => Some("Directory"),
        _ => None,
    }
}
