use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use futures::{AsyncRead, AsyncWrite};

use crate::{
    cache::Cacheable,
    dataspace::Dataspace,
    errors::Result,
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite, Serialize},
    node::{Node, NODE_CHUNK, NODE_COMMIT},
    resolver::Resolver,
};

/// The payload of one committed region.
///
pub(crate) struct Chunk {
    payload: Vec<u8>,
}

impl Chunk {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[async_trait]
impl Node for Chunk {
    const NODE_TYPE: u8 = NODE_CHUNK;

    async fn save_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_bytes(&self.payload).await?;

        Ok(())
    }

    async fn load_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        Ok(Self::new(stream.read_bytes().await?))
    }

    fn ls(&self) -> Vec<(String, Cid)> {
        vec![]
    }
}

impl Cacheable for Chunk {
    fn size(&self) -> u64 {
        Resolver::HEADER_SIZE + 4 + self.payload.len() as u64
    }
}

/// A region of a dataset and the chunk holding its values.
///
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Region {
    pub dataspace: Dataspace,
    pub chunk: Cid,
}

/// One entry in a dataset's commit log.
///
/// Version 0 is the schema commit and carries no regions. Every later commit carries the
/// regions written since the previous one, in the order they were staged.
///
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CommitNode {
    pub schema: Cid,
    pub version: u64,
    pub regions: Vec<Region>,
    pub prev: Option<Cid>,
}

impl CommitNode {
    /// Walk the log back from `head`, returning commits oldest first.
    ///
    pub async fn log(resolver: &Arc<Resolver>, head: &Cid) -> Result<Vec<Arc<CommitNode>>> {
        let mut commits = vec![];
        let mut next = Some(*head);
        while let Some(cid) = next {
            let commit = resolver.get_commit(&cid).await?;
            next = commit.prev;
            commits.push(commit);
        }
        commits.reverse();

        Ok(commits)
    }
}

#[async_trait]
impl Node for CommitNode {
    const NODE_TYPE: u8 = NODE_COMMIT;

    async fn save_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_cid(&self.schema).await?;
        stream.write_u64(self.version).await?;
        stream.write_u32(self.regions.len() as u32).await?;
        for region in &self.regions {
            region.dataspace.write_to(stream).await?;
            stream.write_cid(&region.chunk).await?;
        }
        match &self.prev {
            Some(cid) => {
                stream.write_byte(1).await?;
                stream.write_cid(cid).await?;
            }
            None => stream.write_byte(0).await?,
        }

        Ok(())
    }

    async fn load_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        let schema = stream.read_cid().await?;
        let version = stream.read_u64().await?;
        let n = stream.read_u32().await?;
        let mut regions = vec![];
        for _ in 0..n {
            let dataspace = Dataspace::read_from(stream).await?;
            let chunk = stream.read_cid().await?;
            regions.push(Region { dataspace, chunk });
        }
        let prev = match stream.read_byte().await? {
            0 => None,
            _ => Some(stream.read_cid().await?),
        };

        Ok(Self {
            schema,
            version,
            regions,
            prev,
        })
    }

    fn ls(&self) -> Vec<(String, Cid)> {
        let mut ls = vec![(String::from("schema"), self.schema)];
        for (i, region) in self.regions.iter().enumerate() {
            ls.push((i.to_string(), region.chunk));
        }
        if let Some(cid) = self.prev {
            ls.push((String::from("prev"), cid));
        }

        ls
    }
}

impl Cacheable for CommitNode {
    fn size(&self) -> u64 {
        let regions = self
            .regions
            .iter()
            .map(|region| {
                5 + 16 * region.dataspace.dimension_count() as u64
                    + region.chunk.encoded_len() as u64
            })
            .sum::<u64>();

        Resolver::HEADER_SIZE
            + self.schema.encoded_len() as u64
            + 8
            + 4
            + regions
            + 1
            + self.prev.map_or(0, |cid| cid.encoded_len() as u64)
    }
}

/// A validated write held in memory until the next commit.
///
pub(crate) struct StagedWrite {
    pub region: Dataspace,
    pub payload: Vec<u8>,
}

/// Staged writes that are not covered completely by a later staged write.
///
/// Reads apply regions in order, so what remains reads the same as the full sequence: the last
/// staged write wins wherever writes overlap.
///
pub(crate) fn coalesce(staged: &[StagedWrite]) -> Vec<&StagedWrite> {
    let bounds = staged.iter().map(|write| write.region.bounds()).collect::<Vec<_>>();

    staged
        .iter()
        .enumerate()
        .filter(|(i, _)| !bounds[i + 1..].iter().any(|later| later.contains(&bounds[*i])))
        .map(|(_, write)| write)
        .collect()
}
