use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use futures::{AsyncRead, AsyncWrite};

use crate::{
    cache::Cacheable,
    errors::Result,
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite},
    node::{Node, NODE_DIRECTORY},
    resolver::Resolver,
};

/// One entry in a container's dataset directory.
///
/// The directory is an append-only log: each entry names the datasets added since the entry it
/// points back to. The full directory is the union of the log.
///
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Directory {
    pub container: String,
    pub datasets: Vec<String>,
    pub prev: Option<Cid>,
}

impl Directory {
    /// Every dataset name recorded in the log ending at `head`, in the order they were added.
    ///
    pub async fn names(resolver: &Arc<Resolver>, head: &Cid) -> Result<Vec<String>> {
        let mut entries = vec![];
        let mut next = Some(*head);
        while let Some(cid) = next {
            let entry = resolver.get_directory(&cid).await?;
            next = entry.prev;
            entries.push(entry);
        }

        Ok(entries
            .iter()
            .rev()
            .flat_map(|entry| entry.datasets.iter().cloned())
            .collect())
    }
}

#[async_trait]
impl Node for Directory {
    const NODE_TYPE: u8 = NODE_DIRECTORY;

    async fn save_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_str(&self.container).await?;
        stream.write_u32(self.datasets.len() as u32).await?;
        for name in &self.datasets {
            stream.write_str(name).await?;
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
        let container = stream.read_str().await?;
        let n = stream.read_u32().await?;
        let mut datasets = vec![];
        for _ in 0..n {
            datasets.push(stream.read_str().await?);
        }
        let prev = match stream.read_byte().await? {
            0 => None,
            _ => Some(stream.read_cid().await?),
        };

        Ok(Self {
            container,
            datasets,
            prev,
        })
    }

    fn ls(&self) -> Vec<(String, Cid)> {
        match self.prev {
            Some(cid) => vec![(String::from("prev"), cid)],
            None => vec![],
        }
    }
}

impl Cacheable for Directory {
    fn size(&self) -> u64 {
        Resolver::HEADER_SIZE
            + 4
            + self.container.len() as u64
            + 4
            + self
                .datasets
                .iter()
                .map(|name| 4 + name.len() as u64)
                .sum::<u64>()
            + 1
            + self.prev.map_or(0, |cid| cid.encoded_len() as u64)
    }
}
