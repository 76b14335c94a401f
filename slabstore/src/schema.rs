use async_trait::async_trait;
use cid::Cid;
use futures::{AsyncRead, AsyncWrite};

use crate::{
    attribute::AttributeStore,
    cache::Cacheable,
    dataspace::Dataspace,
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite, Serialize},
    node::{Node, NODE_SCHEMA},
    resolver::Resolver,
};

/// The frozen description of a dataset, written once when the dataset is first committed.
///
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Schema {
    pub name: String,
    pub dataspace: Dataspace,
    pub dimension_names: Option<Vec<String>>,
    pub attributes: AttributeStore,
    pub fill_value: Option<Vec<u8>>,
}

impl Schema {
    pub fn new(name: String, dataspace: Dataspace) -> Self {
        Self {
            name,
            dataspace,
            dimension_names: None,
            attributes: AttributeStore::new(),
            fill_value: None,
        }
    }

    /// The bytes of one element never covered by a committed write.
    ///
    pub fn fill_element(&self) -> Vec<u8> {
        match &self.fill_value {
            Some(fill) => fill.clone(),
            None => vec![0; self.dataspace.element_type().size()],
        }
    }
}

#[async_trait]
impl Node for Schema {
    const NODE_TYPE: u8 = NODE_SCHEMA;

    async fn save_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_str(&self.name).await?;
        self.dataspace.write_to(stream).await?;
        match &self.dimension_names {
            Some(names) => {
                stream.write_byte(1).await?;
                for name in names {
                    stream.write_str(name).await?;
                }
            }
            None => stream.write_byte(0).await?,
        }
        self.attributes.write_to(stream).await?;
        match &self.fill_value {
            Some(fill) => {
                stream.write_byte(1).await?;
                stream.write_bytes(fill).await?;
            }
            None => stream.write_byte(0).await?,
        }

        Ok(())
    }

    async fn load_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        let name = stream.read_str().await?;
        let dataspace = Dataspace::read_from(stream).await?;
        let dimension_names = match stream.read_byte().await? {
            0 => None,
            _ => {
                let mut names = Vec::with_capacity(dataspace.dimension_count());
                for _ in 0..dataspace.dimension_count() {
                    names.push(stream.read_str().await?);
                }
                Some(names)
            }
        };
        let attributes = AttributeStore::read_from(stream).await?;
        let fill_value = match stream.read_byte().await? {
            0 => None,
            _ => Some(stream.read_bytes().await?),
        };
        if let Some(fill) = &fill_value {
            if fill.len() != dataspace.element_type().size() {
                return Err(Error::BadFormat(format!(
                    "fill value of {name:?} has {} bytes",
                    fill.len()
                )));
            }
        }

        Ok(Self {
            name,
            dataspace,
            dimension_names,
            attributes,
            fill_value,
        })
    }

    fn ls(&self) -> Vec<(String, Cid)> {
        vec![]
    }
}

impl Cacheable for Schema {
    fn size(&self) -> u64 {
        let names = self
            .dimension_names
            .iter()
            .flatten()
            .map(|name| 4 + name.len() as u64)
            .sum::<u64>();
        let attributes = self
            .attributes
            .iter()
            .map(|(_, attribute)| 14 + attribute.name().len() + attribute.value_bytes().len())
            .sum::<usize>() as u64;

        let name = 4 + self.name.len() as u64;
        let dataspace = 5 + 16 * self.dataspace.dimension_count() as u64;
        let fill = 5 + self.fill_value.as_ref().map_or(0, |fill| fill.len() as u64);

        Resolver::HEADER_SIZE + name + dataspace + 1 + names + 4 + attributes + fill
    }
}
