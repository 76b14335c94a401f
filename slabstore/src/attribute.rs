use std::collections::{btree_map, BTreeMap};

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};

use crate::{
    dtype::{self, Element, PrimitiveType},
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite, Serialize},
};

/// Named, typed metadata.
///
/// The value is one element (scalar) or several (array) of `element_type`. Text is stored as
/// an array of `Char`.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    name: String,
    dtype: PrimitiveType,
    value: Vec<u8>,
}

impl Attribute {
    pub fn scalar<T, S>(name: S, value: T) -> Self
    where
        T: Element,
        S: Into<String>,
    {
        Self::array(name, &[value])
    }

    pub fn array<T, S>(name: S, values: &[T]) -> Self
    where
        T: Element,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            dtype: T::TYPE,
            value: dtype::to_bytes(values),
        }
    }

    pub fn text<S: Into<String>>(name: S, value: &str) -> Self {
        Self {
            name: name.into(),
            dtype: PrimitiveType::Char,
            value: value.as_bytes().to_vec(),
        }
    }

    /// An attribute from raw bytes, which must hold a whole, non-zero number of elements. Only
    /// text may be empty.
    ///
    pub fn from_bytes<S: Into<String>>(name: S, dtype: PrimitiveType, value: Vec<u8>) -> Result<Self> {
        let name = name.into();
        let empty = value.is_empty() && dtype != PrimitiveType::Char;
        if empty || value.len() % dtype.size() != 0 {
            return Err(Error::TypeMismatch(format!(
                "attribute {name:?}: {} bytes is not a whole number of {dtype:?} values",
                value.len()
            )));
        }

        Ok(Self { name, dtype, value })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> PrimitiveType {
        self.dtype
    }

    pub fn value_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Number of elements in the value
    pub fn len(&self) -> usize {
        self.value.len() / self.dtype.size()
    }

    pub fn value_as<T: Element>(&self) -> Result<Vec<T>> {
        dtype::from_bytes(self.dtype, &self.value)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self.dtype {
            PrimitiveType::Char => std::str::from_utf8(&self.value).ok(),
            _ => None,
        }
    }
}

/// What an attribute describes: the whole dataset or one of its dimensions.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeScope {
    Dataset,
    Dimension(usize),
}

/// Attributes of one dataset, keyed by scope and then name.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeStore {
    attributes: BTreeMap<AttributeScope, BTreeMap<String, Attribute>>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, scope: AttributeScope, attribute: Attribute) -> Result<()> {
        let scoped = self.attributes.entry(scope).or_default();
        match scoped.entry(attribute.name.clone()) {
            btree_map::Entry::Occupied(_) => Err(Error::DuplicateAttribute(attribute.name)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(attribute);
                Ok(())
            }
        }
    }

    pub fn contains(&self, scope: AttributeScope, name: &str) -> bool {
        self.get(scope, name).is_some()
    }

    pub fn get(&self, scope: AttributeScope, name: &str) -> Option<&Attribute> {
        self.attributes.get(&scope)?.get(name)
    }

    /// All attributes in scope order, dataset scope first.
    ///
    pub fn iter(&self) -> impl Iterator<Item = (AttributeScope, &Attribute)> {
        self.attributes
            .iter()
            .flat_map(|(scope, scoped)| scoped.values().map(move |attribute| (*scope, attribute)))
    }

    pub fn len(&self) -> usize {
        self.attributes.values().map(|scoped| scoped.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Serialize for AttributeStore {
    async fn write_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_u32(self.len() as u32).await?;
        for (scope, attribute) in self.iter() {
            match scope {
                AttributeScope::Dataset => stream.write_byte(0).await?,
                AttributeScope::Dimension(index) => {
                    stream.write_byte(1).await?;
                    stream.write_u32(index as u32).await?;
                }
            }
            stream.write_str(&attribute.name).await?;
            stream.write_byte(attribute.dtype.code()).await?;
            stream.write_bytes(&attribute.value).await?;
        }

        Ok(())
    }

    async fn read_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        let mut store = Self::new();
        let n = stream.read_u32().await?;
        for _ in 0..n {
            let scope = match stream.read_byte().await? {
                0 => AttributeScope::Dataset,
                1 => AttributeScope::Dimension(stream.read_u32().await? as usize),
                tag => {
                    return Err(Error::BadFormat(format!("unknown attribute scope {tag}")));
                }
            };
            let name = stream.read_str().await?;
            let dtype = PrimitiveType::from_code(stream.read_byte().await?)?;
            let value = stream.read_bytes().await?;
            store.insert(scope, Attribute::from_bytes(name, dtype, value)?)?;
        }

        Ok(store)
    }
}
