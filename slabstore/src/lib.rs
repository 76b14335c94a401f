//! Versioned storage of typed, n-dimensional arrays over a content addressed backend.
//!
//! Data lives in containers, each a namespace of datasets. A dataset is written a hyperslab at
//! a time, and writes only become visible when the dataset is committed, all at once.
//!
mod attribute;
mod cache;
mod commit;
mod config;
mod container;
mod dataset;
mod dataspace;
mod directory;
mod dtype;
mod errors;
mod extio;
mod geom;
mod mapper;
mod node;
mod resolver;
mod schema;
mod session;

#[cfg(test)]
mod testing;

pub use attribute::{Attribute, AttributeScope, AttributeStore};
pub use config::Config;
pub use container::{Container, ContainerState};
pub use dataset::{Dataset, DatasetState};
pub use dataspace::Dataspace;
pub use dtype::{Element, PrimitiveType};
pub use errors::{Error, Result};
pub use mapper::{Mapper, StoreWrite};
pub use resolver::{LsEntry, Resolver};
pub use session::Session;
