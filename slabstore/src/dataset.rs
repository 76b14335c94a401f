use std::sync::{Arc, Weak};

use cid::Cid;
use ndarray::{ArrayD, ArrayView, Dimension, IxDyn};
use tracing::{debug, info, warn};

use crate::{
    attribute::{Attribute, AttributeScope, AttributeStore},
    commit::{self, Chunk, CommitNode, Region, StagedWrite},
    container::{self, Container, ContainerShared},
    dataspace::Dataspace,
    dtype::{self, Element},
    errors::{Error, Result},
    geom,
    resolver::Resolver,
    schema::Schema,
    session::HandleGuard,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetState {
    Open,
    Committed,
    Closed,
}

/// A named, typed, shaped array inside a container.
///
/// A new dataset starts Open: its schema (dimension names, attributes and fill value) can be
/// edited but data can't be written. The first `commit` freezes the schema. After that, writes
/// are staged in memory and each further `commit` makes the staged writes durable as one unit,
/// bumping the write version.
///
/// Only one handle per dataset is open at a time, and every mutation takes `&mut self`, so a
/// dataset's write sequence has a single owner.
///
pub struct Dataset {
    container: Weak<ContainerShared>,
    container_name: String,
    root: String,
    resolver: Arc<Resolver>,
    schema: Schema,

    /// Set once the schema has been committed
    log: Option<LogHead>,
    version: u64,
    staged: Vec<StagedWrite>,

    guard: Option<HandleGuard>,
}

#[derive(Clone, Copy)]
struct LogHead {
    schema: Cid,
    head: Cid,
}

impl Dataset {
    /// Define a new dataset in `container`.
    ///
    /// Nothing is written to the backend until the dataset is committed. `dataspace` must
    /// start at the origin.
    ///
    pub fn create(container: &Container, name: &str, dataspace: Dataspace) -> Result<Self> {
        container::check_name(name)?;
        if !dataspace.is_full() {
            return Err(Error::InvalidShape(format!(
                "dataset {name:?} must start at the origin, not {:?}",
                dataspace.offset()
            )));
        }

        let shared = container.shared();
        shared.register(name, false)?;
        debug!(dataset = %shared.dataset_root(name), extent = ?dataspace.extent(), "dataset created");

        Ok(Self::new(
            shared,
            Schema::new(String::from(name), dataspace),
            None,
            0,
        ))
    }

    /// A committed handle on a dataset loaded from the backend.
    ///
    pub(crate) fn reopen(
        container: &Container,
        schema: Schema,
        schema_cid: Cid,
        head: Cid,
        version: u64,
    ) -> Self {
        let log = LogHead {
            schema: schema_cid,
            head,
        };

        Self::new(container.shared(), schema, Some(log), version)
    }

    fn new(
        shared: &Arc<ContainerShared>,
        schema: Schema,
        log: Option<LogHead>,
        version: u64,
    ) -> Self {
        Self {
            container: Arc::downgrade(shared),
            container_name: shared.name.clone(),
            root: shared.dataset_root(&schema.name),
            resolver: Arc::clone(&shared.resolver),
            schema,
            log,
            version,
            staged: vec![],
            guard: Some(HandleGuard::new(&shared.session)),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn dataspace(&self) -> &Dataspace {
        &self.schema.dataspace
    }

    pub fn dimension_names(&self) -> Option<&[String]> {
        self.schema.dimension_names.as_deref()
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.schema.attributes
    }

    pub fn fill_value(&self) -> Option<&[u8]> {
        self.schema.fill_value.as_deref()
    }

    /// Number of data commits made to this dataset. The schema commit is version 0.
    pub fn write_version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> DatasetState {
        if self.guard.is_none() {
            DatasetState::Closed
        } else if self.log.is_some() {
            DatasetState::Committed
        } else {
            DatasetState::Open
        }
    }

    /// Number of writes waiting for the next commit
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn check_usable(&self) -> Result<()> {
        if self.guard.is_none() {
            return Err(Error::UseAfterClose(self.root.clone()));
        }

        Ok(())
    }

    /// The container, which must still exist and be open.
    fn container(&self) -> Result<Arc<ContainerShared>> {
        let container = self
            .container
            .upgrade()
            .ok_or_else(|| Error::UseAfterClose(self.container_name.clone()))?;
        container.check_open()?;

        Ok(container)
    }

    fn check_schema_open(&self) -> Result<()> {
        self.check_usable()?;
        if self.log.is_some() {
            return Err(Error::SchemaFrozen(self.root.clone()));
        }

        Ok(())
    }

    fn committed_log(&self) -> Result<LogHead> {
        self.check_usable()?;
        self.log.ok_or_else(|| Error::NotCommitted(self.root.clone()))
    }

    /// Name every dimension. Exactly one unique, non-empty name per dimension is required.
    ///
    pub fn name_dims<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.check_schema_open()?;
        let rank = self.schema.dataspace.dimension_count();
        if names.len() != rank {
            return Err(Error::InvalidShape(format!(
                "{} dimension names given for {rank} dimensions",
                names.len()
            )));
        }

        let names = names
            .iter()
            .map(|name| String::from(name.as_ref()))
            .collect::<Vec<_>>();
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() || names[..i].contains(name) {
                return Err(Error::InvalidName(name.clone()));
            }
        }
        self.schema.dimension_names = Some(names);

        Ok(())
    }

    /// Attach an attribute to the dataset as a whole.
    ///
    pub fn attach(&mut self, attribute: Attribute) -> Result<()> {
        self.check_schema_open()?;
        self.schema
            .attributes
            .insert(AttributeScope::Dataset, attribute)
    }

    /// Attach an attribute to one dimension.
    ///
    pub fn link_attribute(&mut self, dimension: usize, attribute: Attribute) -> Result<()> {
        self.check_schema_open()?;
        let rank = self.schema.dataspace.dimension_count();
        if dimension >= rank {
            return Err(Error::OutOfBounds(format!(
                "dimension {dimension} of a {rank} dimensional dataset"
            )));
        }

        self.schema
            .attributes
            .insert(AttributeScope::Dimension(dimension), attribute)
    }

    /// Set the fill value from the raw bytes of one element.
    ///
    pub fn set_fill_value(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_schema_open()?;
        let dtype = self.schema.dataspace.element_type();
        if bytes.len() != dtype.size() {
            return Err(Error::TypeMismatch(format!(
                "fill value of {} bytes for {dtype:?} elements",
                bytes.len()
            )));
        }
        self.schema.fill_value = Some(bytes.to_vec());

        Ok(())
    }

    pub fn set_fill<T: Element>(&mut self, value: T) -> Result<()> {
        self.check_schema_open()?;
        let dtype = self.schema.dataspace.element_type();
        if T::TYPE != dtype {
            return Err(Error::TypeMismatch(format!(
                "fill value of type {:?} for {dtype:?} elements",
                T::TYPE
            )));
        }

        self.set_fill_value(&dtype::to_bytes(&[value]))
    }

    /// Commit the dataset.
    ///
    /// The first commit stores the schema, after which it can no longer change. Later commits
    /// store the staged writes. Either way nothing is visible to readers until the dataset's
    /// head is moved, which is the last step. If any step fails the dataset is left as it was,
    /// staged writes included.
    ///
    pub async fn commit(&mut self) -> Result<()> {
        self.check_usable()?;
        let container = self.container()?;
        match self.log {
            None => self.commit_schema(container).await,
            Some(log) => {
                if self.staged.is_empty() {
                    return Err(Error::AlreadyCommitted(self.root.clone()));
                }

                self.commit_writes(log).await
            }
        }
    }

    async fn commit_schema(&mut self, container: Arc<ContainerShared>) -> Result<()> {
        // A head the container's directory never recorded still holds committed history
        if self.resolver.head(&self.root).await?.is_some() {
            return Err(Error::AlreadyExists(self.root.clone()));
        }

        let schema = self.resolver.save(&self.schema).await?;
        let commit = CommitNode {
            schema,
            version: 0,
            regions: vec![],
            prev: None,
        };
        let head = self.resolver.save(&commit).await?;
        self.resolver.set_head(&self.root, &head).await?;

        self.log = Some(LogHead { schema, head });
        self.version = 0;
        container.mark_committed(self.name());
        info!(dataset = %self.root, schema = %schema, "schema committed");

        // Once the container is durable it records datasets as they are committed. The dataset
        // is durable by now, so a failed append is left for the next container commit.
        if container.is_committed() {
            if let Err(err) = container.append().await {
                warn!(
                    dataset = %self.root,
                    error = %err,
                    "dataset committed but not yet recorded in its container"
                );
            }
        }

        Ok(())
    }

    async fn commit_writes(&mut self, log: LogHead) -> Result<()> {
        let mut regions = vec![];
        for write in commit::coalesce(&self.staged) {
            let chunk = self
                .resolver
                .save_once(&Chunk::new(write.payload.clone()))
                .await?;
            regions.push(Region {
                dataspace: write.region.clone(),
                chunk,
            });
        }

        let version = self.version + 1;
        let commit = CommitNode {
            schema: log.schema,
            version,
            regions,
            prev: Some(log.head),
        };
        let head = self.resolver.save(&commit).await?;
        self.resolver.set_head(&self.root, &head).await?;

        let staged = self.staged.len();
        self.staged.clear();
        self.version = version;
        self.log = Some(LogHead { head, ..log });
        info!(
            dataset = %self.root,
            version,
            regions = commit.regions.len(),
            dropped = staged - commit.regions.len(),
            head = %head,
            "commit"
        );

        Ok(())
    }

    /// Close the dataset, discarding any staged writes.
    ///
    /// A dataset whose schema was never committed can't be closed. Dropping it discards it.
    ///
    pub fn close(&mut self) -> Result<()> {
        self.check_usable()?;
        if self.log.is_none() {
            return Err(Error::OpenSchemaAtClose(self.root.clone()));
        }
        if !self.staged.is_empty() {
            warn!(
                dataset = %self.root,
                discarded = self.staged.len(),
                "closing with uncommitted writes"
            );
            self.staged.clear();
        }
        if let Some(container) = self.container.upgrade() {
            container.release(self.name());
        }
        self.guard = None;
        info!(dataset = %self.root, version = self.version, "dataset closed");

        Ok(())
    }

    /// Stage a write of `buffer` to the hyperslab `region`.
    ///
    /// `buffer` holds the region's elements in row-major order, in native byte order. The
    /// write is checked fully before it is staged, and becomes durable at the next commit.
    ///
    pub fn write(&mut self, buffer: &[u8], region: &Dataspace) -> Result<()> {
        self.container()?;
        self.committed_log()?;
        self.check_region(region)?;
        if buffer.len() != region.byte_size() {
            return Err(Error::BufferSizeMismatch {
                expected: region.byte_size(),
                actual: buffer.len(),
            });
        }

        self.staged.push(StagedWrite {
            region: region.clone(),
            payload: buffer.to_vec(),
        });
        debug!(
            dataset = %self.root,
            offset = ?region.offset(),
            extent = ?region.extent(),
            staged = self.staged.len(),
            "write staged"
        );

        Ok(())
    }

    /// Stage a write of `data` to the region of the same shape starting at `offsets`.
    ///
    pub fn write_array<T, D>(&mut self, data: ArrayView<T, D>, offsets: &[i64]) -> Result<()>
    where
        T: Element,
        D: Dimension,
    {
        let extents = data.shape().iter().map(|&n| n as u64).collect::<Vec<_>>();
        let region = Dataspace::sub(offsets, &extents, T::TYPE)?;
        let values = data.iter().copied().collect::<Vec<_>>();

        self.write(&dtype::to_bytes(&values), &region)
    }

    fn check_region(&self, region: &Dataspace) -> Result<()> {
        let dtype = self.schema.dataspace.element_type();
        if region.element_type() != dtype {
            return Err(Error::TypeMismatch(format!(
                "region of {:?} for {dtype:?} dataset {}",
                region.element_type(),
                self.root
            )));
        }

        region.check_within(&self.schema.dataspace)
    }

    /// Read the committed values of `region`, as raw bytes in row-major order.
    ///
    /// Elements no commit has covered read as the fill value. Staged writes are not visible.
    ///
    pub async fn read(&self, region: &Dataspace) -> Result<Vec<u8>> {
        let log = self.committed_log()?;
        self.check_region(region)?;

        let element_size = region.element_type().size();
        let bounds = region.bounds();
        let mut buffer = self.schema.fill_element().repeat(region.element_count() as usize);
        for commit in CommitNode::log(&self.resolver, &log.head).await? {
            for stored in &commit.regions {
                let stored_bounds = stored.dataspace.bounds();
                let overlap = match bounds.intersect(&stored_bounds) {
                    Some(overlap) => overlap,
                    None => continue,
                };
                let chunk = self.resolver.get_chunk(&stored.chunk).await?;
                if stored.dataspace.element_type() != region.element_type()
                    || chunk.payload().len() != stored.dataspace.byte_size()
                {
                    return Err(Error::BadFormat(format!(
                        "chunk {} doesn't match its region in version {}",
                        stored.chunk, commit.version
                    )));
                }
                geom::copy_overlap(
                    &overlap,
                    &stored_bounds,
                    chunk.payload(),
                    &bounds,
                    &mut buffer,
                    element_size,
                );
            }
        }

        Ok(buffer)
    }

    /// Read the committed values of `region` as an array of its shape.
    ///
    pub async fn read_array<T: Element>(&self, region: &Dataspace) -> Result<ArrayD<T>> {
        let bytes = self.read(region).await?;
        let values = dtype::from_bytes::<T>(region.element_type(), &bytes)?;
        let shape = region
            .extent()
            .iter()
            .map(|&n| n as usize)
            .collect::<Vec<_>>();

        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|err| Error::InvalidShape(err.to_string()))
    }

    /// Every committed region with the write version that committed it, oldest first.
    ///
    pub async fn history(&self) -> Result<Vec<(u64, Dataspace)>> {
        let log = self.committed_log()?;
        let commits = CommitNode::log(&self.resolver, &log.head).await?;

        Ok(commits
            .iter()
            .flat_map(|commit| {
                commit
                    .regions
                    .iter()
                    .map(|region| (commit.version, region.dataspace.clone()))
            })
            .collect())
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if self.guard.is_none() {
            return;
        }
        match self.log {
            Some(_) => warn!(
                dataset = %self.root,
                discarded = self.staged.len(),
                "dataset dropped without being closed"
            ),
            None => warn!(dataset = %self.root, "uncommitted dataset dropped"),
        }
        if let Some(container) = self.container.upgrade() {
            container.release(self.name());
        }
    }
}
