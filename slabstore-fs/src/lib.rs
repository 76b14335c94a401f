//! A concrete implementation of the `slabstore::Mapper` interface for a local filesystem.
//!
//! Objects are stored one per file under `<root>/objects`, named by CID. Roots are small text
//! files under `<root>/roots`, each holding the CID it points to. Every file is written to
//! `<root>/tmp` first and renamed into place, so readers never see a partial write.
//!
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    pin::Pin,
    process,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use cid::{multihash::MultihashGeneric, Cid};
use futures::{
    io::{AsyncRead, AsyncWrite, Cursor},
    task::{Context, Poll},
};
use multihash::{Hasher, Sha2_256};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

/// The SHA_256 multicodec code
const SHA2_256: u64 = 0x12;

/// Settings for a filesystem backed store.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Directory holding the store
    pub root: PathBuf,

    /// Whether to sync every file to disk before renaming it into place
    pub fsync: bool,

    /// Size limit, in bytes, for the resolver's cache
    pub cache_bytes: u64,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("slabstore-data"),
            fsync: true,
            cache_bytes: slabstore::Config::default().cache_bytes,
        }
    }
}

impl FsConfig {
    /// Load settings from a JSON file. Missing keys take their default values.
    ///
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;

        Ok(serde_json::from_str(&text)?)
    }

    /// The session settings these imply
    pub fn session_config(&self) -> slabstore::Config {
        slabstore::Config {
            cache_bytes: self.cache_bytes,
        }
    }
}

pub struct FsMapper {
    objects: PathBuf,
    roots: PathBuf,
    tmp: PathBuf,
    fsync: bool,

    /// Makes temporary file names unique within this process
    counter: AtomicU64,
}

impl FsMapper {
    /// Open the store at `config.root`, creating its directories if needed.
    ///
    pub async fn open(config: &FsConfig) -> io::Result<Self> {
        let mapper = Self {
            objects: config.root.join("objects"),
            roots: config.root.join("roots"),
            tmp: config.root.join("tmp"),
            fsync: config.fsync,
            counter: AtomicU64::new(0),
        };
        fs::create_dir_all(&mapper.objects).await?;
        fs::create_dir_all(&mapper.roots).await?;
        fs::create_dir_all(&mapper.tmp).await?;
        debug!(root = %config.root.display(), fsync = config.fsync, "store opened");

        Ok(mapper)
    }

    fn object_path(&self, cid: &Cid) -> PathBuf {
        self.objects.join(cid.to_string())
    }

    fn root_path(&self, name: &str) -> PathBuf {
        self.roots.join(escape(name))
    }

    /// Write `data` to `path` by way of a temporary file, so `path` is replaced atomically.
    ///
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let tmp = self.tmp.join(format!("{}-{}", process::id(), n));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        if self.fsync {
            file.sync_all().await?;
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp, path).await {
            fs::remove_file(&tmp).await.ok();
            return Err(err);
        }

        Ok(())
    }
}

/// Make a root name safe to use as a file name.
///
fn escape(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2F")
}

fn unescape(name: &str) -> String {
    let mut unescaped = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(i) = rest.find('%') {
        unescaped.push_str(&rest[..i]);
        let code = rest.get(i + 1..i + 3);
        match code {
            Some("25") => unescaped.push('%'),
            Some("2F") => unescaped.push('/'),
            _ => {
                unescaped.push('%');
                rest = &rest[i + 1..];
                continue;
            }
        }
        rest = &rest[i + 3..];
    }
    unescaped.push_str(rest);

    unescaped
}

fn not_found<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl slabstore::Mapper for FsMapper {
    /// Obtain an output stream for writing an object to the store.
    ///
    /// This implementation writes all data to memory and then writes the file when `finish` is
    /// called.
    ///
    async fn store(&self) -> Box<dyn slabstore::StoreWrite + '_> {
        Box::new(FsStoreWrite::new(self, false))
    }

    async fn hash(&self) -> Box<dyn slabstore::StoreWrite + '_> {
        Box::new(FsStoreWrite::new(self, true))
    }

    async fn load(&self, cid: &Cid) -> io::Result<Option<Box<dyn AsyncRead + Unpin + Send + '_>>> {
        let data = not_found(fs::read(self.object_path(cid)).await)?;

        Ok(data.map(|data| Box::new(Cursor::new(data)) as Box<dyn AsyncRead + Unpin + Send>))
    }

    async fn size_of(&self, cid: &Cid) -> io::Result<Option<u64>> {
        let metadata = not_found(fs::metadata(self.object_path(cid)).await)?;

        Ok(metadata.map(|metadata| metadata.len()))
    }

    async fn get_root(&self, name: &str) -> io::Result<Option<Cid>> {
        match not_found(fs::read_to_string(self.root_path(name)).await)? {
            None => Ok(None),
            Some(text) => {
                let cid = Cid::try_from(text.trim())
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Some(cid))
            }
        }
    }

    async fn set_root(&self, name: &str, cid: &Cid) -> io::Result<()> {
        self.write_atomic(&self.root_path(name), cid.to_string().as_bytes())
            .await?;
        debug!(root = name, cid = %cid, "root written");

        Ok(())
    }

    async fn remove_root(&self, name: &str) -> io::Result<()> {
        not_found(fs::remove_file(self.root_path(name)).await)?;

        Ok(())
    }

    async fn list_roots(&self, prefix: &str) -> io::Result<Vec<String>> {
        let mut names = vec![];
        let mut entries = fs::read_dir(&self.roots).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                let name = unescape(name);
                if name.starts_with(prefix) {
                    names.push(name);
                }
            }
        }
        names.sort();

        Ok(names)
    }
}

/// A writer for writing an object to the filesystem
///
/// All writes will, in fact, be written to RAM until `FsStoreWrite::finish` is called, at which
/// time the CID is known and the object is written to its file.
///
struct FsStoreWrite<'a> {
    mapper: &'a FsMapper,
    buffer: Vec<u8>,
    hash: Sha2_256,
    only_hash: bool,
}

impl<'a> FsStoreWrite<'a> {
    fn new(mapper: &'a FsMapper, only_hash: bool) -> Self {
        Self {
            mapper,
            buffer: Vec::new(),
            hash: Sha2_256::default(),
            only_hash,
        }
    }
}

impl<'a> AsyncWrite for FsStoreWrite<'a> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let result = Write::write(&mut self.buffer, buf);
        if let Ok(len) = result {
            self.hash.update(&buf[..len]);
        }

        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl<'a> slabstore::StoreWrite for FsStoreWrite<'a> {
    async fn finish(mut self: Box<Self>) -> io::Result<Cid> {
        let digest = self.hash.finalize();
        let hash = MultihashGeneric::wrap(SHA2_256, digest)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        let cid = Cid::new_v1(SHA2_256, hash);

        if !self.only_hash {
            let path = self.mapper.object_path(&cid);
            if not_found(fs::metadata(&path).await)?.is_none() {
                self.mapper.write_atomic(&path, &self.buffer).await?;
                debug!(cid = %cid, size = self.buffer.len(), "object written");
            }
        }

        Ok(cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::{AsyncReadExt, AsyncWriteExt as _};
    use ndarray::{s, Array2, Ix2};
    use slabstore::{Container, Dataset, Dataspace, Mapper, PrimitiveType, Session};
    use tempfile::TempDir;

    async fn mapper(dir: &TempDir) -> io::Result<FsMapper> {
        let config = FsConfig {
            root: dir.path().to_path_buf(),
            fsync: false,
            ..FsConfig::default()
        };

        FsMapper::open(&config).await
    }

    async fn put(mapper: &FsMapper, data: &[u8], only_hash: bool) -> io::Result<Cid> {
        let mut stream = if only_hash {
            mapper.hash().await
        } else {
            mapper.store().await
        };
        stream.write_all(data).await?;
        stream.close().await?;

        stream.finish().await
    }

    #[tokio::test]
    async fn test_store_load() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mapper = mapper(&dir).await?;

        let hashed = put(&mapper, b"hello", true).await?;
        assert_eq!(mapper.size_of(&hashed).await?, None);
        assert!(mapper.load(&hashed).await?.is_none());

        let cid = put(&mapper, b"hello", false).await?;
        assert_eq!(cid, hashed);
        assert_eq!(mapper.size_of(&cid).await?, Some(5));

        let mut data = vec![];
        let mut stream = mapper.load(&cid).await?.unwrap();
        stream.read_to_end(&mut data).await?;
        assert_eq!(data, b"hello");

        // Nothing left behind in the staging area
        assert_eq!(std::fs::read_dir(dir.path().join("tmp"))?.count(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_roots() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mapper = mapper(&dir).await?;
        let a = put(&mapper, b"a", false).await?;
        let b = put(&mapper, b"b", false).await?;

        assert_eq!(mapper.get_root("etas.nc").await?, None);
        mapper.set_root("etas.nc", &a).await?;
        mapper.set_root("etas.nc/tas", &a).await?;
        mapper.set_root("etas.nc/tas", &b).await?;
        mapper.set_root("odd%name", &b).await?;
        assert_eq!(mapper.get_root("etas.nc/tas").await?, Some(b));
        assert_eq!(
            mapper.list_roots("etas.nc").await?,
            vec![String::from("etas.nc"), String::from("etas.nc/tas")]
        );
        assert_eq!(
            mapper.list_roots("").await?,
            vec![
                String::from("etas.nc"),
                String::from("etas.nc/tas"),
                String::from("odd%name")
            ]
        );

        mapper.remove_root("etas.nc/tas").await?;
        mapper.remove_root("etas.nc/tas").await?;
        assert_eq!(mapper.get_root("etas.nc/tas").await?, None);

        Ok(())
    }

    #[test]
    fn test_escape() {
        for name in ["plain", "a/b", "100%", "%2F/", "%%25"] {
            assert_eq!(unescape(&escape(name)), name);
            assert!(!escape(name).contains('/'));
        }
        assert_eq!(unescape("stray%"), "stray%");
    }

    #[test]
    fn test_config() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"root": "/data/etas", "fsync": false}"#)?;

        let config = FsConfig::load(&path)?;
        assert_eq!(config.root, PathBuf::from("/data/etas"));
        assert!(!config.fsync);
        assert_eq!(config.cache_bytes, FsConfig::default().cache_bytes);
        assert_eq!(config.session_config().cache_bytes, config.cache_bytes);

        std::fs::write(&path, "not json")?;
        assert!(FsConfig::load(&path).is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_reopen() -> slabstore::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = FsConfig {
            root: dir.path().to_path_buf(),
            fsync: false,
            ..FsConfig::default()
        };

        let mut session = Session::init(
            Box::new(FsMapper::open(&config).await?),
            config.session_config(),
        );
        let mut container = Container::create(&session, "etas.nc", false).await?;
        let dataspace = Dataspace::simple_2d(4, 6, PrimitiveType::Float32)?;
        let mut dataset = Dataset::create(&container, "tas", dataspace.clone())?;
        dataset.set_fill(-1.0_f32)?;
        dataset.commit().await?;
        container.commit().await?;

        for n in 0..3 {
            let column = Array2::from_elem((4, 1), n as f32);
            dataset.write_array(column.view(), &[0, n])?;
            dataset.commit().await?;
        }
        dataset.close()?;
        container.close()?;
        session.finalize()?;

        let session = Session::init(
            Box::new(FsMapper::open(&config).await?),
            config.session_config(),
        );
        let container = Container::open(&session, "etas.nc").await?;
        let dataset = container.open_dataset("tas").await?;
        assert_eq!(dataset.write_version(), 3);

        let data = dataset
            .read_array::<f32>(&dataspace)
            .await?
            .into_dimensionality::<Ix2>()
            .unwrap();
        for n in 0..3 {
            assert!(data.slice(s![.., n]).iter().all(|&value| value == n as f32));
        }
        assert!(data.slice(s![.., 3..]).iter().all(|&value| value == -1.0));

        Ok(())
    }
}
