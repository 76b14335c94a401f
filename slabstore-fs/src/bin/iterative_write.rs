//! Create a dataset and grow it one column at a time, committing after every column.
//!
//! With `RUST_LOG=info` every commit is logged, so the write version can be watched advancing.
//!
use std::{error::Error, path::PathBuf, time::Duration};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slabstore::{Attribute, Container, Dataset, Dataspace, PrimitiveType, Session};
use slabstore_fs::{FsConfig, FsMapper};

#[derive(Parser, Debug)]
#[command(name = "iterative-write")]
struct Args {
    /// JSON file with store settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the store, overriding the config file
    #[arg(long)]
    root: Option<PathBuf>,

    /// Don't sync files to disk before renaming them into place
    #[arg(long)]
    no_fsync: bool,

    /// Fail instead of replacing an existing container of the same name
    #[arg(long)]
    no_overwrite: bool,

    #[arg(long, default_value = "etas.nc")]
    container: String,

    #[arg(long, default_value = "tas")]
    dataset: String,

    /// Rows in the dataset
    #[arg(long, default_value_t = 32)]
    height: u64,

    /// Columns written per step
    #[arg(long, default_value_t = 1)]
    width: u64,

    /// Number of steps
    #[arg(long, default_value_t = 150)]
    count: u64,

    /// Milliseconds to wait after each commit
    #[arg(long, default_value_t = 0)]
    pace_ms: u64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

fn load_config(args: &Args) -> Result<FsConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => FsConfig::load(path)?,
        None => FsConfig::default(),
    };
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if args.no_fsync {
        config.fsync = false;
    }

    Ok(config)
}

/// One step's worth of values: element `(y, x)` holds `y * width + x`.
///
fn step_buffer(height: u64, width: u64) -> Vec<f32> {
    (0..height * width).map(|i| i as f32).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;
    info!(root = %config.root.display(), fsync = config.fsync, "using store");

    let mapper = FsMapper::open(&config).await?;
    let mut session = Session::init(Box::new(mapper), config.session_config());

    let dataspace =
        Dataspace::simple_2d(args.height, args.width * args.count, PrimitiveType::Float32)?;
    let mut container = Container::create(&session, &args.container, !args.no_overwrite).await?;
    let mut dataset = Dataset::create(&container, &args.dataset, dataspace)?;
    dataset.name_dims(&["cell", "time"])?;

    let fill = 1.0e20_f32;
    dataset.link_attribute(0, Attribute::scalar("_FillValue", fill))?;
    dataset.set_fill(fill)?;
    dataset.commit().await?;
    container.commit().await?;

    let buffer = step_buffer(args.height, args.width)
        .into_iter()
        .flat_map(f32::to_ne_bytes)
        .collect::<Vec<_>>();
    for n in 0..args.count {
        let region = Dataspace::sub_2d(
            0,
            args.height,
            (n * args.width) as i64,
            args.width,
            PrimitiveType::Float32,
        )?;
        dataset.write(&buffer, &region)?;
        dataset.commit().await?;
        info!(step = n, version = dataset.write_version(), "step written");

        if args.pace_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.pace_ms)).await;
        }
    }

    dataset.close()?;
    container.close()?;
    session.finalize()?;

    Ok(())
}
