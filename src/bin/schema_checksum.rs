//! Prints the aggregate checksum of every configured endpoint schema.
//!
//! With `--apply` the checksum is also fed to the schema store backed by the
//! configured cache directory, flushing cached documents when any schema
//! source changed since the last run. Run it from a file watcher or a build
//! step during development.

use anyhow::{Context, Result, anyhow, bail};
use gqlmux::{
    FileCache, FileSourceReader, MemoryCache, SchemaStore, Settings, aggregate_checksum,
    find_settings_file,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse()?;
    init_tracing();

    let settings_path = find_settings_file(cli.settings.as_deref())?;
    let settings = Settings::load(&settings_path)?;
    let reader = Arc::new(FileSourceReader::new(settings.resource_roots.clone()));
    let uris = settings.schema_uris();
    let checksum = aggregate_checksum(reader.as_ref(), uris.iter().map(String::as_str));
    println!("{checksum}");

    if !cli.apply {
        return Ok(());
    }

    let store = match &settings.cache_directory {
        Some(dir) => {
            let cache = FileCache::open(dir)
                .with_context(|| format!("opening schema cache {}", dir.display()))?;
            SchemaStore::new(reader, Arc::new(cache), settings.enable_schema_cache)
        }
        None => {
            tracing::warn!(
                settings = %settings_path.display(),
                "no cacheDirectory configured; nothing persistent to invalidate"
            );
            SchemaStore::new(reader, Arc::new(MemoryCache::new()), settings.enable_schema_cache)
        }
    };

    let flushed = store
        .invalidate(&checksum)
        .context("invalidating schema cache")?;
    if flushed {
        eprintln!("schema cache flushed");
    } else {
        eprintln!("schema cache up to date");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

struct Cli {
    settings: Option<PathBuf>,
    apply: bool,
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = env::args_os();
        let _program = args.next();
        let mut settings = None;
        let mut apply = false;

        while let Some(arg) = args.next() {
            let arg_str = arg
                .to_str()
                .ok_or_else(|| anyhow!("invalid UTF-8 in argument"))?;
            match arg_str {
                "--settings" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--settings requires a value"))?;
                    settings = Some(PathBuf::from(value));
                }
                "--apply" => apply = true,
                "--help" | "-h" => usage(0),
                other => bail!("unknown argument: {other}"),
            }
        }

        Ok(Self { settings, apply })
    }
}

fn usage(code: i32) -> ! {
    eprintln!(
        "Usage: schema-checksum [--settings PATH] [--apply]\n\nOptions:\n  --settings PATH           Settings file (or set GQLMUX_SETTINGS; defaults to gqlmux.json upwards).\n  --apply                   Flush the configured schema cache when the checksum changed.\n  --help                    Show this help text."
    );
    std::process::exit(code);
}
