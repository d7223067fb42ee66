// src/bin/cli.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! CLI over `CosDriver`: `ls`, `stat`, `get`, `put`, `mv`, `rm`, `url`, `walk`.
//!
//! Credentials and bucket come from the environment (or `.env`):
//! `COS_SECRET_ID`, `COS_SECRET_KEY`, `COS_BUCKET`, `COS_REGION`, and
//! optionally `COS_SECURE`, `COS_CHUNK_SIZE`, `COS_ROOT_DIRECTORY`, `COS_ENDPOINT`.
//!
//! Examples:
//! ```bash
//! cos-cli ls   /docker/registry
//! cos-cli put  ./layer.tar /blobs/layer --chunk-size 8388608
//! cos-cli mv   /blobs/layer /blobs/sha256-abc
//! cos-cli url  /blobs/sha256-abc --method HEAD --expires 1h
//! ```

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cosblob::constants::MIN_CHUNK_SIZE;
use cosblob::{CosDriver, DriverParameters, FileInfo, StorageDriver, UrlOptions, WalkControl};

/// Macro to safely print with broken pipe handling
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                // Gracefully exit on broken pipe (e.g., when piped to head/tail)
                std::process::exit(0);
            }
            Err(e) => return Err(e.into())
        }
    };
}

#[derive(Parser)]
#[command(name = "cos-cli", version, about = "Blob storage driver CLI for COS buckets")]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Root directory inside the bucket (overrides COS_ROOT_DIRECTORY)
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the direct children of a path.
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show size, modification time and kind of a path.
    Stat { path: String },
    /// Download an object to stdout or a file.
    Get {
        path: String,
        /// Start reading at this byte offset
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Upload a local file through the chunked writer.
    Put {
        file: PathBuf,
        path: String,
        /// Part size in bytes (at least 1 MiB)
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Resume an in-flight upload of the same path
        #[arg(long)]
        append: bool,
        /// Leave the upload open instead of committing it
        #[arg(long)]
        no_commit: bool,
    },
    /// Move an object server-side.
    Mv { source: String, dest: String },
    /// Delete a path and everything below it.
    Rm { path: String },
    /// Print a signed URL.
    Url {
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Lifetime, e.g. "20m" or "2h"
        #[arg(long)]
        expires: Option<String>,
    },
    /// Recursively print every path below a directory.
    Walk {
        #[arg(default_value = "/")]
        path: String,
        /// Maximum depth to descend (unlimited when omitted)
        #[arg(long)]
        max_depth: Option<usize>,
    },
}

/// Main CLI function
#[tokio::main]
async fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut params = DriverParameters::from_env().context("loading COS_* settings")?;
    if let Some(root) = cli.root {
        params.root_directory = root;
    }

    match cli.cmd {
        Command::Put { chunk_size: Some(size), .. } if size < MIN_CHUNK_SIZE => {
            bail!("--chunk-size must be at least {} bytes", MIN_CHUNK_SIZE);
        }
        Command::Put { chunk_size: Some(size), .. } => params.chunk_size = size,
        _ => {}
    }

    let driver = CosDriver::connect(&params).await?;

    match cli.cmd {
        Command::Ls { path } => {
            for entry in driver.list(&path).await? {
                safe_println!("{}", entry);
            }
        }
        Command::Stat { path } => {
            let fi = driver.stat(&path).await?;
            safe_println!("Path     : {}", fi.path);
            safe_println!("Kind     : {}", if fi.is_dir { "directory" } else { "file" });
            if !fi.is_dir {
                safe_println!("Size     : {}", fi.size);
            }
            if let Some(t) = fi.mod_time {
                safe_println!("Modified : {}", t.to_rfc3339());
            }
        }
        Command::Get { path, offset, out } => {
            let mut reader = driver.reader(&path, offset).await?;
            let n = match out {
                Some(file) => {
                    let mut f = tokio::fs::File::create(&file)
                        .await
                        .with_context(|| format!("creating {}", file.display()))?;
                    tokio::io::copy(&mut reader, &mut f).await?
                }
                None => tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?,
            };
            info!("read {} bytes from {}", n, path);
        }
        Command::Put { file, path, append, no_commit, .. } => {
            put_file(&driver, &file, &path, append, no_commit).await?;
        }
        Command::Mv { source, dest } => {
            driver.move_object(&source, &dest).await?;
            safe_println!("{} -> {}", source, dest);
        }
        Command::Rm { path } => {
            driver.delete(&path).await?;
            safe_println!("deleted {}", path);
        }
        Command::Url { path, method, expires } => {
            let mut opts = UrlOptions::default().method(method);
            if let Some(raw) = expires {
                let d = humantime::parse_duration(&raw)
                    .with_context(|| format!("invalid --expires {:?}", raw))?;
                opts = opts.expiry(chrono::Utc::now() + chrono::Duration::from_std(d)?);
            }
            safe_println!("{}", driver.url_for(&path, &opts).await?);
        }
        Command::Walk { path, max_depth } => {
            let base_depth = depth(&path);
            let mut entries = Vec::new();
            driver
                .walk(&path, &mut |fi: &FileInfo| -> cosblob::Result<WalkControl> {
                    entries.push((fi.path.clone(), fi.is_dir, fi.size));
                    let too_deep = max_depth.is_some_and(|m| depth(&fi.path) - base_depth >= m);
                    Ok(if fi.is_dir && too_deep { WalkControl::SkipDir } else { WalkControl::Continue })
                })
                .await?;
            for (p, is_dir, size) in entries {
                if is_dir {
                    safe_println!("{}/", p);
                } else {
                    safe_println!("{}\t{}", p, size);
                }
            }
        }
    }

    Ok(())
}

fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

async fn put_file(
    driver: &CosDriver,
    file: &Path,
    path: &str,
    append: bool,
    no_commit: bool,
) -> Result<()> {
    let started = Instant::now();
    let mut f = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let mut writer = driver.writer(path, append).await?;

    let mut buf = vec![0u8; MIN_CHUNK_SIZE as usize];
    loop {
        let n = match f.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                writer.cancel().await.ok();
                return Err(e.into());
            }
        };
        if let Err(e) = writer.write(&buf[..n]).await {
            writer.cancel().await.ok();
            return Err(e.into());
        }
    }

    if no_commit {
        writer.close().await?;
        safe_println!("wrote {} bytes to {} (upload left open)", writer.size(), path);
    } else {
        writer.commit().await?;
        safe_println!(
            "uploaded {} bytes to {} in {:.2?}",
            writer.size(),
            path,
            started.elapsed()
        );
    }
    Ok(())
}
