//! kvfs command line.
//!
//! Mounts a backing store, runs one command against it, and unmounts.
//!
//! Usage:
//!   kvfs --store ./data mkdir /docs
//!   echo "hello world" | kvfs --store ./data write /docs/a.txt
//!   kvfs --store ./data ls /docs
//!   kvfs --store ./data -v fsck

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt};

use kvfs_kernel::path::{normalize, split};
use kvfs_kernel::{FsConfig, FsError, Mount, Node, SetAttr, fsck};

/// Inspect and modify a kvfs backing store.
#[derive(Parser, Debug)]
#[command(name = "kvfs")]
#[command(about = "Filesystem persisted in a flat key-value store")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backing-store directory (overrides the config file)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Mount point (overrides the config file)
    #[arg(short, long)]
    mount_point: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a directory
    Mkdir {
        path: String,
        /// Permission bits, octal
        #[arg(long, value_parser = parse_mode, default_value = "0")]
        mode: u32,
    },
    /// Create an empty file
    Touch {
        path: String,
        /// Permission bits, octal
        #[arg(long, value_parser = parse_mode, default_value = "0")]
        mode: u32,
    },
    /// Write to a file, creating it if missing; reads stdin without TEXT
    Write {
        path: String,
        text: Option<String>,
        /// Write at this offset instead of replacing the content
        #[arg(long)]
        offset: Option<u64>,
    },
    /// Print file content
    Cat { path: String },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Remove a file or an empty directory
    Rm { path: String },
    /// Print attributes as JSON
    Stat { path: String },
    /// Change permission bits
    Chmod {
        #[arg(value_parser = parse_mode)]
        mode: u32,
        path: String,
    },
    /// Inspect nodes
    Node {
        #[command(subcommand)]
        command: NodeCommand,
    },
    /// Check record consistency
    Fsck,
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    /// Resolve a path to its identifier and kind
    Get { path: String },
}

fn parse_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0o"), 8).map_err(|e| format!("bad octal mode {s:?}: {e}"))
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => FsConfig::load(path)?,
        None => FsConfig::default(),
    };
    if let Some(store) = args.store {
        config.store_dir = store;
    }
    if let Some(mount_point) = args.mount_point {
        config.mount_point = mount_point;
    }

    let mount = Mount::open(&config)
        .with_context(|| format!("mounting store at {}", config.store_dir.display()))?;
    let result = run(&mount, args.command);
    if let Err(e) = mount.close() {
        tracing::error!(error = %e, "unmount failed");
    }
    result
}

fn run(mount: &Mount, command: Command) -> Result<ExitCode> {
    let config = mount.config();
    let mut stdout = std::io::stdout().lock();

    match command {
        Command::Mkdir { path, mode } => {
            let (parent, name) = parent_and_name(&path)?;
            let dir = mount.dir(&parent)?.mkdir(&name, mode, config.uid, config.gid)?;
            writeln!(stdout, "{}", dir.ino())?;
        }
        Command::Touch { path, mode } => {
            let (parent, name) = parent_and_name(&path)?;
            let (file, _) = mount.dir(&parent)?.create(&name, mode, config.uid, config.gid)?;
            writeln!(stdout, "{}", file.ino())?;
        }
        Command::Write { path, text, offset } => {
            let data = match text {
                Some(text) => text.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
                    buf
                }
            };
            let open = match mount.node(&path) {
                Ok(Node::File(file)) => file.open()?,
                Ok(Node::Dir(_)) => bail!("{path} is a directory"),
                Err(FsError::NotFound(_)) => {
                    let (parent, name) = parent_and_name(&path)?;
                    mount.dir(&parent)?.create(&name, 0, config.uid, config.gid)?.1
                }
                Err(e) => return Err(e.into()),
            };
            let written = match offset {
                Some(offset) => open.write_at(offset, &data)?,
                None => open.write(&data)?,
            };
            tracing::debug!(%path, written, "wrote");
        }
        Command::Cat { path } => {
            let open = match mount.node(&path)? {
                Node::File(file) => file.open()?,
                Node::Dir(_) => bail!("{path} is a directory"),
            };
            stdout.write_all(&open.read()?)?;
        }
        Command::Ls { path } => {
            for entry in mount.dir(&path)?.readdir()? {
                writeln!(stdout, "{:>8} {:<9} {}", entry.ino.get(), entry.kind.to_string(), entry.name)?;
            }
        }
        Command::Rm { path } => {
            let (parent, name) = parent_and_name(&path)?;
            mount.dir(&parent)?.remove(&name)?;
        }
        Command::Stat { path } => {
            let attr = mount.node(&path)?.attr()?;
            writeln!(stdout, "{}", serde_json::to_string_pretty(&attr)?)?;
        }
        Command::Chmod { mode, path } => {
            let attr = mount.node(&path)?.setattr(&SetAttr::new().with_mode(mode))?;
            writeln!(stdout, "{:o}", attr.perm())?;
        }
        Command::Node {
            command: NodeCommand::Get { path },
        } => {
            let node = mount.node(&path)?;
            let attr = node.attr()?;
            let value = serde_json::json!({
                "path": node.path(),
                "ino": node.ino(),
                "kind": attr.kind().to_string(),
            });
            writeln!(stdout, "{value}")?;
        }
        Command::Fsck => {
            let report = fsck(mount.engine())?;
            for issue in &report.issues {
                writeln!(stdout, "{issue}")?;
            }
            writeln!(
                stdout,
                "{} directories, {} files, {} issues",
                report.dirs,
                report.files,
                report.issues.len()
            )?;
            if !report.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn parent_and_name(path: &str) -> Result<(String, String)> {
    split(&normalize(path)).with_context(|| format!("{path} has no parent"))
}
