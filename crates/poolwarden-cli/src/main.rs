//! Poolwarden command-line interface: every storage operation, printed as a
//! JSON result envelope.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::debug;
use poolwarden_core::{logging, Envelope, WardenConfig};
use poolwarden_zfs::{CreatePoolOptions, DatasetKind, ReceiveOptions, SendOptions, ZfsManager};
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};

/// Top-level options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "poolwarden",
    version,
    about = "Inspect and manage ZFS pools, datasets, and replication streams."
)]
struct Cli {
    /// Path to a TOML or YAML configuration file; built-in defaults otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report mutating commands instead of running them.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pool lifecycle and inspection.
    Pool {
        #[command(subcommand)]
        action: PoolCmd,
    },

    /// Dataset, snapshot, and bookmark operations.
    Dataset {
        #[command(subcommand)]
        action: DatasetCmd,
    },

    /// Produce a replication stream from a snapshot.
    Send {
        snapshot: String,

        /// Base snapshot for an incremental stream.
        #[arg(short = 'I', long)]
        incremental_from: Option<String>,

        /// Pass encrypted blocks through unchanged.
        #[arg(long)]
        raw: bool,

        /// Disable compressed stream records.
        #[arg(long)]
        no_compress: bool,

        /// Resume an interrupted transfer; overrides every other stream option.
        #[arg(short = 't', long)]
        resume_token: Option<String>,

        /// Write the stream here instead of measuring it in memory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Receive a replication stream into a dataset.
    Receive {
        target: String,

        /// Stream file to read.
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short = 'F', long)]
        force: bool,

        /// Do not mount the received dataset.
        #[arg(short = 'u', long)]
        nomount: bool,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Dump a deep inventory of every pool.
    ExportState,

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// File to validate; defaults to `--config`.
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PoolCmd {
    List,
    Status {
        name: String,
    },
    StatusVerbose {
        name: String,
    },
    Iostat {
        name: Option<String>,
        #[arg(long, default_value_t = 1)]
        samples: u32,
        #[arg(long, default_value_t = 1)]
        interval: u32,
    },
    Create {
        name: String,

        /// One vdev group, e.g. "mirror sda sdb". Repeat for more groups.
        #[arg(long = "vdev", required = true)]
        vdevs: Vec<String>,

        /// Pool property as key=value; repeatable.
        #[arg(short = 'o', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,

        #[arg(short, long)]
        force: bool,

        #[arg(short = 'R', long)]
        altroot: Option<String>,

        #[arg(long)]
        ashift: Option<u8>,
    },
    Destroy {
        name: String,
        #[arg(short, long)]
        force: bool,
    },
    Import {
        name: Option<String>,
        /// Directory to search for devices.
        #[arg(short = 'd', long)]
        dir: Option<String>,
        #[arg(long)]
        readonly: bool,
    },
    Export {
        name: String,
        #[arg(short, long)]
        force: bool,
    },
    Scrub {
        name: String,
        /// Stop the running scrub instead of starting one.
        #[arg(short, long)]
        stop: bool,
    },
    Clear {
        name: String,
        device: Option<String>,
    },
    Features {
        name: String,
    },
    /// Replace a device, or resilver it in place when no new device is given.
    Replace {
        name: String,
        old_device: String,
        new_device: Option<String>,
        #[arg(short, long)]
        force: bool,
    },
    /// Add vdev groups (including "spare ...") to an existing pool.
    Add {
        name: String,
        #[arg(long = "vdev", required = true)]
        vdevs: Vec<String>,
        #[arg(short, long)]
        force: bool,
    },
    /// Set pool properties, applied in order.
    Set {
        name: String,
        #[arg(required = true, value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
}

#[derive(Subcommand, Debug)]
enum DatasetCmd {
    List {
        #[arg(short, long)]
        pool: Option<String>,
        /// filesystem, volume, snapshot or bookmark; repeatable.
        #[arg(short = 't', long = "type")]
        types: Vec<String>,
    },
    Get {
        target: String,
    },
    Create {
        name: String,
        #[arg(short = 'o', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
        /// Create a volume of this size.
        #[arg(short = 'V', long)]
        volsize: Option<String>,
    },
    Destroy {
        name: String,
        #[arg(short, long)]
        recursive: bool,
        #[arg(short, long)]
        force: bool,
    },
    Set {
        target: String,
        /// key=value pairs, applied in order.
        #[arg(required = true, value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
    Snapshot {
        name: String,
        #[arg(short, long)]
        recursive: bool,
        #[arg(short = 'o', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
    Snapshots {
        dataset: Option<String>,
    },
    Bookmark {
        snapshot: String,
        bookmark: String,
    },
    Bookmarks {
        dataset: Option<String>,
    },
    Clone {
        snapshot: String,
        target: String,
        #[arg(short = 'o', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
    Promote {
        dataset: String,
    },
    Rename {
        source: String,
        destination: String,
        #[arg(short, long)]
        recursive: bool,
    },
    Rollback {
        dataset: String,
        /// Snapshot name, bare or dataset@name; newest when omitted.
        snapshot: Option<String>,
        /// Destroy snapshots newer than the target.
        #[arg(short, long)]
        recursive: bool,
    },
    Mount {
        dataset: String,
    },
    Unmount {
        dataset: String,
        #[arg(short, long)]
        force: bool,
    },
    Quota {
        dataset: String,
        size: String,
    },
    Refquota {
        dataset: String,
        size: String,
    },
    Reservation {
        dataset: String,
        size: String,
    },
    Refreservation {
        dataset: String,
        size: String,
    },
    UserQuotas {
        dataset: String,
    },
    Compression {
        dataset: String,
        algorithm: Option<String>,
    },
    Dedup {
        dataset: String,
        mode: Option<String>,
    },
    Mountpoint {
        dataset: String,
        path: String,
    },
    Atime {
        dataset: String,
        mode: String,
    },
    /// Set recordsize, or volblocksize on volumes.
    Blocksize {
        dataset: String,
        size: String,
    },
    Diff {
        older: String,
        newer: Option<String>,
    },
    History {
        name: Option<String>,
    },
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Dispatch the subcommand; `Ok(false)` means the envelope reported a failure.
fn run() -> Result<bool> {
    logging::init("info");
    let cli = Cli::parse();

    let envelope = match cli.command {
        Commands::Validate { file, schema } => return validate(file.or(cli.config), schema),
        command => {
            let mgr = open_manager(cli.config.as_deref(), cli.dry_run)?;
            dispatch(&mgr, command)?
        }
    };

    println!("{}", to_string_pretty(&envelope)?);
    Ok(envelope.is_ok())
}

fn validate(file: Option<PathBuf>, schema: bool) -> Result<bool> {
    if schema {
        let schema = schema_for!(WardenConfig);
        println!("{}", to_string_pretty(&schema)?);
        return Ok(true);
    }
    let file = file.context("no configuration file given; pass --file or --config")?;
    let cfg = load_config(&file)?;
    println!(
        "Configuration valid (timeout {}s, {} allowed / {} denied pools).",
        cfg.zfs.timeout_secs,
        cfg.policy.allow_pools.len(),
        cfg.policy.deny_pools.len()
    );
    Ok(true)
}

fn open_manager(config: Option<&Path>, dry_run: bool) -> Result<ZfsManager> {
    let mut config = match config {
        Some(path) => load_config(path)?,
        None => WardenConfig::default(),
    };
    if dry_run {
        config.zfs.dry_run = true;
    }
    let mgr = ZfsManager::from_config(&config).context("failed to initialise the zfs manager")?;
    debug!("backend {} (dry_run={})", mgr.source(), mgr.is_dry_run());
    Ok(mgr)
}

fn dispatch(mgr: &ZfsManager, command: Commands) -> Result<Envelope> {
    Ok(match command {
        Commands::Pool { action } => pool(mgr, action)?,
        Commands::Dataset { action } => dataset(mgr, action)?,
        Commands::Send {
            snapshot,
            incremental_from,
            raw,
            no_compress,
            resume_token,
            output,
        } => {
            let options = SendOptions {
                incremental_from,
                raw,
                compressed: !no_compress,
                resume_token,
                output_file: output,
            };
            mgr.replication().send(&snapshot, &options)
        }
        Commands::Receive {
            target,
            input,
            force,
            nomount,
            verbose,
        } => mgr.replication().receive(
            &target,
            &ReceiveOptions {
                input_file: Some(input.as_path()),
                stdin_bytes: None,
                force,
                nomount,
                verbose,
            },
        ),
        Commands::ExportState => mgr.exporter().export_full_state(),
        Commands::Validate { .. } => anyhow::bail!("validate does not open a manager"),
    })
}

fn pool(mgr: &ZfsManager, action: PoolCmd) -> Result<Envelope> {
    let pools = mgr.pools();
    Ok(match action {
        PoolCmd::List => pools.list_pools(),
        PoolCmd::Status { name } => pools.pool_status(&name),
        PoolCmd::StatusVerbose { name } => pools.pool_status_verbose(&name),
        PoolCmd::Iostat {
            name,
            samples,
            interval,
        } => pools.pool_iostat(name.as_deref(), samples, interval),
        PoolCmd::Create {
            name,
            vdevs,
            properties,
            force,
            altroot,
            ashift,
        } => {
            let options = CreatePoolOptions {
                properties,
                force,
                altroot,
                ashift,
            };
            pools.create_pool(&name, &vdev_groups(&vdevs), &options)
        }
        PoolCmd::Destroy { name, force } => pools.destroy_pool(&name, force),
        PoolCmd::Import {
            name,
            dir,
            readonly,
        } => pools.import_pool(name.as_deref(), dir.as_deref(), readonly),
        PoolCmd::Export { name, force } => pools.export_pool(&name, force),
        PoolCmd::Scrub { name, stop } => pools.scrub_pool(&name, stop),
        PoolCmd::Clear { name, device } => pools.clear_pool(&name, device.as_deref()),
        PoolCmd::Features { name } => pools.features(&name),
        PoolCmd::Replace {
            name,
            old_device,
            new_device,
            force,
        } => pools.replace_device(&name, &old_device, new_device.as_deref(), force),
        PoolCmd::Add { name, vdevs, force } => pools.add_vdev(&name, &vdev_groups(&vdevs), force),
        PoolCmd::Set { name, properties } => pools.set_pool_props(&name, &properties),
    })
}

fn dataset(mgr: &ZfsManager, action: DatasetCmd) -> Result<Envelope> {
    let ds = mgr.datasets();
    Ok(match action {
        DatasetCmd::List { pool, types } => {
            let kinds = types
                .iter()
                .map(|t| t.parse::<DatasetKind>())
                .collect::<Result<Vec<_>, _>>()?;
            ds.list_datasets(pool.as_deref(), &kinds)
        }
        DatasetCmd::Get { target } => ds.get_props(&target),
        DatasetCmd::Create {
            name,
            mut properties,
            volsize,
        } => match volsize {
            Some(size) => {
                properties.push(("volsize".to_string(), size));
                ds.create_dataset(&name, &properties, DatasetKind::Volume)
            }
            None => ds.create_dataset(&name, &properties, DatasetKind::Filesystem),
        },
        DatasetCmd::Destroy {
            name,
            recursive,
            force,
        } => ds.destroy_dataset(&name, recursive, force),
        DatasetCmd::Set { target, properties } => ds.set_props(&target, &properties),
        DatasetCmd::Snapshot {
            name,
            recursive,
            properties,
        } => ds.snapshot(&name, recursive, &properties),
        DatasetCmd::Snapshots { dataset } => ds.list_snapshots(dataset.as_deref()),
        DatasetCmd::Bookmark { snapshot, bookmark } => ds.bookmark(&snapshot, &bookmark),
        DatasetCmd::Bookmarks { dataset } => ds.list_bookmarks(dataset.as_deref()),
        DatasetCmd::Clone {
            snapshot,
            target,
            properties,
        } => ds.clone(&snapshot, &target, &properties),
        DatasetCmd::Promote { dataset } => ds.promote(&dataset),
        DatasetCmd::Rename {
            source,
            destination,
            recursive,
        } => ds.rename(&source, &destination, recursive),
        DatasetCmd::Rollback {
            dataset,
            snapshot,
            recursive,
        } => ds.rollback(&dataset, snapshot.as_deref(), recursive),
        DatasetCmd::Mount { dataset } => ds.mount(&dataset),
        DatasetCmd::Unmount { dataset, force } => ds.unmount(&dataset, force),
        DatasetCmd::Quota { dataset, size } => ds.set_quota(&dataset, &size),
        DatasetCmd::Refquota { dataset, size } => ds.set_refquota(&dataset, &size),
        DatasetCmd::Reservation { dataset, size } => ds.set_reservation(&dataset, &size),
        DatasetCmd::Refreservation { dataset, size } => ds.set_refreservation(&dataset, &size),
        DatasetCmd::UserQuotas { dataset } => ds.list_user_quotas(&dataset),
        DatasetCmd::Compression { dataset, algorithm } => {
            ds.enable_compression(&dataset, algorithm.as_deref())
        }
        DatasetCmd::Dedup { dataset, mode } => ds.enable_dedup(&dataset, mode.as_deref()),
        DatasetCmd::Mountpoint { dataset, path } => ds.set_mountpoint(&dataset, &path),
        DatasetCmd::Atime { dataset, mode } => ds.set_atime(&dataset, &mode),
        DatasetCmd::Blocksize { dataset, size } => ds.set_record_or_volblock(&dataset, &size),
        DatasetCmd::Diff { older, newer } => ds.diff(&older, newer.as_deref()),
        DatasetCmd::History { name } => ds.history(name.as_deref()),
    })
}

fn load_config(path: &Path) -> Result<WardenConfig> {
    WardenConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Split each "mirror sda sdb" argument into one vdev group.
fn vdev_groups(raw: &[String]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|group| group.split_whitespace().map(str::to_string).collect())
        .collect()
}

/// Parse `key=value` into a property pair.
fn parse_property(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn property_pairs_split_on_first_equals() {
        assert_eq!(
            parse_property("mountpoint=/srv/a=b").unwrap(),
            ("mountpoint".to_string(), "/srv/a=b".to_string())
        );
        assert!(parse_property("=x").is_err());
        assert!(parse_property("novalue").is_err());
    }

    #[test]
    fn pool_add_splits_vdev_groups() {
        let cli = Cli::parse_from([
            "poolwarden",
            "pool",
            "add",
            "tank",
            "--vdev",
            "mirror sdc sdd",
            "--vdev",
            "spare sde",
        ]);
        match cli.command {
            Commands::Pool {
                action: PoolCmd::Add { name, vdevs, force },
            } => {
                assert_eq!(name, "tank");
                assert!(!force);
                assert_eq!(
                    vdev_groups(&vdevs),
                    vec![vec!["mirror", "sdc", "sdd"], vec!["spare", "sde"]]
                );
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn dataset_set_collects_pairs_in_order() {
        let cli = Cli::parse_from([
            "poolwarden",
            "--dry-run",
            "dataset",
            "set",
            "tank/data",
            "compression=zstd",
            "atime=off",
        ]);
        assert!(cli.dry_run);
        match cli.command {
            Commands::Dataset {
                action: DatasetCmd::Set { target, properties },
            } => {
                assert_eq!(target, "tank/data");
                assert_eq!(properties[0].0, "compression");
                assert_eq!(properties[1].0, "atime");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }
}
