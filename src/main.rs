use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;

use drivebay::archive::{self, ExtractOptions};
use drivebay::config::{self, AppConfig};
use drivebay::errors::GatewayError;
use drivebay::output;
use drivebay::session::{DeletedKind, Session};
use drivebay::transfer::{self, FetchRequest};
use drivebay::transport::resolver::{AddressResolver, NgrokResolver, StaticResolver};
use drivebay::{pool, telemetry};

#[derive(Parser)]
#[command(name = "drivebay")]
#[command(about = "Remote storage gateway over SSH")]
#[command(version)]
struct Cli {
    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file to the remote storage root
    Upload {
        file: PathBuf,
        /// Remote folder, relative to the storage root
        #[arg(short, long)]
        folder: Option<String>,
        /// Remote filename override
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Download a remote file
    Download {
        name: String,
        #[arg(short, long)]
        folder: Option<String>,
        /// Local destination path
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Have the remote host fetch a URL directly
    Fetch {
        url: String,
        #[arg(short, long)]
        folder: Option<String>,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        overwrite: bool,
        /// Hard limit in seconds for the remote fetch command
        #[arg(long)]
        timeout: Option<u64>,
        /// Extract the file after download when it is a known archive
        #[arg(long)]
        extract: bool,
    },
    /// Extract a remote archive in place
    Extract {
        archive: String,
        /// Destination folder, relative to the storage root
        #[arg(short, long)]
        dest: Option<String>,
        #[arg(long)]
        overwrite: bool,
        /// Remove the archive after extracting
        #[arg(long)]
        delete_archive: bool,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List a remote folder
    List {
        folder: Option<String>,
    },
    /// Delete a remote file or folder
    Delete {
        target: String,
        #[arg(short, long)]
        folder: Option<String>,
    },
    /// Show remote RAM, drive, and boot-media usage
    Info {
        /// Emit raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Detect pool branches and mirror a subdirectory across them
    Pool {
        /// Subdirectory to create on every branch
        #[arg(short, long)]
        ensure: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("{} {err:#}", style("error:").red().bold());
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("drivebay={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = config::load_config()?;
    let session = open_session(&config)?;
    let result = dispatch(&session, cli.command);
    session.close();
    result
}

fn open_session(config: &AppConfig) -> Result<Session> {
    let pb = output::spinner("Connecting...");
    let resolver: Box<dyn AddressResolver> = match &config.host {
        Some(host) => Box::new(StaticResolver::new(host.clone(), config.port)),
        None => {
            let key = config
                .ngrok_api_key
                .as_ref()
                .context("no host configured and no ngrok_api_key to resolve one")?;
            Box::new(NgrokResolver::new(key.clone()))
        }
    };
    match Session::open(config, resolver.as_ref()) {
        Ok(session) => {
            output::finish_success(&pb, &format!("Connected, root {}", session.root()));
            Ok(session)
        }
        Err(err) => {
            output::finish_error(&pb, "Connection failed");
            Err(err.into())
        }
    }
}

fn dispatch(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::Upload {
            file,
            folder,
            name,
            overwrite,
        } => {
            let size = std::fs::metadata(&file)
                .with_context(|| format!("cannot read {}", file.display()))?
                .len();
            let pb = output::transfer_bar(size, "Uploading");
            let observer = |seen: u64, _total: u64| pb.set_position(seen);
            let report = transfer::upload(
                session,
                &file,
                folder.as_deref(),
                name.as_deref(),
                overwrite,
                Some(&observer),
            )?;
            output::finish_success(
                &pb,
                &format!("Uploaded {} ({} bytes)", report.remote_path, report.bytes),
            );
            Ok(())
        }
        Commands::Download {
            name,
            folder,
            out,
            overwrite,
        } => {
            let pb = output::transfer_bar(0, "Downloading");
            let observer = |seen: u64, total: u64| {
                pb.set_length(total);
                pb.set_position(seen);
            };
            let report = transfer::download(
                session,
                &name,
                folder.as_deref(),
                out.as_deref(),
                overwrite,
                Some(&observer),
            )?;
            output::finish_success(
                &pb,
                &format!(
                    "Downloaded to {} ({} bytes)",
                    report.local_path.display(),
                    report.bytes
                ),
            );
            Ok(())
        }
        Commands::Fetch {
            url,
            folder,
            name,
            overwrite,
            timeout,
            extract,
        } => {
            let pb = output::spinner("Fetching on remote host...");
            let mut request = FetchRequest::new(&url);
            request.target_dir = folder.as_deref();
            request.filename = name.as_deref();
            request.overwrite = overwrite;
            request.timeout = timeout.map(Duration::from_secs);
            request.auto_extract = extract;
            match transfer::fetch_url(session, &request) {
                Ok(report) => {
                    output::finish_success(
                        &pb,
                        &format!("Fetched {} ({} bytes)", report.remote_path, report.bytes),
                    );
                    if let Some(extracted) = report.extracted {
                        println!(
                            "Extracted to {} with {} ({} files, {} bytes)",
                            extracted.extracted_to,
                            extracted.tool,
                            extracted.file_count,
                            extracted.total_bytes
                        );
                    }
                    if let Some(reason) = report.extract_error {
                        eprintln!(
                            "{} download succeeded but extraction failed: {reason}",
                            style("warning:").yellow().bold()
                        );
                    }
                    Ok(())
                }
                Err(err) => {
                    output::finish_error(&pb, "Fetch failed");
                    Err(err.into())
                }
            }
        }
        Commands::Extract {
            archive,
            dest,
            overwrite,
            delete_archive,
            timeout,
        } => {
            let pb = output::spinner("Extracting...");
            let opts = ExtractOptions {
                dest,
                overwrite,
                delete_archive,
                timeout: timeout.map(Duration::from_secs),
            };
            match archive::extract(session, &archive, &opts) {
                Ok(report) => {
                    output::finish_success(
                        &pb,
                        &format!(
                            "Extracted to {} with {} ({} files, {} bytes)",
                            report.extracted_to, report.tool, report.file_count, report.total_bytes
                        ),
                    );
                    Ok(())
                }
                Err(err) => {
                    output::finish_error(&pb, "Extraction failed");
                    Err(err.into())
                }
            }
        }
        Commands::List { folder } => {
            let entries = match session.list(folder.as_deref()) {
                Ok(entries) => entries,
                Err(GatewayError::NotFound { path }) => {
                    println!("{} {path}", style("not found:").yellow());
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            for entry in entries {
                if entry.is_dir {
                    println!("{}/", style(&entry.name).cyan());
                } else {
                    println!("{:<40} {:>12}", entry.name, entry.size);
                }
            }
            Ok(())
        }
        Commands::Delete { target, folder } => {
            let deleted = session.delete(&target, folder.as_deref())?;
            let kind = match deleted.kind {
                DeletedKind::File => "file",
                DeletedKind::Folder => "folder",
            };
            println!("{} {kind} {}", style("✓").green().bold(), deleted.path);
            Ok(())
        }
        Commands::Info { json } => {
            let info = telemetry::system_info(session)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }
            println!(
                "RAM: {:.2} / {:.2} GiB used ({:.1}%)",
                info.ram.used_gib, info.ram.total_gib, info.ram.used_percent
            );
            for drive in &info.drives {
                println!(
                    "{:<20} {:<16} {:>8.2} / {:<8.2} GiB ({:.1}%)",
                    drive.label, drive.mountpoint, drive.used_gib, drive.total_gib, drive.used_percent
                );
            }
            if let (Some(used), Some(total)) =
                (info.boot_media.root_used_gib, info.boot_media.root_total_gib)
            {
                println!("boot media root: {used:.2} / {total:.2} GiB");
            }
            Ok(())
        }
        Commands::Pool { ensure } => {
            let branches = pool::detect_branches(session)?;
            if branches.is_empty() {
                println!("No storage pool detected.");
                return Ok(());
            }
            for branch in &branches {
                println!("{branch}");
            }
            if let Some(subpath) = ensure {
                pool::ensure_pool_dirs(session.transport(), &subpath, &branches)?;
                println!(
                    "{} {subpath} mirrored on {} branches",
                    style("✓").green().bold(),
                    branches.len()
                );
            }
            Ok(())
        }
    }
}
