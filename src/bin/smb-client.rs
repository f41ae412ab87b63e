//! SMB2/3 Client CLI

use clap::{Parser, Subcommand};
use rust_smb_client::auth::Credentials;
use rust_smb_client::client::{SmbClient, TransferControl, TransferProgress};
use rust_smb_client::config::ClientConfig;
use rust_smb_client::rpc::srvsvc::ShareKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "smb-client")]
#[command(about = "Rust SMB2/3 Client", long_about = None)]
struct Args {
    /// SMB server address or hostname
    #[arg(short = 'H', long)]
    host: String,

    /// Port to connect to, overrides the config file
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Username; omit for a guest session
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Password for authentication
    #[arg(short = 'P', long, default_value = "")]
    password: String,

    /// Domain/workgroup
    #[arg(short = 'd', long, default_value = "")]
    domain: String,

    /// Share name to connect to; not needed for `shares`
    #[arg(short = 's', long)]
    share: Option<String>,

    /// TOML client configuration
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Sign every message
    #[arg(long)]
    sign: bool,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the shares the server offers
    Shares {
        /// Include administrative shares ending in `$`
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// List files in a directory
    Ls {
        /// Directory path to list
        #[arg(default_value = "/")]
        path: String,
        /// Include hidden entries
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// Download a file from the server
    Get {
        /// Remote file path
        remote: String,
        /// Local file or directory (defaults to the current directory)
        local: Option<PathBuf>,
    },

    /// Upload a file to the server
    Put {
        /// Local file path
        local: PathBuf,
        /// Remote file path (optional, uses local filename if not specified)
        remote: Option<String>,
    },

    /// Display file information
    Stat {
        /// File path
        path: String,
    },

    /// Delete a file or an empty directory
    Rm {
        path: String,
    },

    /// Rename or move a file
    Mv {
        from: String,
        to: String,
        /// Replace the destination if it exists
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Create a directory
    Mkdir {
        path: String,
    },
}

fn print_progress(progress: TransferProgress) {
    tracing::debug!("{} / {} bytes", progress.transferred, progress.total);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    config.require_signing |= args.sign;

    let credentials = match &args.username {
        Some(username) => {
            tracing::info!("Authenticating as {}\\{}", args.domain, username);
            Credentials::user(username.clone(), args.password.clone()).with_domain(args.domain.clone())
        }
        None => {
            tracing::info!("Using guest authentication");
            Credentials::Guest
        }
    };

    tracing::info!("Connecting to {}:{}", args.host, config.port);
    let client = SmbClient::new(config);
    let session = client.connect_host(&args.host, credentials).await?;

    let result = match (args.command, args.share) {
        (Commands::Shares { all }, _) => list_shares(&session, all).await,
        (_, None) => Err("--share is required for this command".into()),
        (command, Some(share)) => {
            tracing::info!("Connecting to share: {}", share);
            match session.open_tree(&share).await {
                Ok(tree) => run(&tree, command).await,
                Err(e) => Err(e.into()),
            }
        }
    };
    session.logoff().await?;
    tracing::info!("Disconnected");
    result
}

async fn list_shares(
    session: &rust_smb_client::client::Session,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    for info in session.share_info().await? {
        if info.name.ends_with('$') && !all {
            continue;
        }
        let kind = match info.kind() {
            Some(ShareKind::Disk) => "Disk",
            Some(ShareKind::PrintQueue) => "Printer",
            Some(ShareKind::Device) => "Device",
            Some(ShareKind::Ipc) => "IPC",
            None => "Other",
        };
        println!("{:24} {:8} {}", info.name, kind, info.comment);
    }
    Ok(())
}

async fn run(
    tree: &rust_smb_client::client::Tree,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Ls { path, all } => {
            let mut listing = tree.list_directory(&path).await?;
            while let Some(entry) = listing.next_entry().await? {
                if entry.is_hidden() && !all {
                    continue;
                }
                let modified = entry
                    .modified
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let kind = if entry.is_directory() { "d" } else { "-" };
                println!("{} {:>12} {:16} {}", kind, entry.size, modified, entry.name);
            }
        }

        Commands::Get { remote, local } => {
            let local = local.unwrap_or_else(|| PathBuf::from("."));
            tracing::info!("Downloading {} -> {}", remote, local.display());
            let control = TransferControl::new();
            let written = rust_smb_client::client::transfer::download(
                tree,
                &remote,
                &local,
                &control,
                print_progress,
            )
            .await?;
            println!("{}", written.display());
        }

        Commands::Put { local, remote } => {
            let remote = remote.unwrap_or_else(|| {
                local
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("upload")
                    .to_string()
            });
            tracing::info!("Uploading {} -> {}", local.display(), remote);
            let control = TransferControl::new();
            let bytes = rust_smb_client::client::transfer::upload(
                tree,
                &local,
                &remote,
                &control,
                print_progress,
            )
            .await?;
            tracing::info!("Uploaded {} bytes", bytes);
        }

        Commands::Stat { path } => {
            let metadata = tree.stat(&path).await?;
            println!("path:       {}", path);
            println!("type:       {}", if metadata.is_directory() { "directory" } else { "file" });
            println!("size:       {}", metadata.size);
            println!("allocated:  {}", metadata.allocation_size);
            println!("attributes: {:?}", metadata.attributes);
            for (label, time) in [
                ("created", metadata.created),
                ("accessed", metadata.accessed),
                ("modified", metadata.modified),
                ("changed", metadata.changed),
            ] {
                if let Some(time) = time {
                    println!("{:11} {}", format!("{}:", label), time.to_rfc3339());
                }
            }
        }

        Commands::Rm { path } => tree.delete(&path).await?,

        Commands::Mv { from, to, force } => tree.rename(&from, &to, force).await?,

        Commands::Mkdir { path } => tree.mkdir(&path).await?,
        Commands::Shares { all } => list_shares(tree.session(), all).await?,
    }
    Ok(())
}
