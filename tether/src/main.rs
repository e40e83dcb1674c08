//! tether entry point.
//!
//! ```text
//! tether host                    Receive broadcasts (foreground)
//! tether extension               Broadcast a synthetic test pattern
//! tether --config <path> ...     Load a custom config TOML
//! tether --gen-config            Write default config to stdout
//! tether --gen-config <path>     Write default config to a file
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether::config::BridgeConfig;
use tether::service::{ExtensionService, HostService};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Screen and audio broadcast relay bridge")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tether.toml", global = true)]
    config: PathBuf,

    /// Print the default configuration (or write it to PATH) and exit.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    gen_config: Option<Option<PathBuf>>,

    #[command(subcommand)]
    role: Option<Role>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Role {
    /// Receive frames and audio from the extension.
    Host,
    /// Act as the broadcast extension.
    Extension,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if let Some(target) = cli.gen_config {
        match target {
            Some(path) => {
                BridgeConfig::write_default(&path)?;
                println!("Default config written to {}", path.display());
            }
            None => println!("{}", BridgeConfig::default().to_toml()?),
        }
        return Ok(());
    }

    let Some(role) = cli.role else {
        eprintln!("Choose a role: `tether host` or `tether extension` (see --help).");
        std::process::exit(2);
    };

    // Load config.
    let config = BridgeConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tether v{} ({role:?})", env!("CARGO_PKG_VERSION"));
    info!("container: {}", config.paths().dir().display());
    info!("fps: {}", config.fps());

    match role {
        Role::Host => {
            let service = HostService::new(config);
            spawn_ctrl_c(service.stop_handle());
            service.run().await?;
        }
        Role::Extension => {
            let service = ExtensionService::new(config);
            spawn_ctrl_c(service.stop_handle());
            service.run().await?;
        }
    }

    Ok(())
}

/// Clear `running` on Ctrl-C.
fn spawn_ctrl_c(running: std::sync::Arc<std::sync::atomic::AtomicBool>) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        running.store(false, std::sync::atomic::Ordering::SeqCst);
    });
}
