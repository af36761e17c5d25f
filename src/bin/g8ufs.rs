use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::*;

#[derive(Parser)]
#[clap(name = "g8ufs")]
struct Flags {
    /// Path to the flist's metadata database.
    meta: PathBuf,
    /// Mountpoint.
    mountpoint: PathBuf,
    #[clap(flatten)]
    options: g8ufs::Options,
}

async fn main_impl(args: Flags) -> anyhow::Result<()> {
    g8ufs::utils::setup_logger(args.options.debug)?;
    info!("Mounting {:?} at {:?}", args.meta, args.mountpoint);

    let fs = g8ufs::mount(&args.meta, &args.mountpoint, args.options).await?;

    let mut reload = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let fs_for_signals = fs.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reload.recv() => {
                    if let Err(e) = fs_for_signals.reload() {
                        error!("failed to reload metadata stack: {:?}", e);
                    }
                }
                _ = term.recv() => {
                    if let Err(e) = fs_for_signals.unmount() {
                        error!("failed to unmount: {:?}", e);
                    }
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    if let Err(e) = fs_for_signals.unmount() {
                        error!("failed to unmount: {:?}", e);
                    }
                    break;
                }
            }
        }
    });

    fs.wait().await?;
    info!("unmounted, exiting");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Flags::parse();
    if let Err(e) = main_impl(args).await {
        error!("{:?}", e);
        process::exit(1)
    }
}
