//! list_cameras - print the capture devices the daemon would see

use anyhow::Result;
use clap::Parser;

use hue_watch::{backend_for, DeviceEnumerator};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Device id used to pick the backend (a stub:// id lists that
    /// synthetic camera).
    #[arg(long, env = "HUE_WATCH_DEVICE")]
    device: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let backend = backend_for(args.device.as_deref());
    let devices = DeviceEnumerator::new(backend.as_ref()).list()?;
    if devices.is_empty() {
        println!("no cameras found ({} backend)", backend.name());
        return Ok(());
    }
    let default = DeviceEnumerator::select_default(&devices).map(|device| device.id.clone());
    for device in &devices {
        let marker = if default.as_deref() == Some(device.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}\t{}\t{:?}",
            marker,
            device.id,
            device.display_label(),
            device.facing
        );
    }
    Ok(())
}
