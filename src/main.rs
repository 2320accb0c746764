//! Diagnostic tool for EFA platform setup.
//!
//! Loads the plugin configuration, runs platform initialization against the
//! real host, and prints the effective settings as JSON. With
//! `rails <device>...` it also prints the rail order of the named devices.

use anyhow::{bail, Context, Result};
use tracing::info;

use efa_platform::{
    config::Config,
    logging::init_logging,
    metrics::register_metrics,
    platform::{initialize_platform, PlatformCache, RailDescriptor, RailSorter},
};

fn main() -> Result<()> {
    let config = Config::load().context("loading configuration")?;

    init_logging(&config.log_level, config.log_json)?;
    register_metrics();

    let cache = PlatformCache::new(&config.product_name_path);
    let platform_init = initialize_platform(&config, &cache)?;
    info!("Platform initialization complete");

    println!("{}", serde_json::to_string_pretty(&platform_init)?);

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(()),
        Some("rails") => {
            let devices: Vec<String> = args.collect();
            if devices.is_empty() {
                bail!("usage: efa-platform [rails <device>...]");
            }
            print_rail_order(&config, devices)
        }
        Some(other) => bail!("unknown command {:?}; usage: efa-platform [rails <device>...]", other),
    }
}

fn print_rail_order(config: &Config, devices: Vec<String>) -> Result<()> {
    let sorter = RailSorter::new(&config.infiniband_class_dir);
    let mut rails: Vec<RailDescriptor<usize>> = devices
        .into_iter()
        .enumerate()
        .map(|(discovered, name)| RailDescriptor::new(name, discovered))
        .collect();

    sorter
        .sort_rails(&mut rails)
        .context("ordering rails")?;

    for (position, rail) in rails.iter().enumerate() {
        println!(
            "rail {}: {} (discovered #{})",
            position, rail.device_name, rail.handle
        );
    }
    Ok(())
}
