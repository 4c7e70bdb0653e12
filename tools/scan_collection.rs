use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use common::DeviceKind;
use library::{
    config_path_from_env, load_or_create_config, resolve_path, CancelToken, CatalogStore,
    Collection, LogReporter, RefreshOutcome,
};
use metadata::LoftyTags;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut deep = false;
    let mut roots = Vec::new();
    for arg in env::args().skip(1) {
        if arg == "--deep" {
            deep = true;
        } else {
            roots.push(PathBuf::from(arg));
        }
    }
    if roots.is_empty() {
        let root = env::var("MUSIC_ROOT").map_err(|_| "MUSIC_ROOT not set and no path argument")?;
        roots.push(PathBuf::from(root));
    }

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {:?}", config_path);
    }
    let store = CatalogStore::open(&resolve_path(&config_path, &config.catalog_path))?;
    let collection = Collection::new(config, Arc::new(LoftyTags));
    collection.load_from(&store)?;

    let cancel = CancelToken::new();
    for root in roots {
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "music".to_string());
        let device = collection.register_device(&name, &root, DeviceKind::Directory)?;
        match collection.refresh_device(&device.id, deep, &LogReporter, &cancel)? {
            RefreshOutcome::Completed(stats) => println!(
                "{}: {} new files, {} updated, {} removed, {} corrupted",
                device.name,
                stats.new_files,
                stats.updated_files,
                stats.removed_files,
                stats.corrupted_files
            ),
            RefreshOutcome::Cancelled(_) => warn!("Scan of {} was cancelled", device.name),
            RefreshOutcome::NotMounted => warn!("{:?} is not mounted; skipped", root),
        }
    }

    let flushed = collection.flush_tag_writes();
    if !flushed.is_clean() {
        warn!("{} tag writes failed", flushed.failed.len());
    }
    collection.commit(&store)?;

    let stats = collection.stats();
    println!(
        "Catalog: {} tracks, {} albums, {} authors, {} files",
        stats.tracks, stats.albums, stats.authors, stats.files
    );
    Ok(())
}
