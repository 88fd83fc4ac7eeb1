use crate::cache::BarCache;
use anyhow::Result;
use std::path::PathBuf;

const DEFAULT_EXPIRY_HOURS: i64 = 24;

pub struct CacheArgs {
    pub dir: PathBuf,
    pub stats: bool,
    pub clear: bool,
}

pub async fn run(args: CacheArgs) -> Result<()> {
    let cache = BarCache::new(args.dir.clone(), DEFAULT_EXPIRY_HOURS)?;

    if args.clear {
        let removed = cache.clear()?;
        println!("Removed {} cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
    }

    if args.stats || !args.clear {
        let stats = cache.stats()?;
        println!("Cache directory: {}", args.dir.display());
        println!("  Entries: {}", stats.entries);
        println!("  Size: {:.1} KiB", stats.total_bytes as f64 / 1024.0);
    }

    Ok(())
}
