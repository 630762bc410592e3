use anyhow::Context;
use pocket_short::{config, mapping_store::mapping_store_capsule};
use time::OffsetDateTime;
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container();

    let purged = container
        .read(mapping_store_capsule)
        .purge_expired(OffsetDateTime::now_utc())
        .context("Failed to purge expired URLs")?;
    info!(purged, "Purged expired URLs");
    println!("Purged {purged} expired short link(s)");
    Ok(())
}
