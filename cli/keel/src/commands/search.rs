//! `keel search` — query the registry index.

use anyhow::Result;
use keel_registry::CancelToken;

pub fn run(query: &str, limit: usize) -> Result<()> {
    let registry = super::open_registry(CancelToken::new())?;
    let hits = registry.search(query, limit)?;
    if hits.is_empty() {
        println!("no packages matching '{query}'");
        return Ok(());
    }
    let width = hits.iter().map(|h| h.name.len()).max().unwrap_or(0);
    for hit in hits {
        let description = hit.description.as_deref().unwrap_or("");
        println!("{:width$}  v{}  {}", hit.name, hit.version, description);
    }
    Ok(())
}
