//! Storage initialization: `pontual init`.

use anyhow::{Context, Result};
use pontual::config::Config;
use pontual::store::{self, BackendKind};

pub fn cmd_init(config: &Config) -> Result<()> {
    let backend = config.storage.backend;
    if backend == BackendKind::Memory {
        println!("Memory storage needs no initialization.");
        return Ok(());
    }
    let path = config.storage.resolved_path();
    let mut store = store::open(backend, &path)
        .with_context(|| format!("Failed to initialize storage at {}", path.display()))?;
    let users = store.count_users()?;
    println!("Initialized {} storage at {}", backend, path.display());
    if users == 0 {
        println!("No users yet. Run `pontual create-user <name> --password <pw> --admin`.");
    }
    Ok(())
}
