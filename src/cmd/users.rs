//! Account bootstrap: `pontual create-user`.

use anyhow::{Context, Result};
use pontual::auth::{self, password};
use pontual::config::Config;
use pontual::models::{NewUser, Role};
use pontual::store;

pub fn cmd_create_user(
    config: &Config,
    username: &str,
    password_plain: &str,
    admin: bool,
    email: Option<String>,
) -> Result<()> {
    let username = username.trim();
    if username.is_empty() {
        anyhow::bail!("Username must not be empty");
    }
    password::check_password_policy(password_plain)?;

    let path = config.storage.resolved_path();
    let mut store = store::open(config.storage.backend, &path)
        .with_context(|| format!("Failed to open storage at {}", path.display()))?;

    let api_key = auth::generate_api_key();
    let user = store.create_user(NewUser {
        username: username.to_string(),
        password_hash: password::hash_password(password_plain)?,
        email,
        full_name: None,
        role: if admin { Role::Admin } else { Role::User },
        api_key: Some(api_key.clone()),
        must_reset_password: false,
    })?;

    println!(
        "Created {} '{}' (id {})",
        user.role.as_str(),
        user.username,
        user.id
    );
    println!("API key: {}", api_key);
    Ok(())
}
