use anyhow::{Result, bail};

use framecmp::config;

/// `framecmp init`: create .framecmp/config.toml.
pub fn init(server: Option<&str>, force: bool) -> Result<()> {
    if !force && config::config_file_exists() {
        bail!(".framecmp/config.toml already exists (use --force to overwrite)");
    }

    config::write_template(server)?;

    let verb = if force { "Regenerated" } else { "Created" };
    println!("{verb} .framecmp/config.toml");
    if let Some(url) = server {
        println!("  server.url = {url}");
    }
    Ok(())
}
