use std::path::Path;

use anyhow::{Context, Result};

use super::{CONFIG_DIR, CONFIG_FILE};

/// Hand-crafted config template with commented-out keys.
/// Used by `framecmp init` instead of `toml::to_string_pretty()` so that
/// users can see the available knobs and their defaults.
const CONFIG_TEMPLATE: &str = r#"# ─────────────────────────────────────────────────────────
# Compositor defaults. All fields optional.
# ─────────────────────────────────────────────────────────
[render]
# view = "split"                    # split | difference | heatmap | circle-reveal | checkerboard
# split = 0.5                       # 0.0-1.0
# circle_radius = 0.25              # relative to the shorter side
# tile_size = 32                    # checkerboard cell, pixels
# threshold = 0.02                  # 0.0-1.0
# blend = 1.0                       # 0.0-1.0
# channel = "rgb"                   # rgb | luma
# palette = "red-green"             # red-green | blue-orange | grayscale
# gpu = true                        # falls back to the CPU when no adapter is found

# ─────────────────────────────────────────────────────────
# Video frame extraction. All fields optional.
# ─────────────────────────────────────────────────────────
[extract]
# ffmpeg = "ffmpeg"
# ffprobe = "ffprobe"
# seek_timeout_ms = 1000
# decode_timeout_ms = 4000
# frame_timeout_ms = 10000
# demux_max_bytes = 52428800        # skip the demux path above this size
# demux_read_cap = 10485760         # bytes read from the start of the file

# ─────────────────────────────────────────────────────────
# Diff engine.
# ─────────────────────────────────────────────────────────
[diff]
# reference_engine = false          # use dify for classification and the diff image

# ─────────────────────────────────────────────────────────
# Backend for pair ids and parity checks.
# ─────────────────────────────────────────────────────────
[server]
{server}
"#;

pub fn config_file_exists() -> bool {
    Path::new(CONFIG_DIR).join(CONFIG_FILE).exists()
}

fn render_template(server_url: Option<&str>) -> String {
    let server = match server_url {
        Some(url) => format!("url = \"{url}\""),
        None => "# url = \"http://localhost:3000\"".to_string(),
    };
    CONFIG_TEMPLATE.replace("{server}", &server)
}

/// Write the hand-crafted config template into `dir`.
pub fn write_template_in(dir: &Path, server_url: Option<&str>) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(CONFIG_FILE);
    std::fs::write(&path, render_template(server_url))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_template(server_url: Option<&str>) -> Result<()> {
    write_template_in(Path::new(CONFIG_DIR), server_url)
}
