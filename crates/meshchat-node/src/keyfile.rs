//! Long-term identity persisted next to the database.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::info;

use meshchat_shared::identity::{Identity, IdentityExport};

pub const IDENTITY_FILE_NAME: &str = "identity.json";

/// Load the identity from `data_dir`, generating and saving one on first run.
pub fn load_or_create(data_dir: &Path) -> anyhow::Result<Identity> {
    let path = data_dir.join(IDENTITY_FILE_NAME);
    if path.exists() {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let export: IdentityExport =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let identity = Identity::from_export(&export);
        info!(fingerprint = %identity.fingerprint().short(), "Loaded identity");
        return Ok(identity);
    }

    fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let identity = Identity::generate();
    let json = serde_json::to_string(&identity.to_export())?;
    write_private(&path, json.as_bytes())?;
    info!(fingerprint = %identity.fingerprint().short(), "Generated new identity");
    Ok(identity)
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(bytes)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}
