use crate::Profile;
use crate::parser::parse_profile;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Loads a deployment profile from disk.
pub fn load_profile<P: AsRef<Path>>(path: P) -> Result<Profile> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open profile {}", path.display()))?;
    let mut text = String::new();
    file.read_to_string(&mut text)
        .with_context(|| format!("Failed to read profile {}", path.display()))?;

    parse_profile(&text).with_context(|| format!("Malformed profile {}", path.display()))
}
