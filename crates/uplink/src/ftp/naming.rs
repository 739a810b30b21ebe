//! Remote file naming: collision-free interim names and the canonical name
//! a file is renamed to once its upload is complete.

use std::path::Path;

/// Highest `+N` suffix tried before falling back to a random one.
pub const MAX_NAME_CANDIDATES: u32 = 999;

const DEFAULT_PREFIX: &str = "D";
const DEFAULT_EXT: &str = "txt";

/// Final path component of a local file, as the name to use remotely.
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Split `name` at its last dot.  The extension keeps its dot; a leading
/// dot does not start an extension.
pub fn split_name_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

/// `base+N.ext`
pub fn collision_candidate(name: &str, n: u32) -> String {
    let (base, ext) = split_name_ext(name);
    format!("{base}+{n}{ext}")
}

/// `base+<random>.ext`, used once every numbered candidate is taken.
pub fn random_candidate(name: &str) -> String {
    let (base, ext) = split_name_ext(name);
    format!("{base}+{}{ext}", fastrand::u32(..))
}

/// `<prefix>_<device>_<epoch>.<ext>` where the prefix is the local name up
/// to its first underscore and the extension is the local one.
pub fn canonical_name(local_name: &str, device_id: &str, epoch: i64) -> String {
    let (stem, ext) = split_name_ext(local_name);
    let prefix = stem.split('_').next().filter(|p| !p.is_empty());
    let ext = ext.strip_prefix('.').filter(|e| !e.is_empty());
    format!(
        "{}_{}_{}.{}",
        prefix.unwrap_or(DEFAULT_PREFIX),
        device_id,
        epoch,
        ext.unwrap_or(DEFAULT_EXT)
    )
}

// ===========================================================================
// Tests
// ===========================================================================
