//! Read-only peeking into component packages (gzip-compressed tar) without
//! extracting them.

use crate::error::{ComponentError, Result};
use crate::paths::{DESCRIPTOR_DIR, DESCRIPTOR_FILE};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use tar::Archive;

fn open(package: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(package)?;
    Ok(Archive::new(GzDecoder::new(file)))
}

fn first_segment(entry_path: &Path) -> Option<String> {
    entry_path.components().find_map(|c| match c {
        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
        _ => None,
    })
}

/// The directory a package extracts into: the first named path segment
/// in the archive. Bare `./` entries are skipped.
pub fn top_level_dir(package: &Path) -> Result<Option<String>> {
    let mut archive = open(package)?;
    for entry in archive.entries()? {
        let entry = entry?;
        if let Some(segment) = first_segment(&entry.path()?) {
            return Ok(Some(segment));
        }
    }
    Ok(None)
}

/// Contents of `<tld>/descriptor/descriptor.json` inside the package.
pub fn read_descriptor(package: &Path) -> Result<Option<String>> {
    let mut archive = open(package)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let segments: Vec<_> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if segments.len() == 3 && segments[1] == DESCRIPTOR_DIR && segments[2] == DESCRIPTOR_FILE {
            let mut data = String::new();
            entry.read_to_string(&mut data).map_err(|e| {
                ComponentError::DescriptorParse(format!("{}: {e}", package.display()))
            })?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}
