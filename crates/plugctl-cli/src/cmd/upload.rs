use crate::output::print_json;
use anyhow::Context;
use std::path::{Path, PathBuf};

pub fn run(root: &Path, archive: &Path, json: bool) -> anyhow::Result<()> {
    let archive: PathBuf = archive.to_path_buf();
    let shown = archive.display().to_string();
    let record = super::with_manager(root, move |manager, _, _| manager.upload_package(&archive))
        .with_context(|| format!("failed to upload {shown}"))?;

    if json {
        print_json(&record)?;
    } else {
        println!(
            "uploaded: {} ({})",
            record.package_file_name.as_deref().unwrap_or(&shown),
            record.state
        );
    }
    Ok(())
}
