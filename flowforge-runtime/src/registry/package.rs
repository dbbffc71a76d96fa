//! Offline `.pkg` package inspection (§4.8): open an archive, locate
//! `manifest.json` at the root and an optional `image.tar` image bundle.
//!
//! No example in the retrieved pack implements container-image or plugin
//! package archives directly; `zip` is the standard ecosystem crate for
//! this and is used the way archive-backed plugin registries in the wider
//! pack expect (read-only, single-pass over a `Read + Seek` source).

use crate::error::{Result, RuntimeError};
use crate::model::Manifest;
use std::io::Read;

/// Archives larger than this are rejected outright (§4.8).
pub const MAX_PACKAGE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PackageInspection {
    pub manifest: Manifest,
    pub image_byte_size: Option<u64>,
    pub image_present: bool,
}

/// Inspect an offline package archive. `already_installed` is resolved by
/// the caller (it requires the in-memory instance index, which this
/// pure-parsing function has no access to) and attached to the result.
pub fn inspect<R: Read + std::io::Seek>(
    reader: R,
    archive_byte_size: u64,
) -> Result<PackageInspection> {
    if archive_byte_size > MAX_PACKAGE_BYTES {
        return Err(RuntimeError::Package(format!(
            "archive is {archive_byte_size} bytes, exceeds the 2 GiB ceiling"
        )));
    }

    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| RuntimeError::Archive(e.to_string()))?;

    let manifest: Manifest = {
        let mut file = archive
            .by_name("manifest.json")
            .map_err(|_| RuntimeError::Package("archive has no manifest.json at root".to_string()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| RuntimeError::Package(format!("failed reading manifest.json: {e}")))?;
        serde_json::from_str(&contents)?
    };

    let (image_present, image_byte_size) = match archive.by_name("image.tar") {
        Ok(file) => (true, Some(file.size())),
        Err(_) => (false, None),
    };

    Ok(PackageInspection {
        manifest,
        image_byte_size,
        image_present,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn build_archive(include_image: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            writer.start_file("manifest.json", options).unwrap();
            let manifest = crate::model::Manifest::synthesize_for_adoption(
                "crypto", "flowforge/crypto", "1.0.0", 3001, 4050,
            );
            writer
                .write_all(&serde_json::to_vec(&manifest).unwrap())
                .unwrap();
            if include_image {
                writer.start_file("image.tar", options).unwrap();
                writer.write_all(b"fake-image-bytes").unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn inspects_manifest_and_absent_image() {
        let archive = build_archive(false);
        let len = archive.len() as u64;
        let result = inspect(Cursor::new(archive), len).unwrap();
        assert_eq!(result.manifest.id, "crypto");
        assert!(!result.image_present);
        assert!(result.image_byte_size.is_none());
    }

    #[test]
    fn inspects_manifest_and_present_image() {
        let archive = build_archive(true);
        let len = archive.len() as u64;
        let result = inspect(Cursor::new(archive), len).unwrap();
        assert!(result.image_present);
        assert_eq!(result.image_byte_size, Some(17));
    }

    #[test]
    fn rejects_oversized_archive() {
        let archive = build_archive(false);
        let err = inspect(Cursor::new(archive), MAX_PACKAGE_BYTES + 1).unwrap_err();
        assert!(matches!(err, RuntimeError::Package(_)));
    }
}
