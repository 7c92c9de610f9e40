use std::fs::File;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::{IoContext, Result};
use crate::report::ContainerStatus;

/// Check ZIP container integrity without unpacking to disk.
///
/// Every member is decompressed into a sink so the stored CRC-32 is compared
/// with the actual bytes. The first member that fails is reported. The result
/// is advisory: a suspect container is still handed to the extractor.
pub fn verify_container(path: &Path) -> Result<ContainerStatus> {
    let file = File::open(path).io_context(|| format!("open {}", path.display()))?;
    let mut archive = match ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(err) => {
            log::warn!("{} is not a valid zip (fatal corruption): {err}", path.display());
            return Ok(ContainerStatus::NotAZip {
                reason: err.to_string(),
            });
        }
    };

    for i in 0..archive.len() {
        let name = archive
            .name_for_index(i)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{i}"));
        let result = match archive.by_index(i) {
            Ok(mut entry) => io::copy(&mut entry, &mut io::sink()).map(|_| ()),
            Err(err) => Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        };
        if let Err(err) = result {
            log::warn!("corrupt zip member found: {name} ({err})");
            return Ok(ContainerStatus::CorruptMember { member: name });
        }
    }

    log::info!("{} is a valid zip container", path.display());
    Ok(ContainerStatus::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Cursor, Write};

    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn stored_zip(parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Stored);
        for (name, bytes) in parts {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn valid_archive_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.xlsx");
        std::fs::write(&path, stored_zip(&[("xl/workbook.xml", b"<workbook/>")])).unwrap();
        assert_eq!(verify_container(&path).unwrap(), ContainerStatus::Ok);
    }

    #[test]
    fn non_zip_is_reported_not_returned_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.xlsx");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        let status = verify_container(&path).unwrap();
        assert!(matches!(status, ContainerStatus::NotAZip { .. }));
        assert!(status.is_suspect());
    }

    #[test]
    fn checksum_mismatch_names_the_member() {
        let mut bytes = stored_zip(&[
            ("a.xml", b"<a>first</a>"),
            ("b.xml", b"<b>second</b>"),
        ]);
        // Stored data is written verbatim; flip a byte of the second member's payload.
        let pos = bytes
            .windows(b"second".len())
            .position(|w| w == b"second")
            .unwrap();
        bytes[pos] = b'S';

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crc.xlsx");
        std::fs::write(&path, bytes).unwrap();
        assert_eq!(
            verify_container(&path).unwrap(),
            ContainerStatus::CorruptMember {
                member: "b.xml".to_string()
            }
        );
    }
}
