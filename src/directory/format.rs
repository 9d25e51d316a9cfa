//! On-disk layout of a `<type>.features` file.
//!
//! ```text
//! magic "FTR\0" | version u8 | header frame | feature frame ...
//! frame = len u32 LE | MessagePack payload | crc32 u32 LE
//! ```

use crate::error::{Result, StoreError};
use crate::feature::Feature;
use crate::schema::FeatureType;
use crate::types::{FeatureId, Value};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Magic bytes for feature files.
const FILE_MAGIC: &[u8; 4] = b"FTR\0";

/// Current feature file format version.
const FILE_VERSION: u8 = 1;

/// Largest frame accepted when reading.
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct FileHeader {
    pub schema: FeatureType,
    /// Last sequence number used for a generated feature id.
    pub next_seq: u64,
}

#[derive(Serialize, Deserialize)]
struct StoredFeature {
    id: String,
    values: Vec<Value>,
}

fn write_frame(w: &mut impl Write, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization(format!("frame of {} bytes", payload.len())))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.write_all(&crc32fast::hash(payload).to_le_bytes())?;
    Ok(())
}

/// Next frame, or `None` at a clean end of file.
fn read_frame(r: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match r.read(&mut len_bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => return Ok(None),
        4 => {}
        n => {
            return Err(StoreError::InvalidFormat(format!(
                "truncated frame length: {} of 4 bytes",
                n
            )))
        }
    }
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_SIZE {
        return Err(StoreError::InvalidFormat(format!("frame length {} too large", len)));
    }

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    r.read_exact(&mut crc_bytes)?;
    let expected = u32::from_le_bytes(crc_bytes);
    let got = crc32fast::hash(&payload);
    if expected != got {
        return Err(StoreError::ChecksumMismatch { expected, got });
    }
    Ok(Some(payload))
}

fn read_preamble(r: &mut impl Read) -> Result<FileHeader> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != FILE_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid feature file magic".into()));
    }

    let mut version = [0u8; 1];
    r.read_exact(&mut version)?;
    if version[0] != FILE_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported feature file version: {}",
            version[0]
        )));
    }

    let payload = read_frame(r)?
        .ok_or_else(|| StoreError::InvalidFormat("feature file has no header".into()))?;
    Ok(rmp_serde::from_slice(&payload)?)
}

/// Read only the header of a feature file.
pub(crate) fn read_header(path: &Path) -> Result<FileHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    read_preamble(&mut reader)
}

/// Read the header and every feature of a feature file.
pub(crate) fn read_file(path: &Path, feature_type: &Arc<FeatureType>) -> Result<(FileHeader, Vec<Feature>)> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = read_preamble(&mut reader)?;
    let mut features = Vec::new();
    while let Some(payload) = read_frame(&mut reader)? {
        let stored: StoredFeature = rmp_serde::from_slice(&payload)?;
        features.push(Feature::from_values(
            Arc::clone(feature_type),
            FeatureId(stored.id),
            stored.values,
        )?);
    }
    Ok((header, features))
}

/// Replace a feature file atomically: write a sibling `.tmp` file, sync, then rename.
pub(crate) fn write_file<'a>(
    path: &Path,
    header: &FileHeader,
    features: impl IntoIterator<Item = &'a Feature>,
) -> Result<()> {
    let tmp_path = path.with_extension("features.tmp");
    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(FILE_MAGIC)?;
        writer.write_all(&[FILE_VERSION])?;
        write_frame(&mut writer, &rmp_serde::to_vec(header)?)?;
        for feature in features {
            let stored = StoredFeature {
                id: feature.id().as_str().to_string(),
                values: feature.values().to_vec(),
            };
            write_frame(&mut writer, &rmp_serde::to_vec(&stored)?)?;
        }
        let file = writer.into_inner().map_err(|e| StoreError::Io(e.into_error()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeType;
    use crate::types::Geometry;
    use tempfile::TempDir;

    fn schema() -> Arc<FeatureType> {
        Arc::new(
            FeatureType::builder("sites")
                .attribute("code", AttributeType::Text)
                .geometry("geom")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.features");
        let ft = schema();
        let mut f = Feature::new(Arc::clone(&ft), "sites.1");
        f.set_value("code", "A1").unwrap();
        f.set_value("geom", Geometry::point(1.0, 2.0)).unwrap();

        let header = FileHeader {
            schema: ft.as_ref().clone(),
            next_seq: 1,
        };
        write_file(&path, &header, [&f]).unwrap();

        let (read_header, features) = read_file(&path, &ft).unwrap();
        assert_eq!(read_header.next_seq, 1);
        assert_eq!(read_header.schema, *ft);
        assert_eq!(features, vec![f]);
        assert!(!path.with_extension("features.tmp").exists());
    }

    #[test]
    fn test_corrupt_frame_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.features");
        let ft = schema();
        let mut f = Feature::new(Arc::clone(&ft), "sites.1");
        f.set_value("code", "A1").unwrap();
        let header = FileHeader {
            schema: ft.as_ref().clone(),
            next_seq: 1,
        };
        write_file(&path, &header, [&f]).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = read_file(&path, &ft).unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_torn_length_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.features");
        let ft = schema();
        let f = Feature::new(Arc::clone(&ft), "sites.1");
        let header = FileHeader {
            schema: ft.as_ref().clone(),
            next_seq: 1,
        };
        write_file(&path, &header, [&f]).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[7, 0]);
        fs::write(&path, bytes).unwrap();

        let err = read_file(&path, &ft).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFormat(_)));
    }

    #[test]
    fn test_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.features");
        fs::write(&path, b"NOPE\x01").unwrap();
        assert!(matches!(read_header(&path), Err(StoreError::InvalidFormat(_))));
    }
}
