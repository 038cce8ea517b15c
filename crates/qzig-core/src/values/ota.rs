//! Over-the-air upgrade cluster
//!
//! Images are served from one directory:
//!
//! ```text
//! <dir>/<manufacturer>-<type>-<version>.upgrade   name of the image offered to <version>
//! <dir>/<manufacturer>-<type>-<version>.bin       an image
//! ```
//!
//! All numbers in file names are decimal.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::radio::{
    AttrValue, ClusterResponse, STATUS_ABORT, STATUS_NO_IMAGE_AVAILABLE, STATUS_SUCCESS,
};

pub const QUERY_NEXT_IMAGE: u8 = 0x01;
pub const IMAGE_BLOCK: u8 = 0x03;
pub const UPGRADE_END: u8 = 0x06;

/// Numeric argument at `index`, if it fits `T`
fn arg<T: TryFrom<i64>>(args: &[AttrValue], index: usize) -> Option<T> {
    args.get(index)?.as_i64()?.try_into().ok()
}

/// Answer an upgrade request; `None` for commands that need no answer
pub(super) fn command(
    ieee: &str,
    dir: &Path,
    command_id: u8,
    args: &[AttrValue],
) -> Option<ClusterResponse> {
    let response = match command_id {
        QUERY_NEXT_IMAGE => query_next_image(dir, args),
        IMAGE_BLOCK => image_block(dir, args),
        UPGRADE_END => upgrade_end(args),
        _ => {
            tracing::debug!(ieee = %ieee, command_id, "Unhandled upgrade command");
            return None;
        }
    };
    if response.is_none() {
        tracing::warn!(ieee = %ieee, command_id, ?args, "Malformed upgrade request");
    }
    response
}

fn query_next_image(dir: &Path, args: &[AttrValue]) -> Option<ClusterResponse> {
    let manufacturer: u16 = arg(args, 1)?;
    let image_type: u16 = arg(args, 2)?;
    let version: u32 = arg(args, 3)?;
    tracing::debug!(manufacturer, image_type, version, "Query next image");

    let listing = dir.join(format!("{}-{}-{}.upgrade", manufacturer, image_type, version));
    let response = match offered_image(dir, &listing) {
        Ok((new_version, size)) => {
            tracing::info!(manufacturer, image_type, version, new_version, size, "Offering upgrade");
            ClusterResponse::QueryNextImage {
                status: STATUS_SUCCESS,
                manufacturer,
                image_type,
                version: new_version,
                size,
            }
        }
        Err(e) => {
            tracing::warn!(file = %listing.display(), error = %e, "No upgrade image");
            ClusterResponse::QueryNextImage {
                status: STATUS_NO_IMAGE_AVAILABLE,
                manufacturer: 0,
                image_type: 0,
                version: 0,
                size: 0,
            }
        }
    };
    Some(response)
}

/// Version and size of the image a listing file names
fn offered_image(dir: &Path, listing: &Path) -> io::Result<(u32, u32)> {
    let content = fs::read_to_string(listing)?;
    let name = content.trim();
    let version = image_version(name).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no version in image name {:?}", name),
        )
    })?;
    let size = fs::metadata(dir.join(name))?.len();
    let size = u32::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "image too large"))?;
    Ok((version, size))
}

/// `<manufacturer>-<type>-<version>.bin` to its version
fn image_version(name: &str) -> Option<u32> {
    name.split('.').next()?.split('-').nth(2)?.parse().ok()
}

fn image_block(dir: &Path, args: &[AttrValue]) -> Option<ClusterResponse> {
    let manufacturer: u16 = arg(args, 1)?;
    let image_type: u16 = arg(args, 2)?;
    let version: u32 = arg(args, 3)?;
    let offset: u32 = arg(args, 4)?;
    let max_size: u8 = arg(args, 5)?;

    let image = dir.join(format!("{}-{}-{}.bin", manufacturer, image_type, version));
    let response = match read_block(&image, offset, max_size) {
        Ok(data) => {
            tracing::debug!(offset, size = data.len(), "Image block");
            ClusterResponse::ImageBlock {
                status: STATUS_SUCCESS,
                manufacturer,
                image_type,
                version,
                offset,
                data,
            }
        }
        Err(e) => {
            tracing::error!(file = %image.display(), error = %e, "Failed to read upgrade image");
            ClusterResponse::ImageBlock {
                status: STATUS_ABORT,
                manufacturer: 0,
                image_type: 0,
                version: 0,
                offset: 0,
                data: Vec::new(),
            }
        }
    };
    Some(response)
}

fn read_block(path: &Path, offset: u32, max_size: u8) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(u64::from(offset)))?;
    let mut data = Vec::with_capacity(usize::from(max_size));
    file.take(u64::from(max_size)).read_to_end(&mut data)?;
    Ok(data)
}

fn upgrade_end(args: &[AttrValue]) -> Option<ClusterResponse> {
    let status: u8 = arg(args, 0)?;
    let manufacturer: u16 = arg(args, 1)?;
    let image_type: u16 = arg(args, 2)?;
    let version: u32 = arg(args, 3)?;
    tracing::info!(status, manufacturer, image_type, version, "Upgrade end");

    // upgrade right away
    Some(ClusterResponse::UpgradeEnd {
        manufacturer,
        image_type,
        version,
        current_time: 0,
        upgrade_time: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn ints(values: &[i64]) -> Vec<AttrValue> {
        values.iter().map(|v| AttrValue::Int(*v)).collect()
    }

    /// Image 4098-1-5.bin offered to version 4
    fn images() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("4098-1-4.upgrade"), "4098-1-5.bin\n").unwrap();
        fs::write(dir.path().join("4098-1-5.bin"), b"0123456789").unwrap();
        dir
    }

    #[test]
    fn version_from_image_name() {
        assert_eq!(image_version("4098-1-5.bin"), Some(5));
        assert_eq!(image_version("4098-1.bin"), None);
        assert_eq!(image_version("a-b-c.bin"), None);
    }

    #[test]
    fn query_offers_listed_image() {
        let dir = images();
        let response = command("aa", dir.path(), QUERY_NEXT_IMAGE, &ints(&[0, 4098, 1, 4]));
        assert_eq!(
            response,
            Some(ClusterResponse::QueryNextImage {
                status: STATUS_SUCCESS,
                manufacturer: 4098,
                image_type: 1,
                version: 5,
                size: 10,
            })
        );
    }

    #[test]
    fn query_without_listing_has_no_image() {
        let dir = images();
        let response = command("aa", dir.path(), QUERY_NEXT_IMAGE, &ints(&[0, 4098, 1, 5]));
        assert_eq!(
            response,
            Some(ClusterResponse::QueryNextImage {
                status: STATUS_NO_IMAGE_AVAILABLE,
                manufacturer: 0,
                image_type: 0,
                version: 0,
                size: 0,
            })
        );
    }

    #[test]
    fn block_is_read_at_offset() {
        let dir = images();
        let response = command("aa", dir.path(), IMAGE_BLOCK, &ints(&[0, 4098, 1, 5, 8, 64]));
        assert_eq!(
            response,
            Some(ClusterResponse::ImageBlock {
                status: STATUS_SUCCESS,
                manufacturer: 4098,
                image_type: 1,
                version: 5,
                offset: 8,
                data: b"89".to_vec(),
            })
        );
    }

    #[test]
    fn block_of_missing_image_aborts() {
        let dir = images();
        let response = command("aa", dir.path(), IMAGE_BLOCK, &ints(&[0, 4098, 1, 6, 0, 64]));
        assert!(matches!(
            response,
            Some(ClusterResponse::ImageBlock {
                status: STATUS_ABORT,
                ..
            })
        ));
    }

    #[test]
    fn upgrade_end_upgrades_now() {
        let dir = images();
        let response = command("aa", dir.path(), UPGRADE_END, &ints(&[0, 4098, 1, 5]));
        assert_eq!(
            response,
            Some(ClusterResponse::UpgradeEnd {
                manufacturer: 4098,
                image_type: 1,
                version: 5,
                current_time: 0,
                upgrade_time: 0,
            })
        );
    }

    #[test]
    fn malformed_or_unknown_requests_get_no_answer() {
        let dir = images();
        assert_eq!(command("aa", dir.path(), QUERY_NEXT_IMAGE, &ints(&[0, 4098])), None);
        assert_eq!(command("aa", dir.path(), IMAGE_BLOCK, &ints(&[0, -1, 1, 5, 0, 64])), None);
        assert_eq!(command("aa", dir.path(), 0x09, &[]), None);
    }
}
