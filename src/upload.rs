use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use tracing::info;

use crate::data::Services;
use crate::error::ValidationError;
use crate::notice::{self, NoticeSink};

pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

fn detect_mime(bytes: &[u8]) -> &'static str {
    let head = &bytes[..bytes.len().min(512)];
    tree_magic_mini::from_u8(head)
}

/// Encodes raw bytes as a `data:` URL after checking size and type.
pub fn encode_image(bytes: &[u8], max_bytes: u64) -> Result<String> {
    let size = bytes.len() as u64;
    if size > max_bytes {
        return Err(ValidationError::ImageTooLarge {
            size_bytes: size,
            max_bytes,
        }
        .into());
    }
    let mime = detect_mime(bytes);
    if !mime.starts_with("image/") {
        bail!("upload: expected an image, found {mime}");
    }
    let encoded = general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}

/// Reads an image file and hands it to the backend, returning the hosted URL.
/// Oversized files are rejected before they are read into memory.
pub fn upload_file(
    services: &Services,
    notices: &dyn NoticeSink,
    path: &Path,
    max_bytes: u64,
) -> Result<String> {
    let meta = fs::metadata(path).with_context(|| format!("upload: stat {}", path.display()))?;
    if meta.len() > max_bytes {
        return Err(notice::reject(
            notices,
            ValidationError::ImageTooLarge {
                size_bytes: meta.len(),
                max_bytes,
            },
        ));
    }
    let bytes = fs::read(path).with_context(|| format!("upload: read {}", path.display()))?;
    let data_url = encode_image(&bytes, max_bytes)?;
    let url = services.uploads.upload_image(&data_url)?;
    info!(path = %path.display(), bytes = bytes.len(), %url, "upload: image stored");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockBackend;
    use crate::models::fixtures;
    use crate::notice::{ChannelSink, Level};
    use std::sync::Arc;

    const PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89,
    ];

    #[test]
    fn png_becomes_data_url() {
        let url = encode_image(PNG, DEFAULT_MAX_IMAGE_BYTES).unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[test]
    fn oversized_file_is_rejected_before_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        fs::write(&path, PNG).unwrap();
        let backend = Arc::new(MockBackend::new(fixtures::profile("me")));
        let services = Services::from_backend(backend.clone());

        let sink = ChannelSink::new();

        let err = upload_file(&services, &sink, &path, 8).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::ImageTooLarge { max_bytes: 8, .. })
        ));
        assert_eq!(backend.call_count("upload"), 0);
        let notices = sink.drain();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, Level::Warning);

        let url = upload_file(&services, &sink, &path, DEFAULT_MAX_IMAGE_BYTES).unwrap();
        assert!(sink.drain().is_empty());
        assert!(url.ends_with(".png"));
        assert_eq!(backend.call_count("upload"), 1);
    }

    #[test]
    fn non_image_is_refused() {
        assert!(encode_image(b"just some words", DEFAULT_MAX_IMAGE_BYTES).is_err());
    }
}
