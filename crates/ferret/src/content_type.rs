//! Content type detection for newly discovered files.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes inspected when the extension gives no answer.
const SNIFF_LEN: usize = 1024;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const TEXT_PLAIN: &str = "text/plain";

/// Guess by extension, falling back to a sniff of the first bytes.
pub fn detect(path: &Path) -> io::Result<String> {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return Ok(mime.essence_str().to_string());
    }
    sniff(path).map(str::to_string)
}

fn sniff(path: &Path) -> io::Result<&'static str> {
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut buf)?;
    Ok(classify(&buf))
}

fn classify(head: &[u8]) -> &'static str {
    if head.contains(&0) {
        return OCTET_STREAM;
    }
    match std::str::from_utf8(head) {
        Ok(_) => TEXT_PLAIN,
        // a multi-byte sequence cut at the sniff boundary is still text
        Err(e) if e.error_len().is_none() && head.len() == SNIFF_LEN => TEXT_PLAIN,
        Err(_) => OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn extension_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");
        fs::write(&path, b"not really a jpeg").unwrap();
        assert_eq!(detect(&path).unwrap(), "image/jpeg");
    }

    #[test]
    fn sniffs_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("README");
        fs::write(&text, "plain words\n").unwrap();
        assert_eq!(detect(&text).unwrap(), TEXT_PLAIN);

        let blob = dir.path().join("blob");
        fs::write(&blob, [0x7f, b'E', b'L', b'F', 0, 1, 2]).unwrap();
        assert_eq!(detect(&blob).unwrap(), OCTET_STREAM);
    }

    #[test]
    fn empty_file_is_text() {
        assert_eq!(classify(b""), TEXT_PLAIN);
    }

    #[test]
    fn invalid_utf8_is_binary() {
        assert_eq!(classify(&[0xff, 0xfe, b'a']), OCTET_STREAM);
    }

    #[test]
    fn truncated_multibyte_at_boundary_is_text() {
        let mut head = vec![b'a'; SNIFF_LEN - 1];
        head.push(0xc3);
        assert_eq!(classify(&head), TEXT_PLAIN);
    }
}
