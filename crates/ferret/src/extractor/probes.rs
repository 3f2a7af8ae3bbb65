//! Content-type specific probes.
//!
//! A probe turns one file into a [`FileMeta`]: searchable `content` plus a
//! handful of attributes. Probes are plain functions looked up by content
//! type, first by exact essence and then by `major/*` family.

use super::tools::{run_tool, Tools};
use super::{ExtractError, ExtractorConfig};
use exif::{In, Reader as ExifReader, Tag, Value};
use ferret_db::{File, FileMeta};
use lofty::prelude::*;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub type Probe = fn(&ProbeEnv, &File) -> Result<FileMeta, ExtractError>;

/// Everything a probe may consult besides the file itself.
#[derive(Debug, Clone)]
pub struct ProbeEnv {
    pub max_text_size: u64,
    pub tool_timeout: Duration,
    pub ocr: bool,
    pub tools: Tools,
}

impl ProbeEnv {
    pub fn new(config: &ExtractorConfig, tools: Tools) -> Self {
        Self {
            max_text_size: config.max_text_size,
            tool_timeout: config.tool_timeout,
            ocr: config.ocr,
            tools,
        }
    }

    /// Fail with [`ExtractError::FileTooLarge`] if `path` exceeds the limit.
    pub fn check_size(&self, path: &Path) -> Result<(), ExtractError> {
        let size = fs::metadata(path)?.len();
        if size > self.max_text_size {
            return Err(ExtractError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.max_text_size,
            });
        }
        Ok(())
    }
}

pub const ODT: &str = "application/vnd.oasis.opendocument.text";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// The built-in probe table.
pub fn builtin() -> HashMap<&'static str, Probe> {
    let mut probes: HashMap<&'static str, Probe> = HashMap::new();
    for content_type in [
        "text/*",
        "application/json",
        "application/xml",
        "application/javascript",
        "application/x-sh",
        "application/toml",
    ] {
        probes.insert(content_type, text);
    }
    probes.insert("audio/*", audio);
    probes.insert("image/*", image);
    probes.insert("application/pdf", pdf);
    probes.insert(ODT, odt);
    probes.insert(DOCX, docx);
    probes
}

pub fn text(env: &ProbeEnv, file: &File) -> Result<FileMeta, ExtractError> {
    let path = Path::new(&file.path);
    env.check_size(path)?;
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes).into_owned();
    let lines = content.lines().count();
    Ok(FileMeta::new(file.id)
        .with_content(content)
        .with_attr("lines", lines.to_string()))
}

pub fn audio(_env: &ProbeEnv, file: &File) -> Result<FileMeta, ExtractError> {
    let tagged = lofty::read_from_path(&file.path)?;
    let mut meta = FileMeta::new(file.id);

    let duration = tagged.properties().duration();
    if !duration.is_zero() {
        meta.meta
            .insert("duration".to_string(), duration.as_secs().to_string());
    }

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        let mut words = Vec::new();
        for (key, value) in [
            ("title", tag.title()),
            ("artist", tag.artist()),
            ("album", tag.album()),
        ] {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                words.push(value.to_string());
                meta.meta.insert(key.to_string(), value.into_owned());
            }
        }
        if let Some(year) = tag.year() {
            meta.meta.insert("year".to_string(), year.to_string());
        }
        meta.content = words.join(" ");
    }
    Ok(meta)
}

pub fn image(env: &ProbeEnv, file: &File) -> Result<FileMeta, ExtractError> {
    let path = Path::new(&file.path);
    let mut meta = FileMeta::new(file.id);

    match ::image::image_dimensions(path) {
        Ok((width, height)) => {
            meta.meta.insert("width".to_string(), width.to_string());
            meta.meta.insert("height".to_string(), height.to_string());
        }
        Err(err) => debug!(path = %path.display(), error = %err, "No image dimensions"),
    }

    if let Some(exif) = read_exif(path) {
        let latitude = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S');
        let longitude = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W');
        if let (Some(lat), Some(lon)) = (latitude, longitude) {
            meta.meta.insert("latitude".to_string(), format!("{lat:.6}"));
            meta.meta.insert("longitude".to_string(), format!("{lon:.6}"));
        }
        if let Some(orientation) = exif
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
        {
            meta.meta
                .insert("orientation".to_string(), orientation.to_string());
        }
    }

    if env.ocr {
        if let Some(tesseract) = &env.tools.tesseract {
            let args = [path.as_os_str(), OsStr::new("stdout")];
            meta.content = run_tool(tesseract, args, env.tool_timeout)?.trim().to_string();
        }
    }
    Ok(meta)
}

fn read_exif(path: &Path) -> Option<exif::Exif> {
    let file = fs::File::open(path).ok()?;
    ExifReader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()
}

/// Degrees/minutes/seconds to signed decimal degrees.
fn gps_coordinate(exif: &exif::Exif, value: Tag, reference: Tag, negative: u8) -> Option<f64> {
    const DMS_DIVISION: [f64; 3] = [1.0, 60.0, 3600.0];

    let field = exif.get_field(value, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let degrees: f64 = parts
        .iter()
        .zip(DMS_DIVISION)
        .map(|(part, div)| part.to_f64() / div)
        .sum();

    let is_negative = exif
        .get_field(reference, In::PRIMARY)
        .and_then(|field| match &field.value {
            Value::Ascii(strings) => strings.first().and_then(|s| s.first().copied()),
            _ => None,
        })
        == Some(negative);

    Some(if is_negative { -degrees } else { degrees })
}

pub fn pdf(env: &ProbeEnv, file: &File) -> Result<FileMeta, ExtractError> {
    document(env, file, env.tools.pdftotext.as_deref(), &["-q", "-enc", "UTF-8"], &["-"])
}

pub fn odt(env: &ProbeEnv, file: &File) -> Result<FileMeta, ExtractError> {
    document(env, file, env.tools.odt2txt.as_deref(), &[], &[])
}

pub fn docx(env: &ProbeEnv, file: &File) -> Result<FileMeta, ExtractError> {
    document(env, file, env.tools.docx2txt.as_deref(), &[], &["-"])
}

fn document(
    env: &ProbeEnv,
    file: &File,
    tool: Option<&Path>,
    before: &[&str],
    after: &[&str],
) -> Result<FileMeta, ExtractError> {
    let meta = FileMeta::new(file.id);
    let Some(tool) = tool else {
        debug!(file = %file.path, content_type = %file.content_type, "No tool for document");
        return Ok(meta);
    };

    let mut args: Vec<OsString> = before.iter().map(OsString::from).collect();
    args.push(OsString::from(&file.path));
    args.extend(after.iter().map(OsString::from));

    let content = run_tool(tool, args, env.tool_timeout)?;
    Ok(meta.with_content(content.trim()))
}
