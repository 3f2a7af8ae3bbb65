//! External text extraction tools.

use super::ExtractError;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Tool binaries found on `PATH`. A `None` entry disables that tool.
#[derive(Debug, Clone, Default)]
pub struct Tools {
    pub tesseract: Option<PathBuf>,
    pub pdftotext: Option<PathBuf>,
    pub odt2txt: Option<PathBuf>,
    pub docx2txt: Option<PathBuf>,
}

impl Tools {
    /// Look every tool up once.
    pub fn locate() -> Self {
        Self {
            tesseract: locate("tesseract"),
            pdftotext: locate("pdftotext"),
            odt2txt: locate("odt2txt"),
            docx2txt: locate("docx2txt"),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

fn locate(name: &str) -> Option<PathBuf> {
    match which::which(name) {
        Ok(path) => {
            debug!(tool = name, path = %path.display(), "Tool found");
            Some(path)
        }
        Err(_) => {
            info!(tool = name, "Tool not installed, its probe yields empty content");
            None
        }
    }
}

/// Run `program` and return its stdout, killing it after `timeout`.
pub fn run_tool<I, S>(program: &Path, args: I, timeout: Duration) -> Result<String, ExtractError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = program
        .file_name()
        .unwrap_or(program.as_os_str())
        .to_string_lossy()
        .into_owned();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes while waiting so a chatty tool cannot block on a full pipe.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExtractError::Timeout { tool, timeout });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = collect(stdout);
    let stderr = collect(stderr);
    if !status.success() {
        return Err(ExtractError::ToolFailed {
            tool,
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
