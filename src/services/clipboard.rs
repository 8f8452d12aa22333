//! Best-effort clipboard writes through the platform's clipboard tool

use crate::error::{PipelineError, PipelineResult};

/// Destination for the final public URL
pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> PipelineResult<()>;
}

/// Pipes text into `pbcopy`, `clip`, or the first working Linux tool
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

#[cfg(target_os = "macos")]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[("pbcopy", &[])];

#[cfg(target_os = "windows")]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[("clip", &[])];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const CLIPBOARD_COMMANDS: &[(&str, &[&str])] = &[
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
];

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> PipelineResult<()> {
        let mut failures = Vec::new();

        for (program, args) in CLIPBOARD_COMMANDS {
            let result = duct::cmd(*program, args.iter().copied())
                .stdin_bytes(text.as_bytes().to_vec())
                .stdout_null()
                .stderr_null()
                .run();

            match result {
                Ok(_) => return Ok(()),
                Err(e) => failures.push(format!("{}: {}", program, e)),
            }
        }

        Err(PipelineError::Clipboard(failures.join("; ")))
    }
}

/// Clipboard that does nothing, for `--no-clipboard`
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClipboard;

impl Clipboard for NoClipboard {
    fn copy(&self, _text: &str) -> PipelineResult<()> {
        Ok(())
    }
}
