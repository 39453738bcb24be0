//! Converts staged files into prompt material.
//!
//! Images become base64 data URLs; everything else is read as text, truncated past a fixed
//! ceiling and tagged with a fence language derived from its extension.

use base64::{Engine as _, engine::general_purpose};

use crate::error::ChatError;
use crate::types::{ImageAttachment, PreparedAttachments, TextAttachment};

/// Characters of a text attachment kept before truncation.
pub const MAX_TEXT_CHARS: usize = 200_000;

/// Readable in-memory file handle.
pub trait FileSource: Send + Sync {
    /// File name including extension.
    fn name(&self) -> &str;
    /// Declared MIME type; may be empty when unknown.
    fn mime_type(&self) -> &str;
    /// Reads the full contents.
    fn read(&self) -> std::io::Result<Vec<u8>>;
}

/// File already held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

impl FileSource for AttachmentFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn read(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

/// Fence language for a file name, from its extension.
///
/// # Examples
///
/// ```
/// use kotoba_chat::attachment::language_for;
///
/// assert_eq!(language_for("script.PY"), Some("python"));
/// assert_eq!(language_for("notes.txt"), None);
/// ```
pub fn language_for(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let lang = match ext.to_ascii_lowercase().as_str() {
        "js" => "javascript",
        "ts" => "typescript",
        "jsx" => "jsx",
        "tsx" => "tsx",
        "py" => "python",
        "json" => "json",
        "md" => "markdown",
        "html" => "html",
        "css" => "css",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "sh" | "zsh" => "bash",
        "ps1" => "powershell",
        "yml" | "yaml" => "yaml",
        "xml" => "xml",
        "sql" => "sql",
        _ => return None,
    };
    Some(lang)
}

fn truncate_text(text: String) -> String {
    let total = text.chars().count();
    if total <= MAX_TEXT_CHARS {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(MAX_TEXT_CHARS)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    format!(
        "{}\n\n[... TRUNCATED {} CHARS ...]",
        &text[..cut],
        total - MAX_TEXT_CHARS
    )
}

/// Reads and classifies every file.
///
/// # Errors
///
/// Returns [`ChatError::Attachment`] for the first file that cannot be read; the batch is
/// discarded as a whole.
pub fn prepare_attachments<F: FileSource>(files: &[F]) -> Result<PreparedAttachments, ChatError> {
    let mut out = PreparedAttachments::default();

    for file in files {
        let name = match file.name() {
            "" => "file".to_string(),
            other => other.to_string(),
        };
        let mime = file.mime_type().to_ascii_lowercase();
        let bytes = file.read().map_err(|err| ChatError::Attachment {
            name: name.clone(),
            message: err.to_string(),
        })?;

        if mime.starts_with("image/") {
            let data_url = format!(
                "data:{mime};base64,{}",
                general_purpose::STANDARD.encode(&bytes)
            );
            out.images.push(ImageAttachment {
                name,
                mime,
                data_url,
            });
            continue;
        }

        let text = String::from_utf8_lossy(&bytes).into_owned();
        out.texts.push(TextAttachment {
            lang: language_for(&name),
            content: truncate_text(text),
            name,
        });
    }

    Ok(out)
}
