//! Content-type classification: MIME type to a human-readable file category.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse file category used in per-type report statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    GoogleDoc,
    GoogleSheet,
    GoogleSlides,
    GoogleForm,
    GoogleDrawing,
    Folder,
    Shortcut,
    Pdf,
    Word,
    Excel,
    PowerPoint,
    Image,
    Video,
    Audio,
    Text,
    Archive,
    Other,
}

impl FileCategory {
    /// Human-readable label used as the report key.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::GoogleDoc => "Google Doc",
            Self::GoogleSheet => "Google Sheet",
            Self::GoogleSlides => "Google Slides",
            Self::GoogleForm => "Google Form",
            Self::GoogleDrawing => "Google Drawing",
            Self::Folder => "Folder",
            Self::Shortcut => "Shortcut",
            Self::Pdf => "PDF",
            Self::Word => "Word Document",
            Self::Excel => "Excel Spreadsheet",
            Self::PowerPoint => "PowerPoint",
            Self::Image => "Image",
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Text => "Text",
            Self::Archive => "Archive",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a MIME type to its category. Unknown types fall into [`FileCategory::Other`].
#[must_use]
pub fn classify(mime_type: &str) -> FileCategory {
    let mime = mime_type.trim();
    match mime {
        "application/vnd.google-apps.document" => return FileCategory::GoogleDoc,
        "application/vnd.google-apps.spreadsheet" => return FileCategory::GoogleSheet,
        "application/vnd.google-apps.presentation" => return FileCategory::GoogleSlides,
        "application/vnd.google-apps.form" => return FileCategory::GoogleForm,
        "application/vnd.google-apps.drawing" => return FileCategory::GoogleDrawing,
        "application/vnd.google-apps.folder" => return FileCategory::Folder,
        "application/vnd.google-apps.shortcut" => return FileCategory::Shortcut,
        "application/pdf" => return FileCategory::Pdf,
        "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            return FileCategory::Word;
        }
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "text/csv" => return FileCategory::Excel,
        "application/vnd.ms-powerpoint"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            return FileCategory::PowerPoint;
        }
        "application/zip"
        | "application/x-zip-compressed"
        | "application/x-tar"
        | "application/gzip"
        | "application/x-7z-compressed"
        | "application/x-rar-compressed" => return FileCategory::Archive,
        _ => {}
    }

    match mime.split_once('/').map(|(top, _)| top) {
        Some("image") => FileCategory::Image,
        Some("video") => FileCategory::Video,
        Some("audio") => FileCategory::Audio,
        Some("text") => FileCategory::Text,
        _ => FileCategory::Other,
    }
}
