// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Document intake: the file validator and the immutable [`Document`] it produces.
//!
//! Validation is a pure function over file metadata. The MIME class is resolved
//! from the declared content type first and the filename extension second; the
//! size limit is checked only once the type is known to be acceptable.

use std::fmt;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Largest payload the analysis service accepts (16 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;

/// Number of leading bytes read when sniffing a file's content type.
const SNIFF_LEN: usize = 8;

/// Document formats the analysis service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MimeClass {
    Pdf,
    Png,
    Jpeg,
}

impl MimeClass {
    /// Canonical MIME type sent with the upload.
    pub fn mime_type(&self) -> &'static str {
        match self {
            MimeClass::Pdf => "application/pdf",
            MimeClass::Png => "image/png",
            MimeClass::Jpeg => "image/jpeg",
        }
    }

    /// Resolve a declared content type, ignoring parameters such as `; charset=`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => Some(MimeClass::Pdf),
            "image/png" => Some(MimeClass::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(MimeClass::Jpeg),
            _ => None,
        }
    }

    /// Resolve from the extension of a filename (case-insensitive).
    pub fn from_extension(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MimeClass::Pdf),
            "png" => Some(MimeClass::Png),
            "jpg" | "jpeg" => Some(MimeClass::Jpeg),
            _ => None,
        }
    }

    /// Recognise a file by its magic number.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"%PDF") {
            Some(MimeClass::Pdf)
        } else if header.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(MimeClass::Png)
        } else if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(MimeClass::Jpeg)
        } else {
            None
        }
    }
}

impl fmt::Display for MimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MimeClass::Pdf => write!(f, "PDF"),
            MimeClass::Png => write!(f, "PNG"),
            MimeClass::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// Why a candidate file was refused. Surfaced immediately, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported file type for {filename} (declared: {declared})")]
    UnsupportedType { filename: String, declared: String },

    #[error("{filename} is {size_bytes} bytes, limit is {limit_bytes}")]
    TooLarge {
        filename: String,
        size_bytes: u64,
        limit_bytes: u64,
    },
}

/// Metadata of a file offered for analysis, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub name: String,
    pub declared_mime: Option<String>,
    pub size_bytes: u64,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, declared_mime: Option<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            declared_mime,
            size_bytes,
        }
    }

    /// Build a candidate from a file on disk. The content's magic number, when
    /// recognised, becomes the declared type.
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let mut header = Vec::with_capacity(SNIFF_LEN);
        std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut header)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();

        Ok(Self {
            name,
            declared_mime: MimeClass::sniff(&header).map(|m| m.mime_type().to_string()),
            size_bytes: meta.len(),
        })
    }
}

/// A validated document. Immutable; a session holds at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: String,
    pub display_name: String,
    pub mime_class: MimeClass,
    pub size_bytes: u64,
}

impl Document {
    /// Short opaque identifier: the first eight hex digits of a v4 UUID.
    fn generate_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}

/// Accepts or rejects candidate files by type and size.
#[derive(Debug, Clone, Copy)]
pub struct FileValidator {
    max_bytes: u64,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

impl FileValidator {
    /// Create a validator with a custom limit. Limits above 16 MiB are clamped.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes: max_bytes.min(MAX_UPLOAD_BYTES),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Validate a candidate. Type is checked before size.
    pub fn validate(&self, file: &CandidateFile) -> Result<Document, ValidationError> {
        let mime_class = file
            .declared_mime
            .as_deref()
            .and_then(MimeClass::from_mime)
            .or_else(|| MimeClass::from_extension(&file.name))
            .ok_or_else(|| ValidationError::UnsupportedType {
                filename: file.name.clone(),
                declared: file.declared_mime.clone().unwrap_or_else(|| "none".to_string()),
            })?;

        if file.size_bytes > self.max_bytes {
            return Err(ValidationError::TooLarge {
                filename: file.name.clone(),
                size_bytes: file.size_bytes,
                limit_bytes: self.max_bytes,
            });
        }

        Ok(Document {
            id: Document::generate_id(),
            display_name: file.name.clone(),
            mime_class,
            size_bytes: file.size_bytes,
        })
    }
}
