//! Common types shared across tag transports and detectors.
//!
//! This module defines tag metadata, the NDEF records delivered with a tap,
//! and the [`ScanEvent`] produced when a token is detected.

use crate::devices::AnyTag;
use crate::error::{HardwareError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tapsign_core::RequestCode;

/// Minimum tag UID length in bytes (per ISO 14443 specification).
pub const MIN_UID_LENGTH: usize = 4;

/// Maximum tag UID length in bytes (per ISO 14443 specification).
pub const MAX_UID_LENGTH: usize = 10;

/// Radio technologies a tag advertises on discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TagTechnology {
    /// ISO 14443-3A.
    NfcA,

    /// ISO 14443-4 (APDU exchange).
    IsoDep,

    /// NDEF formatted tag.
    Ndef,

    /// Anything the platform reported that is not modelled here.
    Unknown(String),
}

impl TagTechnology {
    /// Get a human-readable name for the technology.
    pub fn name(&self) -> &str {
        match self {
            Self::NfcA => "NfcA",
            Self::IsoDep => "IsoDep",
            Self::Ndef => "Ndef",
            Self::Unknown(name) => name,
        }
    }
}

/// Tag metadata captured at discovery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    /// Tag unique identifier (4-10 bytes).
    pub id: Vec<u8>,

    /// Technologies reported by the tag.
    pub technologies: Vec<TagTechnology>,

    /// Largest frame the tag accepts in one transceive, if known.
    pub max_transceive_length: Option<usize>,
}

impl TagInfo {
    /// Create tag info with validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the UID length is not within the valid range
    /// of 4-10 bytes.
    pub fn new(id: Vec<u8>, technologies: Vec<TagTechnology>) -> Result<Self> {
        if !(MIN_UID_LENGTH..=MAX_UID_LENGTH).contains(&id.len()) {
            return Err(HardwareError::invalid_data(format!(
                "Tag UID length must be between {} and {} bytes, got {}",
                MIN_UID_LENGTH,
                MAX_UID_LENGTH,
                id.len()
            )));
        }
        Ok(Self {
            id,
            technologies,
            max_transceive_length: None,
        })
    }

    /// Set the maximum transceive length.
    pub fn with_max_transceive_length(mut self, length: usize) -> Self {
        self.max_transceive_length = Some(length);
        self
    }

    /// Get the UID as a hexadecimal string.
    pub fn id_hex(&self) -> String {
        self.id.iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// Check whether the tag supports a technology.
    pub fn supports(&self, technology: &TagTechnology) -> bool {
        self.technologies.contains(technology)
    }
}

/// TNF value for NFC Forum well-known records.
pub const TNF_WELL_KNOWN: u8 = 0x01;

/// A single NDEF record read from the tag at discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdefRecord {
    /// Type name format.
    pub tnf: u8,

    /// Record type bytes (e.g. `b"U"` for a URI).
    pub record_type: Vec<u8>,

    /// Record payload.
    pub payload: Vec<u8>,
}

impl NdefRecord {
    /// Create a raw record.
    pub fn new(tnf: u8, record_type: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            tnf,
            record_type,
            payload,
        }
    }

    /// Create a well-known URI record with no abbreviation prefix.
    pub fn uri(uri: &str) -> Self {
        let mut payload = Vec::with_capacity(uri.len() + 1);
        payload.push(0x00);
        payload.extend_from_slice(uri.as_bytes());
        Self::new(TNF_WELL_KNOWN, b"U".to_vec(), payload)
    }

    /// Decode a well-known URI record without abbreviation prefix.
    pub fn as_uri(&self) -> Option<&str> {
        if self.tnf != TNF_WELL_KNOWN || self.record_type != b"U" {
            return None;
        }
        match self.payload.split_first() {
            Some((0x00, rest)) => std::str::from_utf8(rest).ok(),
            _ => None,
        }
    }
}

/// A token was tapped while detection was armed.
///
/// Carries the request code that was armed when detection was enabled, the
/// transport capability for the tag, and any NDEF records read on discovery.
/// The event is intentionally not `Clone`: it is moved into the session
/// manager, which guarantees at-most-once consumption.
#[derive(Debug)]
pub struct ScanEvent {
    /// Code armed when the hardware dispatched this tap.
    pub request_code: RequestCode,

    /// Capability to exchange bytes with the tapped token.
    pub tag: AnyTag,

    /// NDEF records read on discovery.
    pub records: Vec<NdefRecord>,

    /// When the tag was detected.
    pub detected_at: DateTime<Utc>,
}

impl ScanEvent {
    /// Create a scan event stamped with the current time.
    pub fn new(request_code: RequestCode, tag: AnyTag, records: Vec<NdefRecord>) -> Self {
        Self {
            request_code,
            tag,
            records,
            detected_at: Utc::now(),
        }
    }
}
