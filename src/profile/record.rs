//! Compact, checksummed on-flash profile record.
//!
//! Layout (60 bytes):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 1    | id                                      |
//! | 1      | 16   | name, NUL padded                        |
//! | 17     | 1    | segment count                           |
//! | 18     | 40   | 10 x (start s, end s, start dbar, end dbar) |
//! | 58     | 1    | total duration in seconds               |
//! | 59     | 1    | wrapping sum of bytes 0..59             |

use crate::error::ProfilerError;
use crate::types::{ProfileId, Segment, Segments, MAX_NAME_LEN, MAX_SEGMENTS, MAX_STORED_DECIBAR, NO_PROFILE};
use log::warn;
use serde::Serialize;

pub const RECORD_LEN: usize = 60;

const NAME_OFFSET: usize = 1;
const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;
const COUNT_OFFSET: usize = NAME_OFFSET + NAME_FIELD_LEN;
const SEGMENTS_OFFSET: usize = COUNT_OFFSET + 1;
const SEGMENT_LEN: usize = 4;
const DURATION_OFFSET: usize = SEGMENTS_OFFSET + MAX_SEGMENTS * SEGMENT_LEN;
const CHECKSUM_OFFSET: usize = DURATION_OFFSET + 1;

/// Segment in stored form: whole seconds and deci-bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactSegment {
    pub start_s: u8,
    pub end_s: u8,
    pub start_dbar: u8,
    pub end_dbar: u8,
}

impl CompactSegment {
    fn from_segment(index: usize, segment: &Segment) -> Result<Self, ProfilerError> {
        if !segment.is_valid() {
            return Err(ProfilerError::validation(format!(
                "segment {}: endTime must be after startTime",
                index
            )));
        }
        let start_s = seconds_to_byte(index, segment.start_time_s)?;
        let end_s = seconds_to_byte(index, segment.end_time_s)?;
        Ok(Self {
            start_s,
            end_s,
            start_dbar: bar_to_decibar(index, segment.start_pressure_bar)?,
            end_dbar: bar_to_decibar(index, segment.end_pressure_bar)?,
        })
    }

    pub fn to_segment(self) -> Segment {
        Segment::new(
            self.start_s as u32,
            self.end_s as u32,
            self.start_dbar as f32 / 10.0,
            self.end_dbar as f32 / 10.0,
        )
    }
}

fn seconds_to_byte(index: usize, seconds: u32) -> Result<u8, ProfilerError> {
    u8::try_from(seconds)
        .map_err(|_| ProfilerError::validation(format!("segment {}: time {}s exceeds 255s", index, seconds)))
}

/// `round(bar * 10)`, limited to 0-12.0 bar.
pub fn bar_to_decibar(index: usize, bar: f32) -> Result<u8, ProfilerError> {
    let dbar = (bar * 10.0).round();
    if !dbar.is_finite() || dbar < 0.0 || dbar > MAX_STORED_DECIBAR as f32 {
        return Err(ProfilerError::validation(format!(
            "segment {}: pressure {} bar out of range 0-12",
            index, bar
        )));
    }
    Ok(dbar as u8)
}

/// Wrapping 8-bit sum of every record byte except the checksum itself.
pub fn record_checksum(bytes: &[u8; RECORD_LEN]) -> u8 {
    bytes[..CHECKSUM_OFFSET]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn sanitize_name(name: &str) -> heapless::String<MAX_NAME_LEN> {
    let mut out = heapless::String::new();
    for c in name.chars().take(MAX_NAME_LEN) {
        let c = if c.is_ascii_graphic() || c == ' ' { c } else { '?' };
        // Capacity is MAX_NAME_LEN ASCII bytes, `take` keeps us within it.
        let _ = out.push(c);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    id: ProfileId,
    name: heapless::String<MAX_NAME_LEN>,
    segments: heapless::Vec<CompactSegment, MAX_SEGMENTS>,
    total_duration_s: u8,
    checksum: u8,
}

/// Status view of a stored profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub id: u8,
    pub name: String,
    pub segment_count: u8,
    pub total_duration: u8,
    pub checksum_valid: bool,
}

impl ProfileRecord {
    /// Build a record from decimal segments, truncating name and segment list.
    pub fn build(id: ProfileId, name: &str, segments: &[Segment]) -> Result<Self, ProfilerError> {
        if segments.is_empty() {
            return Err(ProfilerError::validation("profile has no segments"));
        }
        if segments.len() > MAX_SEGMENTS {
            warn!(
                "Profile {} has {} segments, keeping the first {}",
                id,
                segments.len(),
                MAX_SEGMENTS
            );
        }

        let mut compact = heapless::Vec::new();
        for (index, segment) in segments.iter().take(MAX_SEGMENTS).enumerate() {
            let seg = CompactSegment::from_segment(index, segment)?;
            // `take` bounds the length to the capacity.
            let _ = compact.push(seg);
        }

        let total_duration_s = compact.iter().map(|s| s.end_s).max().unwrap_or(0);

        let mut record = Self {
            id,
            name: sanitize_name(name),
            segments: compact,
            total_duration_s,
            checksum: 0,
        };
        record.checksum = record_checksum(&record.to_bytes());
        Ok(record)
    }

    /// Decode and verify a stored record.
    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Result<Self, ProfilerError> {
        let stored = bytes[CHECKSUM_OFFSET];
        let computed = record_checksum(bytes);
        if stored != computed {
            return Err(ProfilerError::integrity(format!(
                "checksum mismatch (stored {:#04x}, computed {:#04x})",
                stored, computed
            )));
        }

        if bytes[0] == NO_PROFILE {
            return Err(ProfilerError::integrity("slot is empty"));
        }
        let id = ProfileId::new(bytes[0])
            .ok_or_else(|| ProfilerError::integrity(format!("stored id {} out of range", bytes[0])))?;

        let count = bytes[COUNT_OFFSET] as usize;
        if count == 0 || count > MAX_SEGMENTS {
            return Err(ProfilerError::integrity(format!("bad segment count {}", count)));
        }

        let name_field = &bytes[NAME_OFFSET..NAME_OFFSET + MAX_NAME_LEN];
        let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        let name = sanitize_name(&String::from_utf8_lossy(&name_field[..name_len]));

        let mut segments = heapless::Vec::new();
        for chunk in bytes[SEGMENTS_OFFSET..DURATION_OFFSET]
            .chunks_exact(SEGMENT_LEN)
            .take(count)
        {
            let _ = segments.push(CompactSegment {
                start_s: chunk[0],
                end_s: chunk[1],
                start_dbar: chunk[2],
                end_dbar: chunk[3],
            });
        }

        Ok(Self {
            id,
            name,
            segments,
            total_duration_s: bytes[DURATION_OFFSET],
            checksum: stored,
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0] = self.id.value();
        let name = self.name.as_bytes();
        bytes[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);
        bytes[COUNT_OFFSET] = self.segments.len() as u8;
        for (i, seg) in self.segments.iter().enumerate() {
            let at = SEGMENTS_OFFSET + i * SEGMENT_LEN;
            bytes[at..at + SEGMENT_LEN].copy_from_slice(&[seg.start_s, seg.end_s, seg.start_dbar, seg.end_dbar]);
        }
        bytes[DURATION_OFFSET] = self.total_duration_s;
        bytes[CHECKSUM_OFFSET] = self.checksum;
        bytes
    }

    pub fn checksum_valid(&self) -> bool {
        record_checksum(&self.to_bytes()) == self.checksum
    }

    pub fn id(&self) -> ProfileId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn total_duration_s(&self) -> u8 {
        self.total_duration_s
    }

    pub fn compact_segments(&self) -> &[CompactSegment] {
        &self.segments
    }

    /// Segments converted back to decimal bar.
    pub fn segments(&self) -> Segments {
        self.segments.iter().map(|s| s.to_segment()).collect()
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id.value(),
            name: self.name.to_string(),
            segment_count: self.segments.len() as u8,
            total_duration: self.total_duration_s,
            checksum_valid: self.checksum_valid(),
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_checksum(&mut self) {
        self.checksum = self.checksum.wrapping_add(1);
    }
}
