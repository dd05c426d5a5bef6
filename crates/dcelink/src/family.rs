//! Codec families and their argument layouts
//!
//! The argument structs exchanged with a codec are defined by the codec
//! interface, not by this crate. Only a handful of facts about them matter
//! here: their sizes (so the transport knows how many bytes to map), where a
//! buffer descriptor keeps its buffer count, and where each slot keeps its
//! buffer pointer. Those facts live in one table per family.

use dcelink_memplugin::SharedBuffer;
use serde::{Deserialize, Serialize};

use crate::{DceError, Result};

/// Layout of a buffer descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescLayout {
    /// Struct name, for diagnostics.
    pub name: &'static str,
    /// Size of the whole descriptor.
    pub size: usize,
    /// Offset of the `i32` buffer count.
    pub count_offset: usize,
    /// Offset of the first slot.
    pub slots_offset: usize,
    /// Distance between slots.
    pub slot_stride: usize,
    /// Offset of the buffer pointer inside a slot.
    pub buf_offset: usize,
    /// Offset of the `i32` byte size inside a slot.
    pub size_offset: usize,
    /// Number of slots in the descriptor.
    pub max_slots: usize,
}

/// `XDM2_BufDesc`: up to 16 generic buffers.
pub const XDM2_BUF_DESC: DescLayout = DescLayout {
    name: "XDM2_BufDesc",
    size: 392,
    count_offset: 0,
    slots_offset: 8,
    slot_stride: 24,
    buf_offset: 0,
    size_offset: 16,
    max_slots: 16,
};

/// `IVIDEO2_BufDesc`: up to three planes of one video frame.
pub const IVIDEO2_BUF_DESC: DescLayout = DescLayout {
    name: "IVIDEO2_BufDesc",
    size: 264,
    count_offset: 0,
    slots_offset: 16,
    slot_stride: 24,
    buf_offset: 0,
    size_offset: 16,
    max_slots: 3,
};

impl DescLayout {
    /// Offset of slot `index`'s buffer pointer from the descriptor base.
    pub const fn slot_field(&self, index: usize) -> usize {
        self.slots_offset + index * self.slot_stride + self.buf_offset
    }

    /// Number of populated slots in `desc`.
    ///
    /// Negative counts and counts above the slot capacity are rejected.
    pub fn read_count(&self, desc: &SharedBuffer) -> Result<usize> {
        if desc.len() < self.size {
            return Err(DceError::InvalidInput(format!(
                "{} needs {} bytes, buffer has {}",
                self.name,
                self.size,
                desc.len()
            )));
        }
        let raw = desc.read_i32(self.count_offset).ok_or_else(|| {
            DceError::InvalidInput(format!("{} count field out of bounds", self.name))
        })?;
        usize::try_from(raw)
            .ok()
            .filter(|count| *count <= self.max_slots)
            .ok_or_else(|| {
                DceError::InvalidInput(format!(
                    "{} count {raw} outside 0..={}",
                    self.name, self.max_slots
                ))
            })
    }
}

/// Everything the call layer needs to know about one family's structs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyLayout {
    /// Input buffer descriptor.
    pub in_desc: DescLayout,
    /// Output buffer descriptor.
    pub out_desc: DescLayout,
    /// Size of the per-frame input arguments.
    pub in_args_size: usize,
    /// Size of the per-frame output arguments.
    pub out_args_size: usize,
    /// Offset of the version buffer pointer in the status struct.
    pub status_version_offset: usize,
}

const VIDDEC3_LAYOUT: FamilyLayout = FamilyLayout {
    in_desc: XDM2_BUF_DESC,
    out_desc: XDM2_BUF_DESC,
    in_args_size: 8,
    out_args_size: 736,
    // IVIDDEC3_Status.data.buf, after the leading size and extendedError
    status_version_offset: 8,
};

const VIDENC2_LAYOUT: FamilyLayout = FamilyLayout {
    in_desc: IVIDEO2_BUF_DESC,
    out_desc: XDM2_BUF_DESC,
    in_args_size: 12,
    out_args_size: 376,
    // Assumes IVIDENC2_Status matches the decoder status at this field; not
    // confirmed against the encoder interface headers.
    status_version_offset: 8,
};

/// Codec family of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecFamily {
    /// Video decoder (`VIDDEC3`)
    Viddec3,
    /// Video encoder (`VIDENC2`)
    Videnc2,
}

impl CodecFamily {
    /// Tag carried on the wire.
    pub const fn tag(self) -> u32 {
        match self {
            Self::Videnc2 => 1,
            Self::Viddec3 => 2,
        }
    }

    /// Family for a wire tag.
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Videnc2),
            2 => Some(Self::Viddec3),
            _ => None,
        }
    }

    /// Struct layouts for this family.
    pub const fn layout(self) -> &'static FamilyLayout {
        match self {
            Self::Viddec3 => &VIDDEC3_LAYOUT,
            Self::Videnc2 => &VIDENC2_LAYOUT,
        }
    }
}

impl std::fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Viddec3 => "viddec3",
            Self::Videnc2 => "videnc2",
        })
    }
}
