//! Packed cell identifier layout and codec.
//!
//! A cell ID packs five small integers (system, side, layer, module, sensor)
//! into one 64-bit word. The layout is described by one [`BitField`] per
//! field; decoding right-shifts by the offset and masks to the width.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Names of the decoded fields, in layout order.
pub const FIELD_NAMES: [&str; 5] = ["system", "side", "layer", "module", "sensor"];

/// Maximum width of a single field (fields decode into `u32`).
pub const MAX_FIELD_WIDTH: u8 = 32;

/// Offset and width of one field inside the packed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BitField {
    /// Position of the least significant bit.
    pub offset: u8,
    /// Number of bits.
    pub width: u8,
}

impl BitField {
    /// Creates a new bit field.
    #[inline]
    #[must_use]
    pub const fn new(offset: u8, width: u8) -> Self {
        Self { offset, width }
    }

    /// Returns the unshifted mask for this field.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Returns the bits this field occupies inside the packed word.
    #[inline]
    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.mask() << self.offset
    }

    /// Extracts the raw field value from a packed identifier.
    #[inline]
    #[must_use]
    pub const fn extract(&self, raw: u64) -> u64 {
        (raw >> self.offset) & self.mask()
    }

    fn check_range(&self, field: &'static str) -> Result<(), DecodeError> {
        let end = u16::from(self.offset) + u16::from(self.width);
        if self.width == 0 || self.width > MAX_FIELD_WIDTH || end > 64 {
            return Err(DecodeError::FieldRange {
                field,
                offset: self.offset,
                width: self.width,
            });
        }
        Ok(())
    }
}

/// Which half of a double layer a physical layer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LayerHalf {
    /// Even layer (parity 0).
    Lower,
    /// Odd layer (parity 1).
    Upper,
}

impl LayerHalf {
    /// Classifies a physical layer index by parity.
    #[inline]
    #[must_use]
    pub const fn of_layer(layer: u32) -> Self {
        if layer % 2 == 0 {
            Self::Lower
        } else {
            Self::Upper
        }
    }

    /// Returns the parity (0 for lower, 1 for upper).
    #[inline]
    #[must_use]
    pub const fn parity(self) -> u32 {
        match self {
            Self::Lower => 0,
            Self::Upper => 1,
        }
    }
}

/// Decoded location fields of a packed cell identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellId {
    /// Detector system code.
    pub system: u32,
    /// Detector side.
    pub side: u32,
    /// Physical layer index.
    pub layer: u32,
    /// Azimuthal module index.
    pub module: u32,
    /// Longitudinal sensor index.
    pub sensor: u32,
}

impl CellId {
    /// Creates a new cell ID from its fields.
    #[inline]
    #[must_use]
    pub const fn new(system: u32, side: u32, layer: u32, module: u32, sensor: u32) -> Self {
        Self {
            system,
            side,
            layer,
            module,
            sensor,
        }
    }

    /// Double-layer index (`layer / 2`).
    #[inline]
    #[must_use]
    pub const fn double_layer(&self) -> u32 {
        self.layer / 2
    }

    /// Lower/upper designation within the double layer.
    #[inline]
    #[must_use]
    pub const fn half(&self) -> LayerHalf {
        LayerHalf::of_layer(self.layer)
    }

    fn values(&self) -> [u32; 5] {
        [self.system, self.side, self.layer, self.module, self.sensor]
    }
}

/// Bit layout of the five cell ID fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellIdLayout {
    system: BitField,
    side: BitField,
    layer: BitField,
    module: BitField,
    sensor: BitField,
}

impl Default for CellIdLayout {
    fn default() -> Self {
        Self::standard()
    }
}

impl CellIdLayout {
    /// Encoding string of the standard tracker layout.
    pub const STANDARD_ENCODING: &'static str = "system:5,side:-2,layer:6,module:11,sensor:8";

    /// Creates a layout, rejecting empty, oversized or overlapping fields.
    ///
    /// # Errors
    /// Returns [`DecodeError::FieldRange`] or [`DecodeError::Overlap`].
    pub fn new(
        system: BitField,
        side: BitField,
        layer: BitField,
        module: BitField,
        sensor: BitField,
    ) -> Result<Self, DecodeError> {
        let layout = Self {
            system,
            side,
            layer,
            module,
            sensor,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// The barrel/endcap tracker layout: `system:5,side:2,layer:6,module:11,sensor:8`.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            system: BitField::new(0, 5),
            side: BitField::new(5, 2),
            layer: BitField::new(7, 6),
            module: BitField::new(13, 11),
            sensor: BitField::new(24, 8),
        }
    }

    /// Parses a textual encoding such as `system:5,side:-2,layer:6,module:11,sensor:8`.
    ///
    /// Entries are `name:width` (offset follows the previous entry) or
    /// `name:offset:width`. A leading `-` on the width marks a signed field
    /// in the source encoding; the magnitude is used. Unknown names consume
    /// their bits and are otherwise ignored.
    ///
    /// # Errors
    /// Returns [`DecodeError::InvalidEncoding`] for malformed entries or
    /// missing fields, and the [`CellIdLayout::new`] errors for bad layouts.
    pub fn parse(encoding: &str) -> Result<Self, DecodeError> {
        let mut found: [Option<BitField>; 5] = [None; 5];
        let mut next_offset: u16 = 0;

        for entry in encoding.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let (name, offset, width) = match parts.as_slice() {
                [name, width] => (*name, next_offset, parse_width(entry, width)?),
                [name, offset, width] => {
                    let offset = offset.parse::<u16>().map_err(|_| {
                        DecodeError::InvalidEncoding(format!("bad offset in `{entry}`"))
                    })?;
                    (*name, offset, parse_width(entry, width)?)
                }
                _ => {
                    return Err(DecodeError::InvalidEncoding(format!(
                        "expected `name:width` or `name:offset:width`, got `{entry}`"
                    )))
                }
            };
            next_offset = match offset.checked_add(u16::from(width)) {
                Some(end) if end <= 64 => end,
                _ => {
                    return Err(DecodeError::InvalidEncoding(format!(
                        "`{entry}` runs past bit 63"
                    )))
                }
            };

            if let Some(slot) = FIELD_NAMES.iter().position(|&known| known == name) {
                if found[slot].is_some() {
                    return Err(DecodeError::InvalidEncoding(format!(
                        "field `{name}` appears twice"
                    )));
                }
                // offset <= 63 here since width >= 1 and the end is <= 64
                found[slot] = Some(BitField::new(u8::try_from(offset).unwrap_or(u8::MAX), width));
            }
        }

        let mut fields = [BitField::new(0, 0); 5];
        for (slot, field) in found.iter().enumerate() {
            fields[slot] = field.ok_or_else(|| {
                DecodeError::InvalidEncoding(format!("missing field `{}`", FIELD_NAMES[slot]))
            })?;
        }
        let [system, side, layer, module, sensor] = fields;
        Self::new(system, side, layer, module, sensor)
    }

    /// Returns the fields paired with their names, in layout order.
    #[must_use]
    pub fn fields(&self) -> [(&'static str, BitField); 5] {
        [
            (FIELD_NAMES[0], self.system),
            (FIELD_NAMES[1], self.side),
            (FIELD_NAMES[2], self.layer),
            (FIELD_NAMES[3], self.module),
            (FIELD_NAMES[4], self.sensor),
        ]
    }

    /// Layout of the layer field.
    #[must_use]
    pub const fn layer_field(&self) -> BitField {
        self.layer
    }

    /// Decodes a packed identifier.
    ///
    /// # Errors
    /// Returns [`DecodeError::FieldOverflow`] if a decoded value exceeds its
    /// declared width. This cannot happen for a validated layout.
    pub fn decode(&self, raw: u64) -> Result<CellId, DecodeError> {
        let mut values = [0u32; 5];
        for (slot, (name, field)) in self.fields().into_iter().enumerate() {
            let value = field.extract(raw);
            if value > field.mask() {
                return Err(DecodeError::FieldOverflow {
                    field: name,
                    value,
                    width: field.width,
                });
            }
            values[slot] = u32::try_from(value).map_err(|_| DecodeError::FieldOverflow {
                field: name,
                value,
                width: field.width,
            })?;
        }
        let [system, side, layer, module, sensor] = values;
        Ok(CellId::new(system, side, layer, module, sensor))
    }

    /// Packs the fields of a cell ID.
    ///
    /// # Errors
    /// Returns [`DecodeError::FieldOverflow`] if a value does not fit its field.
    pub fn encode(&self, id: &CellId) -> Result<u64, DecodeError> {
        let mut raw = 0u64;
        for ((name, field), value) in self.fields().into_iter().zip(id.values()) {
            let value = u64::from(value);
            if value > field.mask() {
                return Err(DecodeError::FieldOverflow {
                    field: name,
                    value,
                    width: field.width,
                });
            }
            raw |= value << field.offset;
        }
        Ok(raw)
    }

    /// Largest value each field can hold, in layout order.
    #[must_use]
    pub fn max_values(&self) -> [u32; 5] {
        self.fields()
            .map(|(_, field)| u32::try_from(field.mask()).unwrap_or(u32::MAX))
    }

    fn validate(&self) -> Result<(), DecodeError> {
        let fields = self.fields();
        for (name, field) in fields {
            field.check_range(name)?;
        }
        for (i, &(first, a)) in fields.iter().enumerate() {
            for &(second, b) in &fields[i + 1..] {
                if a.bits() & b.bits() != 0 {
                    return Err(DecodeError::Overlap { first, second });
                }
            }
        }
        Ok(())
    }
}

fn parse_width(entry: &str, width: &str) -> Result<u8, DecodeError> {
    let magnitude = width.strip_prefix('-').unwrap_or(width);
    magnitude
        .parse::<u8>()
        .ok()
        .filter(|w| (1..=MAX_FIELD_WIDTH).contains(w))
        .ok_or_else(|| DecodeError::InvalidEncoding(format!("bad width in `{entry}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_decode() {
        let layout = CellIdLayout::standard();
        let raw = 5 | (1 << 5) | (3 << 7) | (17 << 13) | (15 << 24);
        let id = layout.decode(raw).unwrap();
        assert_eq!(id, CellId::new(5, 1, 3, 17, 15));
        assert_eq!(id.double_layer(), 1);
        assert_eq!(id.half(), LayerHalf::Upper);
    }

    #[test]
    fn test_parse_standard_encoding() {
        let parsed = CellIdLayout::parse(CellIdLayout::STANDARD_ENCODING).unwrap();
        assert_eq!(parsed, CellIdLayout::standard());
    }

    #[test]
    fn test_parse_explicit_offsets_and_unknown_fields() {
        let parsed = CellIdLayout::parse(
            "system:0:5,side:5:-2,layer:7:6,module:13:11,sensor:24:8,strip:32:-16",
        )
        .unwrap();
        assert_eq!(parsed, CellIdLayout::standard());
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let err = CellIdLayout::parse("system:5,side:2,layer:6,module:11").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEncoding(msg) if msg.contains("sensor")));
    }

    #[test]
    fn test_parse_rejects_huge_offset() {
        for encoding in [
            "system:65535:8,side:2,layer:6,module:11,sensor:8",
            "system:60:8,side:2,layer:6,module:11,sensor:8",
        ] {
            assert!(matches!(
                CellIdLayout::parse(encoding),
                Err(DecodeError::InvalidEncoding(_))
            ));
        }
    }

    #[test]
    fn test_overlap_rejected() {
        let err = CellIdLayout::new(
            BitField::new(0, 5),
            BitField::new(4, 2),
            BitField::new(7, 6),
            BitField::new(13, 11),
            BitField::new(24, 8),
        )
        .unwrap_err();
        assert_eq!(
            err,
            DecodeError::Overlap {
                first: "system",
                second: "side"
            }
        );
    }

    #[test]
    fn test_encode_overflow() {
        let layout = CellIdLayout::standard();
        let err = layout.encode(&CellId::new(32, 0, 0, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::FieldOverflow {
                field: "system",
                value: 32,
                width: 5
            }
        ));
    }

    #[test]
    fn test_layer_half() {
        assert_eq!(LayerHalf::of_layer(0), LayerHalf::Lower);
        assert_eq!(LayerHalf::of_layer(7), LayerHalf::Upper);
        assert_eq!(LayerHalf::Upper.parity(), 1);
    }
}
