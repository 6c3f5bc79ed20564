//! Property tests for the cell ID codec.

use proptest::prelude::*;
use tracklet_core::{BitField, CellId, CellIdLayout};

fn standard_cell() -> impl Strategy<Value = CellId> {
    (0u32..32, 0u32..4, 0u32..64, 0u32..2048, 0u32..256)
        .prop_map(|(system, side, layer, module, sensor)| {
            CellId::new(system, side, layer, module, sensor)
        })
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(cell in standard_cell()) {
        let layout = CellIdLayout::standard();
        let raw = layout.encode(&cell).unwrap();
        prop_assert_eq!(layout.decode(raw).unwrap(), cell);
    }

    #[test]
    fn prop_decode_ignores_unused_high_bits(cell in standard_cell(), high in any::<u32>()) {
        let layout = CellIdLayout::standard();
        let raw = layout.encode(&cell).unwrap() | (u64::from(high) << 32);
        prop_assert_eq!(layout.decode(raw).unwrap(), cell);
    }

    #[test]
    fn prop_encode_decode_is_identity_on_field_bits(raw in any::<u32>()) {
        let layout = CellIdLayout::standard();
        let cell = layout.decode(u64::from(raw)).unwrap();
        prop_assert_eq!(layout.encode(&cell).unwrap(), u64::from(raw));
    }

    #[test]
    fn prop_custom_layout_roundtrip(
        widths in proptest::array::uniform5(1u8..=8),
        values in proptest::array::uniform5(any::<u32>()),
    ) {
        let mut offset = 0u8;
        let mut fields = [BitField::new(0, 1); 5];
        for (field, width) in fields.iter_mut().zip(widths) {
            *field = BitField::new(offset, width);
            offset += width;
        }
        let [system, side, layer, module, sensor] = fields;
        let layout = CellIdLayout::new(system, side, layer, module, sensor).unwrap();

        let max = layout.max_values();
        let cell = CellId::new(
            values[0] % (max[0] + 1),
            values[1] % (max[1] + 1),
            values[2] % (max[2] + 1),
            values[3] % (max[3] + 1),
            values[4] % (max[4] + 1),
        );
        let raw = layout.encode(&cell).unwrap();
        prop_assert_eq!(layout.decode(raw).unwrap(), cell);
    }
}

#[test]
fn test_encode_order_preserving_within_field() {
    let layout = CellIdLayout::standard();
    let low = layout.encode(&CellId::new(3, 0, 0, 10, 0)).unwrap();
    let high = layout.encode(&CellId::new(3, 0, 0, 11, 0)).unwrap();
    assert!(low < high);
}
