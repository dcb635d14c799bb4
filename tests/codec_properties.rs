use proptest::prelude::*;
use tuyadp::codec::{decode, encode, encode_uint};
use tuyadp::protocol::{FRAME_HEADER_LEN, build_frame, parse_frame, parse_report};
use tuyadp::{Bitmap, DpType, DpValue, EncodeOptions, Endian};

fn round_trip(value: &DpValue, options: &EncodeOptions) -> DpValue {
    let t = value.dp_type();
    let bytes = encode(value, t, options).unwrap();
    decode(&bytes, t, options).unwrap()
}

proptest! {
    #[test]
    fn value_round_trips_in_four_bytes(v in 0u32..=u32::MAX) {
        let value = DpValue::Value(i64::from(v));
        let bytes = encode(&value, DpType::Value, &EncodeOptions::width(1)).unwrap();
        prop_assert_eq!(bytes.len(), 4);
        prop_assert_eq!(round_trip(&value, &EncodeOptions::default()), value);
    }

    #[test]
    fn bool_enum_and_raw_round_trip(b in any::<bool>(), e in 0u8..=255, raw in proptest::collection::vec(any::<u8>(), 0..64)) {
        let opts = EncodeOptions::default();
        prop_assert_eq!(round_trip(&DpValue::Bool(b), &opts), DpValue::Bool(b));
        prop_assert_eq!(round_trip(&DpValue::Enum(i64::from(e)), &opts), DpValue::Enum(i64::from(e)));
        prop_assert_eq!(round_trip(&DpValue::Raw(raw.clone()), &opts), DpValue::Raw(raw));
    }

    #[test]
    fn string_round_trips(s in "[a-zA-Z0-9 °äöü_-]{0,40}") {
        let value = DpValue::String(s);
        prop_assert_eq!(round_trip(&value, &EncodeOptions::default()), value);
    }

    #[test]
    fn bitmap_round_trips_either_endian(bytes in proptest::collection::vec(any::<u8>(), 0..24), little in any::<bool>()) {
        let value = DpValue::Bitmap(Bitmap::from_be_bytes(&bytes));
        let opts = if little { EncodeOptions::default().little_endian() } else { EncodeOptions::default() };
        prop_assert_eq!(opts.endian == Endian::Little, little);
        prop_assert_eq!(round_trip(&value, &opts), value);
    }

    #[test]
    fn encoding_masks_instead_of_failing(n in any::<u64>(), width in 1usize..=8) {
        let shift = 8 * width as u32;
        let masked = if shift >= 64 { n } else { n & ((1u64 << shift) - 1) };
        prop_assert_eq!(encode_uint(n, width, Endian::Big), encode_uint(masked, width, Endian::Big));
    }

    #[test]
    fn frame_invariant(dp in any::<u8>(), tag in 0u8..=5, payload in proptest::collection::vec(any::<u8>(), 0..300)) {
        let t = DpType::from_u8(tag).unwrap();
        let frame = build_frame(dp, t, &payload).unwrap();
        prop_assert_eq!(frame.len(), FRAME_HEADER_LEN + payload.len());
        let parsed = parse_frame(&frame).unwrap();
        prop_assert_eq!(parsed.dp, dp);
        prop_assert_eq!(parsed.dp_type, t);
        prop_assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn arbitrary_input_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let _ = parse_frame(&bytes);
        let _ = parse_report(&bytes);
        for t in DpType::ALL {
            let _ = decode(&bytes, *t, &EncodeOptions::default());
        }
    }
}
