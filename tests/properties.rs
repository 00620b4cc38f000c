//! Property tests over the wire codecs.

mod common;

use coda::binary::{decode_from_slice, encode_to_vec};
use coda::object::{ObjectRef, Value};
use coda::testing::assert_objects_equal;
use coda::text::{decode_str, encode_to_string};
use proptest::collection::vec;
use proptest::prelude::*;

use common::{create_sample, key, list, sample_schema, set};

proptest! {
    #[test]
    fn scalar_fields_roundtrip(
        flag: bool,
        small in i64::from(i16::MIN)..=i64::from(i16::MAX),
        wide: i64,
        float: f32,
        double: f64,
        text in "[^\\\\]{0,40}",
        bytes in vec(any::<u8>(), 0..64),
    ) {
        let sample = sample_schema();
        let obj = ObjectRef::new(sample.s1);
        obj.set(key(sample.s1, 1), Value::Bool(flag));
        obj.set(key(sample.s1, 2), Value::Integer(small));
        obj.set(key(sample.s1, 4), Value::Integer(wide));
        obj.set(key(sample.s1, 5), Value::Integer(small));
        obj.set(key(sample.s1, 8), Value::Float(float));
        obj.set(key(sample.s1, 9), Value::Double(double));
        obj.set(key(sample.s1, 10), Value::String(text.clone()));
        obj.set(key(sample.s1, 11), Value::Bytes(bytes.clone()));

        let encoded = encode_to_vec(&sample.pool, &obj).unwrap();
        let decoded = decode_from_slice(&sample.pool, &sample.registry, &encoded, sample.s1).unwrap();
        assert_objects_equal(&sample.pool, &obj, &decoded);

        // Re-encoding the decoded value is byte-identical.
        prop_assert_eq!(encoded, encode_to_vec(&sample.pool, &decoded).unwrap());
    }

    #[test]
    fn collections_roundtrip(
        ints in vec(any::<i64>(), 0..32),
        strings in vec("[a-z]{0,8}", 0..16),
    ) {
        let sample = sample_schema();
        let obj = ObjectRef::new(sample.s1);
        obj.set(key(sample.s1, 14), list(ints.iter().map(|&n| Value::Integer(n))));
        obj.set(key(sample.s1, 18), set(ints.iter().map(|&n| Value::Integer(n))));
        obj.set(
            key(sample.s1, 16),
            list(strings.iter().map(|s| Value::String(s.clone()))),
        );

        let encoded = encode_to_vec(&sample.pool, &obj).unwrap();
        let decoded = decode_from_slice(&sample.pool, &sample.registry, &encoded, sample.s1).unwrap();
        assert_objects_equal(&sample.pool, &obj, &decoded);
    }

    #[test]
    fn text_scalars_roundtrip(
        flag: bool,
        wide: i64,
        text in "[a-zA-Z0-9 '\"\\t]{0,32}",
    ) {
        let sample = sample_schema();
        let obj = ObjectRef::new(sample.s1);
        obj.set(key(sample.s1, 1), Value::Bool(flag));
        obj.set(key(sample.s1, 4), Value::Integer(wide));
        obj.set(key(sample.s1, 10), Value::String(text.clone()));

        let encoded = encode_to_string(&sample.pool, &obj).unwrap();
        let decoded = decode_str(&sample.pool, &sample.registry, &encoded, sample.s1).unwrap();
        assert_objects_equal(&sample.pool, &obj, &decoded);
        prop_assert_eq!(encoded, encode_to_string(&sample.pool, &decoded).unwrap());
    }

    #[test]
    fn mutated_streams_never_panic(mutation in vec(any::<(proptest::sample::Index, u8)>(), 1..8)) {
        let sample = sample_schema();
        let source = create_sample(&sample);
        let mut bytes = encode_to_vec(&sample.pool, &source).unwrap();
        for (index, byte) in mutation {
            let ix = index.index(bytes.len());
            bytes[ix] = byte;
        }
        // Corrupt input must fail cleanly, never panic.
        let _ = decode_from_slice(&sample.pool, &sample.registry, &bytes, sample.s2);
    }
}
