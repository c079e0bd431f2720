//! Encoding properties of documents and layers.

use proptest::prelude::*;
use serde_json::{json, Value};

use strata_model::{decode_document, encode_document, BaseSpan, Document, Layer};

fn attribute_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zõäöü]{0,8}".prop_map(Value::String),
        any::<i32>().prop_map(|v| json!(v)),
        any::<bool>().prop_map(Value::Bool),
        Just(Value::Null),
        proptest::collection::vec("[a-z]{1,4}", 0..3).prop_map(|v| json!(v)),
    ]
}

fn document() -> impl Strategy<Value = Document> {
    (
        proptest::collection::vec("[A-Za-z]{1,6}", 1..8),
        proptest::collection::vec((attribute_value(), attribute_value()), 8),
        proptest::collection::btree_map("[a-z]{1,5}", attribute_value(), 0..4),
        any::<bool>(),
    )
        .prop_map(|(tokens, values, meta, with_sentences)| {
            let text = tokens.join(" ");
            let mut words = Layer::builder("words")
                .attributes(["normal", "extra"])
                .build()
                .unwrap();
            let mut offset = 0;
            let mut bases = Vec::new();
            for (i, token) in tokens.iter().enumerate() {
                let len = token.chars().count();
                let (normal, extra) = values[i % values.len()].clone();
                words
                    .add_annotation((offset, offset + len), [("normal", normal), ("extra", extra)])
                    .unwrap();
                bases.push(BaseSpan::new(offset, offset + len));
                offset += len + 1;
            }

            let mut document = Document::new(text);
            for (key, value) in meta {
                document.meta_mut().insert(key, value);
            }
            document.add_layer(words).unwrap();

            if with_sentences {
                let mut sentences = Layer::builder("sentences").enveloping("words").build().unwrap();
                sentences
                    .add_annotation(BaseSpan::Enveloping(bases), Vec::<(&str, Value)>::new())
                    .unwrap();
                document.add_layer(sentences).unwrap();
            }
            document
        })
}

proptest! {
    #[test]
    fn test_encode_decode_encode_is_byte_identical(document in document()) {
        let first = encode_document(&document).unwrap();
        let decoded = decode_document(&first).unwrap();
        let second = encode_document(&decoded).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(decoded, document);
    }

    #[test]
    fn test_layer_order_survives_decoding(document in document()) {
        let decoded = decode_document(&encode_document(&document).unwrap()).unwrap();
        prop_assert_eq!(decoded.layer_names(), document.layer_names());
    }
}

#[test]
fn test_decode_rejects_layer_before_its_dependency() {
    let text = r#"{"text":"a","meta":{},"layers":[
        {"name":"sentences","attributes":[],"ambiguous":false,"parent":null,
         "enveloping":"words","meta":{},"spans":[]}]}"#;
    assert!(decode_document(text).is_err());
}
