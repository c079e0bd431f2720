//! N-gram fingerprints of layer attributes.
//!
//! A fingerprint lists every run of 1 to `n` consecutive spans, taking
//! each combination of the distinct values the spans' annotations carry.
//! Gram tokens are joined with `-`.

use std::collections::BTreeSet;

use strata_common::constants::NGRAM_SEPARATOR;
use strata_common::error::{StrataError, StrataResult};

use crate::layer::{value_key, Layer};

/// Returns the sorted, distinct n-grams of `attribute` for gram sizes `1..=n`.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use strata_model::{ngram_fingerprint, Layer};
///
/// let mut layer = Layer::builder("morph").attributes(["lemma"]).build().unwrap();
/// layer.add_annotation((0, 3), [("lemma", json!("mis"))]).unwrap();
/// layer.add_annotation((4, 8), [("lemma", json!("kell"))]).unwrap();
/// assert_eq!(
///     ngram_fingerprint(&layer, "lemma", 2).unwrap(),
///     vec!["kell", "mis", "mis-kell"]
/// );
/// ```
pub fn ngram_fingerprint(layer: &Layer, attribute: &str, n: usize) -> StrataResult<Vec<String>> {
    if n == 0 {
        return Err(StrataError::invalid_argument("n-gram size must be at least 1"));
    }
    let position = layer.attributes().position(attribute).ok_or_else(|| {
        StrataError::invalid_argument(format!(
            "layer '{}' has no attribute '{attribute}'",
            layer.name()
        ))
    })?;

    let per_span: Vec<Vec<String>> = layer
        .spans()
        .iter()
        .map(|span| {
            let distinct: BTreeSet<String> = span
                .annotations()
                .iter()
                .filter_map(|a| a.get(position))
                .map(value_key)
                .collect();
            distinct.into_iter().collect()
        })
        .collect();

    let mut grams = BTreeSet::new();
    for size in 1..=n {
        for window in per_span.windows(size) {
            let mut partial: Vec<String> = vec![String::new()];
            for (i, values) in window.iter().enumerate() {
                let mut next = Vec::with_capacity(partial.len() * values.len());
                for prefix in &partial {
                    for value in values {
                        if i == 0 {
                            next.push(value.clone());
                        } else {
                            next.push(format!("{prefix}{NGRAM_SEPARATOR}{value}"));
                        }
                    }
                }
                partial = next;
            }
            grams.extend(partial);
        }
    }
    Ok(grams.into_iter().collect())
}

/// Joins gram tokens the way fingerprints store them.
#[must_use]
pub fn ngram_key<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(NGRAM_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pos_layer(tags: &[&[&str]]) -> Layer {
        let mut layer = Layer::builder("morph")
            .attributes(["pos"])
            .ambiguous(true)
            .build()
            .unwrap();
        for (i, values) in tags.iter().enumerate() {
            for value in *values {
                layer.add_annotation((i * 2, i * 2 + 1), [("pos", json!(value))]).unwrap();
            }
        }
        layer
    }

    #[test]
    fn test_ambiguous_combinations() {
        let layer = pos_layer(&[&["P", "P"], &["S"], &["V", "V"], &["Z"]]);
        let grams = ngram_fingerprint(&layer, "pos", 3).unwrap();
        assert!(grams.contains(&"P-S-V".to_string()));
        assert!(grams.contains(&"S-V".to_string()));
        assert!(!grams.contains(&"P-V".to_string()));
        assert_eq!(grams.iter().filter(|g| *g == "P").count(), 1);
    }

    #[test]
    fn test_several_values_per_span() {
        let layer = pos_layer(&[&["H", "S"], &["V"]]);
        let grams = ngram_fingerprint(&layer, "pos", 2).unwrap();
        assert_eq!(grams, vec!["H", "H-V", "S", "S-V", "V"]);
    }

    #[test]
    fn test_invalid_arguments() {
        let layer = pos_layer(&[&["S"]]);
        assert!(ngram_fingerprint(&layer, "pos", 0).is_err());
        assert!(ngram_fingerprint(&layer, "lemma", 2).is_err());
    }

    #[test]
    fn test_ngram_key() {
        assert_eq!(ngram_key(&["otsas", "."]), "otsas-.");
        assert_eq!(ngram_key(&["mis"]), "mis");
    }
}
