//! Content-addressed screen identity.
//!
//! A screen is summarized as a short hash over its UI elements, stable
//! across pixel-level noise: positions are quantized to 10-pixel cells and
//! texts are lowercased and trimmed before hashing.

use sha2::{Digest, Sha256};

use crate::element::UIElement;

/// Quantization cell size in pixels. Absorbs subpixel and anti-alias jitter.
const POSITION_QUANTUM: f64 = 10.0;

/// Number of hex characters kept from the SHA-256 digest. 64 bits of
/// collision resistance traded for graph-key brevity.
const HASH_LEN: usize = 16;

type NormalizedElement = (String, String, Option<(i64, i64, i64, i64)>);

fn quantize(value: f64) -> i64 {
    ((value / POSITION_QUANTUM).floor() as i64) * POSITION_QUANTUM as i64
}

fn normalize(element: &UIElement) -> NormalizedElement {
    let text = element
        .text
        .as_deref()
        .map(|t| t.trim().to_lowercase())
        .unwrap_or_default();
    let position = element
        .bounds
        .map(|b| (quantize(b.x), quantize(b.y), quantize(b.width), quantize(b.height)));
    (element.kind.as_str().to_string(), text, position)
}

/// Stable 16-hex-char hash over an element set. Pure function of the input:
/// element order does not matter, and any bbox perturbation smaller than the
/// quantization cell maps to the same hash.
pub fn hash_elements(elements: &[UIElement]) -> String {
    let mut normalized: Vec<NormalizedElement> = elements.iter().map(normalize).collect();
    // Null positions sort before present positions (Option ordering).
    normalized.sort();

    let joined = normalized
        .iter()
        .map(|(kind, text, position)| {
            let position = match position {
                Some((x, y, w, h)) => format!("{x},{y},{w},{h}"),
                None => "none".to_string(),
            };
            format!("{kind}:{text}:{position}")
        })
        .collect::<Vec<_>>()
        .join("|");

    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest)[..HASH_LEN].to_string()
}

/// Jaccard similarity over lowercased non-empty element texts. Supports
/// fuzzy node matching; not part of the identity hash.
pub fn similarity(a: &[UIElement], b: &[UIElement]) -> f64 {
    let texts = |elements: &[UIElement]| {
        elements
            .iter()
            .filter_map(|e| e.text.as_deref())
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect::<std::collections::HashSet<_>>()
    };

    let set_a = texts(a);
    let set_b = texts(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Bounds, ElementKind};

    fn button(text: &str, x: f64, y: f64) -> UIElement {
        UIElement::new(ElementKind::Button)
            .with_text(text)
            .with_bounds(Bounds::new(x, y, 80.0, 24.0))
    }

    #[test]
    fn hash_is_order_independent() {
        let a = vec![button("OK", 100.0, 200.0), button("Cancel", 300.0, 200.0)];
        let b = vec![button("Cancel", 300.0, 200.0), button("OK", 100.0, 200.0)];
        assert_eq!(hash_elements(&a), hash_elements(&b));
    }

    #[test]
    fn hash_absorbs_subquantum_jitter() {
        let a = vec![button("OK", 100.0, 200.0)];
        let b = vec![button("OK", 103.0, 207.9)];
        assert_eq!(hash_elements(&a), hash_elements(&b));

        let c = vec![button("OK", 110.0, 200.0)];
        assert_ne!(hash_elements(&a), hash_elements(&c));
    }

    #[test]
    fn hash_normalizes_text_case_and_whitespace() {
        let a = vec![button("Display  ", 0.0, 0.0)];
        let b = vec![button("display", 0.0, 0.0)];
        assert_eq!(hash_elements(&a), hash_elements(&b));
    }

    #[test]
    fn hash_distinguishes_missing_position() {
        let a = vec![UIElement::text_element("OK")];
        let b = vec![button("OK", 0.0, 0.0)];
        assert_ne!(hash_elements(&a), hash_elements(&b));
    }

    #[test]
    fn hash_resists_delimiter_injection() {
        let a = vec![
            UIElement::text_element("a|b"),
            UIElement::text_element("c"),
        ];
        let b = vec![
            UIElement::text_element("a"),
            UIElement::text_element("b|c"),
        ];
        assert_ne!(hash_elements(&a), hash_elements(&b));
    }

    #[test]
    fn hash_handles_negative_coordinates() {
        let a = vec![button("OK", -15.0, -3.0)];
        let b = vec![button("OK", -11.0, -0.5)];
        // Both floor into the same (-20, -10) cell.
        assert_eq!(hash_elements(&a), hash_elements(&b));
    }

    #[test]
    fn similarity_over_texts() {
        let a = vec![
            UIElement::text_element("File"),
            UIElement::text_element("Edit"),
            UIElement::text_element("View"),
        ];
        let b = vec![
            UIElement::text_element("file"),
            UIElement::text_element("Edit"),
            UIElement::text_element("Help"),
        ];
        let s = similarity(&a, &b);
        assert!((s - 0.5).abs() < f64::EPSILON);

        assert!((similarity(&[], &[]) - 1.0).abs() < f64::EPSILON);
        assert!((similarity(&a, &[]) - 0.0).abs() < f64::EPSILON);
    }
}
