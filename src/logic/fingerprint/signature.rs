//! Signature Quantization & Scoring
//!
//! Deterministic helpers shared by the store and the federation client.

use sha2::{Digest, Sha256};

use super::types::{Signature, SignatureBucket};
use crate::constants::{
    HIGH_BUCKET_THRESHOLD, MED_BUCKET_THRESHOLD, OBSERVATION_SATURATION, OBSERVATION_WEIGHT,
    RECENCY_HORIZON_DAYS, RECENCY_WEIGHT, SIGNATURE_DIMENSIONS, SOURCE_SATURATION, SOURCE_WEIGHT,
};

/// Bucket the first ten feature dimensions
pub fn quantize(features: &[f64]) -> Signature {
    features
        .iter()
        .take(SIGNATURE_DIMENSIONS)
        .map(|&v| bucket(v))
        .collect()
}

fn bucket(value: f64) -> SignatureBucket {
    if value > HIGH_BUCKET_THRESHOLD {
        SignatureBucket::High
    } else if value > MED_BUCKET_THRESHOLD {
        SignatureBucket::Med
    } else {
        SignatureBucket::Low
    }
}

/// Stable id: first 16 hex chars of SHA-256 over the sorted-key JSON
/// `{"sig": [...], "type": ...}`, byte-compatible with other participants.
///
/// Non-ASCII characters are written as `\uXXXX` escapes (UTF-16 surrogate
/// pairs above the BMP) so ids agree with ASCII-only JSON encoders.
pub fn fingerprint_id(pattern_type: &str, signature: &[SignatureBucket]) -> String {
    let sig = signature
        .iter()
        .map(|b| format!("\"{}\"", b.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let canonical = format!(
        "{{\"sig\": [{}], \"type\": {}}}",
        sig,
        ascii_json_string(pattern_type)
    );

    let digest = Sha256::digest(canonical.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(16);
    id
}

/// Quoted JSON string using only printable ASCII
fn ascii_json_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
        }
    }
    out.push('"');
    out
}

/// Fraction of matching positions; signatures of different length never match
pub fn similarity(a: &[SignatureBucket], b: &[SignatureBucket]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let matches = a.iter().zip(b).filter(|(x, y)| x == y).count();
    matches as f64 / a.len() as f64
}

/// Confidence from prevalence and recency, always in [0, 1]
pub fn compute_confidence(observation_count: u64, source_count: u32, age_days: i64) -> f64 {
    let obs_factor = (observation_count as f64 / OBSERVATION_SATURATION).min(1.0);
    let source_factor = (source_count as f64 / SOURCE_SATURATION).min(1.0);
    let recency_factor = (1.0 - age_days as f64 / RECENCY_HORIZON_DAYS).clamp(0.0, 1.0);

    OBSERVATION_WEIGHT * obs_factor + SOURCE_WEIGHT * source_factor + RECENCY_WEIGHT * recency_factor
}

/// Keep only a three-char prefix of a source identifier
pub fn anonymize_source(source_id: &str) -> String {
    let prefix: String = source_id.chars().take(3).collect();
    format!("{}***", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use SignatureBucket::*;

    #[test]
    fn test_quantize_buckets() {
        let sig = quantize(&[0.9, 0.5, 0.1, 0.7, 0.3, 0.71, 0.31, 0.0, 1.0, 0.2, 0.95, 0.95]);
        assert_eq!(sig.len(), 10);
        assert_eq!(sig, vec![High, Med, Low, Med, Low, High, Med, Low, High, Low]);

        // Short vectors keep their length
        assert_eq!(quantize(&[0.8, 0.4]), vec![High, Med]);
    }

    #[test]
    fn test_fingerprint_id_is_deterministic() {
        let sig = vec![High, Low, Med];
        let id = fingerprint_id("high_risk", &sig);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, fingerprint_id("high_risk", &sig));
        assert_ne!(id, fingerprint_id("lateral_movement", &sig));
        assert_ne!(id, fingerprint_id("high_risk", &[High, Low, Low]));
    }

    #[test]
    fn test_fingerprint_id_canonical_form() {
        let canonical = "{\"sig\": [\"high\", \"low\"], \"type\": \"x\"}";
        let mut expected = hex::encode(Sha256::digest(canonical.as_bytes()));
        expected.truncate(16);
        assert_eq!(fingerprint_id("x", &[High, Low]), expected);
    }

    #[test]
    fn test_fingerprint_id_escapes_non_ascii() {
        assert_eq!(
            ascii_json_string("\u{e9}num\u{e9}ration"),
            "\"\\u00e9num\\u00e9ration\""
        );
        assert_eq!(ascii_json_string("tool \u{1F600}"), "\"tool \\ud83d\\ude00\"");
        assert_eq!(ascii_json_string("tab\there\u{7f}"), "\"tab\\there\\u007f\"");
        assert_eq!(ascii_json_string("say \"hi\" \\"), "\"say \\\"hi\\\" \\\\\"");

        // Ids computed by an ASCII-only JSON encoder over the same record
        assert_eq!(fingerprint_id("\u{e9}num\u{e9}ration", &[High, Low]), "10f033d438412e09");
        assert_eq!(fingerprint_id("tool \u{1F600}", &[High, Low]), "61265846782a4300");
        assert_eq!(fingerprint_id("tab\there\u{7f}", &[High, Low]), "56deaa4f1bbd0b9b");
        assert_eq!(fingerprint_id("high_risk", &[High, Low]), "a16a7137800bc6c5");
    }

    #[test]
    fn test_similarity() {
        let a = vec![Low; 10];
        let mut b = a.clone();
        b[0] = High;
        assert!((similarity(&a, &b) - 0.9).abs() < 1e-12);
        assert_eq!(similarity(&a, &a), 1.0);
        assert_eq!(similarity(&a, &a[..5]), 0.0);
    }

    #[test]
    fn test_confidence_bounds() {
        for &obs in &[0u64, 1, 50, 100, 10_000] {
            for &src in &[0u32, 1, 5, 10, 1000] {
                for &age in &[-5i64, 0, 100, 365, 5000] {
                    let c = compute_confidence(obs, src, age);
                    assert!((0.0..=1.0).contains(&c), "{} {} {} -> {}", obs, src, age, c);
                }
            }
        }
        assert!((compute_confidence(100, 10, 0) - 1.0).abs() < 1e-12);
        assert!((compute_confidence(2, 2, 0) - (0.3 * 0.02 + 0.5 * 0.2 + 0.2)).abs() < 1e-12);
    }

    #[test]
    fn test_anonymize_source() {
        assert_eq!(anonymize_source("org-123"), "org***");
        assert_eq!(anonymize_source("ab"), "ab***");
    }
}
