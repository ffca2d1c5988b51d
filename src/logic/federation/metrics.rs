//! Local evaluation metrics reported with each update

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use super::model::LocalModel;

/// `accuracy` from the model's own scoring, `auc_roc` when probabilities exist
pub fn evaluate<M: LocalModel + ?Sized>(
    model: &M,
    features: &Array2<f64>,
    labels: &Array1<f64>,
) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    metrics.insert("accuracy".to_string(), model.score(features, labels));

    if let Some(auc) = model
        .predict_proba(features)
        .and_then(|scores| auc_roc(labels, &scores))
    {
        metrics.insert("auc_roc".to_string(), auc);
    }
    metrics
}

/// Rank-based ROC AUC (Mann-Whitney U), ties get their average rank
///
/// `None` when only one class is present or the lengths differ.
pub fn auc_roc(labels: &Array1<f64>, scores: &Array1<f64>) -> Option<f64> {
    if labels.len() != scores.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; tied block [start, end) shares the mean
        let avg_rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg_rank;
        }
        start = end;
    }

    let positives = labels.iter().filter(|&&y| y == 1.0).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(&y, _)| y == 1.0)
        .map(|(_, &r)| r)
        .sum();

    let n_pos = positives as f64;
    let u = positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * negatives as f64))
}
