//! Cross-Entropy Loss
//!
//! Softmax cross-entropy between one step of decoder logits and the target
//! tokens, averaged over the rows that count.
//!
//! ```text
//! loss      = -(1/n) Σ_b log softmax(logits[b])[target[b]]
//! d_logits  = (softmax(logits) - onehot(target)) / n
//! ```
//!
//! Without masking every row counts, `<PAD>` targets included. With masking,
//! rows whose target is `<PAD>` contribute neither loss nor gradient and `n`
//! is the number of remaining rows.

use crate::tensor::Tensor;
use crate::vocab::PAD;

/// Loss and logits gradient for one decoder step
///
/// # Returns
///
/// `(mean loss, d_logits)`; if masking leaves no rows, `(0.0, zeros)`.
pub fn cross_entropy(logits: &Tensor, targets: &[usize], mask_padding: bool) -> (f32, Tensor) {
    assert_eq!(
        logits.rows(),
        targets.len(),
        "{} logit rows for {} targets",
        logits.rows(),
        targets.len()
    );
    let vocab = logits.cols();
    let counted = targets
        .iter()
        .filter(|&&t| !(mask_padding && t == PAD))
        .count();

    if counted == 0 {
        return (0.0, Tensor::zeros(logits.shape.clone()));
    }

    let mut grad = logits.softmax_rows();
    let log_probs = logits.log_softmax_rows();
    let scale = 1.0 / counted as f32;
    let mut loss = 0.0;
    for (b, &target) in targets.iter().enumerate() {
        let row = &mut grad.data[b * vocab..(b + 1) * vocab];
        if mask_padding && target == PAD {
            row.iter_mut().for_each(|g| *g = 0.0);
            continue;
        }
        loss -= log_probs.data[b * vocab + target];
        row[target] -= 1.0;
        row.iter_mut().for_each(|g| *g *= scale);
    }

    (loss * scale, grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_logits() {
        let logits = Tensor::zeros(vec![2, 4]);
        let (loss, grad) = cross_entropy(&logits, &[1, 3], false);
        assert!((loss - 4.0f32.ln()).abs() < 1e-6);
        assert!((grad.data[1] - (0.25 - 1.0) / 2.0).abs() < 1e-6);
        assert!((grad.data[0] - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let logits = Tensor::new(vec![0.3, -1.2, 2.0, 0.5, 0.1, 0.0], vec![2, 3]);
        let targets = [2, 0];
        let (_, grad) = cross_entropy(&logits, &targets, false);
        let eps = 1e-3;
        for i in 0..6 {
            let mut plus = logits.clone();
            plus.data[i] += eps;
            let mut minus = logits.clone();
            minus.data[i] -= eps;
            let numeric =
                (cross_entropy(&plus, &targets, false).0 - cross_entropy(&minus, &targets, false).0) / (2.0 * eps);
            assert!((numeric - grad.data[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_masking_ignores_pad_rows() {
        let logits = Tensor::new(vec![1.0, 2.0, 0.5, 0.0, 0.0, 9.0], vec![2, 3]);
        let (masked, grad) = cross_entropy(&logits, &[1, PAD], true);
        let (single, _) = cross_entropy(&logits.row(0), &[1], false);
        assert!((masked - single).abs() < 1e-6);
        assert!(grad.data[3..].iter().all(|&g| g == 0.0));

        // Unmasked, the PAD row counts as a target of id 0.
        let (unmasked, _) = cross_entropy(&logits, &[1, PAD], false);
        assert!(unmasked > masked);
    }

    #[test]
    fn test_all_padding_is_zero() {
        let logits = Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]);
        let (loss, grad) = cross_entropy(&logits, &[PAD], true);
        assert_eq!(loss, 0.0);
        assert!(grad.data.iter().all(|&g| g == 0.0));
    }
}
