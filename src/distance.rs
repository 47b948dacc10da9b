/// Distance helpers shared by every task's decision rule.
/// All trial decisions are made on plain Euclidean distances between raw
/// feature vectors; vector magnitudes are never normalized here.

use ndarray::ArrayView1;

/// Euclidean (L2) distance between two feature vectors of equal length.
/// Returns None when the lengths differ; the caller knows which image to blame.
pub fn euclidean_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Option<f32>
{
    if a.len() != b.len() {
        return None;
    }
    let diff = &a - &b;
    Some(diff.dot(&diff).sqrt())
}

/// Min-max normalizes a batch of distances into [0, 1].
///
/// When every distance in the batch is equal there is no spread to normalize over;
/// every value maps to 0.0 and the caller is expected to log it.
pub fn normalize_min_max(distances: &[f32]) -> Vec<f32>
{
    let min = distances.iter().copied().fold(f32::INFINITY, f32::min);
    let max = distances.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let spread = max - min;
    if !(spread > 0.0) {
        return vec![0.0; distances.len()];
    }
    distances.iter().map(|d| (d - min) / spread).collect()
}

/// Returns true if min-max normalization of the batch would be degenerate.
pub fn is_degenerate(distances: &[f32]) -> bool
{
    match distances.split_first() {
        Some((first, rest)) => rest.iter().all(|d| d == first),
        None => false,
    }
}

#[cfg(test)]
mod tests
{
    use approx::assert_relative_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn euclidean_distance_of_known_vectors()
    {
        let a = array![0.0f32, 0.0, 0.0];
        let b = array![3.0f32, 4.0, 0.0];
        assert_relative_eq!(euclidean_distance(a.view(), b.view()).unwrap(), 5.0);
        assert_relative_eq!(euclidean_distance(b.view(), b.view()).unwrap(), 0.0);
    }

    #[test]
    fn euclidean_distance_rejects_mismatched_lengths()
    {
        let a = array![1.0f32, 2.0];
        let b = array![1.0f32, 2.0, 3.0];
        assert!(euclidean_distance(a.view(), b.view()).is_none());
    }

    #[test]
    fn normalizes_batch_to_unit_range()
    {
        let normalized = normalize_min_max(&[0.1, 0.4, 0.9]);
        assert_eq!(normalized.len(), 3);
        assert_relative_eq!(normalized[0], 0.0);
        assert_relative_eq!(normalized[1], 0.375, epsilon = 1e-6);
        assert_relative_eq!(normalized[2], 1.0);
    }

    #[test]
    fn degenerate_batch_normalizes_to_zero()
    {
        assert!(is_degenerate(&[0.7, 0.7]));
        assert_eq!(normalize_min_max(&[0.7, 0.7]), vec![0.0, 0.0]);
        assert!(normalize_min_max(&[]).is_empty());
        assert!(!is_degenerate(&[]));
    }
}
