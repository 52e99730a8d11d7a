//! Summary and rolling statistics over `f64` samples.

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator); `None` below two samples.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Running cumulative sum.
pub fn cumulative_sum(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

/// Running maximum.
pub fn running_max(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(f64::NEG_INFINITY, |peak, v| {
            *peak = peak.max(*v);
            Some(*peak)
        })
        .collect()
}

/// Rolling mean over a trailing window; `None` until the window is full.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, mean)
}

/// Rolling sample standard deviation; `None` until the window is full.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, sample_std)
}

fn rolling(values: &[f64], window: usize, f: fn(&[f64]) -> Option<f64>) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                None
            } else {
                f(&values[i + 1 - window..=i])
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));

        assert_eq!(sample_std(&[5.0]), None);
        assert_eq!(sample_std(&[2.0, 2.0, 2.0]), Some(0.0));
        // Sample variance of 1,2,3,4 is 5/3.
        let std = sample_std(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((std - (5.0_f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_cumulative_and_running_max() {
        let cum = cumulative_sum(&[1.0, -2.0, 3.0]);
        assert_eq!(cum, vec![1.0, -1.0, 2.0]);
        assert_eq!(running_max(&cum), vec![1.0, 1.0, 2.0]);
        assert!(running_max(&[]).is_empty());
    }

    #[test]
    fn test_rolling_windows() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            rolling_mean(&values, 2),
            vec![None, Some(1.5), Some(2.5), Some(3.5)]
        );

        let stds = rolling_std(&values, 3);
        assert_eq!(stds[0], None);
        assert_eq!(stds[1], None);
        assert_eq!(stds[2], Some(1.0));
        assert_eq!(stds[3], Some(1.0));

        // A one-sample window has no sample deviation.
        assert!(rolling_std(&values, 1).iter().all(Option::is_none));
        assert!(rolling_mean(&values, 0).iter().all(Option::is_none));
    }
}
