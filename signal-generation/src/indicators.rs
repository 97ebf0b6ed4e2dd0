//! Windowed arithmetic over price and volume columns.

/// Trailing simple moving average; `None` until `window` values are available
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }

    let mut sum = 0.0;
    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            out[i] = Some(sum / window as f64);
        }
    }
    out
}

/// Percent change versus the value `periods` rows earlier (5.0 = +5%)
pub fn pct_change(values: &[f64], periods: usize) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            if periods == 0 || i < periods {
                return None;
            }
            let prev = values[i - periods];
            if prev == 0.0 {
                None
            } else {
                Some((value / prev - 1.0) * 100.0)
            }
        })
        .collect()
}

/// Mean over the present values, `None` when there are none
pub fn mean_present(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_mean_undefined_until_window_full() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = rolling_mean(&values, 3);
        assert_eq!(sma, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);

        assert!(rolling_mean(&values, 6).iter().all(Option::is_none));
    }

    #[test]
    fn test_pct_change() {
        let values = [100.0, 110.0, 0.0, 121.0];
        let change = pct_change(&values, 1);
        assert_eq!(change[0], None);
        assert!((change[1].unwrap() - 10.0).abs() < 1e-9);
        assert!((change[2].unwrap() + 100.0).abs() < 1e-9);
        assert_eq!(change[3], None); // previous value is zero
    }

    #[test]
    fn test_mean_present_skips_missing() {
        assert_eq!(mean_present(&[Some(2.0), None, Some(4.0)]), Some(3.0));
        assert_eq!(mean_present(&[None, None]), None);
    }
}
