//! Band-limited resampling with a Lanczos-windowed sinc kernel.
//!
//! Output sample `i` sits at input position `i * len / new_len`. When
//! shrinking, the kernel is stretched so its cutoff falls at the new Nyquist
//! frequency, which suppresses aliasing.

use std::f64::consts::PI;

/// Number of sinc lobes on each side of the kernel centre.
const LOBES: f64 = 8.0;

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

fn lanczos(t: f64) -> f64 {
    if t.abs() >= LOBES {
        0.0
    } else {
        sinc(t) * sinc(t / LOBES)
    }
}

/// Resamples `samples` to `new_len` points.
///
/// Weights are normalised per output sample, so a constant signal stays
/// constant up to the edges.
pub fn resample(samples: &[f64], new_len: usize) -> Vec<f64> {
    let len = samples.len();
    if new_len == len {
        return samples.to_vec();
    }
    if len == 0 || new_len == 0 {
        return vec![0.0; new_len];
    }

    let step = len as f64 / new_len as f64;
    let cutoff = (1.0 / step).min(1.0);
    let radius = (LOBES / cutoff).ceil() as isize;

    (0..new_len)
        .map(|i| {
            let x = i as f64 * step;
            let centre = x.floor() as isize;
            let lo = (centre - radius).max(0) as usize;
            let hi = ((centre + radius) as usize).min(len - 1);

            let mut acc = 0.0;
            let mut norm = 0.0;
            for (k, &s) in samples.iter().enumerate().take(hi + 1).skip(lo) {
                let w = lanczos((x - k as f64) * cutoff);
                acc += s * w;
                norm += w;
            }
            if norm == 0.0 {
                0.0
            } else {
                acc / norm
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_length() {
        let x: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert_eq!(resample(&x, 33).len(), 33);
        assert_eq!(resample(&x, 250).len(), 250);
        assert!(resample(&x, 0).is_empty());
        assert!(resample(&[], 0).is_empty());
    }

    #[test]
    fn test_same_length_is_identity() {
        let x = vec![1.0, -2.0, 3.5];
        assert_eq!(resample(&x, 3), x);
    }

    #[test]
    fn test_constant_signal_stays_constant() {
        let x = vec![4.25; 1000];
        for y in resample(&x, 250) {
            assert!((y - 4.25).abs() < 1e-9, "{}", y);
        }
    }

    #[test]
    fn test_slow_sine_survives_downsampling() {
        let n = 2000;
        let x: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 5.0 * i as f64 / n as f64).sin())
            .collect();
        let y = resample(&x, n / 4);
        // Compare away from the edges, where the kernel is truncated.
        for (i, &v) in y.iter().enumerate().skip(20).take(y.len() - 40) {
            let expected = x[i * 4];
            assert!((v - expected).abs() < 1e-2, "sample {}: {} vs {}", i, v, expected);
        }
    }

    #[test]
    fn test_fast_tone_is_attenuated() {
        // A tone above the new Nyquist frequency should mostly vanish.
        let n = 2000;
        let x: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 0.4 * i as f64).sin())
            .collect();
        let y = resample(&x, n / 10);
        let peak = y[20..y.len() - 20]
            .iter()
            .fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(peak < 0.1, "peak {}", peak);
    }
}
