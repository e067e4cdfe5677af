//! Bandbegrenztes Resampling (gefensterte Sinc-Interpolation)
//!
//! Jedes Ausgabe-Sample wird als gewichtete Summe der umliegenden
//! Eingabe-Samples berechnet. Die Sinc-Funktion wird auf die kleinere der
//! beiden Nyquist-Frequenzen skaliert, damit beim Downsampling kein Aliasing
//! entsteht, und mit einem Blackman-Fenster begrenzt.

use super::AudioError;
use std::f64::consts::PI;

/// Nulldurchgänge der Sinc-Funktion pro Seite
const ZERO_CROSSINGS: f64 = 16.0;

/// Konvertiert 16-bit Mono PCM von `src_rate` nach `dst_rate`
///
/// Die Ausgabelänge ist `round(len * dst_rate / src_rate)`.
pub fn resample(input: &[i16], src_rate: u32, dst_rate: u32) -> Result<Vec<i16>, AudioError> {
    if src_rate == 0 {
        return Err(AudioError::InvalidSampleRate(src_rate));
    }
    if dst_rate == 0 {
        return Err(AudioError::InvalidSampleRate(dst_rate));
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if src_rate == dst_rate {
        return Ok(input.to_vec());
    }

    let out_len = output_len(input.len(), src_rate, dst_rate);
    let step = src_rate as f64 / dst_rate as f64;
    // Grenzfrequenz relativ zur Eingabe-Nyquist-Frequenz
    let cutoff = (dst_rate as f64 / src_rate as f64).min(1.0);
    let half_width = ZERO_CROSSINGS / cutoff;
    let last = input.len() as i64 - 1;

    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let center = i as f64 * step;
        let first = ((center - half_width).ceil() as i64).max(0);
        let end = ((center + half_width).floor() as i64).min(last);

        let mut acc = 0.0;
        let mut weight_sum = 0.0;
        for j in first..=end {
            let distance = center - j as f64;
            let weight = cutoff * sinc(cutoff * distance) * blackman(distance, half_width);
            acc += weight * input[j as usize] as f64;
            weight_sum += weight;
        }

        let value = if weight_sum.abs() > 1e-9 {
            acc / weight_sum
        } else {
            0.0
        };
        output.push(clamp_to_i16(value));
    }

    Ok(output)
}

fn output_len(len: usize, src_rate: u32, dst_rate: u32) -> usize {
    let src = src_rate as u64;
    ((len as u64 * dst_rate as u64 + src / 2) / src) as usize
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

fn blackman(distance: f64, half_width: f64) -> f64 {
    if distance.abs() >= half_width {
        return 0.0;
    }
    let ratio = distance / half_width;
    0.42 + 0.5 * (PI * ratio).cos() + 0.08 * (2.0 * PI * ratio).cos()
}

fn clamp_to_i16(value: f64) -> i16 {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: u32, len: usize, amplitude: f64) -> Vec<i16> {
        (0..len)
            .map(|n| (amplitude * (2.0 * PI * freq * n as f64 / rate as f64).sin()) as i16)
            .collect()
    }

    fn rms(samples: &[i16]) -> f64 {
        let sum: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    #[test]
    fn output_length_follows_rate_ratio() {
        assert_eq!(resample(&vec![0; 3840], 24_000, 48_000).unwrap().len(), 7680);
        assert_eq!(resample(&vec![0; 4800], 48_000, 16_000).unwrap().len(), 1600);
        assert_eq!(resample(&vec![0; 960], 48_000, 16_000).unwrap().len(), 320);
        // 7 * 2 / 3 = 4.67 -> 5
        assert_eq!(resample(&vec![0; 7], 24_000, 16_000).unwrap().len(), 5);
    }

    #[test]
    fn same_rate_is_identity() {
        let input = vec![1, -2, 3, -4];
        assert_eq!(resample(&input, 16_000, 16_000).unwrap(), input);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(resample(&[], 24_000, 48_000).unwrap().is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert_eq!(
            resample(&[1, 2], 0, 48_000),
            Err(AudioError::InvalidSampleRate(0))
        );
    }

    #[test]
    fn constant_signal_keeps_its_level() {
        let input = vec![1000i16; 2400];
        let output = resample(&input, 24_000, 48_000).unwrap();
        for &s in &output[100..output.len() - 100] {
            assert!((s - 1000).abs() <= 2, "sample {} drifted", s);
        }
    }

    #[test]
    fn passband_tone_survives_downsampling() {
        let input = sine(1_000.0, 48_000, 4800, 10_000.0);
        let output = resample(&input, 48_000, 16_000).unwrap();
        let ratio = rms(&output[100..1500]) / rms(&input[300..4500]);
        assert!((0.9..1.1).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn tone_above_new_nyquist_is_removed() {
        let input = sine(12_000.0, 48_000, 4800, 10_000.0);
        let output = resample(&input, 48_000, 16_000).unwrap();
        assert!(rms(&output[100..1500]) < 300.0);
    }

    #[test]
    fn full_scale_input_does_not_overflow() {
        let input: Vec<i16> = (0..960)
            .map(|n| if (n / 24) % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        let output = resample(&input, 24_000, 48_000).unwrap();
        assert_eq!(output.len(), 1920);
        assert!(output.iter().any(|&s| s == i16::MAX || s == i16::MIN));
    }
}
