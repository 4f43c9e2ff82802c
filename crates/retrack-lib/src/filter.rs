use crate::error::{ReprocessError, Result};
use realfft::RealFftPlanner;
use std::f64::consts::PI;

/// Half-width of the notch band-reject, in Hz.
const NOTCH_HALF_WIDTH: f64 = 1.0;

/// Zero-phase FIR filter combining the requested temporal cutoffs into
/// a single kernel, applied per channel by FFT overlap-add.
#[derive(Debug, Clone)]
pub struct TemporalFilter {
    kernel: Vec<f64>,
}

impl TemporalFilter {
    /// Build the combined kernel for the requested cutoffs. Returns
    /// `None` when no cutoff is requested at all.
    pub fn design(
        highpass: Option<f64>,
        lowpass: Option<f64>,
        notch: Option<f64>,
        sfreq: f64,
    ) -> Result<Option<Self>> {
        if highpass.is_none() && lowpass.is_none() && notch.is_none() {
            return Ok(None);
        }
        if sfreq <= 0.0 {
            return Err(ReprocessError::InvalidParameters(
                "temporal filtering requires a sampling frequency".into(),
            ));
        }
        let nyquist = sfreq / 2.0;
        let mut kernel: Option<Vec<f64>> = None;
        let mut push = |k: Vec<f64>| {
            kernel = Some(match kernel.take() {
                Some(existing) => convolve(&existing, &k),
                None => k,
            });
        };
        if let Some(freq) = lowpass {
            check_cutoff(freq, nyquist, "lowpass")?;
            let n = kernel_length(freq, sfreq);
            push(firwin(n, freq, sfreq, false));
        }
        if let Some(freq) = highpass {
            check_cutoff(freq, nyquist, "highpass")?;
            let n = kernel_length(freq, sfreq);
            push(firwin(n, freq, sfreq, true));
        }
        if let Some(freq) = notch {
            check_cutoff(freq - NOTCH_HALF_WIDTH, nyquist, "notch")?;
            check_cutoff(freq + NOTCH_HALF_WIDTH, nyquist, "notch")?;
            push(notch_kernel(freq, sfreq));
        }
        Ok(kernel.map(|kernel| Self { kernel }))
    }

    pub fn kernel_len(&self) -> usize {
        self.kernel.len()
    }

    /// Samples of look-behind/look-ahead the caller must supply on each
    /// side of a chunk so the edges come out clean.
    pub fn margin(&self) -> usize {
        self.kernel.len() / 2
    }

    /// Zero-phase filtering of one channel; output has the same length.
    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        if x.is_empty() {
            return Vec::new();
        }
        let n_h = self.kernel.len();
        if n_h == 1 {
            return x.iter().map(|v| v * self.kernel[0]).collect();
        }

        let n_fft = (4 * n_h.next_power_of_two()).max(1024);
        let n_seg = n_fft - n_h + 1;
        let mut planner = RealFftPlanner::<f64>::new();
        let r2c = planner.plan_fft_forward(n_fft);
        let c2r = planner.plan_fft_inverse(n_fft);

        let mut h_pad = vec![0.0; n_fft];
        h_pad[..n_h].copy_from_slice(&self.kernel);
        let mut h_fft = r2c.make_output_vec();
        r2c.process(&mut h_pad, &mut h_fft).unwrap();

        let mut acc = vec![0.0; x.len() + n_fft];
        let mut seg = vec![0.0; n_fft];
        let mut spectrum = r2c.make_output_vec();
        let mut time = c2r.make_output_vec();
        let scale = 1.0 / n_fft as f64;

        let mut start = 0;
        while start < x.len() {
            let stop = (start + n_seg).min(x.len());
            seg[..stop - start].copy_from_slice(&x[start..stop]);
            for v in seg[stop - start..].iter_mut() {
                *v = 0.0;
            }
            r2c.process(&mut seg, &mut spectrum).unwrap();
            for (s, h) in spectrum.iter_mut().zip(h_fft.iter()) {
                *s *= *h;
            }
            // The inverse transform wants purely real DC and Nyquist bins.
            spectrum[0].im = 0.0;
            let nyq = spectrum.len() - 1;
            spectrum[nyq].im = 0.0;
            c2r.process(&mut spectrum, &mut time).unwrap();
            for (i, v) in time.iter().enumerate() {
                acc[start + i] += v * scale;
            }
            start = stop;
        }

        // Shift by the group delay for zero phase.
        let shift = (n_h - 1) / 2;
        acc[shift..shift + x.len()].to_vec()
    }
}

fn check_cutoff(freq: f64, nyquist: f64, what: &str) -> Result<()> {
    if freq <= 0.0 || freq >= nyquist {
        return Err(ReprocessError::InvalidParameters(format!(
            "{what} cutoff {freq} Hz outside (0, {nyquist}) Hz"
        )));
    }
    Ok(())
}

/// Transition bandwidth rule: `min(max(0.25 * f, 2.0), f)`.
fn trans_bandwidth(freq: f64) -> f64 {
    (0.25 * freq).max(2.0).min(freq)
}

/// Odd windowed-sinc length for the cutoff's transition bandwidth.
fn kernel_length(freq: f64, sfreq: f64) -> usize {
    let n = (3.3 / trans_bandwidth(freq) * sfreq).ceil() as usize;
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

/// Hamming-windowed sinc, unit DC gain; spectral inversion for highpass.
fn firwin(n: usize, cutoff_hz: f64, sfreq: f64, highpass: bool) -> Vec<f64> {
    debug_assert!(n % 2 == 1);
    let alpha = (n - 1) as f64 / 2.0;
    let fc = cutoff_hz / (sfreq / 2.0);
    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            let sinc = if x == 0.0 {
                fc
            } else {
                (PI * fc * x).sin() / (PI * x)
            };
            sinc * hamming(i, n)
        })
        .collect();
    let sum: f64 = h.iter().sum();
    for v in &mut h {
        *v /= sum;
    }
    if highpass {
        for v in &mut h {
            *v = -*v;
        }
        h[n / 2] += 1.0;
    }
    h
}

fn hamming(i: usize, n: usize) -> f64 {
    0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos()
}

/// Narrow band-reject around `freq`: lowpass below plus highpass above,
/// designed at a common length so the kernels add.
fn notch_kernel(freq: f64, sfreq: f64) -> Vec<f64> {
    let n = kernel_length(NOTCH_HALF_WIDTH.max(1.0), sfreq).max(3);
    let lp = firwin(n, freq - NOTCH_HALF_WIDTH, sfreq, false);
    let hp = firwin(n, freq + NOTCH_HALF_WIDTH, sfreq, true);
    lp.iter().zip(hp.iter()).map(|(a, b)| a + b).collect()
}

/// Full linear convolution, `a.len() + b.len() - 1` coefficients.
fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &av) in a.iter().enumerate() {
        for (j, &bv) in b.iter().enumerate() {
            out[i + j] += av * bv;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_kernel_has_unit_dc_gain() {
        let n = kernel_length(10.0, 256.0);
        let h = firwin(n, 10.0, 256.0, false);
        let sum: f64 = h.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn highpass_kernel_blocks_dc() {
        let n = kernel_length(8.0, 256.0);
        let h = firwin(n, 8.0, 256.0, true);
        let sum: f64 = h.iter().sum();
        assert!(sum.abs() < 1e-9, "highpass DC gain was {sum}");
    }

    #[test]
    fn kernels_are_symmetric() {
        let filter = TemporalFilter::design(Some(1.0), Some(40.0), None, 256.0)
            .unwrap()
            .unwrap();
        let k = &filter.kernel;
        for i in 0..k.len() / 2 {
            assert!((k[i] - k[k.len() - 1 - i]).abs() < 1e-9);
        }
        assert_eq!(k.len() % 2, 1);
    }

    #[test]
    fn apply_preserves_length() {
        let filter = TemporalFilter::design(None, Some(30.0), None, 256.0)
            .unwrap()
            .unwrap();
        let x: Vec<f64> = (0..777).map(|i| (i as f64 * 0.1).sin()).collect();
        assert_eq!(filter.apply(&x).len(), x.len());
    }

    #[test]
    fn lowpass_attenuates_high_frequency_interior() {
        let sfreq = 256.0;
        let filter = TemporalFilter::design(None, Some(10.0), None, sfreq)
            .unwrap()
            .unwrap();
        let x: Vec<f64> = (0..2048)
            .map(|i| (2.0 * PI * 100.0 * i as f64 / sfreq).sin())
            .collect();
        let y = filter.apply(&x);
        let interior = &y[512..1536];
        let max = interior.iter().fold(0.0_f64, |a, v| a.max(v.abs()));
        assert!(max < 0.05, "stopband leakage {max}");
    }

    #[test]
    fn highpass_removes_constant_offset_interior() {
        let sfreq = 256.0;
        let filter = TemporalFilter::design(Some(8.0), None, None, sfreq)
            .unwrap()
            .unwrap();
        let x = vec![5.0; 2048];
        let y = filter.apply(&x);
        let interior = &y[512..1536];
        let max = interior.iter().fold(0.0_f64, |a, v| a.max(v.abs()));
        assert!(max < 0.05, "DC leakage {max}");
    }

    #[test]
    fn cutoff_above_nyquist_is_rejected() {
        let err = TemporalFilter::design(None, Some(200.0), None, 256.0).unwrap_err();
        assert!(matches!(err, ReprocessError::InvalidParameters(_)));
    }

    #[test]
    fn no_cutoffs_means_no_filter() {
        assert!(TemporalFilter::design(None, None, None, 256.0)
            .unwrap()
            .is_none());
    }
}
