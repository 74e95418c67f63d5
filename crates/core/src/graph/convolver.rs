//! Uniformly partitioned overlap-add convolution for the reverb return.
//!
//! The impulse response is cut into `block_size` partitions whose spectra are
//! computed once at load time. Each input block is transformed once, pushed
//! onto a frequency-domain delay line and multiplied against every partition,
//! so the per-block cost grows with the partition count rather than the tap
//! count. Output is produced without added latency: a partially filled block
//! is convolved as if its remaining samples were silent, which is exact for
//! every sample already received.

use std::{collections::VecDeque, fmt, sync::Arc};

use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{AuraError, Result};

pub struct Convolver {
    block_size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    forward_scratch: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
    /// Spectra of the impulse response partitions, pre-scaled by 1 / fft size.
    partitions: Vec<Vec<Complex32>>,
    /// Spectra of previous input blocks, most recent first.
    history: VecDeque<Vec<Complex32>>,
    /// Contribution of `history` to the current block.
    tail: Vec<Complex32>,
    block: Vec<f32>,
    filled: usize,
    overlap: Vec<f32>,
    time: Vec<f32>,
    current: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    convolved: Vec<f32>,
}

impl Convolver {
    /// Creates a silent convolver that consumes input in `block_size` steps.
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(AuraError::InvalidInput("convolution block size must be non-zero"));
        }

        let fft_size = block_size * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let bins = forward.complex_len();

        Ok(Self {
            block_size,
            forward_scratch: forward.make_scratch_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            forward,
            inverse,
            partitions: Vec::new(),
            history: VecDeque::new(),
            tail: vec![Complex32::default(); bins],
            block: vec![0.0; block_size],
            filled: 0,
            overlap: vec![0.0; block_size],
            time: vec![0.0; fft_size],
            current: vec![Complex32::default(); bins],
            spectrum: vec![Complex32::default(); bins],
            convolved: vec![0.0; fft_size],
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_loaded(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// Replaces the impulse response and clears any ringing tail.
    pub fn load(&mut self, impulse: &[f32]) -> Result<()> {
        let scale = 1.0 / self.time.len() as f32;
        let mut partitions = Vec::with_capacity(impulse.len().div_ceil(self.block_size));
        for chunk in impulse.chunks(self.block_size) {
            self.time.fill(0.0);
            for (slot, tap) in self.time.iter_mut().zip(chunk) {
                *slot = tap * scale;
            }
            let mut spectrum = self.forward.make_output_vec();
            self.forward.process_with_scratch(
                &mut self.time,
                &mut spectrum,
                &mut self.forward_scratch,
            )?;
            partitions.push(spectrum);
        }

        self.partitions = partitions;
        self.reset();
        Ok(())
    }

    /// Forgets previous input while keeping the impulse response.
    pub fn reset(&mut self) {
        let bins = self.spectrum.len();
        let depth = self.partitions.len().saturating_sub(1);
        self.history = (0..depth)
            .map(|_| vec![Complex32::default(); bins])
            .collect();
        self.tail.fill(Complex32::default());
        self.block.fill(0.0);
        self.filled = 0;
        self.overlap.fill(0.0);
    }

    /// Convolves `input` into `output`. Both slices must have the same length;
    /// any length is accepted and block boundaries are carried across calls.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != output.len() {
            return Err(AuraError::msg(format!(
                "convolver got {} input samples for {} output samples",
                input.len(),
                output.len()
            )));
        }
        if self.partitions.is_empty() {
            output.fill(0.0);
            return Ok(());
        }

        let mut offset = 0;
        while offset < input.len() {
            let start = self.filled;
            let take = (self.block_size - start).min(input.len() - offset);
            self.block[start..start + take].copy_from_slice(&input[offset..offset + take]);
            self.convolve_block()?;

            for (index, out) in output[offset..offset + take].iter_mut().enumerate() {
                *out = self.convolved[start + index] + self.overlap[start + index];
            }

            self.filled += take;
            offset += take;
            if self.filled == self.block_size {
                self.advance();
            }
        }
        Ok(())
    }

    fn convolve_block(&mut self) -> Result<()> {
        self.time[..self.block_size].copy_from_slice(&self.block);
        self.time[self.block_size..].fill(0.0);
        self.forward.process_with_scratch(
            &mut self.time,
            &mut self.current,
            &mut self.forward_scratch,
        )?;

        let first = &self.partitions[0];
        for (((out, input), tap), tail) in self
            .spectrum
            .iter_mut()
            .zip(&self.current)
            .zip(first)
            .zip(&self.tail)
        {
            *out = input * tap + tail;
        }
        // DC and Nyquist bins of a real signal carry no imaginary part.
        self.spectrum[0].im = 0.0;
        if let Some(last) = self.spectrum.last_mut() {
            last.im = 0.0;
        }

        self.inverse.process_with_scratch(
            &mut self.spectrum,
            &mut self.convolved,
            &mut self.inverse_scratch,
        )?;
        Ok(())
    }

    fn advance(&mut self) {
        self.overlap
            .copy_from_slice(&self.convolved[self.block_size..]);

        if let Some(mut oldest) = self.history.pop_back() {
            oldest.copy_from_slice(&self.current);
            self.history.push_front(oldest);
        }

        self.tail.fill(Complex32::default());
        for (past, partition) in self.history.iter().zip(&self.partitions[1..]) {
            for ((acc, input), tap) in self.tail.iter_mut().zip(past).zip(partition) {
                *acc += input * tap;
            }
        }

        self.block.fill(0.0);
        self.filled = 0;
    }
}

impl fmt::Debug for Convolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convolver")
            .field("block_size", &self.block_size)
            .field("partitions", &self.partitions.len())
            .field("filled", &self.filled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(input: &[f32], impulse: &[f32]) -> Vec<f32> {
        (0..input.len())
            .map(|n| {
                impulse
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k <= n)
                    .map(|(k, tap)| tap * input[n - k])
                    .sum()
            })
            .collect()
    }

    #[test]
    fn silent_without_an_impulse() {
        let mut reverb = Convolver::new(64).unwrap();
        let mut output = vec![1.0; 4];
        reverb.process(&[1.0, 0.5, 0.0, 0.0], &mut output).unwrap();
        assert!(output.iter().all(|sample| *sample == 0.0));
        assert!(!reverb.is_loaded());
    }

    #[test]
    fn short_impulse_has_no_latency() {
        let mut reverb = Convolver::new(64).unwrap();
        reverb.load(&[0.5, 0.25]).unwrap();

        let mut output = vec![0.0; 3];
        reverb.process(&[1.0, 0.0, 0.0], &mut output).unwrap();
        assert!((output[0] - 0.5).abs() < 1e-6);
        assert!((output[1] - 0.25).abs() < 1e-6);
        assert!(output[2].abs() < 1e-6);
    }

    #[test]
    fn uneven_calls_match_direct_convolution() {
        let impulse: Vec<f32> = (0..300)
            .map(|n| (n as f32 * 0.37).sin() * (-(n as f32) / 90.0).exp())
            .collect();
        let input: Vec<f32> = (0..700).map(|n| ((n * 7919) % 13) as f32 / 13.0 - 0.5).collect();
        let expected = direct(&input, &impulse);

        let mut reverb = Convolver::new(64).unwrap();
        reverb.load(&impulse).unwrap();
        assert_eq!(reverb.partition_count(), 5);

        let mut output = vec![0.0; input.len()];
        let mut offset = 0;
        for len in [1, 37, 64, 100, 5, 128, 200, 165] {
            reverb
                .process(&input[offset..offset + len], &mut output[offset..offset + len])
                .unwrap();
            offset += len;
        }
        assert_eq!(offset, input.len());

        for (index, (got, want)) in output.iter().zip(&expected).enumerate() {
            assert!((got - want).abs() < 1e-3, "sample {index}: {got} vs {want}");
        }
    }

    #[test]
    fn tail_rings_past_the_input() {
        let mut reverb = Convolver::new(4).unwrap();
        reverb.load(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();

        let mut output = vec![0.0; 8];
        let mut input = vec![0.0; 8];
        input[0] = 1.0;
        reverb.process(&input, &mut output).unwrap();
        for (index, sample) in output.iter().enumerate() {
            let want = if index == 6 { 1.0 } else { 0.0 };
            assert!((sample - want).abs() < 1e-6, "sample {index} was {sample}");
        }
    }

    #[test]
    fn reset_clears_the_ringing_tail() {
        let mut reverb = Convolver::new(4).unwrap();
        reverb.load(&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();

        let mut output = vec![0.0; 4];
        reverb.process(&[1.0, 0.0, 0.0, 0.0], &mut output).unwrap();
        reverb.reset();
        reverb.process(&[0.0; 4], &mut output).unwrap();
        assert!(output.iter().all(|sample| sample.abs() < 1e-6));
    }

    #[test]
    fn rejects_mismatched_buffers_and_zero_blocks() {
        assert!(Convolver::new(0).is_err());
        let mut reverb = Convolver::new(8).unwrap();
        let mut output = vec![0.0; 2];
        assert!(reverb.process(&[0.0; 3], &mut output).is_err());
    }
}
