//! Uniformly partitioned FFT convolution.
//!
//! Long room responses are split into partitions of one block each. Every
//! input block is transformed once, pushed onto a frequency-domain delay line,
//! and multiplied against all partition spectra (overlap-save). The output of
//! a block is available as soon as the block is processed.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;
use rustfft::{Fft, FftPlanner};

/// Mono-in, stereo-out convolver for a fixed block size.
pub struct PartitionedConvolver {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    left_partitions: Vec<Vec<Complex<f32>>>,
    right_partitions: Vec<Vec<Complex<f32>>>,
    delay_line: Vec<Vec<Complex<f32>>>,
    position: usize,
    history: Vec<f32>,
    work: Vec<Complex<f32>>,
    left_acc: Vec<Complex<f32>>,
    right_acc: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for PartitionedConvolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedConvolver")
            .field("block", &self.block)
            .field("partitions", &self.partitions())
            .finish_non_exhaustive()
    }
}

impl PartitionedConvolver {
    /// Creates a convolver for `block`-frame blocks with the given stereo
    /// response. Channels of unequal length are zero padded.
    #[must_use]
    pub fn new(left: &[f32], right: &[f32], block: usize) -> Self {
        let block = block.max(1);
        let size = block * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());

        let mut convolver = Self {
            block,
            fft,
            ifft,
            left_partitions: Vec::new(),
            right_partitions: Vec::new(),
            delay_line: Vec::new(),
            position: 0,
            history: vec![0.0; size],
            work: vec![Complex::zero(); size],
            left_acc: vec![Complex::zero(); size],
            right_acc: vec![Complex::zero(); size],
            scratch: vec![Complex::zero(); scratch_len],
        };
        convolver.set_impulse_response(left, right);
        convolver
    }

    /// Block size in frames.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block
    }

    /// Number of partitions in the current response.
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.left_partitions.len()
    }

    /// Replaces the response. The input history is kept when the partition
    /// count is unchanged so the tail of the old room rings out.
    pub fn set_impulse_response(&mut self, left: &[f32], right: &[f32]) {
        let len = left.len().max(right.len()).max(1);
        let count = len.div_ceil(self.block);
        self.left_partitions = self.partition(left, count);
        self.right_partitions = self.partition(right, count);
        if self.delay_line.len() != count {
            self.delay_line = vec![vec![Complex::zero(); self.block * 2]; count];
            self.position = 0;
        }
    }

    fn partition(&mut self, ir: &[f32], count: usize) -> Vec<Vec<Complex<f32>>> {
        let size = self.block * 2;
        (0..count)
            .map(|p| {
                let mut spectrum = vec![Complex::zero(); size];
                let start = p * self.block;
                let end = (start + self.block).min(ir.len());
                if start < end {
                    for (slot, sample) in spectrum.iter_mut().zip(&ir[start..end]) {
                        *slot = Complex::new(*sample, 0.0);
                    }
                }
                self.fft.process_with_scratch(&mut spectrum, &mut self.scratch);
                spectrum
            })
            .collect()
    }

    /// Clears all input history.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        for spectrum in &mut self.delay_line {
            spectrum.fill(Complex::zero());
        }
        self.position = 0;
    }

    /// Convolves one block. All slices must be exactly one block long.
    pub fn process_block(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        let block = self.block;
        debug_assert_eq!(input.len(), block);
        debug_assert_eq!(out_left.len(), block);
        debug_assert_eq!(out_right.len(), block);

        // Slide the 2B window: [previous block | current block].
        self.history.copy_within(block.., 0);
        self.history[block..].copy_from_slice(&input[..block]);

        let count = self.delay_line.len();
        let newest = &mut self.delay_line[self.position];
        for (slot, sample) in newest.iter_mut().zip(&self.history) {
            *slot = Complex::new(*sample, 0.0);
        }
        self.fft.process_with_scratch(newest, &mut self.scratch);

        self.left_acc.fill(Complex::zero());
        self.right_acc.fill(Complex::zero());
        for p in 0..count {
            let spectrum = &self.delay_line[(self.position + count - p) % count];
            let (hl, hr) = (&self.left_partitions[p], &self.right_partitions[p]);
            for (i, x) in spectrum.iter().enumerate() {
                self.left_acc[i] += x * hl[i];
                self.right_acc[i] += x * hr[i];
            }
        }
        self.position = (self.position + 1) % count;

        let norm = 1.0 / (block * 2) as f32;
        for (acc, out) in [
            (&self.left_acc, &mut *out_left),
            (&self.right_acc, &mut *out_right),
        ] {
            self.work.copy_from_slice(acc.as_slice());
            self.ifft.process_with_scratch(&mut self.work, &mut self.scratch);
            for (o, w) in out.iter_mut().zip(&self.work[block..]) {
                *o = w.re * norm;
            }
        }
    }
}
