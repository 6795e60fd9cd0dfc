use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::separable_filter_equal;

use crate::config::KernelSize;
use crate::frame::GrayFrame;

/// Grayscale conversion followed by a square Gaussian blur.
///
/// The blur suppresses sensor noise so that single-pixel flicker never reaches the
/// change detector. Sigma follows the usual derivation from the kernel side:
/// `0.3 * ((k - 1) / 2 - 1) + 0.8`.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    kernel_size: KernelSize,
    kernel: Vec<f32>,
}

impl Preprocessor {
    pub fn new(kernel_size: KernelSize) -> Self {
        Self {
            kernel_size,
            kernel: gaussian_kernel(kernel_size),
        }
    }

    pub fn kernel_size(&self) -> KernelSize {
        self.kernel_size
    }

    /// Produce the single-channel, smoothed frame. Output has the input's dimensions.
    pub fn preprocess(&self, frame: &RgbImage) -> GrayFrame {
        let gray = luma_601(frame);
        if self.kernel.len() == 1 {
            return gray;
        }
        separable_filter_equal(&gray, &self.kernel)
    }
}

/// Rec.601 luma (0.299 R + 0.587 G + 0.114 B) in 14-bit fixed point, rounded.
fn luma_601(frame: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const ROUND: u32 = 1 << 13;

    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let luma = (u32::from(r) * R + u32::from(g) * G + u32::from(b) * B + ROUND) >> 14;
        Luma([luma as u8])
    })
}

fn gaussian_kernel(size: KernelSize) -> Vec<f32> {
    let k = size.get() as usize;
    let sigma = 0.3 * ((k as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (k / 2) as f32;
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut weights: Vec<f32> = (0..k)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn checkerboard(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgb([200, 180, 160])
            } else {
                Rgb([20, 30, 40])
            }
        })
    }

    #[test]
    fn output_keeps_dimensions_for_odd_kernels() {
        let frame = checkerboard(37, 23);
        for size in [1, 3, 5, 7, 21, 31] {
            let pre = Preprocessor::new(KernelSize::new(size).unwrap());
            let gray = pre.preprocess(&frame);
            assert_eq!(gray.dimensions(), (37, 23), "kernel {}", size);
            assert_eq!(gray.as_raw().len(), 37 * 23);
        }
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(KernelSize::new(21).unwrap());
        assert_eq!(kernel.len(), 21);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        for i in 0..kernel.len() / 2 {
            assert!((kernel[i] - kernel[kernel.len() - 1 - i]).abs() < 1e-6);
        }
        assert!(kernel[10] > kernel[9]);
    }

    #[test]
    fn blur_smooths_a_checkerboard() {
        let frame = checkerboard(64, 64);
        let sharp = Preprocessor::new(KernelSize::new(1).unwrap()).preprocess(&frame);
        let smooth = Preprocessor::new(KernelSize::new(9).unwrap()).preprocess(&frame);

        let spread = |img: &GrayFrame| {
            let min = img.as_raw().iter().copied().min().unwrap_or(0);
            let max = img.as_raw().iter().copied().max().unwrap_or(0);
            max - min
        };
        assert!(spread(&smooth) < spread(&sharp));
    }

    #[test]
    fn luma_uses_rec601_weights() {
        let frame = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        });
        let gray = Preprocessor::new(KernelSize::new(1).unwrap()).preprocess(&frame);
        assert_eq!(gray.as_raw(), &vec![76, 150, 29]);

        let white = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        let gray = Preprocessor::new(KernelSize::new(1).unwrap()).preprocess(&white);
        assert_eq!(gray.as_raw(), &vec![255]);
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let frame = checkerboard(40, 30);
        let pre = Preprocessor::new(KernelSize::new(5).unwrap());
        assert_eq!(pre.preprocess(&frame), pre.preprocess(&frame));
    }
}
