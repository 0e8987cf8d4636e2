use burn::prelude::Backend;
use burn::tensor::{Distribution, Tensor};

/// 学習・検証に使う定義域の点列を生成するジェネレータ。
///
/// エポックをまたいで再利用され、呼び出しごとに内部で再サンプリングしてもかまいません。
pub trait PointGenerator<B: Backend> {
    /// 1次元の点列を生成します。
    fn get_examples(&mut self) -> Tensor<B, 1>;

    /// 生成される点の個数。
    fn size(&self) -> usize;
}

/// 点列のサンプリング方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMethod {
    /// 毎回 [t_min, t_max] 上の一様分布からサンプリングします。
    Uniform,
    /// [t_min, t_max] を等間隔に分割した固定の点列を返します。
    EquallySpaced,
    /// 等間隔の点列に毎回ガウスノイズを加えます。
    EquallySpacedNoisy,
}

/// 区間 [t_min, t_max] 上の1次元ジェネレータ。
///
/// デフォルトでは学習用に `EquallySpacedNoisy`、検証用に `EquallySpaced` が使われます。
#[derive(Debug, Clone)]
pub struct Generator1D<B: Backend> {
    size: usize,
    t_min: f64,
    t_max: f64,
    method: SamplingMethod,
    device: B::Device,
}

impl<B: Backend> Generator1D<B> {
    /// 新しいジェネレータを作ります。
    pub fn new(
        size: usize,
        t_min: f64,
        t_max: f64,
        method: SamplingMethod,
        device: &B::Device,
    ) -> Self {
        Self {
            size,
            t_min,
            t_max,
            method,
            device: device.clone(),
        }
    }

    fn linspace(&self) -> Tensor<B, 1> {
        let step = if self.size > 1 {
            (self.t_max - self.t_min) / (self.size - 1) as f64
        } else {
            0.0
        };
        let points: Vec<f32> = (0..self.size)
            .map(|i| (self.t_min + step * i as f64) as f32)
            .collect();
        Tensor::from_floats(points.as_slice(), &self.device)
    }
}

impl<B: Backend> PointGenerator<B> for Generator1D<B> {
    fn get_examples(&mut self) -> Tensor<B, 1> {
        match self.method {
            SamplingMethod::Uniform => Tensor::random(
                [self.size],
                Distribution::Uniform(self.t_min, self.t_max),
                &self.device,
            ),
            SamplingMethod::EquallySpaced => self.linspace(),
            SamplingMethod::EquallySpacedNoisy => {
                let noise_std = (self.t_max - self.t_min) / (4.0 * self.size as f64);
                let noise = Tensor::random(
                    [self.size],
                    Distribution::Normal(0.0, noise_std),
                    &self.device,
                );
                self.linspace() + noise
            }
        }
    }

    fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn equally_spaced_covers_the_interval() {
        let device = Default::default();
        let mut generator = Generator1D::<B>::new(5, 0.0, 2.0, SamplingMethod::EquallySpaced, &device);
        let points: Vec<f32> = generator.get_examples().into_data().iter().collect();
        let expected = [0.0f32, 0.5, 1.0, 1.5, 2.0];
        assert_eq!(points.len(), generator.size());
        for (got, expected) in points.iter().zip(&expected) {
            assert_relative_eq!(got, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn uniform_stays_within_bounds() {
        let device = Default::default();
        let mut generator = Generator1D::<B>::new(64, -1.0, 1.0, SamplingMethod::Uniform, &device);
        let points: Vec<f32> = generator.get_examples().into_data().iter().collect();
        assert_eq!(points.len(), 64);
        assert!(points.iter().all(|&t| (-1.0..=1.0).contains(&t)));
    }

    #[test]
    fn noisy_resamples_each_call() {
        let device = Default::default();
        let mut generator =
            Generator1D::<B>::new(32, 0.0, 1.0, SamplingMethod::EquallySpacedNoisy, &device);
        let first: Vec<f32> = generator.get_examples().into_data().iter().collect();
        let second: Vec<f32> = generator.get_examples().into_data().iter().collect();
        assert_ne!(first, second);
    }
}
