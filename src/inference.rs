use burn::prelude::Backend;
use burn::tensor::Tensor;

use crate::conditions::Condition;
use crate::loss::trial_solution;
use crate::model::NetCollection;

/// 従属変数の数に応じた評価結果。
///
/// 従属変数が1つならその値を直接、複数なら条件と同じ順の列を返します。
#[derive(Debug, Clone, PartialEq)]
pub enum Outputs<T> {
    /// 従属変数が1つの場合の値。
    One(T),
    /// 従属変数が複数の場合の、条件順の値の列。
    Many(Vec<T>),
}

impl<T> Outputs<T> {
    /// 従属変数の数によらず、値の列として取り出します。
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Outputs::One(value) => vec![value],
            Outputs::Many(values) => values,
        }
    }
}

/// 学習済みの常微分方程式（系）の解。
///
/// 構築時点のネットワークと条件の独立したコピーを所有するため、元のネットワークを
/// その後さらに学習しても、このスナップショットの評価結果は変わりません。
#[derive(Debug, Clone)]
pub struct Solution<B: Backend> {
    nets: NetCollection<B>,
    conditions: Vec<Condition>,
    device: B::Device,
}

impl<B: Backend> Solution<B> {
    /// ネットワークと条件のスナップショットから解を構築します。
    ///
    /// 渡された状態はここでコピーされ、以後このインスタンスが単独で所有します。
    pub fn new(nets: &NetCollection<B>, conditions: &[Condition], device: &B::Device) -> Self {
        Self {
            nets: nets.clone(),
            conditions: conditions.to_vec(),
            device: device.clone(),
        }
    }

    /// スナップショットが所有するネットワーク一式。
    pub fn nets(&self) -> &NetCollection<B> {
        &self.nets
    }

    /// スナップショットが所有する条件リスト。
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// 指定した点で解を評価し、テンソルとして返します。
    ///
    /// 出力は入力と同じ形状（1次元、同じ要素数）になります。
    pub fn evaluate(&self, ts: Tensor<B, 1>) -> Outputs<Tensor<B, 1>> {
        let n = ts.dims()[0];
        let column = ts.reshape([n, 1]);
        let us = trial_solution(&self.nets, &column, &self.conditions);
        let mut outputs: Vec<Tensor<B, 1>> = us.into_iter().map(|u| u.reshape([n])).collect();
        if outputs.len() == 1 {
            Outputs::One(outputs.remove(0))
        } else {
            Outputs::Many(outputs)
        }
    }

    /// 指定した点で解を評価し、計算グラフから切り離した数値列として返します。
    pub fn evaluate_numeric(&self, ts: &[f64]) -> Outputs<Vec<f64>> {
        let points: Vec<f32> = ts.iter().map(|&t| t as f32).collect();
        let tensor = Tensor::<B, 1>::from_floats(points.as_slice(), &self.device);
        match self.evaluate(tensor) {
            Outputs::One(u) => Outputs::One(u.detach().into_data().iter::<f64>().collect()),
            Outputs::Many(us) => Outputs::Many(
                us.into_iter()
                    .map(|u| u.detach().into_data().iter::<f64>().collect())
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Fcnn;
    use crate::training::{AdamOptimizer, ParamOptimizer};
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::GradientsParams;

    type B = Autodiff<NdArray<f32>>;

    fn snapshot(device: &<B as Backend>::Device) -> (NetCollection<B>, Solution<B>) {
        let nets = NetCollection::new(vec![Fcnn::new(1, 1, &[16], device)]);
        let conditions = vec![Condition::ivp(0.0, 1.0)];
        let solution = Solution::new(&nets, &conditions, device);
        (nets, solution)
    }

    #[test]
    fn evaluate_is_idempotent() {
        let device = Default::default();
        let (_, solution) = snapshot(&device);
        let ts = [0.0, 0.5, 1.0, 1.5];
        let first = solution.evaluate_numeric(&ts);
        let second = solution.evaluate_numeric(&ts);
        assert_eq!(first, second);
    }

    #[test]
    fn evaluate_preserves_the_input_shape() {
        let device = Default::default();
        let (_, solution) = snapshot(&device);
        let ts = Tensor::<B, 1>::from_floats([0.0f32, 0.4, 0.8, 1.2, 1.6], &device);
        match solution.evaluate(ts) {
            Outputs::One(u) => assert_eq!(u.dims(), [5]),
            Outputs::Many(_) => panic!("expected a single dependent variable"),
        }
        assert_eq!(solution.evaluate_numeric(&[0.3]).into_vec()[0].len(), 1);
    }

    #[test]
    fn snapshot_is_isolated_from_further_training() {
        let device = Default::default();
        let (nets, solution) = snapshot(&device);
        let ts = [0.0, 0.7, 1.3, 2.0];
        let before = solution.evaluate_numeric(&ts);

        // スナップショット後に元のネットワークを更新しても、評価結果は変わらない。
        let mut nets = nets;
        let mut optimizer = AdamOptimizer::new(0.1);
        for _ in 0..5 {
            let input = Tensor::<B, 1>::from_floats([0.1f32, 0.9], &device).reshape([2, 1]);
            let loss = nets.nets()[0].forward(input).sum();
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &nets);
            nets = optimizer.step(nets, grads);
        }
        let after = solution.evaluate_numeric(&ts);
        assert_eq!(before, after);
    }

    #[test]
    fn system_solutions_return_one_value_per_condition() {
        let device: <B as Backend>::Device = Default::default();
        let nets: NetCollection<B> = NetCollection::new(vec![Fcnn::new(1, 2, &[16], &device)]);
        let mut conditions = vec![Condition::ivp(0.0, 1.0), Condition::ivp(0.0, -1.0)];
        conditions[0].set_output_slot(0);
        conditions[1].set_output_slot(1);
        let solution = Solution::new(&nets, &conditions, &device);
        match solution.evaluate_numeric(&[0.0, 1.0]) {
            Outputs::Many(us) => {
                assert_eq!(us.len(), 2);
                assert!((us[0][0] - 1.0).abs() < 1e-6);
                assert!((us[1][0] + 1.0).abs() < 1e-6);
            }
            Outputs::One(_) => panic!("expected two dependent variables"),
        }
    }
}
