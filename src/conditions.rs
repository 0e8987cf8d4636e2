use burn::prelude::Backend;
use burn::tensor::Tensor;

use crate::model::Fcnn;

/// 条件の種類。
///
/// それぞれがネットワーク出力の変換式を1つ持ち、変換後の値は構成上厳密に
/// 初期条件・境界条件を満たします。
#[derive(Debug, Clone, PartialEq)]
enum ConditionKind {
    /// 制約なし。ネットワーク出力をそのまま使います。
    None,
    /// 初期値問題 u(t_0) = u_0。
    /// `u_0_prime` を指定すると2階の初期値問題 u'(t_0) = u_0' も同時に課します。
    Ivp {
        t_0: f64,
        u_0: f64,
        u_0_prime: Option<f64>,
    },
    /// 2点ディリクレ境界値問題 u(t_0) = u_0, u(t_1) = u_1。
    DirichletBvp {
        t_0: f64,
        u_0: f64,
        t_1: f64,
        u_1: f64,
    },
}

/// 従属変数1つに課す初期条件・境界条件。
///
/// 共有ネットワークモードでは、学習開始前に一度だけ出力スロット（ネットワーク出力の列）
/// が割り当てられます。割り当ては設定解決フェーズで行われ、学習中は不変です。
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    kind: ConditionKind,
    output_index: usize,
}

impl Condition {
    /// 制約なしの条件を作ります。
    pub fn none() -> Self {
        Self {
            kind: ConditionKind::None,
            output_index: 0,
        }
    }

    /// 初期値問題 u(t_0) = u_0 の条件を作ります。
    pub fn ivp(t_0: f64, u_0: f64) -> Self {
        Self {
            kind: ConditionKind::Ivp {
                t_0,
                u_0,
                u_0_prime: None,
            },
            output_index: 0,
        }
    }

    /// 2階の初期値問題 u(t_0) = u_0, u'(t_0) = u_0' の条件を作ります。
    pub fn ivp2(t_0: f64, u_0: f64, u_0_prime: f64) -> Self {
        Self {
            kind: ConditionKind::Ivp {
                t_0,
                u_0,
                u_0_prime: Some(u_0_prime),
            },
            output_index: 0,
        }
    }

    /// 2点ディリクレ境界値問題 u(t_0) = u_0, u(t_1) = u_1 の条件を作ります。
    pub fn dirichlet_bvp(t_0: f64, u_0: f64, t_1: f64, u_1: f64) -> Self {
        Self {
            kind: ConditionKind::DirichletBvp { t_0, u_0, t_1, u_1 },
            output_index: 0,
        }
    }

    /// この条件が担当するネットワーク出力スロットを割り当てます。
    ///
    /// 共有ネットワークモードで設定解決時に一度だけ呼ばれます。
    pub(crate) fn set_output_slot(&mut self, index: usize) {
        self.output_index = index;
    }

    /// 割り当てられた出力スロットを返します。
    pub fn output_slot(&self) -> usize {
        self.output_index
    }

    /// ネットワーク出力を条件を満たすトライアル解に変換します。
    pub fn enforce<B: Backend>(&self, net: &Fcnn<B>, ts: &Tensor<B, 2>) -> Tensor<B, 2> {
        let n = ts.dims()[0];
        let out = net.forward(ts.clone());
        let u_net = out.slice([0..n, self.output_index..self.output_index + 1]);
        match self.kind {
            ConditionKind::None => u_net,
            ConditionKind::Ivp {
                t_0,
                u_0,
                u_0_prime: None,
            } => {
                // u(t) = u_0 + (1 - e^{-(t-t_0)}) * net(t)
                let gate = ts.clone().sub_scalar(t_0).neg().exp().neg().add_scalar(1.0);
                gate.mul(u_net).add_scalar(u_0)
            }
            ConditionKind::Ivp {
                t_0,
                u_0,
                u_0_prime: Some(u_0_prime),
            } => {
                // u(t) = u_0 + (t-t_0)u_0' + (1 - e^{-(t-t_0)})^2 * net(t)
                let shift = ts.clone().sub_scalar(t_0);
                let gate = shift.clone().neg().exp().neg().add_scalar(1.0);
                shift.mul_scalar(u_0_prime).add_scalar(u_0) + gate.clone().mul(gate).mul(u_net)
            }
            ConditionKind::DirichletBvp { t_0, u_0, t_1, u_1 } => {
                // t̃ = (t-t_0)/(t_1-t_0)
                // u(t) = (1-t̃)u_0 + t̃u_1 + (1 - e^{(1-t̃)t̃}) * net(t)
                let t_tilde = ts.clone().sub_scalar(t_0).div_scalar(t_1 - t_0);
                let base = t_tilde.clone().neg().add_scalar(1.0).mul_scalar(u_0)
                    + t_tilde.clone().mul_scalar(u_1);
                let gate = t_tilde
                    .clone()
                    .neg()
                    .add_scalar(1.0)
                    .mul(t_tilde)
                    .exp()
                    .neg()
                    .add_scalar(1.0);
                base + gate.mul(u_net)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn eval_at(condition: &Condition, net: &Fcnn<B>, t: f64) -> f64 {
        let device = Default::default();
        let ts = Tensor::<B, 2>::from_floats([[t as f32]], &device);
        condition.enforce(net, &ts).into_scalar() as f64
    }

    #[test]
    fn ivp_holds_exactly_at_t0() {
        let device = Default::default();
        let net = Fcnn::<B>::new(1, 1, &[16], &device);
        let condition = Condition::ivp(0.0, 2.5);
        assert_relative_eq!(eval_at(&condition, &net, 0.0), 2.5, epsilon = 1e-6);
    }

    #[test]
    fn ivp2_holds_exactly_at_t0() {
        let device = Default::default();
        let net = Fcnn::<B>::new(1, 1, &[16], &device);
        let condition = Condition::ivp2(1.0, -0.5, 3.0);
        assert_relative_eq!(eval_at(&condition, &net, 1.0), -0.5, epsilon = 1e-6);
    }

    #[test]
    fn dirichlet_bvp_holds_exactly_at_both_ends() {
        let device = Default::default();
        let net = Fcnn::<B>::new(1, 1, &[16], &device);
        let condition = Condition::dirichlet_bvp(0.0, 1.0, 2.0, -1.0);
        assert_relative_eq!(eval_at(&condition, &net, 0.0), 1.0, epsilon = 1e-5);
        assert_relative_eq!(eval_at(&condition, &net, 2.0), -1.0, epsilon = 1e-5);
    }

    #[test]
    fn output_slot_selects_the_assigned_column() {
        let device = Default::default();
        let net = Fcnn::<B>::new(1, 2, &[16], &device);
        let ts = Tensor::<B, 2>::from_floats([[0.3f32], [0.7]], &device);
        let raw = net.forward(ts.clone());

        let mut first = Condition::none();
        first.set_output_slot(0);
        let mut second = Condition::none();
        second.set_output_slot(1);

        let u_0 = first.enforce(&net, &ts);
        let u_1 = second.enforce(&net, &ts);
        assert_eq!(u_0.dims(), [2, 1]);
        let got_0: Vec<f32> = u_0.into_data().iter::<f32>().collect();
        let got_1: Vec<f32> = u_1.into_data().iter::<f32>().collect();
        let expected_0: Vec<f32> = raw.clone().slice([0..2, 0..1]).into_data().iter().collect();
        let expected_1: Vec<f32> = raw.slice([0..2, 1..2]).into_data().iter().collect();
        for (got, expected) in got_0.iter().zip(&expected_0) {
            assert_relative_eq!(got, expected, epsilon = 1e-6);
        }
        for (got, expected) in got_1.iter().zip(&expected_1) {
            assert_relative_eq!(got, expected, epsilon = 1e-6);
        }
    }
}
