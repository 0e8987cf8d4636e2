use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};

use crate::conditions::Condition;
use crate::error::SolveError;
use crate::model::NetCollection;

/// 方程式系。トライアル解と独立変数のバッチから、方程式ごとの残差を返します。
///
/// 残差の個数は条件の数と一致しなければなりません。
pub type OdeSystem<B> = Box<dyn Fn(&[TrialVariable<B>], &Tensor<B, 2>) -> Vec<Tensor<B, 2>>>;

/// 損失関数。(予測, 目標) からスカラー損失を計算します。
/// デフォルトはゼロ目標に対する二乗平均誤差です。
pub type Criterion<B> = Box<dyn Fn(Tensor<B, 2>, Tensor<B, 2>) -> Tensor<B, 1>>;

/// 損失への追加ペナルティ項。入力は方程式系と同じです。
pub type AdditionalLossTerm<B> = Box<dyn Fn(&[TrialVariable<B>], &Tensor<B, 2>) -> Tensor<B, 1>>;

/// 学習中に記録する診断メトリクス。入力は方程式系と同じで、スカラーを返します。
pub type MetricFn<B> = Box<dyn Fn(&[TrialVariable<B>], &Tensor<B, 2>) -> Tensor<B, 1>>;

/// 従属変数1つ分のトライアル解。
///
/// 値と、独立変数tに関する一階導関数を保持します。
#[derive(Debug, Clone)]
pub struct TrialVariable<B: Backend> {
    value: Tensor<B, 2>,
    derivative: Tensor<B, 2>,
}

impl<B: Backend> TrialVariable<B> {
    /// バッチ点におけるトライアル解の値。
    pub fn value(&self) -> Tensor<B, 2> {
        self.value.clone()
    }

    /// バッチ点におけるトライアル解のtに関する一階導関数。
    pub fn derivative(&self) -> Tensor<B, 2> {
        self.derivative.clone()
    }
}

/// 条件順にトライアル解の値を計算します。
///
/// 共有ネットワークモードでは全条件が1本のネットワークを（各自の出力スロットで）参照し、
/// 従属変数ごとのモードでは条件とネットワークが同じ添字で対応します。
pub fn trial_solution<B: Backend>(
    nets: &NetCollection<B>,
    ts: &Tensor<B, 2>,
    conditions: &[Condition],
) -> Vec<Tensor<B, 2>> {
    if nets.is_single() {
        let net = &nets.nets()[0];
        conditions.iter().map(|con| con.enforce(net, ts)).collect()
    } else {
        conditions
            .iter()
            .zip(nets.nets())
            .map(|(con, net)| con.enforce(net, ts))
            .collect()
    }
}

/// 値と一階導関数を備えたトライアル解を計算します。
///
/// burnの計算グラフは一度しかbackwardできないため、導関数は従属変数ごとに独立した
/// 順伝播から取り出し、値は最後の順伝播で計算します。損失のbackwardはこの最後の
/// グラフだけを辿ります。
pub(crate) fn trial_variables<B: AutodiffBackend>(
    nets: &NetCollection<B>,
    ts: &Tensor<B, 2>,
    conditions: &[Condition],
) -> Vec<TrialVariable<B>> {
    let mut derivatives = Vec::with_capacity(conditions.len());
    for i in 0..conditions.len() {
        let ts_grad = ts.clone().require_grad();
        let us = trial_solution(nets, &ts_grad, conditions);
        let grads = us[i].clone().sum().backward();
        let du_inner = ts_grad.grad(&grads).unwrap();
        derivatives.push(Tensor::<B, 2>::from_inner(du_inner));
    }
    let values = trial_solution(nets, ts, conditions);
    values
        .into_iter()
        .zip(derivatives)
        .map(|(value, derivative)| TrialVariable { value, derivative })
        .collect()
}

/// デフォルトの損失関数（ゼロ目標に対する二乗平均誤差）を作ります。
pub fn mse_criterion<B: Backend>() -> Criterion<B> {
    Box::new(|predicted, target| MseLoss::new().forward(predicted, target, Reduction::Mean))
}

/// バッチに対する損失を計算します。
///
/// トライアル解を方程式系に代入して残差を求め、残差ごとに損失関数を適用して合計し、
/// 追加ペナルティ項があれば加えます。
pub(crate) fn calculate_loss<B: AutodiffBackend>(
    ts: &Tensor<B, 2>,
    nets: &NetCollection<B>,
    conditions: &[Condition],
    ode_system: &OdeSystem<B>,
    criterion: &Criterion<B>,
    additional_loss_term: Option<&AdditionalLossTerm<B>>,
) -> Result<Tensor<B, 1>, SolveError> {
    let vars = trial_variables(nets, ts, conditions);
    let residuals = ode_system(&vars, ts);
    if residuals.len() != conditions.len() {
        return Err(SolveError::ResidualCountMismatch {
            expected: conditions.len(),
            got: residuals.len(),
        });
    }

    let mut residuals = residuals.into_iter();
    let first = residuals.next().ok_or(SolveError::NoConditions)?;
    let mut loss = criterion(first.clone(), Tensor::zeros_like(&first));
    for residual in residuals {
        loss = loss + criterion(residual.clone(), Tensor::zeros_like(&residual));
    }
    if let Some(term) = additional_loss_term {
        loss = loss + term(&vars, ts);
    }
    Ok(loss)
}

/// バッチに対する全メトリクスを計算します。勾配計算には影響しません。
pub(crate) fn calculate_metrics<B: AutodiffBackend>(
    ts: &Tensor<B, 2>,
    nets: &NetCollection<B>,
    conditions: &[Condition],
    metrics: &[(String, MetricFn<B>)],
) -> Vec<(String, f64)> {
    let vars = trial_variables(nets, ts, conditions);
    metrics
        .iter()
        .map(|(name, metric)| {
            let value = metric(&vars, ts).into_scalar().elem::<f64>();
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Fcnn;
    use burn::backend::{Autodiff, NdArray};

    type B = Autodiff<NdArray<f32>>;

    fn collection(device: &<B as Backend>::Device) -> NetCollection<B> {
        NetCollection::new(vec![Fcnn::new(1, 1, &[16], device)])
    }

    fn column(values: &[f32], device: &<B as Backend>::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(values, device).reshape([values.len(), 1])
    }

    #[test]
    fn derivative_matches_finite_differences() {
        let device = Default::default();
        let nets = collection(&device);
        let conditions = vec![Condition::ivp(0.0, 1.0)];
        let points = [0.2f32, 0.5, 1.1];
        let h = 1e-2f32;

        let ts = column(&points, &device);
        let vars = trial_variables(&nets, &ts, &conditions);
        let derivative: Vec<f32> = vars[0].derivative().into_data().iter().collect();

        let shifted_up: Vec<f32> = points.iter().map(|t| t + h).collect();
        let shifted_down: Vec<f32> = points.iter().map(|t| t - h).collect();
        let eval = |points: &[f32]| -> Vec<f32> {
            let us = trial_solution(&nets, &column(points, &device), &conditions);
            us[0].clone().into_data().iter().collect()
        };
        let u_up = eval(&shifted_up);
        let u_down = eval(&shifted_down);

        for i in 0..points.len() {
            let expected = (u_up[i] - u_down[i]) / (2.0 * h);
            assert!(
                (derivative[i] - expected).abs() < 1e-2,
                "du/dt = {}, finite difference = {}",
                derivative[i],
                expected
            );
        }
    }

    #[test]
    fn zero_residuals_give_zero_loss() {
        let device = Default::default();
        let nets = collection(&device);
        let conditions = vec![Condition::ivp(0.0, 1.0)];
        let ts = column(&[0.0, 0.5, 1.0], &device);
        let system: OdeSystem<B> = Box::new(|_vars, ts| vec![Tensor::zeros_like(ts)]);
        let criterion = mse_criterion::<B>();
        let loss = calculate_loss(&ts, &nets, &conditions, &system, &criterion, None).unwrap();
        assert!(loss.into_scalar() < 1e-12f32);
    }

    #[test]
    fn residual_count_mismatch_is_rejected() {
        let device = Default::default();
        let nets = collection(&device);
        let conditions = vec![Condition::ivp(0.0, 1.0)];
        let ts = column(&[0.0, 1.0], &device);
        let system: OdeSystem<B> = Box::new(|vars, _ts| {
            vec![vars[0].value(), vars[0].value()]
        });
        let criterion = mse_criterion::<B>();
        let result = calculate_loss(&ts, &nets, &conditions, &system, &criterion, None);
        assert!(matches!(
            result,
            Err(SolveError::ResidualCountMismatch {
                expected: 1,
                got: 2
            })
        ));
    }

    #[test]
    fn metrics_are_evaluated_on_the_trial_solution() {
        let device = Default::default();
        let nets = collection(&device);
        let conditions = vec![Condition::ivp(0.0, 3.0)];
        let ts = column(&[0.0], &device);
        let metrics: Vec<(String, MetricFn<B>)> = vec![(
            "mean_u".to_string(),
            Box::new(|vars, _ts| vars[0].value().mean()),
        )];
        let computed = calculate_metrics(&ts, &nets, &conditions, &metrics);
        assert_eq!(computed.len(), 1);
        assert_eq!(computed[0].0, "mean_u");
        // 初期条件により t=0 でのトライアル解は厳密に 3.0 になる。
        assert!((computed[0].1 - 3.0).abs() < 1e-5);
    }
}
