use std::collections::BTreeMap;

use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use rand::seq::SliceRandom;

use crate::conditions::Condition;
use crate::error::SolveError;
use crate::generators::{Generator1D, PointGenerator, SamplingMethod};
use crate::inference::Solution;
use crate::loss::{
    AdditionalLossTerm, Criterion, MetricFn, OdeSystem, TrialVariable, calculate_loss,
    calculate_metrics, mse_criterion,
};
use crate::model::{Fcnn, NetCollection};
use crate::monitor::Monitor;

/// エポックごとの損失・メトリクスの記録。
///
/// 固定の系列 `train_loss`・`valid_loss` に加えて、メトリクスごとに
/// `train__<名前>`・`valid__<名前>` の系列を持ちます。各系列はエポックごとに
/// ちょうど1要素ずつ追記され、添字がエポック番号に対応します。
#[derive(Debug, Clone, Default)]
pub struct History {
    series: BTreeMap<String, Vec<f64>>,
}

impl History {
    /// 学習損失の系列名。
    pub const TRAIN_LOSS: &'static str = "train_loss";
    /// 検証損失の系列名。
    pub const VALID_LOSS: &'static str = "valid_loss";

    fn register(&mut self, name: &str) {
        self.series.entry(name.to_string()).or_default();
    }

    fn append(&mut self, name: &str, value: f64) {
        self.series.entry(name.to_string()).or_default().push(value);
    }

    /// 指定した系列を返します。
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    /// 学習損失の系列を返します。
    pub fn train_loss(&self) -> &[f64] {
        self.get(Self::TRAIN_LOSS).unwrap_or(&[])
    }

    /// 検証損失の系列を返します。
    pub fn valid_loss(&self) -> &[f64] {
        self.get(Self::VALID_LOSS).unwrap_or(&[])
    }

    /// 記録済みのエポック数。
    pub fn epochs(&self) -> usize {
        self.train_loss().len()
    }

    /// 系列名の一覧を返します。
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

/// パラメータ更新則。損失のbackwardで得た勾配を使ってネットワーク一式を更新します。
pub trait ParamOptimizer<B: AutodiffBackend> {
    /// 1回の更新を適用し、更新後のネットワーク一式を返します。
    fn step(&mut self, nets: NetCollection<B>, grads: GradientsParams) -> NetCollection<B>;
}

/// デフォルトのパラメータ更新則（Adam）。
pub struct AdamOptimizer<B: AutodiffBackend> {
    optim: OptimizerAdaptor<Adam, NetCollection<B>, B>,
    learning_rate: f64,
}

impl<B: AutodiffBackend> AdamOptimizer<B> {
    /// 指定した学習率でAdamを初期化します。
    pub fn new(learning_rate: f64) -> Self {
        Self {
            optim: AdamConfig::new().init(),
            learning_rate,
        }
    }
}

impl<B: AutodiffBackend> ParamOptimizer<B> for AdamOptimizer<B> {
    fn step(&mut self, nets: NetCollection<B>, grads: GradientsParams) -> NetCollection<B> {
        self.optim.step(self.learning_rate, nets, grads)
    }
}

/// ソルバーの設定。
///
/// `single_net` と `nets` はどちらか一方のみ指定できます。両方省略した場合は、
/// 条件の数だけ出力ユニットを持つ共有ネットワーク（隠れ層 (32, 32)、tanh）が
/// 構築されます。ジェネレータを省略する場合は `t_min`・`t_max` が必要です。
pub struct SolverConfig<B: AutodiffBackend> {
    /// テンソルを配置するデバイス。
    pub device: B::Device,
    /// 定義域の下限。ジェネレータを省略した場合のみ必要です。
    pub t_min: Option<f64>,
    /// 定義域の上限。ジェネレータを省略した場合のみ必要です。
    pub t_max: Option<f64>,
    /// 全従属変数を出力する共有ネットワーク。
    pub single_net: Option<Fcnn<B>>,
    /// 従属変数ごとのネットワークのリスト。
    pub nets: Option<Vec<Fcnn<B>>>,
    /// 学習点のジェネレータ。省略時は32点の `EquallySpacedNoisy`。
    pub train_generator: Option<Box<dyn PointGenerator<B>>>,
    /// 検証点のジェネレータ。省略時は32点の `EquallySpaced`。
    pub valid_generator: Option<Box<dyn PointGenerator<B>>>,
    /// エポックごとに学習点の順序をシャッフルするかどうか。
    pub shuffle: bool,
    /// パラメータ更新則。省略時は学習率1e-3のAdam。
    pub optimizer: Option<Box<dyn ParamOptimizer<B>>>,
    /// 損失関数。省略時はゼロ目標への二乗平均誤差。
    pub criterion: Option<Criterion<B>>,
    /// 損失への追加ペナルティ項。
    pub additional_loss_term: Option<AdditionalLossTerm<B>>,
    /// 記録するメトリクス（名前と関数の組）。
    pub metrics: Vec<(String, MetricFn<B>)>,
    /// ミニバッチのサイズ。
    pub batch_size: usize,
    /// 学習するエポック数。
    pub max_epochs: usize,
    /// 学習状況を定期的に検査するモニター。
    pub monitor: Option<Box<dyn Monitor<B>>>,
    /// 解決済みの内部状態も返すかどうか。
    pub return_internal: bool,
    /// 検証損失が最小だったスナップショットを返すかどうか。
    pub return_best: bool,
}

impl<B: AutodiffBackend> SolverConfig<B> {
    /// デフォルト値の設定を作ります。
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            t_min: None,
            t_max: None,
            single_net: None,
            nets: None,
            train_generator: None,
            valid_generator: None,
            shuffle: true,
            optimizer: None,
            criterion: None,
            additional_loss_term: None,
            metrics: Vec::new(),
            batch_size: 16,
            max_epochs: 1000,
            monitor: None,
            return_internal: false,
            return_best: false,
        }
    }
}

impl<B: AutodiffBackend> Default for SolverConfig<B>
where
    B::Device: Default,
{
    fn default() -> Self {
        Self::new(B::Device::default())
    }
}

/// 学習ループが解決・使用した内部状態。
pub struct Internal<B: AutodiffBackend> {
    /// 学習後のネットワーク一式。
    pub nets: NetCollection<B>,
    /// 出力スロット割り当て済みの条件リスト。
    pub conditions: Vec<Condition>,
    /// 学習点のジェネレータ。
    pub train_generator: Box<dyn PointGenerator<B>>,
    /// 検証点のジェネレータ。
    pub valid_generator: Box<dyn PointGenerator<B>>,
    /// パラメータ更新則。
    pub optimizer: Box<dyn ParamOptimizer<B>>,
    /// 損失関数。
    pub criterion: Criterion<B>,
}

/// 学習の結果。
pub struct SolveOutput<B: AutodiffBackend> {
    /// 学習済みの解。`return_best` が有効なら検証損失最小のスナップショット。
    pub solution: Solution<B>,
    /// エポックごとの損失・メトリクスの記録。
    pub history: History,
    /// `return_internal` が有効な場合のみ、解決済みの内部状態。
    pub internal: Option<Internal<B>>,
}

/// 設定を検証し、省略された構成要素をデフォルトで埋めた完全な状態。
struct Resolved<B: AutodiffBackend> {
    device: B::Device,
    nets: NetCollection<B>,
    conditions: Vec<Condition>,
    train_generator: Box<dyn PointGenerator<B>>,
    valid_generator: Box<dyn PointGenerator<B>>,
    shuffle: bool,
    optimizer: Box<dyn ParamOptimizer<B>>,
    criterion: Criterion<B>,
    additional_loss_term: Option<AdditionalLossTerm<B>>,
    metrics: Vec<(String, MetricFn<B>)>,
    batch_size: usize,
    max_epochs: usize,
    monitor: Option<Box<dyn Monitor<B>>>,
    return_internal: bool,
    return_best: bool,
}

/// 設定解決フェーズ。学習開始前のすべての検証とデフォルト構築をここで行います。
fn resolve<B: AutodiffBackend>(
    mut conditions: Vec<Condition>,
    config: SolverConfig<B>,
) -> Result<Resolved<B>, SolveError> {
    if conditions.is_empty() {
        return Err(SolveError::NoConditions);
    }

    let nets = match (config.single_net, config.nets) {
        (Some(_), Some(_)) => return Err(SolveError::ConflictingNetworks),
        (Some(net), None) => vec![net],
        (None, Some(nets)) => {
            if nets.len() != conditions.len() {
                return Err(SolveError::NetCountMismatch {
                    expected: conditions.len(),
                    got: nets.len(),
                });
            }
            nets
        }
        (None, None) => vec![Fcnn::new(1, conditions.len(), &[32, 32], &config.device)],
    };
    let nets = NetCollection::new(nets);

    // 共有ネットワークモードでは、各条件に担当する出力スロットをここで一度だけ割り当てる。
    if nets.is_single() {
        for (index, condition) in conditions.iter_mut().enumerate() {
            condition.set_output_slot(index);
        }
    }

    let bounds = (config.t_min, config.t_max);
    let require_bounds = || match bounds {
        (Some(t_min), Some(t_max)) => Ok((t_min, t_max)),
        _ => Err(SolveError::MissingDomainBounds),
    };
    let train_generator: Box<dyn PointGenerator<B>> = match config.train_generator {
        Some(generator) => generator,
        None => {
            let (t_min, t_max) = require_bounds()?;
            Box::new(Generator1D::new(
                32,
                t_min,
                t_max,
                SamplingMethod::EquallySpacedNoisy,
                &config.device,
            ))
        }
    };
    let valid_generator: Box<dyn PointGenerator<B>> = match config.valid_generator {
        Some(generator) => generator,
        None => {
            let (t_min, t_max) = require_bounds()?;
            Box::new(Generator1D::new(
                32,
                t_min,
                t_max,
                SamplingMethod::EquallySpaced,
                &config.device,
            ))
        }
    };

    let optimizer = config
        .optimizer
        .unwrap_or_else(|| Box::new(AdamOptimizer::new(1e-3)));
    let criterion = config.criterion.unwrap_or_else(mse_criterion);

    log::debug!(
        "resolved configuration: {} net(s) for {} condition(s), batch_size={}, max_epochs={}",
        nets.nets().len(),
        conditions.len(),
        config.batch_size,
        config.max_epochs,
    );

    Ok(Resolved {
        device: config.device,
        nets,
        conditions,
        train_generator,
        valid_generator,
        shuffle: config.shuffle,
        optimizer,
        criterion,
        additional_loss_term: config.additional_loss_term,
        metrics: config.metrics,
        batch_size: config.batch_size,
        max_epochs: config.max_epochs,
        monitor: config.monitor,
        return_internal: config.return_internal,
        return_best: config.return_best,
    })
}

fn column_batch<B: Backend>(points: &[f32], device: &B::Device) -> Tensor<B, 2> {
    Tensor::<B, 1>::from_floats(points, device).reshape([points.len(), 1])
}

/// 単一の常微分方程式を解くネットワークを学習します。
///
/// 方程式 F(u, t) = 0 に対して、`ode` は (u, t) から F(u, t) を返す関数です。
pub fn solve<B: AutodiffBackend>(
    ode: impl Fn(&TrialVariable<B>, &Tensor<B, 2>) -> Tensor<B, 2> + 'static,
    condition: Condition,
    config: SolverConfig<B>,
) -> Result<SolveOutput<B>, SolveError> {
    solve_system(
        move |vars: &[TrialVariable<B>], ts: &Tensor<B, 2>| vec![ode(&vars[0], ts)],
        vec![condition],
        config,
    )
}

/// 連立常微分方程式を解くネットワークを学習します。
///
/// 方程式系 F_i(u_1, ..., u_n, t) = 0 に対して、`ode_system` は従属変数の列とtから
/// 残差のリスト（i番目がF_i）を返す関数です。`conditions` のi番目がu_iの満たすべき
/// 条件です。
///
/// 各エポックでは、学習点全体をミニバッチに分割して順にパラメータを更新したあと、
/// 学習セット全体と検証セット全体でそれぞれ損失とメトリクスを再計算して記録します。
/// モニターが設定されていれば `check_every` エポックごとに呼び出します。
pub fn solve_system<B: AutodiffBackend>(
    ode_system: impl Fn(&[TrialVariable<B>], &Tensor<B, 2>) -> Vec<Tensor<B, 2>> + 'static,
    conditions: Vec<Condition>,
    config: SolverConfig<B>,
) -> Result<SolveOutput<B>, SolveError> {
    let ode_system: OdeSystem<B> = Box::new(ode_system);
    let Resolved {
        device,
        mut nets,
        conditions,
        mut train_generator,
        mut valid_generator,
        shuffle,
        mut optimizer,
        criterion,
        additional_loss_term,
        metrics,
        batch_size,
        max_epochs,
        mut monitor,
        return_internal,
        return_best,
    } = resolve(conditions, config)?;

    let mut history = History::default();
    history.register(History::TRAIN_LOSS);
    history.register(History::VALID_LOSS);
    for (name, _) in &metrics {
        history.register(&format!("train__{name}"));
        history.register(&format!("valid__{name}"));
    }

    let mut best: Option<(f64, Solution<B>)> = None;

    for epoch in 0..max_epochs {
        // 学習パス: 点列を引き直し、（必要なら）シャッフルした順でミニバッチ学習する。
        let points: Vec<f32> = train_generator.get_examples().into_data().iter().collect();
        let n_examples = train_generator.size();
        let mut order: Vec<usize> = (0..n_examples).collect();
        if shuffle {
            order.shuffle(&mut rand::rng());
        }
        for batch_indices in order.chunks(batch_size) {
            let batch: Vec<f32> = batch_indices.iter().map(|&i| points[i]).collect();
            let ts = column_batch::<B>(&batch, &device);
            let loss = calculate_loss(
                &ts,
                &nets,
                &conditions,
                &ode_system,
                &criterion,
                additional_loss_term.as_ref(),
            )?;
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &nets);
            nets = optimizer.step(nets, grads);
        }

        // 記録するエポック損失は、バッチ損失の平均ではなく学習セット全体で再計算する。
        let ts_train = column_batch::<B>(&points, &device);
        let train_loss = calculate_loss(
            &ts_train,
            &nets,
            &conditions,
            &ode_system,
            &criterion,
            additional_loss_term.as_ref(),
        )?
        .into_scalar()
        .elem::<f64>();
        let train_metrics = calculate_metrics(&ts_train, &nets, &conditions, &metrics);

        // 検証パス: 勾配更新なしの読み取り専用評価。
        let valid_points: Vec<f32> = valid_generator.get_examples().into_data().iter().collect();
        let ts_valid = column_batch::<B>(&valid_points, &device);
        let valid_loss = calculate_loss(
            &ts_valid,
            &nets,
            &conditions,
            &ode_system,
            &criterion,
            additional_loss_term.as_ref(),
        )?
        .into_scalar()
        .elem::<f64>();
        let valid_metrics = calculate_metrics(&ts_valid, &nets, &conditions, &metrics);

        history.append(History::TRAIN_LOSS, train_loss);
        for (name, value) in train_metrics {
            history.append(&format!("train__{name}"), value);
        }
        history.append(History::VALID_LOSS, valid_loss);
        for (name, value) in valid_metrics {
            history.append(&format!("valid__{name}"), value);
        }
        log::debug!("epoch {epoch}: train_loss={train_loss:.6e}, valid_loss={valid_loss:.6e}");

        if let Some(monitor) = monitor.as_mut() {
            if epoch % monitor.check_every() == 0 {
                monitor.check(&nets, &conditions, &history)?;
            }
        }

        if return_best {
            let improved = best
                .as_ref()
                .is_none_or(|(min_loss, _)| valid_loss < *min_loss);
            if improved {
                best = Some((valid_loss, Solution::new(&nets, &conditions, &device)));
            }
        }
    }

    let solution = match best {
        Some((_, solution)) => solution,
        None => Solution::new(&nets, &conditions, &device),
    };
    let internal = return_internal.then(|| Internal {
        nets,
        conditions,
        train_generator,
        valid_generator,
        optimizer,
        criterion,
    });

    Ok(SolveOutput {
        solution,
        history,
        internal,
    })
}
