//! # ニューラルネットワークによる常微分方程式ソルバー
//!
//! `burn` フレームワークを使用して、常微分方程式（系）の解をニューラルネットワークで
//! 近似するためのライブラリです。初期条件・境界条件はネットワーク出力の変換（トライアル解）
//! によって厳密に満たされるため、学習は方程式の残差の最小化のみを行います。
//!
//! 学習は [`training::solve`]（単一方程式）または [`training::solve_system`]（連立系）で
//! 実行し、結果として閉形式の関数のように評価できる [`inference::Solution`] と、
//! エポックごとの損失・メトリクスを記録した [`training::History`] が得られます。

pub mod cli;
pub mod conditions;
pub mod error;
pub mod generators;
pub mod inference;
pub mod loss;
pub mod model;
pub mod monitor;
pub mod training;

pub use conditions::Condition;
pub use error::SolveError;
pub use generators::{Generator1D, PointGenerator, SamplingMethod};
pub use inference::{Outputs, Solution};
pub use loss::{
    AdditionalLossTerm, Criterion, MetricFn, OdeSystem, TrialVariable, mse_criterion,
    trial_solution,
};
pub use model::{Fcnn, NetCollection};
pub use monitor::{Monitor, PlotMonitor};
pub use training::{
    AdamOptimizer, History, Internal, ParamOptimizer, SolveOutput, SolverConfig, solve,
    solve_system,
};
