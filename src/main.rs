//! # ニューラルネットワークODEソルバーのサンプルプログラム
//!
//! `burn` フレームワークを使用して、常微分方程式の解をニューラルネットワークで
//! 近似するサンプルです。
//!
//! `clap` クレートを利用して、コマンドラインから単一方程式（`solve`）と
//! 連立系（`system`）のデモを個別に実行できます。
//!
//! ## 使い方
//!
//! ### 減衰方程式 u' = -u
//! ```bash
//! cargo run --release -- solve
//! ```
//!
//! ### 連立系 u' = v, v' = -u
//! ```bash
//! cargo run --release -- system
//! ```

use std::f64::consts::PI;
use std::time::Instant;

use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use pinn_ode::cli::{Cli, Commands};
use pinn_ode::{
    Condition, Outputs, PlotMonitor, SolverConfig, TrialVariable, solve, solve_system,
};
use plotters::prelude::*;

type MyBackend = Autodiff<NdArray<f32>>;

/// `solve`サブコマンドを実行します。
///
/// 減衰方程式 u' = -u を初期条件 u(0) = 1 のもとで解き、
/// 解析解 e^{-t} と比較したグラフを保存します。
fn run_solve(epochs: usize) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();

    println!("学習を開始します (減衰方程式 u' = -u) - バックエンド: NdArray (CPU)");
    let training_start = Instant::now();

    let config = SolverConfig::<MyBackend> {
        t_min: Some(0.0),
        t_max: Some(2.0),
        max_epochs: epochs,
        monitor: Some(Box::new(PlotMonitor::new(
            (epochs / 10).max(1),
            0.0,
            2.0,
            "monitor.png",
            &device,
        ))),
        ..SolverConfig::new(device)
    };
    let output = solve(
        |u: &TrialVariable<MyBackend>, _ts| u.derivative() + u.value(),
        Condition::ivp(0.0, 1.0),
        config,
    )?;

    println!("学習が完了しました。");
    println!("=> 学習時間: {:.2?}", training_start.elapsed());
    if let (Some(train), Some(valid)) = (
        output.history.train_loss().last(),
        output.history.valid_loss().last(),
    ) {
        println!("=> 最終損失: train {:.6}, valid {:.6}", train, valid);
    }

    let ts: Vec<f64> = (0..=100).map(|i| i as f64 * 2.0 / 100.0).collect();
    let values = match output.solution.evaluate_numeric(&ts) {
        Outputs::One(values) => values,
        Outputs::Many(_) => unreachable!("the decay equation has a single dependent variable"),
    };
    let exact: Vec<f64> = ts.iter().map(|t| (-t).exp()).collect();
    plot_curves(
        "solution.png",
        "Exponential Decay",
        &ts,
        &[("u (network)".to_string(), values), ("exp(-t)".to_string(), exact)],
    )?;
    println!("=> 解のグラフを 'solution.png' に保存しました。");

    Ok(())
}

/// `system`サブコマンドを実行します。
///
/// 連立系 u' = v, v' = -u を初期条件 u(0) = 0, v(0) = 1 のもとで
/// 共有ネットワーク（省略時のデフォルト構成）で解き、
/// 解析解 sin(t), cos(t) と比較したグラフを保存します。
fn run_system(epochs: usize) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let t_max = 2.0 * PI;

    println!("学習を開始します (連立系 u' = v, v' = -u) - バックエンド: NdArray (CPU)");
    let training_start = Instant::now();

    let config = SolverConfig::<MyBackend> {
        t_min: Some(0.0),
        t_max: Some(t_max),
        max_epochs: epochs,
        monitor: Some(Box::new(PlotMonitor::new(
            (epochs / 10).max(1),
            0.0,
            t_max,
            "monitor.png",
            &device,
        ))),
        ..SolverConfig::new(device)
    };
    let output = solve_system(
        |vars: &[TrialVariable<MyBackend>], _ts| {
            vec![
                vars[0].derivative() - vars[1].value(),
                vars[1].derivative() + vars[0].value(),
            ]
        },
        vec![Condition::ivp(0.0, 0.0), Condition::ivp(0.0, 1.0)],
        config,
    )?;

    println!("学習が完了しました。");
    println!("=> 学習時間: {:.2?}", training_start.elapsed());

    let ts: Vec<f64> = (0..=100).map(|i| i as f64 * t_max / 100.0).collect();
    let values = match output.solution.evaluate_numeric(&ts) {
        Outputs::Many(values) => values,
        Outputs::One(_) => unreachable!("the system has two dependent variables"),
    };
    let exact_u: Vec<f64> = ts.iter().map(|t| t.sin()).collect();
    let exact_v: Vec<f64> = ts.iter().map(|t| t.cos()).collect();
    plot_curves(
        "system.png",
        "Harmonic System",
        &ts,
        &[
            ("u (network)".to_string(), values[0].clone()),
            ("v (network)".to_string(), values[1].clone()),
            ("sin(t)".to_string(), exact_u),
            ("cos(t)".to_string(), exact_v),
        ],
    )?;
    println!("=> 解のグラフを 'system.png' に保存しました。");

    Ok(())
}

/// 複数の曲線を1枚のグラフとしてPNGファイルに出力します。
fn plot_curves(
    path: &str,
    caption: &str,
    ts: &[f64],
    curves: &[(String, Vec<f64>)],
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let t_min = *ts.first().unwrap_or(&0.0);
    let t_max = *ts.last().unwrap_or(&1.0);
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for (_, curve) in curves {
        for &v in curve {
            y_min = y_min.min(v);
            y_max = y_max.max(v);
        }
    }
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(t_min..t_max, y_min..y_max)?;
    chart.configure_mesh().x_desc("t").y_desc("u").draw()?;
    for (i, (label, curve)) in curves.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(
                ts.iter().zip(curve).map(|(&t, &v)| (t, v)),
                &color,
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、`solve`または`system`の処理に振り分けます。
fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Solve { epochs } => run_solve(*epochs),
        Commands::System { epochs } => run_system(*epochs),
    };
    if let Err(e) = result {
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}
