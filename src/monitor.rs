use std::path::PathBuf;

use burn::prelude::Backend;
use burn::tensor::Tensor;
use plotters::prelude::*;

use crate::conditions::Condition;
use crate::error::SolveError;
use crate::loss::trial_solution;
use crate::model::NetCollection;
use crate::training::History;

/// 学習状況を定期的に検査するモニター。
///
/// `check_every` エポックごとに、現在のネットワーク・条件・履歴を渡して呼び出されます。
/// 呼び出しは同期的で、返したエラーは学習ループをそのまま中断させます。
/// 検査は学習結果そのものには影響しません。
pub trait Monitor<B: Backend> {
    /// 何エポックごとに検査するか。
    fn check_every(&self) -> usize;

    /// 現在の学習状態を検査します。
    fn check(
        &mut self,
        nets: &NetCollection<B>,
        conditions: &[Condition],
        history: &History,
    ) -> Result<(), SolveError>;
}

/// トライアル解の曲線と損失の履歴をPNGに描画するモニター。
///
/// 呼び出しのたびに同じファイルを上書きします。
pub struct PlotMonitor<B: Backend> {
    check_every: usize,
    t_min: f64,
    t_max: f64,
    n_points: usize,
    output_path: PathBuf,
    device: B::Device,
}

impl<B: Backend> PlotMonitor<B> {
    /// 新しいモニターを作ります。
    pub fn new(
        check_every: usize,
        t_min: f64,
        t_max: f64,
        output_path: impl Into<PathBuf>,
        device: &B::Device,
    ) -> Self {
        Self {
            check_every,
            t_min,
            t_max,
            n_points: 100,
            output_path: output_path.into(),
            device: device.clone(),
        }
    }

    /// 解の曲線と損失の履歴を左右に並べて描画します。
    fn render(
        &self,
        nets: &NetCollection<B>,
        conditions: &[Condition],
        history: &History,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let step = (self.t_max - self.t_min) / (self.n_points - 1) as f64;
        let points: Vec<f32> = (0..self.n_points)
            .map(|i| (self.t_min + step * i as f64) as f32)
            .collect();
        let ts =
            Tensor::<B, 1>::from_floats(points.as_slice(), &self.device).reshape([self.n_points, 1]);
        let us = trial_solution(nets, &ts, conditions);
        let curves: Vec<Vec<f32>> = us
            .into_iter()
            .map(|u| u.into_data().iter().collect())
            .collect();

        let root = BitMapBackend::new(&self.output_path, (1200, 600)).into_drawing_area();
        root.fill(&WHITE)?;
        let (left, right) = root.split_horizontally(600);

        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;
        for curve in &curves {
            for &u in curve {
                y_min = y_min.min(u as f64);
                y_max = y_max.max(u as f64);
            }
        }
        if y_max - y_min < 1e-6 {
            y_min -= 0.5;
            y_max += 0.5;
        }
        let mut chart = ChartBuilder::on(&left)
            .caption("Trial Solution", ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(self.t_min..self.t_max, y_min..y_max)?;
        chart.configure_mesh().x_desc("t").y_desc("u").draw()?;
        for (i, curve) in curves.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba();
            chart
                .draw_series(LineSeries::new(
                    points
                        .iter()
                        .zip(curve)
                        .map(|(&t, &u)| (t as f64, u as f64)),
                    &color,
                ))?
                .label(format!("u_{i}"))
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;

        let train_loss = history.train_loss();
        let valid_loss = history.valid_loss();
        if !train_loss.is_empty() {
            let log10 = |v: f64| v.max(1e-12).log10();
            let mut min_log = f64::INFINITY;
            let mut max_log = f64::NEG_INFINITY;
            for &v in train_loss.iter().chain(valid_loss) {
                min_log = min_log.min(log10(v));
                max_log = max_log.max(log10(v));
            }
            let mut chart = ChartBuilder::on(&right)
                .caption("Loss History", ("sans-serif", 30).into_font())
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(50)
                .build_cartesian_2d(0..train_loss.len(), min_log - 0.5..max_log + 0.5)?;
            chart
                .configure_mesh()
                .y_desc("Loss (log10 scale)")
                .x_desc("Epochs")
                .draw()?;
            chart
                .draw_series(LineSeries::new(
                    train_loss.iter().enumerate().map(|(i, &v)| (i, log10(v))),
                    &RED,
                ))?
                .label("Train Loss")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
            chart
                .draw_series(LineSeries::new(
                    valid_loss.iter().enumerate().map(|(i, &v)| (i, log10(v))),
                    &BLUE,
                ))?
                .label("Valid Loss")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;
        }
        root.present()?;
        Ok(())
    }
}

impl<B: Backend> Monitor<B> for PlotMonitor<B> {
    fn check_every(&self) -> usize {
        self.check_every
    }

    fn check(
        &mut self,
        nets: &NetCollection<B>,
        conditions: &[Condition],
        history: &History,
    ) -> Result<(), SolveError> {
        self.render(nets, conditions, history)
            .map_err(|e| SolveError::Monitor(e.to_string()))
    }
}
