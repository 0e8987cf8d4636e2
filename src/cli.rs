use clap::{Parser, Subcommand};

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "A neural network ODE solver example with Burn", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（solve または system）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 減衰方程式 u' = -u を解き、解析解と比較した結果を描画します
    Solve {
        /// 学習するエポック数
        #[arg(long, default_value_t = 1000)]
        epochs: usize,
    },
    /// 連立系 u' = v, v' = -u を共有ネットワークで解き、結果を描画します
    System {
        /// 学習するエポック数
        #[arg(long, default_value_t = 1000)]
        epochs: usize,
    },
}
