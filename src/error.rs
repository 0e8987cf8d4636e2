use thiserror::Error;

/// ソルバーの設定・実行で発生するエラー。
///
/// すべて致命的で、学習ループは発生時点のエポックで中断されます。
/// リトライやエポック途中からの復旧は行いません。
#[derive(Debug, Error)]
pub enum SolveError {
    /// `single_net` と `nets` が同時に指定された。
    #[error("only one of single_net and nets should be specified")]
    ConflictingNetworks,

    /// ジェネレータが省略されたのに、定義域の境界が指定されていない。
    #[error("t_min and t_max must be specified when generators are not provided")]
    MissingDomainBounds,

    /// 条件リストが空。
    #[error("at least one condition is required")]
    NoConditions,

    /// `nets` の本数が条件の数と一致しない。
    #[error("expected {expected} nets (one per condition), got {got}")]
    NetCountMismatch { expected: usize, got: usize },

    /// 方程式系が返した残差の個数が条件の数と一致しない。
    #[error("ode_system returned {got} residuals for {expected} conditions")]
    ResidualCountMismatch { expected: usize, got: usize },

    /// モニターの検査が失敗した。
    #[error("monitor check failed: {0}")]
    Monitor(String),
}
