use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Tanh};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 解の近似に使う全結合ニューラルネットワーク。
///
/// 独立変数tを入力とし、従属変数の値を予測する多層パーセプトロン（MLP）です。
/// 共有ネットワークモードでは1本のネットワークが全従属変数を出力し、
/// 各条件が自分の出力スロット（列）を選択します。
#[derive(Module, Debug)]
pub struct Fcnn<B: Backend> {
    linears: Vec<Linear<B>>,
    activation: Tanh,
}

impl<B: Backend> Fcnn<B> {
    /// 新しいネットワークを初期化します。
    ///
    /// `hidden` は隠れ層のユニット数の列です。
    pub fn new(n_input: usize, n_output: usize, hidden: &[usize], device: &B::Device) -> Self {
        let mut linears = Vec::new();
        let mut n_in = n_input;
        for &n_hidden in hidden {
            linears.push(LinearConfig::new(n_in, n_hidden).init(device));
            n_in = n_hidden;
        }
        linears.push(LinearConfig::new(n_in, n_output).init(device));
        Self {
            linears,
            activation: Tanh::new(),
        }
    }

    /// ネットワークの順伝播を実行します。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = input;
        for i in 0..(self.linears.len() - 1) {
            x = self.linears[i].forward(x);
            x = self.activation.forward(x);
        }
        self.linears.last().unwrap().forward(x)
    }
}

/// 学習対象となるネットワーク一式。
///
/// 共有ネットワークモードでは1本、従属変数ごとのモードでは条件と同数のネットワークを
/// 保持します。全体を1つの`Module`として扱うことで、1つのオプティマイザが
/// すべての学習パラメータを更新できます。
#[derive(Module, Debug)]
pub struct NetCollection<B: Backend> {
    nets: Vec<Fcnn<B>>,
}

impl<B: Backend> NetCollection<B> {
    /// ネットワークのリストからコレクションを作ります。
    pub fn new(nets: Vec<Fcnn<B>>) -> Self {
        Self { nets }
    }

    /// 保持しているネットワークのスライスを返します。
    pub fn nets(&self) -> &[Fcnn<B>] {
        &self.nets
    }

    /// 共有ネットワークモードかどうか。
    ///
    /// ネットワークが1本のときは、全条件がその出力スロットを通して同じネットワークを
    /// 参照します。条件が1つだけの場合は両モードの動作が一致します。
    pub fn is_single(&self) -> bool {
        self.nets.len() == 1
    }
}
