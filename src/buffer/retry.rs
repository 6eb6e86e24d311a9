use crate::buffer::TransientBuffer;
use crate::error::check_status;
use crate::metrics::BufferMetrics;
use crate::{ErrorKind, Result};

/// 結果長が不明なネイティブ呼び出しに対する、バッファ拡張と再試行の方針.
///
/// 各試行では、直前よりも真に大きなバッファが使用される.
/// ネイティブ呼び出しの結果に応じて、以下のように振る舞う:
///
/// - `-ERANGE`: バッファが不足しているので、容量を倍にして再試行する
/// - バッファ容量を超える正の値: 必要サイズが通知されたものとみなし、
///   そのサイズ以上(かつ現在の倍以上)のバッファで再試行する
/// - その他の負の値: 終端的なエラーとして扱い、バッファは破棄される
/// - それ以外: 成功とみなし、有効部分をコピーして返す
#[derive(Debug, Clone)]
pub struct GrowRetryPolicy {
    initial_size: usize,
    max_attempts: Option<usize>,
    metrics: Option<BufferMetrics>,
}
impl GrowRetryPolicy {
    /// 初期サイズ`initial_size`の`GrowRetryPolicy`インスタンスを生成する.
    ///
    /// 試行回数はデフォルトでは無制限.
    pub fn new(initial_size: usize) -> Self {
        GrowRetryPolicy {
            initial_size,
            max_attempts: None,
            metrics: None,
        }
    }

    /// 最初の試行で使用するバッファのサイズを設定する.
    pub fn initial_size(&mut self, size: usize) -> &mut Self {
        self.initial_size = size;
        self
    }

    /// 最大試行回数を設定する.
    ///
    /// この回数内に成功しなかった場合には`ErrorKind::BufferExhausted`エラーが返される.
    pub fn max_attempts(&mut self, n: usize) -> &mut Self {
        self.max_attempts = Some(n);
        self
    }

    /// バッファの割当や再試行を記録するメトリクスを設定する.
    pub fn metrics(&mut self, metrics: BufferMetrics) -> &mut Self {
        self.metrics = Some(metrics);
        self
    }

    /// `call`を成功するまで繰り返し呼び出し、結果のバイト列を返す.
    ///
    /// `call`はバッファを受け取り、ネイティブ層のステータスを返す.
    pub fn run<F>(&self, call: F) -> Result<Vec<u8>>
    where
        F: FnMut(&mut [u8]) -> i32,
    {
        track!(self.run_with_trace(call)).map(RetryOutcome::into_bytes)
    }

    /// `run`と同様だが、各試行で使用したバッファ容量も合わせて返す.
    pub fn run_with_trace<F>(&self, mut call: F) -> Result<RetryOutcome>
    where
        F: FnMut(&mut [u8]) -> i32,
    {
        let mut buf = TransientBuffer::allocate(self.initial_size);
        let mut capacities = Vec::new();
        loop {
            if let Some(max) = self.max_attempts {
                if capacities.len() >= max {
                    if let Some(ref m) = self.metrics {
                        m.exhausted.increment();
                    }
                    track_panic!(
                        ErrorKind::BufferExhausted,
                        "Gave up after {} attempts (last capacity: {:?})",
                        capacities.len(),
                        capacities.last()
                    );
                }
            }
            capacities.push(buf.capacity());
            if let Some(ref m) = self.metrics {
                m.count_allocation(buf.capacity());
                if capacities.len() > 1 {
                    m.grow_retries.increment();
                }
            }

            let status = call(buf.as_bytes_mut());
            if status == -libc::ERANGE {
                buf = buf.grow();
                continue;
            }

            let len = track!(check_status(ErrorKind::Other, status))? as usize;
            if len > buf.capacity() {
                buf = buf.grow_to(len);
                continue;
            }
            return Ok(RetryOutcome {
                bytes: buf.materialize(len),
                capacities,
            });
        }
    }
}
impl Default for GrowRetryPolicy {
    fn default() -> Self {
        GrowRetryPolicy::new(64)
    }
}

/// `GrowRetryPolicy::run_with_trace`の結果.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    bytes: Vec<u8>,
    capacities: Vec<usize>,
}
impl RetryOutcome {
    /// 取得されたバイト列への参照を返す.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 所有権を放棄して、取得されたバイト列を返す.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// 各試行で使用されたバッファ容量の一覧(試行順).
    pub fn capacities(&self) -> &[usize] {
        &self.capacities
    }

    /// 再試行の回数(最初の試行は含まない).
    pub fn retries(&self) -> usize {
        self.capacities.len().saturating_sub(1)
    }
}
