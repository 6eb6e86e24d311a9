//! ネイティブ層との境界を跨ぐ一時バッファ群.
//!
//! "一時バッファ"とは、ネイティブ呼び出しの実行中に限り、そのアドレスがネイティブ層と共有されるバイト列.
//!
//! - 書き込み系の操作では、呼び出し元のデータは操作の発行前に[TransientBuffer]へと完全にコピーされる
//!   - そのため呼び出し元は、メソッドが返った直後から自分のバッファを自由に変更して良い
//! - 読み込み系の操作では、[SharedBuffer]を介して、発行スレッドと二つの待機スレッドの間で一つのバッファが共有される
//!   - バッファは、両方のマイルストーンが結果をコピーし終えるまで解放されない
//! - 結果長が事前に分からない同期呼び出しでは、[GrowRetryPolicy]に従ってバッファを拡張しながら再試行する
//!
//! [TransientBuffer]: struct.TransientBuffer.html
//! [SharedBuffer]: struct.SharedBuffer.html
//! [GrowRetryPolicy]: struct.GrowRetryPolicy.html
use std::cmp;
use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex};

pub use self::retry::{GrowRetryPolicy, RetryOutcome};

use crate::Result;

mod retry;

/// ネイティブ呼び出しに渡される一時バッファ.
///
/// `grow`は内容を保持しない点に注意(スクラッチ用途専用であり、追記用途には使えない).
#[derive(Clone, PartialEq, Eq)]
pub struct TransientBuffer {
    bytes: Vec<u8>,
}
impl TransientBuffer {
    /// 指定サイズのゼロ埋めされたバッファを割り当てる.
    pub fn allocate(size: usize) -> Self {
        TransientBuffer {
            bytes: vec![0; size],
        }
    }

    /// `data`の内容をコピーしたバッファを生成する.
    ///
    /// 生成後のバッファは`data`とは独立しているため、呼び出し元は`data`を即座に変更しても構わない.
    pub fn drain_from(data: &[u8]) -> Self {
        TransientBuffer {
            bytes: Vec::from(data),
        }
    }

    /// `reader`の内容を終端まで読み込んだバッファを生成する.
    pub fn drain_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        track_io!(reader.read_to_end(&mut bytes))?;
        Ok(TransientBuffer { bytes })
    }

    /// 容量を倍にした新しいバッファを返す.
    ///
    /// 以前の内容は引き継がれない.
    /// また、以前のバッファのアドレスは無効となるので、呼び出し側は保持し続けてはいけない.
    ///
    /// 容量が`0`の場合には、容量`1`のバッファが返される.
    pub fn grow(self) -> Self {
        let capacity = cmp::max(1, self.capacity().saturating_mul(2));
        TransientBuffer::allocate(capacity)
    }

    /// `min_capacity`以上かつ現在の倍以上の容量を持つ新しいバッファを返す.
    pub fn grow_to(self, min_capacity: usize) -> Self {
        let doubled = cmp::max(1, self.capacity().saturating_mul(2));
        TransientBuffer::allocate(cmp::max(doubled, min_capacity))
    }

    /// 先頭から`actual_len`バイト分(有効部分)だけをコピーして返す.
    ///
    /// 結果はこのバッファの寿命から切り離される.
    /// `actual_len`が容量を超えている場合には、容量に切り詰められる.
    pub fn materialize(&self, actual_len: usize) -> Vec<u8> {
        let len = cmp::min(actual_len, self.bytes.len());
        Vec::from(&self.bytes[..len])
    }

    /// バッファの容量を返す.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// バッファの内容への参照を返す.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// バッファの内容への破壊的な参照を返す.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
impl AsRef<[u8]> for TransientBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
impl AsMut<[u8]> for TransientBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
impl fmt::Debug for TransientBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let len = cmp::min(32, self.bytes.len());
        let omitted = if len < self.bytes.len() {
            format!("({} bytes omitted)", self.bytes.len() - len)
        } else {
            "".to_owned()
        };
        write!(
            f,
            "TransientBuffer {{ bytes: {:?}{} }}",
            &self.bytes[..len],
            omitted
        )
    }
}

/// 発行スレッドと待機スレッド群の間で共有される一時バッファ.
///
/// 非同期読み込みでは、ネイティブ層がこのバッファに結果を書き込み、
/// 各マイルストーンの待機スレッドが、それぞれ独立に有効部分をコピーする.
///
/// 最後の参照がドロップされた時点でバッファは解放される.
#[derive(Debug, Clone)]
pub struct SharedBuffer(Arc<Mutex<TransientBuffer>>);
impl SharedBuffer {
    /// 新しい`SharedBuffer`インスタンスを生成する.
    pub fn new(buffer: TransientBuffer) -> Self {
        SharedBuffer(Arc::new(Mutex::new(buffer)))
    }

    /// バッファの容量を返す.
    pub fn capacity(&self) -> Result<usize> {
        let buffer = track!(self.0.lock().map_err(crate::Error::from))?;
        Ok(buffer.capacity())
    }

    /// バッファを排他的に操作する.
    ///
    /// ネイティブ層が結果を書き込む際に使用される.
    pub fn with_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransientBuffer) -> T,
    {
        let mut buffer = track!(self.0.lock().map_err(crate::Error::from))?;
        Ok(f(&mut buffer))
    }

    /// 先頭から`actual_len`バイト分をコピーして返す.
    ///
    /// 呼び出し毎に独立したコピーが生成される.
    pub fn materialize(&self, actual_len: usize) -> Result<Vec<u8>> {
        let buffer = track!(self.0.lock().map_err(crate::Error::from))?;
        Ok(buffer.materialize(actual_len))
    }

    /// このバッファを参照しているハンドルの数を返す.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn grow_doubles_capacity() {
        let buf = TransientBuffer::allocate(0);
        assert_eq!(buf.capacity(), 0);

        let buf = buf.grow();
        assert_eq!(buf.capacity(), 1);

        let buf = TransientBuffer::allocate(64).grow();
        assert_eq!(buf.capacity(), 128);
        assert_eq!(buf.as_bytes(), &[0; 128][..]);

        let buf = TransientBuffer::allocate(64).grow_to(1000);
        assert_eq!(buf.capacity(), 1000);

        let buf = TransientBuffer::allocate(64).grow_to(65);
        assert_eq!(buf.capacity(), 128);
    }

    #[test]
    fn materialize_copies_valid_prefix_only() {
        let mut buf = TransientBuffer::allocate(8);
        buf.as_bytes_mut()[..5].copy_from_slice(b"hello");
        assert_eq!(buf.materialize(5), b"hello");
        assert_eq!(buf.materialize(0), b"");
        assert_eq!(buf.materialize(100).len(), 8);

        // 取り出したデータはバッファから独立している
        let data = buf.materialize(5);
        buf.as_bytes_mut()[0] = b'j';
        assert_eq!(data, b"hello");
    }

    #[test]
    fn drain_decouples_from_source() -> TestResult {
        let mut source = b"payload".to_vec();
        let buf = TransientBuffer::drain_from(&source);
        source[0] = b'X';
        assert_eq!(buf.as_bytes(), b"payload");

        let buf = track!(TransientBuffer::drain_reader(&b"from reader"[..]))?;
        assert_eq!(buf.as_bytes(), b"from reader");
        Ok(())
    }

    #[test]
    fn shared_buffer_works() -> TestResult {
        let shared = SharedBuffer::new(TransientBuffer::allocate(4));
        let other = shared.clone();
        assert_eq!(shared.holders(), 2);

        track!(other.with_mut(|b| b.as_bytes_mut().copy_from_slice(b"abcd")))?;
        assert_eq!(track!(shared.materialize(3))?, b"abc");
        assert_eq!(track!(shared.capacity())?, 4);

        drop(other);
        assert_eq!(shared.holders(), 1);
        Ok(())
    }
}
