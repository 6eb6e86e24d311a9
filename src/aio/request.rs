use std::fmt;
use uuid::Uuid;

use crate::backend::{ObjectBackend, PoolId};
use crate::buffer::{SharedBuffer, TransientBuffer};
use crate::error::check_status;
use crate::{ErrorKind, Result};

/// 非同期操作の識別子.
///
/// ログ出力時の相関付けに使用される.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);
impl OperationId {
    /// ランダムな識別子を生成する.
    pub fn new() -> Self {
        OperationId(Uuid::new_v4())
    }

    /// 識別子のUUIDを返す.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}
impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}
impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 非同期操作の種類.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// 指定位置への書き込み.
    Write,

    /// オブジェクト全体の置き換え.
    WriteFull,

    /// 末尾への追記.
    Append,

    /// 指定位置からの読み込み.
    Read,

    /// オブジェクトの削除.
    Remove,
}
impl OperationKind {
    /// ログやメトリクスのラベル用の名前を返す.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Write => "write",
            OperationKind::WriteFull => "write_full",
            OperationKind::Append => "append",
            OperationKind::Read => "read",
            OperationKind::Remove => "remove",
        }
    }
}

/// 一つの非同期操作の内容.
///
/// 書き込み系の操作のペイロードは、生成時点で呼び出し元のバッファからコピーされており、
/// ネイティブ層に渡されるまでは、このインスタンスが排他的に所有する.
#[derive(Debug)]
pub struct OperationRequest {
    id: OperationId,
    oid: String,
    kind: OperationKind,
    payload: Option<TransientBuffer>,
    offset: u64,
    length: usize,
}
impl OperationRequest {
    /// オブジェクトの`offset`位置に`data`を書き込む操作.
    pub fn write(oid: &str, data: &[u8], offset: u64) -> Self {
        Self::with_payload(oid, OperationKind::Write, data, offset)
    }

    /// オブジェクトの内容を`data`で置き換える操作.
    pub fn write_full(oid: &str, data: &[u8]) -> Self {
        Self::with_payload(oid, OperationKind::WriteFull, data, 0)
    }

    /// オブジェクトの末尾に`data`を追記する操作.
    pub fn append(oid: &str, data: &[u8]) -> Self {
        Self::with_payload(oid, OperationKind::Append, data, 0)
    }

    /// オブジェクトを削除する操作.
    pub fn remove(oid: &str) -> Self {
        OperationRequest {
            id: OperationId::new(),
            oid: oid.to_owned(),
            kind: OperationKind::Remove,
            payload: None,
            offset: 0,
            length: 0,
        }
    }

    /// オブジェクトの`offset`位置から最大`length`バイトを読み込む操作.
    pub fn read(oid: &str, length: usize, offset: u64) -> Self {
        OperationRequest {
            id: OperationId::new(),
            oid: oid.to_owned(),
            kind: OperationKind::Read,
            payload: None,
            offset,
            length,
        }
    }

    /// 操作の識別子を返す.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// 対象オブジェクトの名前を返す.
    pub fn oid(&self) -> &str {
        &self.oid
    }

    /// 操作の種類を返す.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// 書き込み系の操作のペイロードを返す.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|b| b.as_bytes())
    }

    /// 操作対象の位置を返す.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 操作対象の長さを返す.
    ///
    /// 書き込み系の操作ではペイロードのサイズ、読み込み操作では読み込みバッファのサイズ.
    pub fn length(&self) -> usize {
        self.length
    }

    /// ネイティブ層に操作を発行する.
    ///
    /// 読み込み操作の場合には、結果の書き込み先となる共有バッファが返される.
    pub(crate) fn issue<B: ObjectBackend>(
        self,
        backend: &B,
        pool: PoolId,
        completion: &B::Completion,
    ) -> Result<Option<SharedBuffer>> {
        let OperationRequest {
            oid,
            kind,
            payload,
            offset,
            length,
            ..
        } = self;
        let data = payload.unwrap_or_else(|| TransientBuffer::allocate(0));
        let mut buffer = None;
        let status = match kind {
            OperationKind::Write => {
                backend.aio_write(pool, &oid, completion, data.as_bytes(), offset)
            }
            OperationKind::WriteFull => {
                backend.aio_write_full(pool, &oid, completion, data.as_bytes())
            }
            OperationKind::Append => backend.aio_append(pool, &oid, completion, data.as_bytes()),
            OperationKind::Remove => backend.aio_remove(pool, &oid, completion),
            OperationKind::Read => {
                let shared = SharedBuffer::new(TransientBuffer::allocate(length));
                let status = backend.aio_read(pool, &oid, completion, shared.clone(), offset);
                buffer = Some(shared);
                status
            }
        };
        let message = match kind {
            OperationKind::Write | OperationKind::WriteFull => "Unable to write to object",
            OperationKind::Append => "Unable to append to object",
            OperationKind::Read => "Unable to read from object",
            OperationKind::Remove => "Unable to remove object",
        };
        track!(
            check_status(ErrorKind::IssueFailed, status),
            "{} {:?}",
            message,
            oid
        )?;
        Ok(buffer)
    }

    fn with_payload(oid: &str, kind: OperationKind, data: &[u8], offset: u64) -> Self {
        let payload = TransientBuffer::drain_from(data);
        OperationRequest {
            id: OperationId::new(),
            oid: oid.to_owned(),
            kind,
            length: payload.capacity(),
            payload: Some(payload),
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::backend::{MemoryBackendBuilder, Milestone};

    #[test]
    fn payload_is_drained_on_creation() {
        let mut data = b"hello".to_vec();
        let request = OperationRequest::write("foo", &data, 3);
        data[0] = b'j';
        assert_eq!(request.payload(), Some(&b"hello"[..]));
        assert_eq!(request.length(), 5);
        assert_eq!(request.offset(), 3);
        assert_eq!(request.kind(), OperationKind::Write);

        let request = OperationRequest::read("foo", 10, 0);
        assert_eq!(request.payload(), None);
        assert_eq!(request.length(), 10);
        assert_ne!(request.id(), OperationRequest::remove("foo").id());
    }

    #[test]
    fn issue_works() -> TestResult {
        let backend = MemoryBackendBuilder::new().pool("data").finish();
        let pool = backend.pool_lookup("data");

        let c = track!(backend.create_completion())?;
        let buffer = track!(OperationRequest::append("foo", b"abc").issue(&backend, pool, &c))?;
        assert!(buffer.is_none());
        assert_eq!(backend.wait_for(&c, Milestone::Safe), 0);
        backend.release(c);

        let c = track!(backend.create_completion())?;
        let buffer = track!(OperationRequest::read("foo", 8, 1).issue(&backend, pool, &c))?;
        assert_eq!(backend.wait_for(&c, Milestone::Complete), 0);
        assert_eq!(backend.return_value(&c), 2);
        let buffer = buffer.unwrap();
        assert_eq!(track!(buffer.capacity())?, 8);
        assert_eq!(track!(buffer.materialize(2))?, b"bc");
        backend.release(c);
        Ok(())
    }

    #[test]
    fn issue_failure_carries_status() -> TestResult {
        let backend = MemoryBackendBuilder::new()
            .pool("data")
            .inject_issue_failure("foo", -libc::EIO)
            .finish();
        let pool = backend.pool_lookup("data");

        let c = track!(backend.create_completion())?;
        let e = OperationRequest::remove("foo")
            .issue(&backend, pool, &c)
            .err()
            .unwrap();
        assert_eq!(*e.kind(), ErrorKind::IssueFailed);
        assert_eq!(e.status(), Some(-libc::EIO));
        backend.release(c);
        Ok(())
    }
}
