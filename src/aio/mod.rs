//! オブジェクトに対する非同期操作のブリッジ.
//!
//! ネイティブ層の二段階の完了通知(`Complete`と`Safe`)を、
//! コールバックと[Future]の両方のインタフェースで公開する.
//!
//! 一つの操作は、以下の三つの実行単位で処理される:
//!
//! - 発行スレッド: ネイティブ層に非同期操作を発行する
//! - `Complete`待機スレッド: `Complete`マイルストーンを待機し、結果を通知する
//! - `Safe`待機スレッド: `Safe`マイルストーンを待機し、結果を通知する
//!
//! 二つのマイルストーンは互いに独立しており、発火順序も保証されない.
//! また、一方の失敗が他方の通知を抑制することもない.
//!
//! 完了通知オブジェクトは、両方の待機スレッドが終了した時点(ないし発行に失敗した時点)で、
//! ちょうど一度だけ解放される.
//!
//! [Future]: https://docs.rs/futures/0.1/futures/future/trait.Future.html
use fibers::sync::oneshot;
use futures::future::Join;
use futures::{Future, Poll};
use trackable::error::ErrorKindExt;

pub use self::builder::AsyncObjectBuilder;
pub use self::callback::{CallbackArgs, Callbacks, ErrorCallback, MilestoneCallback};
pub use self::completion::{CompletionHandle, HandleState, MilestoneState};
pub use self::object::AsyncObject;
pub use self::request::{OperationId, OperationKind, OperationRequest};

use crate::backend::Milestone;
use crate::{Error, ErrorKind, Result};

mod builder;
mod callback;
mod completion;
mod dispatch;
mod object;
mod request;

/// `Result`の非同期版.
#[derive(Debug)]
pub struct AsyncResult<T>(oneshot::Monitor<T, Error>);
impl<T> AsyncResult<T> {
    pub(crate) fn new() -> (AsyncReply<T>, Self) {
        let (tx, rx) = oneshot::monitor();
        (AsyncReply(tx), AsyncResult(rx))
    }
}
impl<T> Future for AsyncResult<T> {
    type Item = T;
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        track!(self.0.poll().map_err(|e| e.unwrap_or_else(|| {
            ErrorKind::Other
                .cause("monitoring channel disconnected")
                .into()
        })))
    }
}

#[derive(Debug)]
pub(crate) struct AsyncReply<T>(oneshot::Monitored<T, Error>);
impl<T> AsyncReply<T> {
    pub(crate) fn send(self, result: Result<T>) {
        self.0.exit(result);
    }
}

/// マイルストーンの通知結果.
///
/// 読み込み操作の場合には、読み込まれたバイト列が格納される.
pub type MilestoneResult = AsyncResult<Option<Vec<u8>>>;

/// 発行された非同期操作.
///
/// 二つのマイルストーンに対応する`Future`を保持している.
/// このインスタンスを破棄しても、操作自体はそのまま継続され、
/// 登録済みのコールバックも通常通りに呼び出される.
#[derive(Debug)]
pub struct PendingOperation {
    id: OperationId,
    kind: OperationKind,
    complete: MilestoneResult,
    safe: MilestoneResult,
}
impl PendingOperation {
    pub(crate) fn new(
        id: OperationId,
        kind: OperationKind,
        complete: MilestoneResult,
        safe: MilestoneResult,
    ) -> Self {
        PendingOperation {
            id,
            kind,
            complete,
            safe,
        }
    }

    /// 操作の識別子を返す.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// 操作の種類を返す.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// `Complete`マイルストーンを待機する`Future`を返す.
    pub fn complete(self) -> MilestoneResult {
        self.complete
    }

    /// `Safe`マイルストーンを待機する`Future`を返す.
    pub fn safe(self) -> MilestoneResult {
        self.safe
    }

    /// 指定のマイルストーンを待機する`Future`を返す.
    pub fn milestone(self, milestone: Milestone) -> MilestoneResult {
        match milestone {
            Milestone::Complete => self.complete,
            Milestone::Safe => self.safe,
        }
    }

    /// `(Complete, Safe)`の組を返す.
    pub fn into_futures(self) -> (MilestoneResult, MilestoneResult) {
        (self.complete, self.safe)
    }

    /// 両方のマイルストーンを待機する`Future`を返す.
    ///
    /// いずれかのマイルストーンが失敗した時点で、結果の`Future`も失敗する.
    pub fn both(self) -> Join<MilestoneResult, MilestoneResult> {
        self.complete.join(self.safe)
    }
}
