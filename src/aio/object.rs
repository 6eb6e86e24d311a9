use slog::Logger;
use std::sync::Arc;

use crate::aio::dispatch::{spawn_or_else, Waiter};
use crate::aio::{
    AsyncReply, AsyncResult, Callbacks, CompletionHandle, OperationKind, OperationRequest,
    PendingOperation,
};
use crate::backend::{Milestone, ObjectBackend, PoolId};
use crate::metrics::{AioMetrics, BufferMetrics};
use crate::Error;

/// 一つのオブジェクトに対する非同期操作の窓口.
///
/// 各操作は即座に返り、実際の処理は専用のスレッド群で行われる.
/// 結果は、登録されたコールバックと、返り値の`PendingOperation`の両方に通知される.
///
/// 同じオブジェクトに対する複数の操作の間の順序は保証されないので、
/// 順序が必要な場合には、先行操作の`Safe`マイルストーンを待ってから次の操作を発行すること.
#[derive(Debug)]
pub struct AsyncObject<B: ObjectBackend, A> {
    backend: Arc<B>,
    pool: PoolId,
    oid: String,
    callbacks: Callbacks<A>,
    metrics: AioMetrics,
    buffer_metrics: BufferMetrics,
    logger: Logger,
    thread_name: String,
}
impl<B, A> AsyncObject<B, A>
where
    B: ObjectBackend,
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        backend: Arc<B>,
        pool: PoolId,
        oid: &str,
        callbacks: Callbacks<A>,
        metrics: AioMetrics,
        buffer_metrics: BufferMetrics,
        logger: Logger,
        thread_name: String,
    ) -> Self {
        let logger = logger.new(o!("oid" => oid.to_owned()));
        AsyncObject {
            backend,
            pool,
            oid: oid.to_owned(),
            callbacks,
            metrics,
            buffer_metrics,
            logger,
            thread_name,
        }
    }

    /// 対象オブジェクトの名前を返す.
    pub fn name(&self) -> &str {
        &self.oid
    }

    /// 対象オブジェクトが属するプールの識別子を返す.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// 登録されているコールバック群を返す.
    pub fn callbacks(&self) -> &Callbacks<A> {
        &self.callbacks
    }

    /// 非同期操作のメトリクスを返す.
    pub fn metrics(&self) -> &AioMetrics {
        &self.metrics
    }

    /// オブジェクトの`offset`位置に`data`を書き込む.
    ///
    /// `data`の内容は、このメソッドが返る前にコピーされる.
    pub fn write(&self, data: &[u8], offset: u64) -> PendingOperation {
        self.submit(OperationRequest::write(&self.oid, data, offset))
    }

    /// オブジェクトの内容を`data`で置き換える.
    pub fn write_full(&self, data: &[u8]) -> PendingOperation {
        self.submit(OperationRequest::write_full(&self.oid, data))
    }

    /// オブジェクトの末尾に`data`を追記する.
    pub fn append(&self, data: &[u8]) -> PendingOperation {
        self.submit(OperationRequest::append(&self.oid, data))
    }

    /// オブジェクトを削除する.
    pub fn remove(&self) -> PendingOperation {
        self.submit(OperationRequest::remove(&self.oid))
    }

    /// オブジェクトの`offset`位置から最大`length`バイトを読み込む.
    ///
    /// 読み込まれたバイト列は、各マイルストーンのコールバックに独立したコピーとして渡される.
    /// 一バイトも読み込めなかった場合には`ErrorKind::EmptyResult`エラーとなる.
    pub fn read(&self, length: usize, offset: u64) -> PendingOperation {
        self.submit(OperationRequest::read(&self.oid, length, offset))
    }

    /// 任意の操作を発行する.
    pub fn submit(&self, request: OperationRequest) -> PendingOperation {
        let id = request.id();
        let kind = request.kind();
        self.buffer_metrics.count_allocation(request.length());

        let (complete_reply, complete) = AsyncResult::new();
        let (safe_reply, safe) = AsyncResult::new();
        let issuer = Issuer {
            backend: Arc::clone(&self.backend),
            pool: self.pool,
            request,
            callbacks: self.callbacks.clone(),
            complete_reply,
            safe_reply,
            metrics: self.metrics.clone(),
            logger: self
                .logger
                .new(o!("op" => kind.as_str(), "id" => id.to_string())),
            thread_name: self.thread_name.clone(),
        };

        let name = format!("{}_issue", self.thread_name);
        if let Err(e) = track!(spawn_or_else(name, issuer, Issuer::run, Issuer::abort)) {
            error!(self.logger, "Cannot spawn an issue thread: {}", e; "op" => kind.as_str());
        }
        PendingOperation::new(id, kind, complete, safe)
    }
}

/// 非同期操作を発行するスレッド.
struct Issuer<B: ObjectBackend, A> {
    backend: Arc<B>,
    pool: PoolId,
    request: OperationRequest,
    callbacks: Callbacks<A>,
    complete_reply: AsyncReply<Option<Vec<u8>>>,
    safe_reply: AsyncReply<Option<Vec<u8>>>,
    metrics: AioMetrics,
    logger: Logger,
    thread_name: String,
}
impl<B, A> Issuer<B, A>
where
    B: ObjectBackend,
    A: Clone + Send + Sync + 'static,
{
    fn run(self) {
        let Issuer {
            backend,
            pool,
            request,
            callbacks,
            complete_reply,
            safe_reply,
            metrics,
            logger,
            thread_name,
        } = self;
        let id = request.id();
        let kind = request.kind();
        let oid = request.oid().to_owned();

        let result = track!(CompletionHandle::create(backend, metrics.clone(), logger.clone()))
            .and_then(|handle| {
                let handle = Arc::new(handle);
                match track!(handle.issue(pool, request)) {
                    Ok(()) => Ok(handle),
                    Err(e) => {
                        handle.fail(e.clone());
                        if handle.release().is_err() {
                            error!(logger, "Completion handle was released unexpectedly");
                        }
                        Err(e)
                    }
                }
            });
        let handle = match result {
            Err(e) => {
                reject(&metrics, &logger, kind, &callbacks, complete_reply, safe_reply, e);
                return;
            }
            Ok(handle) => handle,
        };
        metrics.issued_operations.increment(kind);
        debug!(logger, "Operation issued");

        let replies = vec![
            (Milestone::Complete, complete_reply),
            (Milestone::Safe, safe_reply),
        ];
        for (milestone, reply) in replies {
            let waiter = Waiter::new(
                Arc::clone(&handle),
                milestone,
                id,
                kind,
                &oid,
                callbacks.clone(),
                reply,
                logger.clone(),
            );
            if let Err(e) = track!(waiter.spawn(&thread_name)) {
                error!(logger, "Cannot spawn a waiter thread: {}", e;
                       "milestone" => milestone.as_str());
            }
        }
    }

    /// 発行スレッドを起動できなかった場合に、`error`を操作の結果として通知する.
    fn abort(self, error: Error) {
        reject(
            &self.metrics,
            &self.logger,
            self.request.kind(),
            &self.callbacks,
            self.complete_reply,
            self.safe_reply,
            error,
        );
    }
}

/// 発行に失敗した操作のエラーを、`on_error`(一度だけ)と両方の`Future`に通知する.
fn reject<A>(
    metrics: &AioMetrics,
    logger: &Logger,
    kind: OperationKind,
    callbacks: &Callbacks<A>,
    complete_reply: AsyncReply<Option<Vec<u8>>>,
    safe_reply: AsyncReply<Option<Vec<u8>>>,
    error: Error,
) where
    A: Clone + Send + Sync + 'static,
{
    metrics.issue_failures.increment(kind);
    warn!(logger, "Failed to issue an operation: {}", error);
    callbacks.notify_error(error.clone(), callbacks.snapshot(None));
    complete_reply.send(Err(error.clone()));
    safe_reply.send(Err(error));
}
