//! マイルストーン毎の待機スレッド.
use slog::Logger;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::aio::{AsyncReply, Callbacks, CompletionHandle, OperationId, OperationKind};
use crate::backend::{Milestone, ObjectBackend};
use crate::{Error, ErrorKind, Result};

/// 完了ハンドルのラッチを、ドロップ時に一つ減らすためのガード.
///
/// 待機スレッドの起動に失敗した場合や、コールバックがパニックした場合にもカウントが減るようにする.
struct LatchGuard<B: ObjectBackend>(Arc<CompletionHandle<B>>);
impl<B: ObjectBackend> Drop for LatchGuard<B> {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

/// 一つのマイルストーンを待機して、その結果を通知するスレッド.
pub(crate) struct Waiter<B: ObjectBackend, A> {
    guard: LatchGuard<B>,
    milestone: Milestone,
    id: OperationId,
    kind: OperationKind,
    oid: String,
    callbacks: Callbacks<A>,
    reply: AsyncReply<Option<Vec<u8>>>,
    logger: Logger,
}
impl<B, A> Waiter<B, A>
where
    B: ObjectBackend,
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        handle: Arc<CompletionHandle<B>>,
        milestone: Milestone,
        id: OperationId,
        kind: OperationKind,
        oid: &str,
        callbacks: Callbacks<A>,
        reply: AsyncReply<Option<Vec<u8>>>,
        logger: Logger,
    ) -> Self {
        Waiter {
            guard: LatchGuard(handle),
            milestone,
            id,
            kind,
            oid: oid.to_owned(),
            callbacks,
            reply,
            logger,
        }
    }

    /// 待機スレッドを起動する.
    ///
    /// 起動に失敗した場合には、そのエラーが`on_error`コールバックと対応する`Future`の両方に通知され、
    /// ラッチのカウントも減らされる.
    pub(crate) fn spawn(self, thread_name: &str) -> Result<()> {
        let name = format!("{}_{}", thread_name, self.milestone.as_str());
        track!(spawn_or_else(name, self, Waiter::run, Waiter::abort))
    }

    /// 待機を行わずに、`error`をこのマイルストーンの結果として通知する.
    pub(crate) fn abort(self, error: Error) {
        self.deliver(Err(error));
    }

    fn run(self) {
        let result = track!(wait_milestone(
            &self.guard.0,
            self.milestone,
            self.kind,
            &self.oid
        ));
        self.deliver(result);
    }

    fn deliver(self, result: Result<Option<Vec<u8>>>) {
        let Waiter {
            guard,
            milestone,
            id,
            kind,
            oid,
            callbacks,
            reply,
            logger,
        } = self;
        let logger = logger.new(o!("oid" => oid, "op" => kind.as_str(),
                                   "id" => id.to_string(), "milestone" => milestone.as_str()));

        match result {
            Ok(ref payload) => {
                debug!(logger, "Milestone reached");
                callbacks.notify_milestone(milestone, callbacks.snapshot(payload.clone()));
            }
            Err(ref e) => {
                warn!(logger, "Milestone failed: {}", e);
                guard.0.fail(e.clone());
                callbacks.notify_error(e.clone(), callbacks.snapshot(None));
            }
        }

        // 最後の待機スレッドがハンドルを解放してから、結果を通知する
        drop(guard);
        reply.send(result);
    }
}

/// `value`を引数に`run`を実行するスレッドを起動する.
///
/// 起動に失敗した場合には、`value`とエラーを引数に`on_failure`が呼び出され、
/// 同じエラーが返される.
pub(crate) fn spawn_or_else<T, F, G>(name: String, value: T, run: F, on_failure: G) -> Result<()>
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
    G: FnOnce(T, Error),
{
    // 起動に失敗するとクロージャごと破棄されるので、値は共有スロット経由で受け渡す
    let slot = Arc::new(Mutex::new(Some(value)));
    let thread_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new().name(name).spawn(move || {
        if let Some(value) = take(&thread_slot) {
            run(value);
        }
    });
    if let Err(e) = spawned {
        let e = track!(Error::from(e));
        if let Some(value) = take(&slot) {
            on_failure(value, e.clone());
        }
        return Err(e);
    }
    Ok(())
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn wait_milestone<B: ObjectBackend>(
    handle: &CompletionHandle<B>,
    milestone: Milestone,
    kind: OperationKind,
    oid: &str,
) -> Result<Option<Vec<u8>>> {
    let return_value = track!(handle.wait_for(milestone), "oid={:?}", oid)?;
    if kind != OperationKind::Read {
        return Ok(None);
    }

    let len = return_value as usize;
    track_assert_ne!(
        len,
        0,
        ErrorKind::EmptyResult,
        "Read no bytes from object {:?}",
        oid
    );
    let buffer = track_assert_some!(
        handle.buffer(),
        ErrorKind::InconsistentState,
        "Read buffer has already been released"
    );
    let payload = track!(buffer.materialize(len))?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use fibers_global::execute;
    use slog::Discard;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trackable::error::ErrorKindExt;
    use trackable::result::TestResult;

    use super::*;
    use crate::aio::{AsyncResult, HandleState, OperationRequest};
    use crate::backend::MemoryBackendBuilder;
    use crate::metrics::AioMetrics;

    #[test]
    fn aborted_waiter_delivers_its_error() -> TestResult {
        let backend = Arc::new(MemoryBackendBuilder::new().pool("data").finish());
        let pool = backend.pool_lookup("data");
        let logger = Logger::root(Discard, o!());
        let handle = Arc::new(track!(CompletionHandle::create(
            Arc::clone(&backend),
            AioMetrics::default(),
            logger.clone()
        ))?);
        let request = OperationRequest::write_full("foo", b"bar");
        let id = request.id();
        track!(handle.issue(pool, request))?;

        let errors = Arc::new(Mutex::new(Vec::new()));
        let milestones = Arc::new(AtomicUsize::new(0));
        let mut callbacks: Callbacks<()> = Callbacks::new();
        let this = Arc::clone(&errors);
        callbacks.on_error(move |e, _| this.lock().unwrap().push(*e.kind()));
        let this = Arc::clone(&milestones);
        callbacks.on_complete(move |_| {
            this.fetch_add(1, Ordering::SeqCst);
        });
        let this = Arc::clone(&milestones);
        callbacks.on_safe(move |_| {
            this.fetch_add(1, Ordering::SeqCst);
        });

        let (complete_reply, complete) = AsyncResult::new();
        let (safe_reply, safe) = AsyncResult::new();
        let waiter = Waiter::new(
            Arc::clone(&handle),
            Milestone::Complete,
            id,
            OperationKind::WriteFull,
            "foo",
            callbacks.clone(),
            complete_reply,
            logger.clone(),
        );
        waiter.abort(ErrorKind::InconsistentState.cause("no thread").into());

        let e = execute(complete).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::InconsistentState);
        assert_eq!(*errors.lock().unwrap(), vec![ErrorKind::InconsistentState]);
        assert_eq!(milestones.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), HandleState::Failed);
        assert_eq!(backend.live_completions(), 1);

        // 残りの待機スレッドは通常通りに動作し、最後にハンドルを解放する
        let waiter = Waiter::new(
            Arc::clone(&handle),
            Milestone::Safe,
            id,
            OperationKind::WriteFull,
            "foo",
            callbacks,
            safe_reply,
            logger,
        );
        track!(waiter.spawn("test_aio"))?;
        assert_eq!(track!(execute(safe))?, None);
        assert_eq!(milestones.load(Ordering::SeqCst), 1);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(handle.state(), HandleState::Released);
        assert_eq!(backend.live_completions(), 0);
        Ok(())
    }

    #[test]
    fn spawn_or_else_runs_value_on_new_thread() -> TestResult {
        let (reply, result) = AsyncResult::new();
        track!(spawn_or_else(
            "test_spawn".to_owned(),
            reply,
            |reply: AsyncReply<String>| {
                let name = thread::current().name().map(|s| s.to_owned());
                reply.send(Ok(name.unwrap_or_default()));
            },
            |reply, e| reply.send(Err(e)),
        ))?;
        assert_eq!(track!(execute(result))?, "test_spawn");
        Ok(())
    }
}
