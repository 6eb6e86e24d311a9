use slog::Logger;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use trackable::error::ErrorKindExt;

use crate::aio::OperationRequest;
use crate::backend::{Milestone, ObjectBackend, PoolId};
use crate::buffer::SharedBuffer;
use crate::error::{check_status, NativeStatus};
use crate::metrics::AioMetrics;
use crate::{Error, ErrorKind, Result};

/// 完了ハンドルの状態.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// 操作がまだ発行されていない.
    Pending,

    /// 操作が発行され、マイルストーンの発火を待っている.
    Outstanding,

    /// 発行ないしいずれかのマイルストーンが失敗した.
    Failed,

    /// ネイティブ層の完了通知オブジェクトが解放済み.
    Released,
}

/// マイルストーン毎の状態.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneState {
    /// まだ観測されていない.
    Pending,

    /// 観測済み(成否は問わない).
    Observed,
}

/// ネイティブ層の一つの非同期操作を包む完了ハンドル.
///
/// ネイティブ層の完了通知オブジェクトを排他的に所有し、ちょうど一度だけ解放する.
///
/// 待機中のマイルストーンは、完了通知オブジェクトへの読み込みロックを保持し続けるため、
/// 待機が終わるまで解放(書き込みロックの獲得)は行われない.
/// また、発行に成功した時点で二つのカウントを持つラッチが設定され、
/// 両方の待機スレッドがカウントを減らし終えた時点で解放が行われる.
pub struct CompletionHandle<B: ObjectBackend> {
    backend: Arc<B>,
    native: RwLock<Option<B::Completion>>,
    buffer: Mutex<Option<SharedBuffer>>,
    error: Mutex<Option<Error>>,
    observed: [AtomicBool; 2],
    issued: AtomicBool,
    released: AtomicBool,
    latch: AtomicUsize,
    metrics: AioMetrics,
    logger: Logger,
}
impl<B: ObjectBackend> CompletionHandle<B> {
    /// 新しい完了通知オブジェクトを一つ割り当てて、それを包むハンドルを生成する.
    pub fn create(backend: Arc<B>, metrics: AioMetrics, logger: Logger) -> Result<Self> {
        let native = track!(backend.create_completion())?;
        metrics.outstanding_handles.increment();
        Ok(CompletionHandle {
            backend,
            native: RwLock::new(Some(native)),
            buffer: Mutex::new(None),
            error: Mutex::new(None),
            observed: [AtomicBool::new(false), AtomicBool::new(false)],
            issued: AtomicBool::new(false),
            released: AtomicBool::new(false),
            latch: AtomicUsize::new(0),
            metrics,
            logger,
        })
    }

    /// ハンドルの現在の状態を返す.
    pub fn state(&self) -> HandleState {
        if self.released.load(Ordering::SeqCst) {
            HandleState::Released
        } else if self.lock_error().is_some() {
            HandleState::Failed
        } else if self.issued.load(Ordering::SeqCst) {
            HandleState::Outstanding
        } else {
            HandleState::Pending
        }
    }

    /// 指定のマイルストーンの状態を返す.
    pub fn milestone_state(&self, milestone: Milestone) -> MilestoneState {
        if self.is_observed(milestone) {
            MilestoneState::Observed
        } else {
            MilestoneState::Pending
        }
    }

    /// 指定のマイルストーンが既に観測されたかどうかを判定する.
    pub fn is_observed(&self, milestone: Milestone) -> bool {
        self.observed[milestone_index(milestone)].load(Ordering::SeqCst)
    }

    /// 記録されているエラーを返す.
    pub fn error(&self) -> Option<Error> {
        self.lock_error().clone()
    }

    /// 読み込み操作の結果バッファを返す.
    ///
    /// 解放後や、読み込み以外の操作の場合には`None`が返される.
    pub fn buffer(&self) -> Option<SharedBuffer> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `request`をネイティブ層に発行する.
    ///
    /// 成功した場合には、二つの待機スレッド用のラッチが設定される.
    pub fn issue(&self, pool: PoolId, request: OperationRequest) -> Result<()> {
        track_assert!(
            !self.issued.swap(true, Ordering::SeqCst),
            ErrorKind::InconsistentState,
            "Completion handle has already been issued"
        );
        let buffer = track!(self.with_native(|backend, c| request.issue(backend, pool, c)))?;
        *self.buffer.lock().unwrap_or_else(PoisonError::into_inner) = buffer;
        self.latch.store(Milestone::ALL.len(), Ordering::SeqCst);
        Ok(())
    }

    /// 指定のマイルストーンが発火するまで待機する.
    ///
    /// 成功時には、ネイティブ層の操作の結果値(読み込み操作の場合は読み込まれたバイト数)が返される.
    /// マイルストーン自体ないし操作結果が失敗を示している場合には、
    /// `Complete`なら`ErrorKind::CompletionFailed`、`Safe`なら`ErrorKind::DurabilityFailed`が返される.
    pub fn wait_for(&self, milestone: Milestone) -> Result<i32> {
        let (status, return_value) = track!(self.with_native(|backend, c| {
            let status = backend.wait_for(c, milestone);
            Ok((status, backend.return_value(c)))
        }))?;
        self.observed[milestone_index(milestone)].store(true, Ordering::SeqCst);
        self.metrics.milestones.increment(milestone);

        let result = if status < 0 {
            Err(track!(Error::from(
                milestone.failure_kind().cause(NativeStatus::new(status))
            )))
        } else {
            track!(check_status(milestone.failure_kind(), return_value))
        };
        if result.is_err() {
            self.metrics.milestone_failures.increment(milestone);
        }
        result
    }

    /// 終端的なエラーを記録する.
    ///
    /// 既にエラーが記録されている場合には、最初のものが維持される.
    pub fn fail(&self, error: Error) {
        let mut slot = self.lock_error();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// ラッチのカウントを一つ減らし、ゼロになった場合には解放を行う.
    pub fn count_down(&self) {
        let prev = self
            .latch
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if prev == Ok(1) {
            let _ = self.release();
        }
    }

    /// ネイティブ層の完了通知オブジェクトと結果バッファを解放する.
    ///
    /// 二回目以降の呼び出しは何も解放せず、`ErrorKind::InconsistentState`エラーを返す.
    pub fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            self.metrics.double_releases.increment();
            error!(self.logger, "Attempted to release a completion handle twice");
            track_panic!(
                ErrorKind::InconsistentState,
                "Completion handle has already been released"
            );
        }

        let native = self
            .native
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(c) = native {
            self.backend.release(c);
        }
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.metrics.released_handles.increment();
        self.metrics.outstanding_handles.decrement();
        debug!(self.logger, "Completion handle released"; "state" => ?self.state());
        Ok(())
    }

    fn with_native<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&B, &B::Completion) -> Result<T>,
    {
        let native = self.native.read().unwrap_or_else(PoisonError::into_inner);
        let c = track_assert_some!(
            native.as_ref(),
            ErrorKind::InconsistentState,
            "Completion handle has already been released"
        );
        track!(f(&self.backend, c))
    }

    fn lock_error(&self) -> MutexGuard<Option<Error>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
impl<B: ObjectBackend> Drop for CompletionHandle<B> {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            let _ = self.release();
        }
    }
}
impl<B: ObjectBackend> std::fmt::Debug for CompletionHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("state", &self.state())
            .field("complete", &self.milestone_state(Milestone::Complete))
            .field("safe", &self.milestone_state(Milestone::Safe))
            .field("latch", &self.latch.load(Ordering::SeqCst))
            .finish()
    }
}

fn milestone_index(milestone: Milestone) -> usize {
    match milestone {
        Milestone::Complete => 0,
        Milestone::Safe => 1,
    }
}

#[cfg(test)]
mod tests {
    use slog::Discard;
    use trackable::result::TestResult;

    use super::*;
    use crate::backend::{MemoryBackend, MemoryBackendBuilder};

    fn handle(backend: &Arc<MemoryBackend>, metrics: &AioMetrics) -> Result<CompletionHandle<MemoryBackend>> {
        let logger = Logger::root(Discard, o!());
        track!(CompletionHandle::create(Arc::clone(backend), metrics.clone(), logger))
    }

    #[test]
    fn lifecycle_works() -> TestResult {
        let backend = Arc::new(MemoryBackendBuilder::new().pool("data").finish());
        let pool = backend.pool_lookup("data");
        let metrics = AioMetrics::default();

        let h = track!(handle(&backend, &metrics))?;
        assert_eq!(h.state(), HandleState::Pending);
        assert_eq!(metrics.outstanding_handles(), 1);

        track!(h.issue(pool, OperationRequest::write_full("foo", b"bar")))?;
        assert_eq!(h.state(), HandleState::Outstanding);
        assert_eq!(track!(h.wait_for(Milestone::Safe))?, 0);
        assert_eq!(h.milestone_state(Milestone::Safe), MilestoneState::Observed);
        assert_eq!(track!(h.wait_for(Milestone::Complete))?, 0);
        assert!(h.is_observed(Milestone::Complete));

        h.count_down();
        assert_eq!(h.state(), HandleState::Outstanding);
        h.count_down();
        assert_eq!(h.state(), HandleState::Released);
        assert_eq!(backend.live_completions(), 0);
        assert_eq!(metrics.released_handles(), 1);
        assert_eq!(metrics.outstanding_handles(), 0);
        assert_eq!(metrics.milestones().complete(), 1);
        assert_eq!(metrics.milestones().safe(), 1);

        // 余分なカウントダウンは無視される
        h.count_down();
        assert_eq!(metrics.double_releases(), 0);
        Ok(())
    }

    #[test]
    fn release_happens_exactly_once() -> TestResult {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = AioMetrics::default();

        let h = track!(handle(&backend, &metrics))?;
        track!(h.release())?;
        let e = h.release().err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::InconsistentState);
        drop(h);

        assert_eq!(backend.released_completions(), 1);
        assert_eq!(backend.double_releases(), 0);
        assert_eq!(metrics.released_handles(), 1);
        assert_eq!(metrics.double_releases(), 1);
        Ok(())
    }

    #[test]
    fn drop_releases_unreleased_handle() -> TestResult {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = AioMetrics::default();

        drop(track!(handle(&backend, &metrics))?);
        assert_eq!(backend.live_completions(), 0);
        assert_eq!(metrics.double_releases(), 0);
        Ok(())
    }

    #[test]
    fn waiting_on_released_handle_fails() -> TestResult {
        let backend = Arc::new(MemoryBackend::new());
        let h = track!(handle(&backend, &AioMetrics::default()))?;
        track!(h.release())?;

        let e = h.wait_for(Milestone::Complete).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::InconsistentState);
        Ok(())
    }

    #[test]
    fn milestone_failures_are_classified() -> TestResult {
        let backend = Arc::new(
            MemoryBackendBuilder::new()
                .pool("data")
                .inject_milestone_failure("foo", Milestone::Safe, -libc::EIO)
                .finish(),
        );
        let pool = backend.pool_lookup("data");
        let metrics = AioMetrics::default();

        let h = track!(handle(&backend, &metrics))?;
        track!(h.issue(pool, OperationRequest::append("foo", b"x")))?;
        assert_eq!(track!(h.wait_for(Milestone::Complete))?, 0);
        let e = h.wait_for(Milestone::Safe).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::DurabilityFailed);
        assert_eq!(e.status(), Some(-libc::EIO));
        assert_eq!(metrics.milestone_failures().safe(), 1);

        // 操作結果自体の失敗(存在しないオブジェクトの削除)は、両方のマイルストーンに反映される
        let h = track!(handle(&backend, &metrics))?;
        track!(h.issue(pool, OperationRequest::remove("missing")))?;
        let e = h.wait_for(Milestone::Complete).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::CompletionFailed);
        assert_eq!(e.status(), Some(-libc::ENOENT));
        let e = h.wait_for(Milestone::Safe).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::DurabilityFailed);

        h.fail(e.clone());
        h.fail(ErrorKind::Other.cause("ignored").into());
        assert_eq!(h.state(), HandleState::Failed);
        assert_eq!(h.error().map(|e| *e.kind()), Some(ErrorKind::DurabilityFailed));
        Ok(())
    }

    #[test]
    fn issuing_twice_is_rejected() -> TestResult {
        let backend = Arc::new(MemoryBackendBuilder::new().pool("data").finish());
        let pool = backend.pool_lookup("data");
        let h = track!(handle(&backend, &AioMetrics::default()))?;
        track!(h.issue(pool, OperationRequest::append("foo", b"x")))?;
        let e = h
            .issue(pool, OperationRequest::append("foo", b"y"))
            .err()
            .unwrap();
        assert_eq!(*e.kind(), ErrorKind::InconsistentState);
        Ok(())
    }
}
