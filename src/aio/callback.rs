use std::fmt;
use std::sync::Arc;

use crate::backend::Milestone;
use crate::Error;

/// マイルストーンの成功時に呼び出されるコールバック.
pub type MilestoneCallback<A> = Arc<dyn Fn(CallbackArgs<A>) + Send + Sync + 'static>;

/// エラー発生時に呼び出されるコールバック.
pub type ErrorCallback<A> = Arc<dyn Fn(Error, CallbackArgs<A>) + Send + Sync + 'static>;

/// 非同期操作に紐付けられるコールバック群.
///
/// 一つの登録内容は、同じ`AsyncObject`から発行される全ての操作で共有され、
/// 各操作の各マイルストーンにつき、高々一つのコールバックがちょうど一度だけ呼び出される.
///
/// 未設定のコールバックに対応する結果は、成否に関わらず黙って破棄される.
pub struct Callbacks<A> {
    on_complete: Option<MilestoneCallback<A>>,
    on_safe: Option<MilestoneCallback<A>>,
    on_error: Option<ErrorCallback<A>>,
    args: Arc<Vec<A>>,
}
impl<A> Callbacks<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// コールバックが一つも登録されていない`Callbacks`インスタンスを生成する.
    pub fn new() -> Self {
        Callbacks {
            on_complete: None,
            on_safe: None,
            on_error: None,
            args: Arc::new(Vec::new()),
        }
    }

    /// `Complete`マイルストーン用のコールバックを設定する.
    pub fn on_complete<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CallbackArgs<A>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// `Safe`マイルストーン用のコールバックを設定する.
    pub fn on_safe<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(CallbackArgs<A>) + Send + Sync + 'static,
    {
        self.on_safe = Some(Arc::new(f));
        self
    }

    /// エラー用のコールバックを設定する.
    ///
    /// 一つの操作に対して、発行の失敗時には一度だけ、
    /// それ以外では失敗したマイルストーン毎に一度ずつ呼び出される.
    pub fn on_error<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(Error, CallbackArgs<A>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// コールバックにそのまま渡される引数を末尾に追加する.
    pub fn arg(&mut self, arg: A) -> &mut Self {
        Arc::make_mut(&mut self.args).push(arg);
        self
    }

    /// コールバックにそのまま渡される引数群を末尾に追加する.
    pub fn args<I>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
    {
        Arc::make_mut(&mut self.args).extend(args);
        self
    }

    /// 登録済みの引数群を返す.
    pub fn pass_through(&self) -> &[A] {
        &self.args
    }

    /// 引数群の独立したスナップショットを作成する.
    pub(crate) fn snapshot(&self, payload: Option<Vec<u8>>) -> CallbackArgs<A> {
        CallbackArgs {
            args: Vec::clone(&self.args),
            payload,
        }
    }

    /// マイルストーンに対応するコールバックを呼び出す.
    ///
    /// コールバックが未設定の場合には何もしない.
    pub(crate) fn notify_milestone(&self, milestone: Milestone, args: CallbackArgs<A>) {
        let callback = match milestone {
            Milestone::Complete => self.on_complete.as_ref(),
            Milestone::Safe => self.on_safe.as_ref(),
        };
        if let Some(f) = callback {
            f(args);
        }
    }

    /// エラー用のコールバックを呼び出す.
    pub(crate) fn notify_error(&self, error: Error, args: CallbackArgs<A>) {
        if let Some(ref f) = self.on_error {
            f(error, args);
        }
    }
}
impl<A> Default for Callbacks<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
impl<A> Clone for Callbacks<A> {
    fn clone(&self) -> Self {
        Callbacks {
            on_complete: self.on_complete.clone(),
            on_safe: self.on_safe.clone(),
            on_error: self.on_error.clone(),
            args: Arc::clone(&self.args),
        }
    }
}
impl<A: fmt::Debug> fmt::Debug for Callbacks<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_complete", &self.on_complete.is_some())
            .field("on_safe", &self.on_safe.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("args", &self.args)
            .finish()
    }
}

/// コールバックに渡される引数.
///
/// 登録時の引数群のコピーに、読み込み操作の場合は読み込まれたバイト列が末尾に付加されたもの.
/// 各コールバック呼び出し毎に独立したインスタンスが生成される.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackArgs<A> {
    args: Vec<A>,
    payload: Option<Vec<u8>>,
}
impl<A> CallbackArgs<A> {
    /// 登録時に指定された引数群を返す.
    pub fn args(&self) -> &[A] {
        &self.args
    }

    /// 読み込み操作の結果を返す.
    ///
    /// 読み込み以外の操作では常に`None`.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|p| &p[..])
    }

    /// 引数の総数を返す(読み込み結果も一つの引数として数える).
    pub fn len(&self) -> usize {
        self.args.len() + if self.payload.is_some() { 1 } else { 0 }
    }

    /// 引数が一つも無いかどうかを判定する.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有権を放棄して、引数群と読み込み結果を返す.
    pub fn into_parts(self) -> (Vec<A>, Option<Vec<u8>>) {
        (self.args, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use trackable::error::ErrorKindExt;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn snapshots_are_independent() {
        let mut callbacks = Callbacks::new();
        callbacks.arg("a".to_owned()).args(vec!["b".to_owned()]);

        let mut first = callbacks.snapshot(None).into_parts().0;
        first.push("mutated".to_owned());
        let second = callbacks.snapshot(Some(b"hello".to_vec()));
        assert_eq!(second.args(), &["a".to_owned(), "b".to_owned()][..]);
        assert_eq!(second.payload(), Some(&b"hello"[..]));
        assert_eq!(second.len(), 3);
        assert_eq!(callbacks.pass_through().len(), 2);
    }

    #[test]
    fn clone_does_not_share_later_args() {
        let mut callbacks = Callbacks::new();
        callbacks.arg(1);
        let cloned = callbacks.clone();
        callbacks.arg(2);
        assert_eq!(cloned.pass_through(), &[1]);
        assert_eq!(callbacks.pass_through(), &[1, 2]);
    }

    #[test]
    fn notify_works() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut callbacks = Callbacks::new();
        {
            let log = Arc::clone(&log);
            callbacks.on_safe(move |args: CallbackArgs<u8>| {
                log.lock().unwrap().push(format!("safe:{:?}", args.args()))
            });
        }
        {
            let log = Arc::clone(&log);
            callbacks.on_error(move |e, _| log.lock().unwrap().push(format!("error:{:?}", e.kind())));
        }
        callbacks.arg(7);

        // 未設定のコールバックは単に無視される
        callbacks.notify_milestone(Milestone::Complete, callbacks.snapshot(None));
        callbacks.notify_milestone(Milestone::Safe, callbacks.snapshot(None));
        callbacks.notify_error(
            ErrorKind::EmptyResult.cause("empty").into(),
            callbacks.snapshot(None),
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec!["safe:[7]".to_owned(), "error:EmptyResult".to_owned()]
        );
    }
}
