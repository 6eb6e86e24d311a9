use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::sync::Arc;

use crate::aio::{AsyncObject, Callbacks};
use crate::backend::{ObjectBackend, PoolId};
use crate::metrics::{AioMetrics, BufferMetrics};
use crate::{ErrorKind, Result};

/// `AsyncObject`のビルダ.
#[derive(Debug, Clone)]
pub struct AsyncObjectBuilder {
    pub(crate) metrics: MetricBuilder,
    pub(crate) logger: Logger,
    pub(crate) thread_name: String,
}
impl AsyncObjectBuilder {
    /// デフォルト設定で`AsyncObjectBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        AsyncObjectBuilder {
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
            thread_name: "radosbridge_aio".to_owned(),
        }
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// 非同期操作用の logger を登録する.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// 発行スレッドおよび待機スレッドの名前の接頭辞を設定する.
    ///
    /// 実際のスレッド名は`{接頭辞}_issue`、`{接頭辞}_complete`、`{接頭辞}_safe`となる.
    ///
    /// デフォルト値は`"radosbridge_aio"`.
    pub fn thread_name(&mut self, prefix: &str) -> &mut Self {
        self.thread_name = prefix.to_owned();
        self
    }

    /// 指定のオブジェクトを対象とする`AsyncObject`を生成する.
    ///
    /// オブジェクト名がNUL文字を含む場合には`ErrorKind::InvalidInput`エラーが返される.
    pub fn finish<B, A>(
        &self,
        backend: Arc<B>,
        pool: PoolId,
        oid: &str,
        callbacks: Callbacks<A>,
    ) -> Result<AsyncObject<B, A>>
    where
        B: ObjectBackend,
        A: Clone + Send + Sync + 'static,
    {
        track!(self.finish_with_metrics(
            backend,
            pool,
            oid,
            callbacks,
            AioMetrics::new(&self.metrics),
            BufferMetrics::new(&self.metrics),
        ))
    }

    pub(crate) fn finish_with_metrics<B, A>(
        &self,
        backend: Arc<B>,
        pool: PoolId,
        oid: &str,
        callbacks: Callbacks<A>,
        metrics: AioMetrics,
        buffer_metrics: BufferMetrics,
    ) -> Result<AsyncObject<B, A>>
    where
        B: ObjectBackend,
        A: Clone + Send + Sync + 'static,
    {
        track_assert!(
            !oid.contains('\0'),
            ErrorKind::InvalidInput,
            "Object name contains a NUL character: {:?}",
            oid
        );
        Ok(AsyncObject::new(
            backend,
            pool,
            oid,
            callbacks,
            metrics,
            buffer_metrics,
            self.logger.clone(),
            self.thread_name.clone(),
        ))
    }
}
impl Default for AsyncObjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn nul_in_object_name_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let result = AsyncObjectBuilder::new().finish(backend, 1, "foo\0bar", Callbacks::<()>::new());
        assert_eq!(
            result.err().map(|e| *e.kind()),
            Some(ErrorKind::InvalidInput)
        );
    }
}
