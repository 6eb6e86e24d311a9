//! クラスタへの接続と、プール単位の同期的な操作群.
use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use trackable::error::ErrorKindExt;

use crate::aio::{AsyncObject, AsyncObjectBuilder, Callbacks};
use crate::backend::{ConnectionConfig, ObjectBackend, PoolId};
use crate::buffer::GrowRetryPolicy;
use crate::error::{check_status, NativeStatus};
use crate::metrics::{AioMetrics, BufferMetrics};
use crate::{Error, ErrorKind, Result};

/// プール一覧の取得に使用する初期バッファサイズ.
const POOL_LIST_INITIAL_SIZE: usize = 4096;

/// プール名の取得に使用する初期バッファサイズ.
const POOL_NAME_INITIAL_SIZE: usize = 64;

/// オブジェクト属性の取得に使用する初期バッファサイズ.
const ATTRIBUTE_INITIAL_SIZE: usize = 2048;

/// クラスタへの接続を構築するためのビルダ.
///
/// 設定ソースが何も指定されていない場合には、バックエンドのデフォルト設定が使用される.
///
/// # Examples
///
/// ```
/// use radosbridge::Connection;
/// use radosbridge::backend::MemoryBackend;
///
/// # fn main() -> radosbridge::Result<()> {
/// let cluster = Connection::new()
///     .use_config_map(vec![("memory_pools", "data")])
///     .connect::<MemoryBackend>()?;
/// assert_eq!(cluster.list_pools()?, vec!["data".to_owned()]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Connection {
    config: ConnectionConfig,
    logger: Logger,
    metrics: MetricBuilder,
}
impl Connection {
    /// デフォルト設定で`Connection`インスタンスを生成する.
    pub fn new() -> Self {
        Connection {
            config: ConnectionConfig::default(),
            logger: Logger::root(Discard, o!()),
            metrics: MetricBuilder::new(),
        }
    }

    /// 接続先のクラスタ名を設定する.
    ///
    /// クラスタ名を指定する場合には、`as_user`でユーザ名も合わせて指定する必要がある.
    pub fn to(&mut self, cluster: &str) -> &mut Self {
        self.config.cluster_name = Some(cluster.to_owned());
        self
    }

    /// 接続ユーザ名を設定する.
    pub fn as_user(&mut self, user: &str) -> &mut Self {
        self.config.user_name = Some(user.to_owned());
        self
    }

    /// 設定ファイルのパスを指定する.
    pub fn use_config_file<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.config.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// コマンドライン引数形式の設定を指定する.
    pub fn use_config_args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.config_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// 設定を保持する環境変数名を指定する.
    pub fn use_config_env(&mut self, var: &str) -> &mut Self {
        self.config.config_env = Some(var.to_owned());
        self
    }

    /// キー・バリュー形式の設定を追加する.
    pub fn use_config_map<I, K, V>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.config
            .config_map
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// logger を登録する.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// 現在の接続設定を返す.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// バックエンド`B`を使ってクラスタに接続する.
    pub fn connect<B: ObjectBackend>(&self) -> Result<Cluster<B>> {
        track!(self.validate())?;
        let backend = track!(B::connect(&self.config))?;
        track!(self.connect_with(backend))
    }

    /// 接続済みのバックエンドから`Cluster`を生成する.
    pub fn connect_with<B: ObjectBackend>(&self, backend: B) -> Result<Cluster<B>> {
        track!(self.validate())?;
        let logger = self.logger.new(o!(
            "cluster" => self.config.cluster_name.clone().unwrap_or_else(|| "default".to_owned())
        ));
        info!(logger, "Connected to the cluster"; "user" => ?self.config.user_name);

        let mut async_builder = AsyncObjectBuilder::new();
        async_builder
            .logger(logger.clone())
            .metrics(self.metrics.clone());
        Ok(Cluster {
            backend: Arc::new(backend),
            aio_metrics: AioMetrics::new(&self.metrics),
            buffer_metrics: BufferMetrics::new(&self.metrics),
            async_builder,
            logger,
        })
    }

    fn validate(&self) -> Result<()> {
        if let Some(ref cluster) = self.config.cluster_name {
            if self.config.user_name.is_none() {
                let e = ErrorKind::InvalidInput.cause(NativeStatus::new(-libc::ENOENT));
                return Err(track!(
                    Error::from(e),
                    "A fully qualified user name is required to connect to {:?}",
                    cluster
                ));
            }
        }
        Ok(())
    }
}
impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// 接続済みのクラスタ.
#[derive(Debug)]
pub struct Cluster<B: ObjectBackend> {
    backend: Arc<B>,
    aio_metrics: AioMetrics,
    buffer_metrics: BufferMetrics,
    async_builder: AsyncObjectBuilder,
    logger: Logger,
}
impl<B: ObjectBackend> Cluster<B> {
    /// バックエンドへの参照を返す.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// 非同期操作のメトリクスを返す.
    ///
    /// このクラスタから生成された全ての`AsyncObject`で共有される.
    pub fn aio_metrics(&self) -> &AioMetrics {
        &self.aio_metrics
    }

    /// 一時バッファのメトリクスを返す.
    pub fn buffer_metrics(&self) -> &BufferMetrics {
        &self.buffer_metrics
    }

    /// 指定の名前のプールを開く.
    pub fn open_pool(&self, name: &str) -> Result<Pool<B>> {
        track!(check_name(name))?;
        let id = self.backend.pool_lookup(name);
        track!(check_pool_id(id), "Unable to open pool {:?}", name)?;
        Ok(Pool {
            backend: Arc::clone(&self.backend),
            id,
            aio_metrics: self.aio_metrics.clone(),
            buffer_metrics: self.buffer_metrics.clone(),
            async_builder: self.async_builder.clone(),
            logger: self.logger.new(o!("pool" => name.to_owned())),
        })
    }

    /// クラスタ内の全てのプール名を返す.
    pub fn list_pools(&self) -> Result<Vec<String>> {
        let bytes = track!(self
            .retry_policy(POOL_LIST_INITIAL_SIZE)
            .run(|buf| self.backend.pool_list(buf)))?;
        let mut names = Vec::new();
        for name in bytes.split(|&b| b == 0).take_while(|n| !n.is_empty()) {
            names.push(track!(utf8(name.to_vec()))?);
        }
        Ok(names)
    }

    /// プール名に対応する識別子を返す.
    ///
    /// プールが存在しない場合には`None`が返される.
    pub fn lookup_pool(&self, name: &str) -> Result<Option<PoolId>> {
        track!(check_name(name))?;
        let id = self.backend.pool_lookup(name);
        if id == -i64::from(libc::ENOENT) {
            return Ok(None);
        }
        track!(check_pool_id(id), "pool={:?}", name)?;
        Ok(Some(id))
    }

    /// プールを作成する.
    pub fn create_pool(&self, name: &str) -> Result<()> {
        track!(check_name(name))?;
        let status = self.backend.pool_create(name);
        track!(check_status(ErrorKind::Other, status), "Unable to create pool {:?}", name)?;
        info!(self.logger, "Pool created"; "pool" => name);
        Ok(())
    }

    /// プールを削除する.
    pub fn delete_pool(&self, name: &str) -> Result<()> {
        track!(check_name(name))?;
        let status = self.backend.pool_delete(name);
        track!(check_status(ErrorKind::Other, status), "Unable to delete pool {:?}", name)?;
        info!(self.logger, "Pool deleted"; "pool" => name);
        Ok(())
    }

    /// クラスタとの接続を閉じる.
    ///
    /// 以降に発行された操作は全て失敗する.
    pub fn shutdown(&self) {
        self.backend.shutdown();
        info!(self.logger, "Disconnected from the cluster");
    }

    fn retry_policy(&self, initial_size: usize) -> GrowRetryPolicy {
        let mut policy = GrowRetryPolicy::new(initial_size);
        policy.metrics(self.buffer_metrics.clone());
        policy
    }
}

/// オブジェクトのサイズと更新時刻.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStatus {
    /// オブジェクトのサイズ(バイト単位).
    pub size: u64,

    /// 最終更新時刻.
    pub modified: SystemTime,
}

/// 開かれたプール.
#[derive(Debug)]
pub struct Pool<B: ObjectBackend> {
    backend: Arc<B>,
    id: PoolId,
    aio_metrics: AioMetrics,
    buffer_metrics: BufferMetrics,
    async_builder: AsyncObjectBuilder,
    logger: Logger,
}
impl<B: ObjectBackend> Pool<B> {
    /// プールの識別子を返す.
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// プールの名前を返す.
    pub fn name(&self) -> Result<String> {
        let bytes = track!(self
            .retry_policy(POOL_NAME_INITIAL_SIZE)
            .run(|buf| self.backend.pool_name(self.id, buf)))?;
        track!(utf8(bytes))
    }

    /// オブジェクトの属性値を取得する.
    pub fn object_attribute(&self, oid: &str, name: &str) -> Result<Vec<u8>> {
        track!(check_name(oid))?;
        track!(check_name(name))?;
        let value = track!(
            self.retry_policy(ATTRIBUTE_INITIAL_SIZE)
                .run(|buf| self.backend.getxattr(self.id, oid, name, buf)),
            "Unable to get attribute {:?} of object {:?}",
            name,
            oid
        )?;
        Ok(value)
    }

    /// オブジェクトの属性値を設定する.
    pub fn set_object_attribute(&self, oid: &str, name: &str, value: &[u8]) -> Result<()> {
        track!(check_name(oid))?;
        track!(check_name(name))?;
        let status = self.backend.setxattr(self.id, oid, name, value);
        track!(
            check_status(ErrorKind::Other, status),
            "Unable to set attribute {:?} of object {:?}",
            name,
            oid
        )?;
        Ok(())
    }

    /// オブジェクトの属性を削除する.
    pub fn remove_object_attribute(&self, oid: &str, name: &str) -> Result<()> {
        track!(check_name(oid))?;
        track!(check_name(name))?;
        let status = self.backend.rmxattr(self.id, oid, name);
        track!(
            check_status(ErrorKind::Other, status),
            "Unable to remove attribute {:?} of object {:?}",
            name,
            oid
        )?;
        Ok(())
    }

    /// オブジェクトのサイズと更新時刻を取得する.
    pub fn object_status(&self, oid: &str) -> Result<ObjectStatus> {
        track!(check_name(oid))?;
        let (mut size, mut mtime) = (0, 0);
        let status = self.backend.stat(self.id, oid, &mut size, &mut mtime);
        track!(
            check_status(ErrorKind::Other, status),
            "Unable to stat object {:?}",
            oid
        )?;
        let modified = UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64);
        Ok(ObjectStatus { size, modified })
    }

    /// このプールに対して発行済みの全ての非同期操作が永続化されるまで待機する.
    pub fn flush(&self) -> Result<()> {
        let status = self.backend.aio_flush(self.id);
        track!(check_status(ErrorKind::Other, status), "pool={}", self.id)?;
        debug!(self.logger, "Flushed pending operations");
        Ok(())
    }

    /// オブジェクト`oid`を対象とする非同期操作の窓口を生成する.
    ///
    /// `callbacks`は、この窓口から発行される全ての操作に紐付けられる.
    pub fn async_mode<A>(&self, oid: &str, callbacks: &Callbacks<A>) -> Result<AsyncObject<B, A>>
    where
        A: Clone + Send + Sync + 'static,
    {
        let mut builder = self.async_builder.clone();
        builder.logger(self.logger.clone());
        track!(builder.finish_with_metrics(
            Arc::clone(&self.backend),
            self.id,
            oid,
            callbacks.clone(),
            self.aio_metrics.clone(),
            self.buffer_metrics.clone(),
        ))
    }

    fn retry_policy(&self, initial_size: usize) -> GrowRetryPolicy {
        let mut policy = GrowRetryPolicy::new(initial_size);
        policy.metrics(self.buffer_metrics.clone());
        policy
    }
}

/// プール識別子を検査し、負の値であればステータスとしてエラーに変換する.
fn check_pool_id(id: i64) -> Result<PoolId> {
    if id < 0 {
        let status = i32::try_from(id).unwrap_or(-libc::ERANGE);
        return Err(track!(Error::from(
            ErrorKind::Other.cause(NativeStatus::new(status))
        )));
    }
    Ok(id)
}

fn check_name(name: &str) -> Result<()> {
    track_assert!(
        !name.contains('\0'),
        ErrorKind::InvalidInput,
        "Name contains a NUL character: {:?}",
        name
    );
    Ok(())
}

fn utf8(mut bytes: Vec<u8>) -> Result<String> {
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    track!(String::from_utf8(bytes).map_err(|e| Error::from(ErrorKind::Other.cause(e))))
}
