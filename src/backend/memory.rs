use slog::{Discard, Logger};
use std::cmp;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self as std_mpsc, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use trackable::error::ErrorKindExt;

use crate::backend::{ConnectionConfig, Milestone, ObjectBackend, PoolId};
use crate::buffer::SharedBuffer;
use crate::{ErrorKind, Result};

/// 一つのオブジェクトが保持可能な最大バイト数.
///
/// これを超える書き込みは`-EFBIG`で失敗する.
pub const MAX_OBJECT_SIZE: u64 = 128 * 1024 * 1024;

/// `MemoryBackend`がマイルストーンを発火させる順序.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneOrder {
    /// `Complete`の後に`Safe`を発火させる.
    CompleteFirst,

    /// `Safe`の後に`Complete`を発火させる.
    ///
    /// ネイティブ層の契約上は排除されていない順序であり、
    /// 利用側が順序を仮定していないことを確認するために使用する.
    SafeFirst,
}
impl Default for MilestoneOrder {
    fn default() -> Self {
        MilestoneOrder::CompleteFirst
    }
}

/// `MemoryBackend`のビルダ.
#[derive(Debug, Clone)]
pub struct MemoryBackendBuilder {
    milestone_order: MilestoneOrder,
    durability_delay: Duration,
    issue_failures: HashMap<String, i32>,
    milestone_failures: HashMap<(String, Milestone), i32>,
    pools: Vec<String>,
    logger: Logger,
}
impl MemoryBackendBuilder {
    /// デフォルト設定で`MemoryBackendBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        MemoryBackendBuilder {
            milestone_order: MilestoneOrder::default(),
            durability_delay: Duration::from_millis(0),
            issue_failures: HashMap::new(),
            milestone_failures: HashMap::new(),
            pools: Vec::new(),
            logger: Logger::root(Discard, o!()),
        }
    }

    /// マイルストーンの発火順序を設定する.
    ///
    /// デフォルト値は`MilestoneOrder::CompleteFirst`.
    pub fn milestone_order(&mut self, order: MilestoneOrder) -> &mut Self {
        self.milestone_order = order;
        self
    }

    /// 一つ目のマイルストーンから二つ目のマイルストーンまでの遅延を設定する.
    ///
    /// デフォルト値は`Duration::from_millis(0)`.
    pub fn durability_delay(&mut self, delay: Duration) -> &mut Self {
        self.durability_delay = delay;
        self
    }

    /// `oid`に対する非同期操作の発行が、常に`status`で失敗するようにする.
    pub fn inject_issue_failure(&mut self, oid: &str, status: i32) -> &mut Self {
        self.issue_failures.insert(oid.to_owned(), status);
        self
    }

    /// `oid`に対する非同期操作の`milestone`が、常に`status`で解決されるようにする.
    pub fn inject_milestone_failure(
        &mut self,
        oid: &str,
        milestone: Milestone,
        status: i32,
    ) -> &mut Self {
        self.milestone_failures
            .insert((oid.to_owned(), milestone), status);
        self
    }

    /// 起動時に作成しておくプールを追加する.
    pub fn pool(&mut self, name: &str) -> &mut Self {
        self.pools.push(name.to_owned());
        self
    }

    /// バックエンド用の logger を登録する.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// `MemoryBackend`を起動する.
    ///
    /// 非同期操作を処理するための専用OSスレッドが一つ割り当てられる.
    pub fn finish(&self) -> MemoryBackend {
        let mut state = ClusterState::default();
        for name in &self.pools {
            state.create_pool(name);
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            is_shutdown: AtomicBool::new(false),
            live_completions: AtomicUsize::new(0),
            released_completions: AtomicUsize::new(0),
            double_releases: AtomicUsize::new(0),
        });

        let (io_tx, io_rx) = std_mpsc::channel();
        let osd = OsdThread {
            shared: Arc::clone(&shared),
            io_rx,
            milestone_order: self.milestone_order,
            durability_delay: self.durability_delay,
            milestone_failures: self.milestone_failures.clone(),
            logger: self.logger.clone(),
        };
        thread::spawn(move || osd.run());

        MemoryBackend {
            shared,
            io_tx: Mutex::new(io_tx),
            issue_failures: self.issue_failures.clone(),
        }
    }

    fn apply_config_map(&mut self, config_map: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in config_map {
            match key.as_str() {
                "memory_milestone_order" => {
                    let order = match value.as_str() {
                        "complete_first" => MilestoneOrder::CompleteFirst,
                        "safe_first" => MilestoneOrder::SafeFirst,
                        _ => track_panic!(ErrorKind::InvalidInput, "Unknown order: {:?}", value),
                    };
                    self.milestone_order(order);
                }
                "memory_durability_delay_ms" => {
                    let millis = track!(value
                        .parse::<u64>()
                        .map_err(|e| ErrorKind::InvalidInput.cause(e)))?;
                    self.durability_delay(Duration::from_millis(millis));
                }
                "memory_pools" => {
                    for name in value.split(',').filter(|s| !s.is_empty()) {
                        self.pool(name.trim());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
impl Default for MemoryBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// メモリベースの`ObjectBackend`の実装.
///
/// 非同期操作は専用スレッド上で発行順に処理され、
/// 処理後に`Complete`と`Safe`の二つのマイルストーンが(設定された順序で)発火する.
///
/// # 注意
///
/// これは主にテストや性能計測用途を意図した実装であり、
/// 実際のクラスタが提供する複製や永続化は行わない.
#[derive(Debug)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
    io_tx: Mutex<Sender<Io>>,
    issue_failures: HashMap<String, i32>,
}
impl MemoryBackend {
    /// デフォルト設定で`MemoryBackend`を起動する.
    pub fn new() -> Self {
        MemoryBackendBuilder::new().finish()
    }

    /// 未解放の完了通知オブジェクトの数を返す.
    pub fn live_completions(&self) -> usize {
        self.shared.live_completions.load(Ordering::SeqCst)
    }

    /// これまでに解放された完了通知オブジェクトの数を返す.
    pub fn released_completions(&self) -> usize {
        self.shared.released_completions.load(Ordering::SeqCst)
    }

    /// 解放済みの完了通知オブジェクトに対して、再度解放が試みられた回数を返す.
    pub fn double_releases(&self) -> usize {
        self.shared.double_releases.load(Ordering::SeqCst)
    }

    /// オブジェクトの現在の内容を返す.
    pub fn object_data(&self, pool: PoolId, oid: &str) -> Option<Vec<u8>> {
        self.shared
            .lock_state()
            .objects
            .get(&(pool, oid.to_owned()))
            .map(|o| o.data.clone())
    }

    fn submit(
        &self,
        pool: PoolId,
        oid: &str,
        completion: &MemoryCompletion,
        action: IoAction,
    ) -> i32 {
        if self.shared.is_shutdown.load(Ordering::SeqCst) {
            return -libc::ENOTCONN;
        }
        if let Some(&status) = self.issue_failures.get(oid) {
            return status;
        }
        if !self.shared.lock_state().pool_exists(pool) {
            return -libc::ENOENT;
        }
        if !completion.mark_issued() {
            // 一つの完了通知オブジェクトを複数の操作で使い回すことはできない
            return -libc::EINVAL;
        }

        let io = Io {
            pool,
            oid: oid.to_owned(),
            action,
            completion: completion.clone(),
        };
        let tx = self.io_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if tx.send(io).is_err() {
            return -libc::ENOTCONN;
        }
        0
    }
}
impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
impl ObjectBackend for MemoryBackend {
    type Completion = MemoryCompletion;

    fn connect(config: &ConnectionConfig) -> Result<Self> {
        if let Some(ref path) = config.config_file {
            track_assert!(
                path.exists(),
                ErrorKind::InvalidInput,
                "Unable to load configuration file: {:?}",
                path
            );
        }
        if let Some(ref env) = config.config_env {
            track_assert!(
                std::env::var_os(env).is_some(),
                ErrorKind::InvalidInput,
                "Unable to load configuration from env: {}",
                env
            );
        }
        let mut builder = MemoryBackendBuilder::new();
        track!(builder.apply_config_map(&config.config_map))?;
        Ok(builder.finish())
    }

    fn shutdown(&self) {
        self.shared.is_shutdown.store(true, Ordering::SeqCst);
    }

    fn create_completion(&self) -> Result<Self::Completion> {
        self.shared.live_completions.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryCompletion::new())
    }

    fn aio_write(
        &self,
        pool: PoolId,
        oid: &str,
        completion: &Self::Completion,
        data: &[u8],
        offset: u64,
    ) -> i32 {
        let action = IoAction::Write {
            data: Vec::from(data),
            offset,
        };
        self.submit(pool, oid, completion, action)
    }

    fn aio_write_full(
        &self,
        pool: PoolId,
        oid: &str,
        completion: &Self::Completion,
        data: &[u8],
    ) -> i32 {
        let action = IoAction::WriteFull {
            data: Vec::from(data),
        };
        self.submit(pool, oid, completion, action)
    }

    fn aio_append(
        &self,
        pool: PoolId,
        oid: &str,
        completion: &Self::Completion,
        data: &[u8],
    ) -> i32 {
        let action = IoAction::Append {
            data: Vec::from(data),
        };
        self.submit(pool, oid, completion, action)
    }

    fn aio_remove(&self, pool: PoolId, oid: &str, completion: &Self::Completion) -> i32 {
        self.submit(pool, oid, completion, IoAction::Remove)
    }

    fn aio_read(
        &self,
        pool: PoolId,
        oid: &str,
        completion: &Self::Completion,
        buffer: SharedBuffer,
        offset: u64,
    ) -> i32 {
        self.submit(pool, oid, completion, IoAction::Read { buffer, offset })
    }

    fn wait_for(&self, completion: &Self::Completion, milestone: Milestone) -> i32 {
        completion.wait(milestone)
    }

    fn return_value(&self, completion: &Self::Completion) -> i32 {
        completion.lock().return_value
    }

    fn release(&self, completion: Self::Completion) {
        if completion.mark_released() {
            self.shared.live_completions.fetch_sub(1, Ordering::SeqCst);
            self.shared
                .released_completions
                .fetch_add(1, Ordering::SeqCst);
        } else {
            self.shared.double_releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn aio_flush(&self, pool: PoolId) -> i32 {
        let completion = MemoryCompletion::new();
        let status = self.submit(pool, "", &completion, IoAction::Flush);
        if status < 0 {
            return status;
        }
        // 操作は発行順に処理されるので、フラッシュ用の操作が永続化された時点で先行操作も全て永続化済み
        let status = completion.wait(Milestone::Safe);
        completion.mark_released();
        status
    }

    fn pool_create(&self, name: &str) -> i32 {
        let mut state = self.shared.lock_state();
        if state.pools.contains_key(name) {
            return -libc::EEXIST;
        }
        state.create_pool(name);
        0
    }

    fn pool_delete(&self, name: &str) -> i32 {
        let mut state = self.shared.lock_state();
        if let Some(id) = state.pools.remove(name) {
            state.objects.retain(|&(pool, _), _| pool != id);
            0
        } else {
            -libc::ENOENT
        }
    }

    fn pool_lookup(&self, name: &str) -> i64 {
        let state = self.shared.lock_state();
        state
            .pools
            .get(name)
            .cloned()
            .unwrap_or_else(|| -i64::from(libc::ENOENT))
    }

    fn pool_list(&self, buf: &mut [u8]) -> i32 {
        let state = self.shared.lock_state();
        let mut list = Vec::new();
        for name in state.pools.keys() {
            list.extend_from_slice(name.as_bytes());
            list.push(0);
        }
        list.push(0);
        if list.len() <= buf.len() {
            buf[..list.len()].copy_from_slice(&list);
        }
        list.len() as i32
    }

    fn pool_name(&self, pool: PoolId, buf: &mut [u8]) -> i32 {
        let state = self.shared.lock_state();
        let name = match state.pool_name(pool) {
            None => return -libc::ENOENT,
            Some(name) => name,
        };
        if buf.len() <= name.len() {
            return -libc::ERANGE;
        }
        buf[..name.len()].copy_from_slice(name.as_bytes());
        buf[name.len()] = 0;
        name.len() as i32
    }

    fn getxattr(&self, pool: PoolId, oid: &str, name: &str, buf: &mut [u8]) -> i32 {
        let state = self.shared.lock_state();
        let object = match state.objects.get(&(pool, oid.to_owned())) {
            None => return -libc::ENOENT,
            Some(object) => object,
        };
        let value = match object.xattrs.get(name) {
            None => return -libc::ENODATA,
            Some(value) => value,
        };
        if buf.len() < value.len() {
            return -libc::ERANGE;
        }
        buf[..value.len()].copy_from_slice(value);
        value.len() as i32
    }

    fn setxattr(&self, pool: PoolId, oid: &str, name: &str, value: &[u8]) -> i32 {
        let mut state = self.shared.lock_state();
        if !state.pool_exists(pool) {
            return -libc::ENOENT;
        }
        let object = state.objects.entry((pool, oid.to_owned())).or_default();
        object.xattrs.insert(name.to_owned(), Vec::from(value));
        object.touch();
        0
    }

    fn rmxattr(&self, pool: PoolId, oid: &str, name: &str) -> i32 {
        let mut state = self.shared.lock_state();
        match state.objects.get_mut(&(pool, oid.to_owned())) {
            None => -libc::ENOENT,
            Some(object) => {
                if object.xattrs.remove(name).is_some() {
                    object.touch();
                    0
                } else {
                    -libc::ENODATA
                }
            }
        }
    }

    fn stat(&self, pool: PoolId, oid: &str, size: &mut u64, mtime: &mut i64) -> i32 {
        let state = self.shared.lock_state();
        match state.objects.get(&(pool, oid.to_owned())) {
            None => -libc::ENOENT,
            Some(object) => {
                *size = object.data.len() as u64;
                *mtime = object.mtime;
                0
            }
        }
    }
}

/// `MemoryBackend`用の完了通知オブジェクト.
#[derive(Debug, Clone)]
pub struct MemoryCompletion(Arc<CompletionCell>);
impl MemoryCompletion {
    fn new() -> Self {
        MemoryCompletion(Arc::new(CompletionCell::default()))
    }

    /// 指定のマイルストーンが既に発火しているかどうかを判定する.
    pub fn is_fired(&self, milestone: Milestone) -> bool {
        self.lock().get(milestone).is_some()
    }

    fn lock(&self) -> MutexGuard<CompletionState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_issued(&self) -> bool {
        let mut state = self.lock();
        if state.issued || state.released {
            false
        } else {
            state.issued = true;
            true
        }
    }

    fn mark_released(&self) -> bool {
        let mut state = self.lock();
        if state.released {
            false
        } else {
            state.released = true;
            self.0.cond.notify_all();
            true
        }
    }

    fn fire(&self, milestone: Milestone, return_value: i32, status: i32) {
        let mut state = self.lock();
        state.return_value = return_value;
        match milestone {
            Milestone::Complete => state.complete = Some(status),
            Milestone::Safe => state.safe = Some(status),
        }
        self.0.cond.notify_all();
    }

    fn wait(&self, milestone: Milestone) -> i32 {
        let mut state = self.lock();
        loop {
            if state.released {
                return -libc::EINVAL;
            }
            if let Some(status) = state.get(milestone) {
                return status;
            }
            state = self
                .0
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[derive(Debug, Default)]
struct CompletionCell {
    state: Mutex<CompletionState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct CompletionState {
    complete: Option<i32>,
    safe: Option<i32>,
    return_value: i32,
    issued: bool,
    released: bool,
}
impl CompletionState {
    fn get(&self, milestone: Milestone) -> Option<i32> {
        match milestone {
            Milestone::Complete => self.complete,
            Milestone::Safe => self.safe,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ClusterState>,
    is_shutdown: AtomicBool,
    live_completions: AtomicUsize,
    released_completions: AtomicUsize,
    double_releases: AtomicUsize,
}
impl Shared {
    fn lock_state(&self) -> MutexGuard<ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    pools: BTreeMap<String, PoolId>,
    next_pool_id: PoolId,
    objects: BTreeMap<(PoolId, String), MemoryObject>,
}
impl ClusterState {
    fn create_pool(&mut self, name: &str) {
        if !self.pools.contains_key(name) {
            self.next_pool_id += 1;
            self.pools.insert(name.to_owned(), self.next_pool_id);
        }
    }

    fn pool_exists(&self, pool: PoolId) -> bool {
        self.pools.values().any(|&id| id == pool)
    }

    fn pool_name(&self, pool: PoolId) -> Option<&str> {
        self.pools
            .iter()
            .find(|&(_, &id)| id == pool)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Default)]
struct MemoryObject {
    data: Vec<u8>,
    xattrs: BTreeMap<String, Vec<u8>>,
    mtime: i64,
}
impl MemoryObject {
    /// `data`を`end - data.len()`の位置に書き込む.
    fn write_at(&mut self, data: &[u8], end: usize) {
        let offset = end - data.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(data);
        self.touch();
    }

    fn touch(&mut self) {
        self.mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
    }
}

/// `offset`から`len`バイトを書き込んだ後のオブジェクトの末尾位置.
///
/// 末尾が`MAX_OBJECT_SIZE`を超える場合には`None`を返す.
fn object_end(offset: u64, len: usize) -> Option<usize> {
    offset
        .checked_add(len as u64)
        .filter(|&end| end <= MAX_OBJECT_SIZE)
        .map(|end| end as usize)
}

#[derive(Debug)]
struct Io {
    pool: PoolId,
    oid: String,
    action: IoAction,
    completion: MemoryCompletion,
}

#[derive(Debug)]
enum IoAction {
    Write { data: Vec<u8>, offset: u64 },
    WriteFull { data: Vec<u8> },
    Append { data: Vec<u8> },
    Remove,
    Read { buffer: SharedBuffer, offset: u64 },
    Flush,
}

/// 非同期操作を発行順に処理するスレッド.
struct OsdThread {
    shared: Arc<Shared>,
    io_rx: Receiver<Io>,
    milestone_order: MilestoneOrder,
    durability_delay: Duration,
    milestone_failures: HashMap<(String, Milestone), i32>,
    logger: Logger,
}
impl OsdThread {
    fn run(self) {
        while let Ok(io) = self.io_rx.recv() {
            self.handle_io(io);
        }
        debug!(self.logger, "Memory backend thread stopped");
    }

    fn handle_io(&self, io: Io) {
        let Io {
            pool,
            oid,
            action,
            completion,
        } = io;
        let return_value = self.apply(pool, &oid, action);
        debug!(self.logger, "Applied an operation";
               "pool" => pool, "oid" => &oid, "return_value" => return_value);

        let (first, second) = match self.milestone_order {
            MilestoneOrder::CompleteFirst => (Milestone::Complete, Milestone::Safe),
            MilestoneOrder::SafeFirst => (Milestone::Safe, Milestone::Complete),
        };
        completion.fire(first, return_value, self.milestone_status(&oid, first));
        if self.durability_delay > Duration::from_millis(0) {
            thread::sleep(self.durability_delay);
        }
        completion.fire(second, return_value, self.milestone_status(&oid, second));
    }

    fn milestone_status(&self, oid: &str, milestone: Milestone) -> i32 {
        self.milestone_failures
            .get(&(oid.to_owned(), milestone))
            .cloned()
            .unwrap_or(0)
    }

    fn apply(&self, pool: PoolId, oid: &str, action: IoAction) -> i32 {
        let mut state = self.shared.lock_state();
        if !state.pool_exists(pool) {
            return -libc::ENOENT;
        }
        let key = (pool, oid.to_owned());
        match action {
            IoAction::Write { data, offset } => {
                let end = match object_end(offset, data.len()) {
                    None => return -libc::EFBIG,
                    Some(end) => end,
                };
                let object = state.objects.entry(key).or_default();
                object.write_at(&data, end);
                0
            }
            IoAction::WriteFull { data } => {
                let object = state.objects.entry(key).or_default();
                object.data = data;
                object.touch();
                0
            }
            IoAction::Append { data } => {
                let current = state.objects.get(&key).map_or(0, |o| o.data.len());
                let end = match object_end(current as u64, data.len()) {
                    None => return -libc::EFBIG,
                    Some(end) => end,
                };
                let object = state.objects.entry(key).or_default();
                object.write_at(&data, end);
                0
            }
            IoAction::Remove => {
                if state.objects.remove(&key).is_some() {
                    0
                } else {
                    -libc::ENOENT
                }
            }
            IoAction::Read { buffer, offset } => {
                let object = match state.objects.get(&key) {
                    None => return -libc::ENOENT,
                    Some(object) => object,
                };
                let start = cmp::min(offset as usize, object.data.len());
                let copied = buffer.with_mut(|b| {
                    let n = cmp::min(b.capacity(), object.data.len() - start);
                    b.as_bytes_mut()[..n].copy_from_slice(&object.data[start..start + n]);
                    n
                });
                match copied {
                    Ok(n) => n as i32,
                    Err(_) => -libc::EIO,
                }
            }
            IoAction::Flush => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::buffer::{GrowRetryPolicy, TransientBuffer};

    fn pool_id(backend: &MemoryBackend, name: &str) -> PoolId {
        let id = backend.pool_lookup(name);
        assert!(id > 0);
        id
    }

    #[test]
    fn aio_write_and_read_works() -> TestResult {
        let backend = MemoryBackendBuilder::new().pool("data").finish();
        let pool = pool_id(&backend, "data");

        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_write_full(pool, "foo", &c, b"hello world"), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Complete), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Safe), 0);
        assert_eq!(backend.return_value(&c), 0);
        backend.release(c);

        let c = track!(backend.create_completion())?;
        let buffer = SharedBuffer::new(TransientBuffer::allocate(5));
        assert_eq!(backend.aio_read(pool, "foo", &c, buffer.clone(), 6), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Safe), 0);
        assert_eq!(backend.return_value(&c), 5);
        assert_eq!(track!(buffer.materialize(5))?, b"world");
        backend.release(c);

        assert_eq!(backend.live_completions(), 0);
        assert_eq!(backend.released_completions(), 2);
        Ok(())
    }

    #[test]
    fn completion_cannot_be_reused() -> TestResult {
        let backend = MemoryBackendBuilder::new().pool("data").finish();
        let pool = pool_id(&backend, "data");

        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_append(pool, "foo", &c, b"a"), 0);
        assert_eq!(backend.aio_append(pool, "foo", &c, b"b"), -libc::EINVAL);
        assert_eq!(backend.wait_for(&c, Milestone::Safe), 0);

        backend.release(c.clone());
        backend.release(c);
        assert_eq!(backend.double_releases(), 1);
        Ok(())
    }

    #[test]
    fn injected_failures_work() -> TestResult {
        let backend = MemoryBackendBuilder::new()
            .pool("data")
            .inject_issue_failure("broken", -libc::EIO)
            .inject_milestone_failure("flaky", Milestone::Safe, -libc::ETIMEDOUT)
            .finish();
        let pool = pool_id(&backend, "data");

        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_remove(pool, "broken", &c), -libc::EIO);
        backend.release(c);

        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_write(pool, "flaky", &c, b"x", 0), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Complete), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Safe), -libc::ETIMEDOUT);
        backend.release(c);
        Ok(())
    }

    #[test]
    fn oversized_writes_are_rejected() -> TestResult {
        let backend = MemoryBackendBuilder::new().pool("data").finish();
        let pool = pool_id(&backend, "data");

        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_write(pool, "foo", &c, b"x", u64::MAX), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Complete), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Safe), 0);
        assert_eq!(backend.return_value(&c), -libc::EFBIG);
        backend.release(c);

        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_write(pool, "foo", &c, b"x", MAX_OBJECT_SIZE), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Safe), 0);
        assert_eq!(backend.return_value(&c), -libc::EFBIG);
        backend.release(c);
        assert_eq!(backend.object_data(pool, "foo"), None);

        // 後続の操作は通常通りに処理される
        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_write(pool, "foo", &c, b"bar", 2), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Safe), 0);
        assert_eq!(backend.return_value(&c), 0);
        backend.release(c);
        assert_eq!(backend.object_data(pool, "foo"), Some(b"\0\0bar".to_vec()));
        assert_eq!(object_end(MAX_OBJECT_SIZE - 3, 3), Some(MAX_OBJECT_SIZE as usize));
        assert_eq!(object_end(MAX_OBJECT_SIZE - 3, 4), None);
        Ok(())
    }

    #[test]
    fn safe_first_order_works() -> TestResult {
        let backend = MemoryBackendBuilder::new()
            .pool("data")
            .milestone_order(MilestoneOrder::SafeFirst)
            .durability_delay(Duration::from_millis(50))
            .finish();
        let pool = pool_id(&backend, "data");

        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_write_full(pool, "foo", &c, b"x"), 0);
        assert_eq!(backend.wait_for(&c, Milestone::Safe), 0);
        assert!(!c.is_fired(Milestone::Complete));
        assert_eq!(backend.wait_for(&c, Milestone::Complete), 0);
        backend.release(c);
        Ok(())
    }

    #[test]
    fn synchronous_calls_work() -> TestResult {
        let backend = MemoryBackendBuilder::new().pool("data").finish();
        let pool = pool_id(&backend, "data");
        assert_eq!(backend.pool_create("data"), -libc::EEXIST);
        assert_eq!(backend.pool_create("a_very_long_pool_name_for_testing"), 0);

        let list = track!(GrowRetryPolicy::new(4).run(|buf| backend.pool_list(buf)))?;
        assert_eq!(list, b"a_very_long_pool_name_for_testing\0data\0\0".to_vec());

        let name = track!(GrowRetryPolicy::new(1).run(|buf| backend.pool_name(pool, buf)))?;
        assert_eq!(name, b"data");

        assert_eq!(backend.setxattr(pool, "foo", "color", b"blue"), 0);
        let mut buf = [0; 2];
        assert_eq!(backend.getxattr(pool, "foo", "color", &mut buf), -libc::ERANGE);
        let value = track!(GrowRetryPolicy::new(1).run(|buf| backend.getxattr(pool, "foo", "color", buf)))?;
        assert_eq!(value, b"blue");
        assert_eq!(backend.rmxattr(pool, "foo", "color"), 0);
        assert_eq!(backend.rmxattr(pool, "foo", "color"), -libc::ENODATA);

        let (mut size, mut mtime) = (0, 0);
        assert_eq!(backend.stat(pool, "foo", &mut size, &mut mtime), 0);
        assert_eq!(size, 0);
        assert!(mtime > 0);
        assert_eq!(backend.stat(pool, "bar", &mut size, &mut mtime), -libc::ENOENT);

        assert_eq!(backend.pool_delete("data"), 0);
        assert_eq!(backend.pool_lookup("data"), -i64::from(libc::ENOENT));
        Ok(())
    }

    #[test]
    fn flush_waits_for_preceding_operations() -> TestResult {
        let backend = MemoryBackendBuilder::new()
            .pool("data")
            .durability_delay(Duration::from_millis(10))
            .finish();
        let pool = pool_id(&backend, "data");

        let mut completions = Vec::new();
        for i in 0..5u8 {
            let c = track!(backend.create_completion())?;
            assert_eq!(backend.aio_append(pool, "log", &c, &[i]), 0);
            completions.push(c);
        }
        assert_eq!(backend.aio_flush(pool), 0);
        for c in &completions {
            assert!(c.is_fired(Milestone::Safe));
        }
        assert_eq!(backend.object_data(pool, "log"), Some(vec![0, 1, 2, 3, 4]));
        Ok(())
    }

    #[test]
    fn shutdown_rejects_new_operations() -> TestResult {
        let backend = MemoryBackendBuilder::new().pool("data").finish();
        let pool = pool_id(&backend, "data");
        backend.shutdown();

        let c = track!(backend.create_completion())?;
        assert_eq!(backend.aio_remove(pool, "foo", &c), -libc::ENOTCONN);
        backend.release(c);
        Ok(())
    }

    #[test]
    fn connect_applies_config_map() -> TestResult {
        let mut config = ConnectionConfig::default();
        config
            .config_map
            .insert("memory_pools".to_owned(), "a,b".to_owned());
        let backend = track!(MemoryBackend::connect(&config))?;
        assert!(backend.pool_lookup("a") > 0);
        assert!(backend.pool_lookup("b") > 0);

        config
            .config_map
            .insert("memory_milestone_order".to_owned(), "sideways".to_owned());
        assert_eq!(
            MemoryBackend::connect(&config).err().map(|e| *e.kind()),
            Some(ErrorKind::InvalidInput)
        );
        Ok(())
    }
}
