//! オブジェクトストレージのネイティブクライアント層のインタフェース定義と実装群.
//!
//! このモジュールは、配置(CRUSH)や複製、永続化といったクラスタ内部の処理を全て隠蔽した、
//! 不透明なバックエンドを[ObjectBackend]トレイトとして表現する.
//!
//! ネイティブ層の非同期操作は、二つの独立したマイルストーンを持つ:
//!
//! - `Complete`: 全レプリカのメモリ上に反映された
//! - `Safe`: 全レプリカの安定ストレージに永続化された
//!
//! 両者の発火順序は保証されない(`Safe`が先に発火することもあり得る).
//!
//! [ObjectBackend]: trait.ObjectBackend.html
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use self::memory::{
    MemoryBackend, MemoryBackendBuilder, MemoryCompletion, MilestoneOrder, MAX_OBJECT_SIZE,
};

use crate::buffer::SharedBuffer;
use crate::{ErrorKind, Result};

mod memory;

/// プールの識別子.
pub type PoolId = i64;

/// 非同期操作のマイルストーン.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Milestone {
    /// 操作がメモリ上に反映された.
    Complete,

    /// 操作が永続化された.
    Safe,
}
impl Milestone {
    /// 全てのマイルストーン.
    pub const ALL: [Milestone; 2] = [Milestone::Complete, Milestone::Safe];

    /// このマイルストーンが失敗ステータスで解決された場合のエラー種別を返す.
    pub fn failure_kind(self) -> ErrorKind {
        match self {
            Milestone::Complete => ErrorKind::CompletionFailed,
            Milestone::Safe => ErrorKind::DurabilityFailed,
        }
    }

    /// ログやメトリクスのラベル用の名前を返す.
    pub fn as_str(self) -> &'static str {
        match self {
            Milestone::Complete => "complete",
            Milestone::Safe => "safe",
        }
    }
}

/// クラスタへの接続設定.
///
/// 全ての項目が未設定の場合には、バックエンドのデフォルト設定が使用される.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// 接続先のクラスタ名.
    ///
    /// 指定する場合には、完全修飾されたユーザ名(e.g., `client.admin`)も合わせて指定する必要がある.
    pub cluster_name: Option<String>,

    /// 接続ユーザ名.
    pub user_name: Option<String>,

    /// 設定ファイルのパス.
    pub config_file: Option<PathBuf>,

    /// 設定(コマンドラインフラグ形式)を保持する環境変数名.
    pub config_env: Option<String>,

    /// 設定として解釈するコマンドライン引数.
    pub config_args: Option<Vec<String>>,

    /// キー・バリュー形式の設定.
    pub config_map: BTreeMap<String, String>,
}
impl ConnectionConfig {
    /// 設定ソースが何も指定されていないかどうかを判定する.
    pub fn uses_default_source(&self) -> bool {
        self.config_file.is_none()
            && self.config_env.is_none()
            && self.config_args.is_none()
            && self.config_map.is_empty()
    }
}

/// 不透明なストレージバックエンド(ネイティブクライアントライブラリ)を表すトレイト.
///
/// 返り値の`i32`は全てネイティブ層のステータスコードであり、
/// 負の値はerrno値の符号を反転させたもの、非負の値は成功を表す.
///
/// 非同期操作(`aio_*`)は、ステータスを返した時点では発行されただけであり、
/// その完了は`wait_for`で各マイルストーン毎に待機する必要がある.
/// 一つの`Completion`は、高々一つの非同期操作にのみ使用される.
pub trait ObjectBackend: Sized + Send + Sync + 'static {
    /// ネイティブ層の完了通知オブジェクト.
    type Completion: Send + Sync + 'static;

    /// 指定の設定でクラスタに接続する.
    fn connect(config: &ConnectionConfig) -> Result<Self>;

    /// クラスタとの接続を閉じる.
    ///
    /// 以降に発行された操作は全て失敗する.
    fn shutdown(&self);

    /// 新しい完了通知オブジェクトを生成する.
    fn create_completion(&self) -> Result<Self::Completion>;

    /// オブジェクトの`offset`位置に`data`を書き込む操作を発行する.
    ///
    /// `data`の内容は、このメソッドが返るまでにバックエンド側にコピーされる.
    fn aio_write(
        &self,
        pool: PoolId,
        oid: &str,
        completion: &Self::Completion,
        data: &[u8],
        offset: u64,
    ) -> i32;

    /// オブジェクトの内容を`data`で置き換える操作を発行する.
    fn aio_write_full(
        &self,
        pool: PoolId,
        oid: &str,
        completion: &Self::Completion,
        data: &[u8],
    ) -> i32;

    /// オブジェクトの末尾に`data`を追記する操作を発行する.
    fn aio_append(&self, pool: PoolId, oid: &str, completion: &Self::Completion, data: &[u8])
        -> i32;

    /// オブジェクトを削除する操作を発行する.
    fn aio_remove(&self, pool: PoolId, oid: &str, completion: &Self::Completion) -> i32;

    /// オブジェクトの`offset`位置から`buffer`の容量分を読み込む操作を発行する.
    ///
    /// 読み込み結果は非同期に`buffer`へと書き込まれ、
    /// 読み込まれたバイト数は`return_value`で取得できる.
    fn aio_read(
        &self,
        pool: PoolId,
        oid: &str,
        completion: &Self::Completion,
        buffer: SharedBuffer,
        offset: u64,
    ) -> i32;

    /// 指定のマイルストーンが発火するまで、呼び出しスレッドをブロックする.
    ///
    /// 返り値は、そのマイルストーン自体の成否を表すステータス.
    fn wait_for(&self, completion: &Self::Completion, milestone: Milestone) -> i32;

    /// 非同期操作の結果(ステータスないし読み込まれたバイト数)を返す.
    fn return_value(&self, completion: &Self::Completion) -> i32;

    /// 完了通知オブジェクトを解放する.
    ///
    /// 一つの完了通知オブジェクトに対して、ちょうど一度だけ呼び出される必要がある.
    fn release(&self, completion: Self::Completion);

    /// 指定プールに対して発行済みの全ての非同期操作が永続化されるまで待機する.
    fn aio_flush(&self, pool: PoolId) -> i32;

    /// プールを作成する.
    fn pool_create(&self, name: &str) -> i32;

    /// プールを削除する.
    fn pool_delete(&self, name: &str) -> i32;

    /// プール名に対応する識別子を返す(存在しない場合は負のステータス).
    fn pool_lookup(&self, name: &str) -> i64;

    /// プール名の一覧を`buf`に書き込む.
    ///
    /// 各名前はNUL終端され、一覧の末尾には追加のNULが置かれる.
    /// 返り値は一覧全体に必要なバイト数であり、`buf`の長さを超えている場合には何も書き込まれない.
    fn pool_list(&self, buf: &mut [u8]) -> i32;

    /// プール名を`buf`に書き込む.
    ///
    /// `buf`が不足している場合には`-ERANGE`を返す.
    fn pool_name(&self, pool: PoolId, buf: &mut [u8]) -> i32;

    /// オブジェクトの属性値を`buf`に書き込む.
    ///
    /// `buf`が不足している場合には`-ERANGE`を返す.
    fn getxattr(&self, pool: PoolId, oid: &str, name: &str, buf: &mut [u8]) -> i32;

    /// オブジェクトの属性値を設定する.
    fn setxattr(&self, pool: PoolId, oid: &str, name: &str, value: &[u8]) -> i32;

    /// オブジェクトの属性を削除する.
    fn rmxattr(&self, pool: PoolId, oid: &str, name: &str) -> i32;

    /// オブジェクトのサイズおよび更新時刻(UNIX時間、秒単位)を取得する.
    fn stat(&self, pool: PoolId, oid: &str, size: &mut u64, mtime: &mut i64) -> i32;
}
