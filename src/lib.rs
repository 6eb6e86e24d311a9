//! Rados Bridge.
//!
//! `radosbridge`は、二段階の完了通知(complete/safe)を持つオブジェクトストレージのクライアントライブラリを、
//! コールバックと`Future`ベースのインタフェースで扱うためのブリッジ.
//!
//! # 特徴
//!
//! - オブジェクトに対する書き込み・追記・読み込み・削除を非同期に発行可能
//! - 各操作は二つの独立したマイルストーンを持つ
//!   - `Complete`: 全レプリカのメモリ上に反映された
//!   - `Safe`: 全レプリカの安定ストレージに永続化された
//!   - 両者の発火順序は保証されず、一方の失敗が他方を抑制することもない
//! - ネイティブ層と共有されるバッファの寿命を管理する
//!   - 書き込みデータは発行前にコピーされるので、呼び出し元は即座に自分のバッファを再利用できる
//!   - 読み込み結果は、各マイルストーン毎に独立したコピーとして通知される
//! - 結果長が不明な同期呼び出しは、バッファを拡張しながら再試行する
//! - 配置計算や複製、永続化といったクラスタ内部の処理は扱わない
//!
//! # モジュールの依存関係
//!
//! ```text
//! cluster => aio => backend => buffer
//! ```
//!
//! - [cluster]モジュール:
//!   - [Connection]、[Cluster]、[Pool]構造体を提供
//!   - `radosbridge`の利用者が最初に触るのはこのモジュール
//! - [aio]モジュール:
//!   - 主に[AsyncObject]構造体を提供
//!   - 発行スレッドとマイルストーン毎の待機スレッドを使って、ネイティブ層の非同期操作を橋渡しする
//! - [backend]モジュール:
//!   - ネイティブ層を表す[ObjectBackend]トレイトと、そのメモリベースの実装である[MemoryBackend]を提供
//! - [buffer]モジュール:
//!   - ネイティブ層との境界を跨ぐ一時バッファと、バッファ拡張の再試行方針を提供
//!
//! [cluster]: ./cluster/index.html
//! [Connection]: ./cluster/struct.Connection.html
//! [Cluster]: ./cluster/struct.Cluster.html
//! [Pool]: ./cluster/struct.Pool.html
//! [aio]: ./aio/index.html
//! [AsyncObject]: ./aio/struct.AsyncObject.html
//! [backend]: ./backend/index.html
//! [ObjectBackend]: ./backend/trait.ObjectBackend.html
//! [MemoryBackend]: ./backend/struct.MemoryBackend.html
//! [buffer]: ./buffer/index.html
#![warn(missing_docs)]
extern crate fibers;
extern crate futures;
extern crate libc;
extern crate prometrics;
#[macro_use]
extern crate trackable;
extern crate uuid;
#[macro_use]
extern crate slog;

pub use crate::cluster::{Cluster, Connection, ObjectStatus, Pool};
pub use crate::error::{Error, ErrorKind, NativeStatus};

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| track!(crate::Error::from(e)))
    };
}

pub mod aio;
pub mod backend;
pub mod buffer;
pub mod cluster;
pub mod metrics;

mod error;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
