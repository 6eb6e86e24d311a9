use std::fmt;
use std::io;
use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl Error {
    /// エラーの原因となったネイティブ層のステータスコード(負のerrno値)を返す.
    ///
    /// ネイティブ層とは無関係なエラーの場合には`None`が返される.
    pub fn status(&self) -> Option<i32> {
        self.0.concrete_cause::<NativeStatus>().map(|s| s.code())
    }
}
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(e) = e.get_ref().and_then(|e| e.downcast_ref::<Error>()).cloned() {
            e
        } else if e.kind() == std::io::ErrorKind::InvalidInput {
            ErrorKind::InvalidInput.cause(e).into()
        } else {
            ErrorKind::Other.cause(e).into()
        }
    }
}
impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        if *e.kind() == ErrorKind::InvalidInput {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        } else {
            std::io::Error::new(std::io::ErrorKind::Other, e)
        }
    }
}
impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ErrorKind::InconsistentState.cause(e.to_string()).into()
    }
}

/// 発生し得るエラーの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// ネイティブ層への非同期操作の発行自体に失敗した.
    ///
    /// この場合には、いずれのマイルストーン(`Complete`ないし`Safe`)も発火しない.
    ///
    /// # 典型的な対応策
    ///
    /// - 対象オブジェクトやプールが存在するかを確認する
    /// - クラスタへの接続が切れていないかを確認した上でリトライする
    IssueFailed,

    /// `Complete`マイルストーン(メモリ上への反映)が失敗ステータスで解決された.
    ///
    /// # 典型的な対応策
    ///
    /// - 操作内容(e.g., 存在しないオブジェクトの削除)を見直す
    /// - 一時的な障害であれば、利用者側でリトライする
    CompletionFailed,

    /// `Safe`マイルストーン(永続化)が失敗ステータスで解決された.
    ///
    /// `Complete`側が成功していても、このエラーが別途通知されることがある.
    DurabilityFailed,

    /// 読み込み操作は成功したが、一バイトも得られなかった.
    ///
    /// 空の結果は意図しない状況であることがほとんどのため、
    /// 成功扱いにはせずに、明示的なエラーとして区別している.
    EmptyResult,

    /// 可変長の結果を受け取るためのバッファ拡張が、上限回数に達した.
    ///
    /// # 典型的な対応策
    ///
    /// - `GrowRetryPolicy`の初期サイズないし最大試行回数を増やす
    BufferExhausted,

    /// 入力が不正.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// 内部状態が不整合に陥っている.
    ///
    /// 解放済みハンドルへの待機等、プログラムにバグがあることを示している.
    ///
    /// # 典型的な対応策
    ///
    /// - バグ修正を行ってプログラムを更新する
    InconsistentState,

    /// その他エラー.
    ///
    /// E.g., 同期的なネイティブ呼び出しの失敗
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}

/// ネイティブ層が返すステータスコード.
///
/// 負の値はerrno値の符号を反転させたものであり、
/// 非負の値は成功(ないし処理されたバイト数)を表す.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeStatus(i32);
impl NativeStatus {
    /// 新しい`NativeStatus`インスタンスを生成する.
    pub fn new(code: i32) -> Self {
        NativeStatus(code)
    }

    /// ステータスコードの値を返す.
    pub fn code(self) -> i32 {
        self.0
    }

    /// エラーを表すステータスかどうかを判定する.
    pub fn is_error(self) -> bool {
        self.0 < 0
    }
}
impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_error() {
            let e = io::Error::from_raw_os_error(-self.0);
            write!(f, "{}: {}", self.0, e)
        } else {
            write!(f, "{}", self.0)
        }
    }
}
impl std::error::Error for NativeStatus {}

/// ネイティブ層のステータスを検査し、負の値であれば`kind`種別のエラーに変換する.
pub(crate) fn check_status(kind: ErrorKind, status: i32) -> crate::Result<i32> {
    if status < 0 {
        Err(kind.cause(NativeStatus::new(status)).into())
    } else {
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_recoverable_from_error() {
        let e = check_status(ErrorKind::IssueFailed, -libc::ENOENT).err().unwrap();
        assert_eq!(*e.kind(), ErrorKind::IssueFailed);
        assert_eq!(e.status(), Some(-libc::ENOENT));

        let e = track!(e, "Unable to write to object {}", "foo");
        assert_eq!(e.status(), Some(-libc::ENOENT));

        let e: Error = ErrorKind::Other.cause("no native status").into();
        assert_eq!(e.status(), None);
    }

    #[test]
    fn non_negative_status_is_passed_through() {
        assert_eq!(check_status(ErrorKind::Other, 0).ok(), Some(0));
        assert_eq!(check_status(ErrorKind::Other, 11).ok(), Some(11));
    }
}
