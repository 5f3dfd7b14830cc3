//! App - アプリケーション層
//!
//! このモジュールは、ports と workers を組み合わせてドライバを実装します。
//!
//! # 主要コンポーネント
//! - **DriverBuilder**: ドライバの構築とワイヤリング（起動時検証）
//! - **ConcurrentJobDriver / DriverHandle**: スロットとループの起動・停止
//! - **Slot**: claim → execute → finalize → history
//! - **LeaseRenewer**: 実行中の lease 延長
//! - **CleanupLoop**: 終了済みジョブと履歴の削除
//! - **ReaperLoop**: Lease 期限切れの回収

pub mod backoff;
pub mod builder;
pub mod cleanup_loop;
pub mod config;
pub mod driver;
mod lease;
pub mod reaper_loop;
mod slot;
pub mod status;

// 主要な型を再エクスポート
pub use self::backoff::Backoff;
pub use self::builder::{BuildError, DriverBuilder};
pub use self::cleanup_loop::{CleanupLoop, CleanupReport};
pub use self::config::{ConfigError, DriverConfig};
pub use self::driver::{ConcurrentJobDriver, DriverHandle};
pub use self::reaper_loop::ReaperLoop;
pub use self::status::{DriverStatus, JobCounts};
