//! Ports - 抽象化レイヤー
//!
//! ディスパッチのコアと外側の境界にある trait 群。
//! - `JobStore`: キューのストレージ（テストは in-memory、単一ノード本番は file snapshot）
//! - `Clock` / `IdGenerator`: 時刻と ID。テストで差し替え可能
//! - `EventSink`: ライフサイクルイベント
//! - `SessionResolver`: `app::guard` が使う認証の協調先

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod job_store;
pub mod session;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{ClaimRequest, ClaimWait, JobStore, Release};
pub use self::session::{Session, SessionResolver, Unauthorized, User, Workspace};
