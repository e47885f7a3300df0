//! TrafficSim コア
//!
//! 外部シミュレータプロセス（STd）を1つだけ起動・停止・監視するための部品群です。
//!
//! - [`ProcessHandle`]: 1つのコマンドのプロセス管理（PIDの永続化・生存確認）
//! - [`SceneryDirectory`]: `<name>.info` / `<name>.xml` の組の列挙
//! - [`SimulatorSupervisor`]: シナリオ単位の起動・停止・実行中シナリオの参照
//! - [`LogCatalog`]: 過去のセッションログの参照

pub mod error;
pub mod logs;
pub mod process;
pub mod scenery;
pub mod state;
pub mod supervisor;

pub use error::*;
pub use logs::*;
pub use process::*;
pub use scenery::*;
pub use state::*;
pub use supervisor::*;
