pub mod command;
pub mod order;
pub mod position;
pub mod status;

pub use command::{parse_command, Action, Command, ParsedCommand, ScoreRange, TradeSignal};
pub use order::{ExecutionReceipt, OrderKind, OrderRequest};
pub use position::{Direction, Position};
pub use status::DaemonStatus;
