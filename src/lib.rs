// Loyalty points platform
//
// Two cooperating subsystems share this crate: the rule engine, which
// evaluates reward rules over schemaless order documents, and the points
// ledger, which records deferred accruals and reconciles them against
// account balances. The server binary exposes both HTTP facades; the job
// binaries run the broker consumers and the scheduled activation.

pub mod config;
pub mod consumers;
pub mod db;
pub mod engine;
pub mod points;
