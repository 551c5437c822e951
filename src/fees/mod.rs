pub mod late_fee;

pub use late_fee::{LateFeeAccrual, LateFeeCalculation, LateFeeSummary};
