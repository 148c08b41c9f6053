pub mod average;
pub mod clean;
pub mod controls;
pub mod cuts;
pub mod etl;
pub mod rolling;
pub mod stats;
pub mod uncert_est;
pub mod x2_cut;

pub use crate::domain::ports::{Pipeline, Storage};
pub use crate::utils::error::Result;
pub use cuts::{CutList, CutStage};
pub use etl::EtlEngine;
