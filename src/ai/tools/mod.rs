pub mod contract;
pub use contract::{AuditFunction, CONTRACT_CODE_ARG, ContractProps, declarations};
