mod acquire;
mod manager;
mod store;

pub use acquire::TokenAcquirer;
pub use manager::{ProbeVerdict, TokenLifecycleManager};
pub use store::TokenStore;
