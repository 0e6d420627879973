pub mod chat;
pub mod credential;
pub mod db;
pub mod llm;
pub mod models;
pub mod selector;
pub mod server;
pub mod telemetry;

/**
 * \brief Commonly used modules, for `use puterchat_core_sdk::prelude::*`.
 */
pub mod prelude {
    pub use crate::chat;
    pub use crate::credential;
    pub use crate::db;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::selector;
    pub use crate::server;
    pub use crate::telemetry;
}
