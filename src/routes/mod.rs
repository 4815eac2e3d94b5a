pub mod health;
pub mod messages;
pub mod profiles;
pub mod stats;

pub use health::AppState;
pub use messages::ProxyState;
pub use profiles::AdminState;
pub use stats::StatsState;
