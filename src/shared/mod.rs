pub mod ids;
pub mod logging;
pub mod time;

pub use ids::InstanceId;
pub use logging::EventLog;
pub use time::{now_millis, Timestamp};
