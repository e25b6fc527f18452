pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{Broker, SharedBroker};
pub use message::Outbound;
pub use topic::{Subscriber, TopicIndex};
