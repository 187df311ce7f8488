pub mod call_log;
pub mod call_state;
pub mod codec;
pub mod config;
pub mod event;
pub mod external;
pub mod fsm;
pub mod queue;
pub mod state_store;
pub mod wave;

pub use call_log::CallLog;
pub use call_state::{CallState, Direction, Phase};
pub use event::{EventBus, EventRecord};
pub use external::RecordStore;
pub use queue::QueueEntry;
pub use state_store::{InMemoryStateStore, RedisStateStore, StateStore, StateStoreError};
pub use wave::OutboundWave;
