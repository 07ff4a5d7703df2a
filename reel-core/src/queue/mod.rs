//! Queue-state observability and the administrative queue facade.

mod event_bus;
mod handler;
mod item;
mod state_handler;

pub use event_bus::{
    DEFAULT_QUEUE_EVENT_CAPACITY, QueueEventBus, QueueEventPublisher,
};
pub use handler::{QueueHandler, RecurringJobRegistrar};
pub use item::{orphan_item, queue_item};
pub use state_handler::QueueStateEventHandler;
