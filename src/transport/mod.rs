mod controller;
mod events;

pub use controller::TransportController;
pub use events::EventBus;
