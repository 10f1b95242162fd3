//! Notification relay between the lifecycle bus and the tracker

mod dispatcher;

pub use dispatcher::NotificationRelay;
