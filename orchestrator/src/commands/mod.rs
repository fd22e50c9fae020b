pub(crate) mod dlq;
pub(crate) mod enqueue;
pub(crate) mod health;
pub(crate) mod queue;
pub(crate) mod shared;
pub(crate) mod worker;

pub(crate) use dlq::dlq_requeue;
pub(crate) use enqueue::enqueue;
pub(crate) use health::check_store;
pub(crate) use queue::{queue_inspect, queue_stats};
pub(crate) use worker::run_worker;
