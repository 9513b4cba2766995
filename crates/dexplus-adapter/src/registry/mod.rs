/*
[INPUT]:  Subscription requests and decoded envelopes from exchange adapters
[OUTPUT]: Channel registry with replay, fan-out and dead-letter retry
[POS]:    Registry layer - subscription bookkeeping
[UPDATE]: When adding registry features or changing exports
*/

pub mod dead_letter;
pub mod subscriptions;

pub use dead_letter::{DeadLetterQueue, spawn_sweeper};
pub use subscriptions::{ChannelRequest, Dispatched, FrameSender, Handler, SubscriptionRegistry};
