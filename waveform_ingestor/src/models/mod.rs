pub mod block;
pub mod channel;
pub mod request;
pub mod span;
