//! Implementations of [`PolicySink`](crate::application::commit_policies::PolicySink).
//!
//! - **`stream`** – Frames commands over any async byte stream (TCP in
//!   production) and waits for the host's reply.
//! - **`mock`** – Records every call in memory; used by the `preview`
//!   command and by tests.

pub mod mock;
pub mod stream;

pub use crate::application::commit_policies::SinkError;
pub use mock::RecordingSink;
pub use stream::StreamSink;
