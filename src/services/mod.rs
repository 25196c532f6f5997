pub mod media;
pub mod pipeline;
pub mod providers;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod url_guard;
