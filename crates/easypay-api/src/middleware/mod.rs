pub mod request_id;
pub mod request_queue;

pub use request_id::{request_id_middleware, RequestMeta};
pub use request_queue::admission_middleware;
