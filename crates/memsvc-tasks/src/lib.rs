pub mod engine;
pub mod error;
pub mod handlers;
pub mod queue;
pub mod schema;
pub mod types;

pub use engine::{TaskEngine, TaskEngineConfig, TaskHandler};
pub use error::{Result, TaskError};
pub use handlers::{
    enqueue_vector_store_delete, vector_store_index_retry_seed, PendingIndexSource, VectorStore,
    VectorStoreDeleteHandler, VectorStoreIndexRetryHandler, VECTOR_STORE_DELETE, VECTOR_STORE_INDEX_RETRY,
};
pub use queue::TaskQueue;
pub use types::{NewTask, Task};
