mod local_executor;

pub use local_executor::{LocalExecutor, LocalTaskHandle, LOCAL_ADDRESS};
