mod ssh_executor;

pub use ssh_executor::{RemoteConfig, RemoteExecutor, RemoteTaskHandle};
