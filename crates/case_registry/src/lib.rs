mod dispatch;
mod registry;

pub use dispatch::Dispatcher;
pub use registry::CaseRegistry;
pub use storage::StoreError;
