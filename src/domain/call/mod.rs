//! Call bounded context - manages the lifecycle of calls

pub mod record;
pub mod repository;
pub mod session;
pub mod value_object;

pub use record::CallRecord;
pub use repository::CallRepository;
pub use session::{CallEnd, CallSessionManager};
pub use value_object::{Caller, CallerType, CallStatus, CallType};
