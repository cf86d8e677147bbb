pub mod connector;
pub mod error;
pub mod record;
pub mod util;

pub use connector::{RecordDestination, RecordSource, WriteFailure};
pub use error::{ErrorKind, PluginError};
pub use record::{Metadata, Operation, Record};
pub use util::now_nanos;
