mod data_file;
mod deletion_request;
mod observation;

pub use data_file::*;
pub use deletion_request::*;
pub use observation::*;
