pub mod changes;
pub mod init;
pub mod status;
pub mod sync;
pub mod unlock;
