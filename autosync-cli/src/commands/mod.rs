pub mod daemon;
pub mod history;
pub mod init;
pub mod push;
pub mod restore;
pub mod status;
