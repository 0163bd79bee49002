pub mod atomic_file;
pub mod retry;
