use std::io;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt store file: {0}")]
    Corrupt(String),
}
