pub mod chunked_upload;
pub mod download;
pub mod health;
pub mod pieces;
pub mod proof_set;
pub mod upload;
