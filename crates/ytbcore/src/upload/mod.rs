//! Bilibili upload through biliup

pub mod account;
pub mod biliup;

pub use account::{fetch_account, BiliAccount};
pub use biliup::{BiliupInstall, UploadOutcome, UploadRequest, Uploader};
