//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

/// Human readable prefix for KYC request ids.
pub const REQUEST_HRP: &str = "kyc_";
/// Human readable prefix for stored file ids.
pub const FILE_HRP: &str = "file_";

// construct a unique, time ordered id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn new_request_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(REQUEST_HRP)
}

pub fn new_file_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(FILE_HRP)
}
