/*
[INPUT]:  API credentials from configuration
[OUTPUT]: Credential container and login signer
[POS]:    Auth layer - credentials and signing
[UPDATE]: When adding exchanges with authenticated streams
*/

pub mod credentials;
pub mod signer;

pub use credentials::ApiCredentials;
pub use signer::{HmacSigner, OKX_VERIFY_PATH};
