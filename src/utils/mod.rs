pub mod pcm;
pub use pcm::{PcmError, decode_pcm16_base64, encode_pcm16_base64, pcm_mime_type};
pub mod url_validation;
pub use url_validation::{UrlValidationError, validate_control_plane_url};
